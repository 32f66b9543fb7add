//! Delimited text encoding of table rows.
//!
//! Text cells are escaped backslash style (`\n`, `\"`, `\x1f`, ...) and
//! wrapped in double quotes whenever they needed escaping or contain a
//! delimiter. Rows are always terminated with CRLF.

use crate::backup::cassandra::CqlValue;
use crate::backup::counter::RowCounter;
use std::borrow::Cow;
use std::fmt::Write as _;
use std::io::{self, Write};

pub const ROW_TERMINATOR: &str = "\r\n";

/// The fixed `+0000` suffix is written whatever the value's offset is;
/// consumers of existing backups rely on the fixed width.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f+0000";

/// Encodes one cell.
pub fn encode_cell(value: &CqlValue) -> Cow<'_, str> {
    match value {
        CqlValue::Null => Cow::Borrowed(""),
        CqlValue::Timestamp(ts) => Cow::Owned(ts.format(TIMESTAMP_FORMAT).to_string()),
        CqlValue::Text(text) => encode_text(text),
        CqlValue::Boolean(b) => Cow::Owned(b.to_string()),
        CqlValue::Int(i) => Cow::Owned(i.to_string()),
        CqlValue::Other(other) => Cow::Borrowed(other.as_str()),
    }
}

/// Escapes a text cell and quotes it when required.
pub fn encode_text(text: &str) -> Cow<'_, str> {
    let mut escaped = String::with_capacity(text.len());
    let mut must_quote = false;

    for c in text.chars() {
        match c {
            '\n' => escaped.push_str(r"\n"),
            '\r' => escaped.push_str(r"\r"),
            '\t' => escaped.push_str(r"\t"),
            '"' => escaped.push_str(r#"\""#),
            '\\' => escaped.push_str(r"\\"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(escaped, r"\x{:02x}", c as u32);
            }
            c => {
                escaped.push(c);
                if c == ',' {
                    must_quote = true;
                }
                continue;
            }
        }
        must_quote = true;
    }

    // Every substitution sets must_quote, so an unquoted cell is the input.
    if must_quote {
        Cow::Owned(format!("\"{escaped}\""))
    } else {
        Cow::Borrowed(text)
    }
}

/// Encodes a row as `cell_count` comma separated cells, without the line
/// terminator. Missing trailing values are written as nulls.
pub fn encode_row(values: &[CqlValue], cell_count: usize) -> String {
    let mut row = String::new();
    for i in 0..cell_count {
        if i > 0 {
            row.push(',');
        }
        row.push_str(&encode_cell(values.get(i).unwrap_or(&CqlValue::Null)));
    }
    row
}

/// Writes encoded rows and counts them.
pub struct RowWriter<'c, W: Write> {
    writer: W,
    cell_count: usize,
    counter: &'c RowCounter,
}

impl<'c, W: Write> RowWriter<'c, W> {
    /// Starts a new pass; the counter is reset before the first row.
    pub fn new(writer: W, cell_count: usize, counter: &'c RowCounter) -> Self {
        counter.reset();
        Self {
            writer,
            cell_count,
            counter,
        }
    }

    pub fn write_row(&mut self, values: &[CqlValue]) -> io::Result<()> {
        let row = encode_row(values, self.cell_count);
        self.writer.write_all(row.as_bytes())?;
        self.writer.write_all(ROW_TERMINATOR.as_bytes())?;
        self.counter.increment();
        tracing::trace!("Wrote row {}", self.counter.read());
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}
