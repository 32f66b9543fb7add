//! Database access through the `cqlsh` command line client.
//!
//! Every call runs one `SELECT JSON ...` statement and reads one JSON
//! document per result row from cqlsh's tabular output. Row data is streamed
//! from the child's stdout, so large tables are never held in memory.

use crate::backup::cassandra::{
    quote_identifier, CassandraConnector, CassandraSession, CqlValue, RowSet, TableIdentity,
};
use crate::backup::function_path;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithFnName;
use crate::backup::schema::{
    quote_literal, select_columns, single_quoted_map, ColumnDescriptor, ColumnKind, TableProperties,
};
use bon::Builder;
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use dyn_iter::IntoDynIterator;
use function_name::named;
use getset::Getters;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Lines};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::Duration;
use validator::Validate;

/// Connection settings for the cluster.
///
/// Credentials are optional; without them cqlsh connects anonymously.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct CqlshConfig {
    #[validate(length(min = 1))]
    #[builder(into)]
    host: String,
    port: Option<u16>,
    #[builder(into)]
    username: Option<String>,
    #[builder(into)]
    password: Option<RedactedString>,
    /// Path of the cqlsh executable.
    #[serde(default = "default_cqlsh")]
    #[builder(default = default_cqlsh(), into)]
    cqlsh: PathBuf,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    #[builder(default = default_request_timeout())]
    request_timeout: Duration,
}

fn default_cqlsh() -> PathBuf {
    PathBuf::from("cqlsh")
}

/// Full table scans can be slow; match the three hour query timeout the
/// backups have always used.
fn default_request_timeout() -> Duration {
    Duration::from_secs(3 * 60 * 60)
}

impl CqlshConfig {
    fn command(&self, statement: &str) -> Command {
        let mut cmd = Command::new(&self.cqlsh);
        cmd.arg(&self.host);
        if let Some(port) = self.port {
            cmd.arg(port.to_string());
        }
        if let Some(username) = &self.username {
            cmd.arg("-u").arg(username);
        }
        if let Some(password) = &self.password {
            cmd.arg("-p").arg(password.inner());
        }
        cmd.arg("--no-color")
            .arg(format!(
                "--request-timeout={}",
                self.request_timeout.as_secs().max(1)
            ))
            .arg("-e")
            .arg(statement)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Runs one statement and collects the JSON rows it printed.
    fn query<T: DeserializeOwned>(&self, statement: &str) -> Result<Vec<T>> {
        tracing::trace!("cqlsh -e {statement:?}");
        let output = self.command(statement).output()?;
        if !output.status.success() {
            return Err(Error::QueryFailure {
                query: statement.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(json_line)
            .map(|line| serde_json::from_str(&line).map_err(Error::from))
            .collect()
    }
}

/// Extracts the JSON document of a result row, undoing the escaping cqlsh
/// applies to text output. Headers, separators and the row count footer
/// yield `None`.
pub fn json_line(line: &str) -> Option<String> {
    let line = line.trim();
    if line.starts_with('{') {
        Some(unescape_cqlsh(line))
    } else {
        None
    }
}

/// cqlsh doubles backslashes and prints control characters (`\x00-\x1f`,
/// `\x7f-\xa0`) as `\xNN`, `\n`, `\r` or `\t`. The result has to stay valid
/// JSON, so control characters below 0x20 come back as `\u00NN` escapes.
fn unescape_cqlsh(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('\\') => {
                chars.next();
                out.push('\\');
            }
            Some('x') => {
                let hex: String = chars.clone().skip(1).take(2).collect();
                let valid = hex.len() == 2 && hex.chars().all(|h| h.is_ascii_hexdigit());
                match u8::from_str_radix(&hex, 16) {
                    Ok(b) if valid => {
                        chars.nth(2);
                        if b < 0x20 {
                            out.push_str(&format!("\\u{b:04x}"));
                        } else {
                            out.push(char::from(b));
                        }
                    }
                    _ => out.push('\\'),
                }
            }
            _ => out.push('\\'),
        }
    }
    out
}

/// Converts one JSON cell into a value, using the declared column type to
/// recover timestamps.
pub fn json_to_cql(value: &Value, cql_type: &str) -> CqlValue {
    match value {
        Value::Null => CqlValue::Null,
        Value::Bool(b) => CqlValue::Boolean(*b),
        Value::Number(n) => n
            .as_i64()
            .map(CqlValue::Int)
            .unwrap_or_else(|| CqlValue::Other(n.to_string())),
        Value::String(s) if cql_type == "timestamp" => parse_timestamp(s)
            .map(CqlValue::Timestamp)
            .unwrap_or_else(|| CqlValue::Text(s.clone())),
        Value::String(s) => CqlValue::Text(s.clone()),
        collection => CqlValue::Text(collection.to_string()),
    }
}

/// Cassandra renders timestamps in JSON as `2021-03-04 05:06:07.123Z`.
fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    match s.strip_suffix('Z') {
        Some(naive) => NaiveDateTime::parse_from_str(naive, "%Y-%m-%d %H:%M:%S%.f")
            .ok()
            .map(|dt| dt.and_utc().fixed_offset()),
        None => DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%z").ok(),
    }
}

#[derive(Clone, Debug)]
pub struct CqlshConnector {
    config: CqlshConfig,
}

impl CqlshConnector {
    pub fn new(config: CqlshConfig) -> Self {
        Self { config }
    }
}

#[derive(Deserialize)]
struct ReleaseRow {
    release_version: String,
}

impl CassandraConnector for CqlshConnector {
    type Session = CqlshSession;

    fn connect(&self) -> Result<Self::Session> {
        if self.config.username.is_some() || self.config.password.is_some() {
            tracing::info!("Using username & password");
        }
        let rows: Vec<ReleaseRow> = self
            .config
            .query("SELECT JSON release_version FROM system.local")
            .map_err(|e| Error::ConnectionFailure {
                host: self.config.host.clone(),
                reason: e.to_string(),
            })?;
        match rows.first() {
            Some(row) => tracing::info!(
                "Connected to cassandra {} at {}",
                row.release_version,
                self.config.host
            ),
            None => tracing::info!("Connected to cassandra at {}", self.config.host),
        }

        Ok(CqlshSession {
            config: self.config.clone(),
        })
    }
}

#[derive(Clone, Debug)]
pub struct CqlshSession {
    config: CqlshConfig,
}

#[derive(Deserialize)]
struct TableRow {
    keyspace_name: String,
    table_name: String,
}

#[derive(Deserialize)]
struct KeyspaceRow {
    durable_writes: bool,
    replication: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct ColumnRow {
    column_name: String,
    #[serde(rename = "type")]
    cql_type: String,
    kind: String,
    position: i32,
    clustering_order: Option<String>,
}

impl From<ColumnRow> for ColumnDescriptor {
    fn from(row: ColumnRow) -> Self {
        let kind = ColumnKind::from_catalog(&row.kind);
        let descriptor = ColumnDescriptor::new(row.column_name, row.cql_type, kind, row.position);
        match (kind, row.clustering_order) {
            (ColumnKind::Clustering, Some(order)) => descriptor.with_clustering_order(order),
            _ => descriptor,
        }
    }
}

impl CassandraSession for CqlshSession {
    fn list_tables(&self) -> Result<Vec<TableIdentity>> {
        let rows: Vec<TableRow> = self
            .config
            .query("SELECT JSON keyspace_name, table_name FROM system_schema.tables")?;
        Ok(rows
            .into_iter()
            .map(|r| TableIdentity::new(r.keyspace_name, r.table_name))
            .collect())
    }

    #[named]
    fn keyspace_ddl(&self, keyspace: &str) -> Result<String> {
        let rows: Vec<KeyspaceRow> = self
            .config
            .query(&format!(
                "SELECT JSON durable_writes, replication FROM system_schema.keyspaces WHERE keyspace_name = {}",
                quote_literal(keyspace)
            ))
            .with_fn_name(function_path!())?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| Error::KeyspaceNotFound(keyspace.to_string()))?;

        Ok(format!(
            "CREATE KEYSPACE {} WITH replication = {} AND durable_writes = {};\n",
            quote_identifier(keyspace),
            single_quoted_map(&row.replication),
            row.durable_writes
        ))
    }

    #[named]
    fn fetch_table_properties(
        &self,
        keyspace: &str,
        table: &str,
    ) -> Result<Option<TableProperties>> {
        let rows: Vec<TableProperties> = self
            .config
            .query(&format!(
                "SELECT JSON * FROM system_schema.tables WHERE keyspace_name = {} AND table_name = {}",
                quote_literal(keyspace),
                quote_literal(table)
            ))
            .with_fn_name(function_path!())?;
        Ok(rows.into_iter().next())
    }

    #[named]
    fn fetch_columns(&self, keyspace: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
        let rows: Vec<ColumnRow> = self
            .config
            .query(&format!(
                "SELECT JSON column_name, type, kind, position, clustering_order FROM system_schema.columns WHERE keyspace_name = {} AND table_name = {}",
                quote_literal(keyspace),
                quote_literal(table)
            ))
            .with_fn_name(function_path!())?;
        Ok(rows.into_iter().map(ColumnDescriptor::from).collect())
    }

    fn stream_rows(&self, table: &TableIdentity) -> Result<RowSet<'_>> {
        let columns = select_columns(self.fetch_columns(&table.keyspace, &table.table)?);
        let query = format!("SELECT JSON * FROM {}", table.cql_name());

        let mut child = self.config.command(&query).spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("cqlsh stdout not captured"))?;

        let rows = CqlshRows {
            child: Some(child),
            lines: BufReader::new(stdout).lines(),
            query,
            columns: columns
                .iter()
                .map(|c| (c.name.clone(), c.cql_type.clone()))
                .collect(),
        };

        Ok(RowSet {
            columns: columns.into_iter().map(|c| c.name).collect(),
            rows: rows.into_dyn_iter(),
        })
    }
}

/// Rows read from a running `SELECT JSON *`. The exit status is checked once
/// stdout is exhausted.
struct CqlshRows {
    child: Option<Child>,
    lines: Lines<BufReader<ChildStdout>>,
    query: String,
    columns: Vec<(String, String)>,
}

impl CqlshRows {
    fn decode(&self, line: &str) -> Result<Vec<CqlValue>> {
        let row: serde_json::Map<String, Value> = serde_json::from_str(line)?;
        Ok(self
            .columns
            .iter()
            .map(|(name, cql_type)| {
                row.get(name)
                    .or_else(|| row.get(&format!("\"{name}\"")))
                    .map(|v| json_to_cql(v, cql_type))
                    .unwrap_or(CqlValue::Null)
            })
            .collect())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(child) = self.child.take() else {
            return Ok(());
        };
        let output = child.wait_with_output()?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Error::QueryFailure {
                query: self.query.clone(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

impl Iterator for CqlshRows {
    type Item = Result<Vec<CqlValue>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next() {
                Some(Ok(line)) => {
                    if let Some(json) = json_line(&line) {
                        return Some(self.decode(&json));
                    }
                }
                Some(Err(e)) => return Some(Err(e.into())),
                None => return self.finish().err().map(Err),
            }
        }
    }
}

impl Drop for CqlshRows {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
