pub mod cqlsh;
#[cfg(test)]
pub mod memory;

use crate::backup::result_error::result::Result;
use crate::backup::schema::{ColumnDescriptor, TableProperties};
use chrono::{DateTime, FixedOffset};
use derive_more::Display;
use dyn_iter::DynIter;
use std::fmt::{Debug, Formatter};

/// A table as listed in `system_schema.tables`.
#[derive(Clone, Debug, Display, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("{keyspace}.{table}")]
pub struct TableIdentity {
    pub keyspace: String,
    pub table: String,
}

impl TableIdentity {
    pub fn new<K: Into<String>, T: Into<String>>(keyspace: K, table: T) -> Self {
        Self {
            keyspace: keyspace.into(),
            table: table.into(),
        }
    }

    /// `keyspace.table` with identifiers quoted where CQL would otherwise
    /// fold their case.
    pub fn cql_name(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.keyspace),
            quote_identifier(&self.table)
        )
    }
}

pub fn quote_identifier(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\"\""))
    }
}

/// A single cell value as handed to the row encoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CqlValue {
    Null,
    Text(String),
    Timestamp(DateTime<FixedOffset>),
    Boolean(bool),
    Int(i64),
    /// Any other value, already in its textual form.
    Other(String),
}

/// Rows of one `SELECT *`, column names in cell order.
pub struct RowSet<'a> {
    pub columns: Vec<String>,
    pub rows: DynIter<'a, Result<Vec<CqlValue>>>,
}

impl Debug for RowSet<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowSet")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

/// Opens sessions against the cluster.
pub trait CassandraConnector {
    type Session: CassandraSession;

    fn connect(&self) -> Result<Self::Session>;
}

/// Catalog and data access used by a backup run.
///
/// Implementations must be shareable between pool threads when tables are
/// backed up in parallel.
pub trait CassandraSession: Sync {
    fn list_tables(&self) -> Result<Vec<TableIdentity>>;

    fn keyspace_ddl(&self, keyspace: &str) -> Result<String>;

    fn fetch_table_properties(&self, keyspace: &str, table: &str)
        -> Result<Option<TableProperties>>;

    fn fetch_columns(&self, keyspace: &str, table: &str) -> Result<Vec<ColumnDescriptor>>;

    fn stream_rows(&self, table: &TableIdentity) -> Result<RowSet<'_>>;
}
