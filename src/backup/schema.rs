//! Rebuilds `CREATE TABLE` statements from `system_schema` rows.
//!
//! Cassandra has no server-side per-table DDL export, so the statement is
//! assembled from the column and table-option catalog rows.

use crate::backup::cassandra::{quote_identifier, CassandraSession, TableIdentity};
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithFnName;
use function_name::named;
use itertools::Itertools;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt::Write;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    PartitionKey,
    Clustering,
    Static,
    Regular,
}

impl ColumnKind {
    /// Maps a `system_schema.columns.kind` value. Unknown kinds are regular.
    pub fn from_catalog(kind: &str) -> Self {
        match kind {
            "partition_key" => Self::PartitionKey,
            "clustering" => Self::Clustering,
            "static" => Self::Static,
            _ => Self::Regular,
        }
    }

    fn is_primary_key(self) -> bool {
        matches!(self, Self::PartitionKey | Self::Clustering)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub cql_type: String,
    pub kind: ColumnKind,
    pub position: i32,
    pub clustering_order: Option<String>,
}

impl ColumnDescriptor {
    pub fn new<N: Into<String>, T: Into<String>>(
        name: N,
        cql_type: T,
        kind: ColumnKind,
        position: i32,
    ) -> Self {
        Self {
            name: name.into(),
            cql_type: cql_type.into(),
            kind,
            position,
            clustering_order: None,
        }
    }

    pub fn with_clustering_order<S: Into<String>>(mut self, order: S) -> Self {
        self.clustering_order = Some(order.into());
        self
    }
}

/// One `system_schema.tables` row, restricted to the options written back
/// into the DDL. The read repair chances were dropped in Cassandra 4.0 and are
/// therefore optional.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct TableProperties {
    pub bloom_filter_fp_chance: f64,
    #[serde(default)]
    pub caching: BTreeMap<String, String>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub compaction: BTreeMap<String, String>,
    #[serde(default)]
    pub compression: BTreeMap<String, String>,
    pub crc_check_chance: f64,
    #[serde(default)]
    pub dclocal_read_repair_chance: Option<f64>,
    pub default_time_to_live: i32,
    pub gc_grace_seconds: i32,
    pub max_index_interval: i32,
    pub memtable_flush_period_in_ms: i32,
    pub min_index_interval: i32,
    #[serde(default)]
    pub read_repair_chance: Option<f64>,
    #[serde(default)]
    pub speculative_retry: String,
}

impl TableProperties {
    /// Options in the order they are emitted, each already rendered as a CQL
    /// literal.
    pub fn cql_options(&self) -> Vec<(&'static str, String)> {
        let options = [
            ("bloom_filter_fp_chance", Some(self.bloom_filter_fp_chance.to_string())),
            ("caching", Some(single_quoted_map(&self.caching))),
            ("comment", Some(quote_literal(&self.comment))),
            ("compaction", Some(single_quoted_map(&self.compaction))),
            ("compression", Some(single_quoted_map(&self.compression))),
            ("crc_check_chance", Some(self.crc_check_chance.to_string())),
            (
                "dclocal_read_repair_chance",
                self.dclocal_read_repair_chance.map(|v| v.to_string()),
            ),
            ("default_time_to_live", Some(self.default_time_to_live.to_string())),
            ("gc_grace_seconds", Some(self.gc_grace_seconds.to_string())),
            ("max_index_interval", Some(self.max_index_interval.to_string())),
            (
                "memtable_flush_period_in_ms",
                Some(self.memtable_flush_period_in_ms.to_string()),
            ),
            ("min_index_interval", Some(self.min_index_interval.to_string())),
            ("read_repair_chance", self.read_repair_chance.map(|v| v.to_string())),
            ("speculative_retry", Some(quote_literal(&self.speculative_retry))),
        ];

        options
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, v)))
            .collect()
    }
}

/// CQL string literal, single quotes doubled.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Map literal in the CQL dialect: `{'key':'value',...}`.
pub fn single_quoted_map(map: &BTreeMap<String, String>) -> String {
    format!(
        "{{{}}}",
        map.iter()
            .map(|(k, v)| format!("{}:{}", quote_literal(k), quote_literal(v)))
            .join(",")
    )
}

/// Declaration order of the `CREATE TABLE` body: partition key columns, then
/// clustering columns, then the rest (static columns included). Each group
/// keeps ascending position; equal positions keep their catalog order.
pub fn sort_columns(columns: Vec<ColumnDescriptor>) -> Vec<ColumnDescriptor> {
    order_columns(columns, |kind| match kind {
        ColumnKind::PartitionKey => 0,
        ColumnKind::Clustering => 1,
        ColumnKind::Static | ColumnKind::Regular => 2,
    })
}

/// Column order of a `SELECT *`, where static columns come before the
/// regular ones.
pub fn select_columns(columns: Vec<ColumnDescriptor>) -> Vec<ColumnDescriptor> {
    order_columns(columns, |kind| match kind {
        ColumnKind::PartitionKey => 0,
        ColumnKind::Clustering => 1,
        ColumnKind::Static => 2,
        ColumnKind::Regular => 3,
    })
}

fn order_columns<F: Fn(ColumnKind) -> u8>(
    mut columns: Vec<ColumnDescriptor>,
    group: F,
) -> Vec<ColumnDescriptor> {
    // Stable, so equal positions keep their catalog order.
    columns.sort_by_key(|c| (group(c.kind), c.position));
    columns
}

/// Assembles the statement from already fetched catalog rows.
pub fn build_table_ddl(
    identity: &TableIdentity,
    columns: Vec<ColumnDescriptor>,
    properties: &TableProperties,
) -> String {
    let columns = sort_columns(columns);
    let mut ddl = String::new();

    // Writing into a String cannot fail.
    let _ = writeln!(ddl, "CREATE TABLE {} (", identity.cql_name());
    for column in &columns {
        let _ = writeln!(ddl, "    {} {},", quote_identifier(&column.name), column.cql_type);
    }

    let primary_key = columns
        .iter()
        .filter(|c| c.kind.is_primary_key())
        .map(|c| quote_identifier(&c.name))
        .join(", ");
    let _ = writeln!(ddl, "    PRIMARY KEY ({primary_key})");

    let clustering_order = columns
        .iter()
        .filter(|c| c.kind == ColumnKind::Clustering)
        .map(|c| match &c.clustering_order {
            Some(order) => format!("{} {}", quote_identifier(&c.name), order),
            None => quote_identifier(&c.name),
        })
        .join(", ");

    let options = properties.cql_options();
    if clustering_order.is_empty() {
        ddl.push_str(") WITH ");
    } else {
        let _ = write!(ddl, ") WITH CLUSTERING ORDER BY ({clustering_order})\n    AND ");
    }

    let body = options
        .iter()
        .map(|(name, value)| format!("{name} = {value}"))
        .join("\n    AND ");
    ddl.push_str(&body);
    ddl.push_str(";\n");
    ddl
}

/// `CREATE KEYSPACE` text, as provided by the database.
pub fn keyspace_ddl<S: CassandraSession + ?Sized>(session: &S, keyspace: &str) -> Result<String> {
    session.keyspace_ddl(keyspace)
}

/// Fetches the catalog rows for one table and rebuilds its `CREATE TABLE`.
#[named]
pub fn table_ddl<S: CassandraSession + ?Sized>(
    session: &S,
    identity: &TableIdentity,
) -> Result<String> {
    let properties = session
        .fetch_table_properties(&identity.keyspace, &identity.table)
        .with_fn_name(function_path!())?
        .ok_or_else(|| Error::SchemaNotFound {
            keyspace: identity.keyspace.to_string(),
            table: identity.table.to_string(),
        })?;

    let columns = session
        .fetch_columns(&identity.keyspace, &identity.table)
        .with_fn_name(function_path!())?;
    tracing::debug!("Rebuilding {} from {} columns", identity, columns.len());

    Ok(build_table_ddl(identity, columns, &properties))
}
