//! In-memory cluster used by the tests.

use crate::backup::cassandra::{
    quote_identifier, CassandraConnector, CassandraSession, CqlValue, RowSet, TableIdentity,
};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::schema::{select_columns, ColumnDescriptor, TableProperties};
use bon::Builder;
use dyn_iter::IntoDynIterator;

#[derive(Clone, Debug, Builder)]
pub struct MemoryTable {
    pub identity: TableIdentity,
    #[builder(default)]
    pub columns: Vec<ColumnDescriptor>,
    pub properties: Option<TableProperties>,
    #[builder(default)]
    pub rows: Vec<Vec<CqlValue>>,
}

#[derive(Debug, Default)]
pub struct MemorySession {
    pub tables: Vec<MemoryTable>,
}

impl MemorySession {
    pub fn with_table(mut self, table: MemoryTable) -> Self {
        self.tables.push(table);
        self
    }

    fn table(&self, keyspace: &str, table: &str) -> Option<&MemoryTable> {
        self.tables
            .iter()
            .find(|t| t.identity.keyspace == keyspace && t.identity.table == table)
    }
}

impl CassandraSession for MemorySession {
    fn list_tables(&self) -> Result<Vec<TableIdentity>> {
        Ok(self.tables.iter().map(|t| t.identity.clone()).collect())
    }

    fn keyspace_ddl(&self, keyspace: &str) -> Result<String> {
        if self.tables.iter().any(|t| t.identity.keyspace == keyspace) {
            Ok(format!(
                "CREATE KEYSPACE {} WITH replication = {{'class':'SimpleStrategy','replication_factor':'1'}} AND durable_writes = true;\n",
                quote_identifier(keyspace)
            ))
        } else {
            Err(Error::KeyspaceNotFound(keyspace.to_string()))
        }
    }

    fn fetch_table_properties(
        &self,
        keyspace: &str,
        table: &str,
    ) -> Result<Option<TableProperties>> {
        Ok(self.table(keyspace, table).and_then(|t| t.properties.clone()))
    }

    fn fetch_columns(&self, keyspace: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
        Ok(self
            .table(keyspace, table)
            .map(|t| t.columns.clone())
            .unwrap_or_default())
    }

    fn stream_rows(&self, table: &TableIdentity) -> Result<RowSet<'_>> {
        let found = self
            .table(&table.keyspace, &table.table)
            .ok_or_else(|| Error::QueryFailure {
                query: format!("SELECT * FROM {}", table.cql_name()),
                reason: "unconfigured table".to_string(),
            })?;
        Ok(RowSet {
            columns: select_columns(found.columns.clone())
                .into_iter()
                .map(|c| c.name)
                .collect(),
            rows: found.rows.iter().cloned().map(Ok).into_dyn_iter(),
        })
    }
}

/// Hands out one session, or fails like an unreachable host.
#[derive(Debug)]
pub struct MemoryConnector {
    pub tables: Vec<MemoryTable>,
    pub reachable: bool,
}

impl CassandraConnector for MemoryConnector {
    type Session = MemorySession;

    fn connect(&self) -> Result<Self::Session> {
        if !self.reachable {
            return Err(Error::ConnectionFailure {
                host: "memory".to_string(),
                reason: "host unreachable".to_string(),
            });
        }
        Ok(MemorySession {
            tables: self.tables.clone(),
        })
    }
}
