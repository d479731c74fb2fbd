//! Database access layer.
//!
//! Wraps a PostgreSQL connection pool behind the [`Database`] trait so the
//! MCP tool layer can be tested against a mock backend. Also hosts the CRUD
//! SQL builder and the schema discovery service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod crud;
pub mod postgres;
pub mod schema;

pub use crud::{CrudExecutor, Filter, FilterOp};
pub use postgres::PgDatabase;
pub use schema::{ColumnInfo, SchemaService, TableInfo};

/// Result of a SQL query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    /// Rows as JSON objects keyed by column name.
    pub rows: Vec<serde_json::Map<String, serde_json::Value>>,
    /// Number of rows returned or affected.
    pub row_count: u64,
    /// Execution time in seconds.
    pub execution_time: f64,
    /// Column names in result order.
    pub columns: Vec<String>,
}

/// Abstraction over the PostgreSQL backend.
#[async_trait]
pub trait Database: Send + Sync {
    /// Execute a single query with positional parameters.
    async fn execute(&self, query: &str, params: &[serde_json::Value]) -> Result<QueryResult>;

    /// Execute multiple queries inside a single transaction.
    async fn execute_transaction(
        &self,
        queries: &[(String, Vec<serde_json::Value>)],
    ) -> Result<Vec<QueryResult>>;

    /// Lightweight connectivity probe.
    async fn health_check(&self) -> bool;

    /// Pool and server information for status reporting.
    async fn connection_info(&self) -> serde_json::Value;
}
