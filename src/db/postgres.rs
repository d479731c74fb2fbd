//! PostgreSQL backend built on sqlx.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, TypeInfo};
use tracing::{debug, error, info, warn};

use crate::config::config::DatabaseConfig;
use crate::error::{AppError, Result};

use super::{Database, QueryResult};

/// Statements that produce a row set and should go through `fetch_all`.
fn returns_rows(query: &str) -> bool {
    let head = query
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_uppercase();
    matches!(head.as_str(), "SELECT" | "WITH" | "SHOW" | "EXPLAIN" | "VALUES")
        || query.to_uppercase().contains("RETURNING")
}

/// sqlx-backed implementation of [`Database`].
pub struct PgDatabase {
    pool: PgPool,
    slow_query_threshold: Duration,
}

impl PgDatabase {
    /// Open a connection pool and verify connectivity.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!(
            max_connections = config.max_connections,
            "Initializing database connection pool"
        );

        let pool = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .idle_timeout(Duration::from_secs(config.idle_timeout))
            .connect(&config.url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;
        info!("Database connection pool initialized");

        Ok(Self {
            pool,
            slow_query_threshold: Duration::from_secs(config.max_query_execution_time),
        })
    }

    /// Build a pool-backed instance from an existing pool. Used by tests.
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            slow_query_threshold: Duration::from_secs(30),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn run_once(&self, query: &str, params: &[serde_json::Value]) -> Result<QueryResult> {
        let start = Instant::now();

        let result = if returns_rows(query) {
            let rows = bind_params(sqlx::query(query), params)
                .fetch_all(&self.pool)
                .await?;
            let columns = rows
                .first()
                .map(|row| {
                    row.columns()
                        .iter()
                        .map(|c| c.name().to_string())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            let decoded: Vec<_> = rows.iter().map(row_to_json).collect();
            QueryResult {
                row_count: decoded.len() as u64,
                rows: decoded,
                execution_time: start.elapsed().as_secs_f64(),
                columns,
            }
        } else {
            let done = bind_params(sqlx::query(query), params)
                .execute(&self.pool)
                .await?;
            QueryResult {
                rows: Vec::new(),
                row_count: done.rows_affected(),
                execution_time: start.elapsed().as_secs_f64(),
                columns: Vec::new(),
            }
        };

        if start.elapsed() > self.slow_query_threshold {
            warn!(
                execution_time = result.execution_time,
                "Slow query detected"
            );
        }

        Ok(result)
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn execute(&self, query: &str, params: &[serde_json::Value]) -> Result<QueryResult> {
        debug!(query = %query.chars().take(100).collect::<String>(), "Executing query");

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.run_once(query, params).await {
                Ok(result) => {
                    debug!(
                        row_count = result.row_count,
                        execution_time = result.execution_time,
                        "Query executed"
                    );
                    return Ok(result);
                }
                Err(AppError::Connection(msg)) if attempt < 3 => {
                    warn!(attempt, error = %msg, "Transient database error, retrying");
                    tokio::time::sleep(Duration::from_millis(500u64 << attempt)).await;
                }
                Err(e) => {
                    error!(error = %e, "Query failed");
                    return Err(e);
                }
            }
        }
    }

    async fn execute_transaction(
        &self,
        queries: &[(String, Vec<serde_json::Value>)],
    ) -> Result<Vec<QueryResult>> {
        let start = Instant::now();
        let mut tx = self.pool.begin().await?;
        let mut results = Vec::with_capacity(queries.len());

        for (query, params) in queries {
            let rows = bind_params(sqlx::query(query), params)
                .fetch_all(&mut *tx)
                .await?;
            let columns = rows
                .first()
                .map(|row| {
                    row.columns()
                        .iter()
                        .map(|c| c.name().to_string())
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default();
            let decoded: Vec<_> = rows.iter().map(row_to_json).collect();
            results.push(QueryResult {
                row_count: decoded.len() as u64,
                rows: decoded,
                execution_time: 0.0,
                columns,
            });
        }

        tx.commit().await?;
        info!(
            query_count = queries.len(),
            execution_time = start.elapsed().as_secs_f64(),
            "Transaction committed"
        );
        Ok(results)
    }

    async fn health_check(&self) -> bool {
        match sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
        {
            Ok(1) => true,
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "Database health check failed");
                false
            }
        }
    }

    async fn connection_info(&self) -> serde_json::Value {
        let version: Option<String> = sqlx::query_scalar("SELECT version()")
            .fetch_one(&self.pool)
            .await
            .ok();
        let size: Option<String> =
            sqlx::query_scalar("SELECT pg_size_pretty(pg_database_size(current_database()))")
                .fetch_one(&self.pool)
                .await
                .ok();

        match version {
            Some(version) => serde_json::json!({
                "status": "connected",
                "pool_size": self.pool.size(),
                "pool_idle": self.pool.num_idle(),
                "version": version,
                "database_size": size,
            }),
            None => serde_json::json!({ "status": "error" }),
        }
    }
}

/// Bind JSON parameters positionally. Arrays and objects go over the wire
/// as jsonb.
fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [serde_json::Value],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            serde_json::Value::Null => query.bind(Option::<String>::None),
            serde_json::Value::Bool(b) => query.bind(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query.bind(i)
                } else {
                    query.bind(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => query.bind(s.as_str()),
            other => query.bind(other),
        };
    }
    query
}

/// Decode a row into a JSON object keyed by column name.
fn row_to_json(row: &PgRow) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), decode_column(row, idx));
    }
    map
}

fn decode_column(row: &PgRow, idx: usize) -> serde_json::Value {
    let type_name = row.columns()[idx].type_info().name().to_uppercase();
    match type_name.as_str() {
        "BOOL" => row
            .try_get::<Option<bool>, _>(idx)
            .map(|v| v.map_or(serde_json::Value::Null, serde_json::Value::Bool))
            .unwrap_or(serde_json::Value::Null),
        "INT2" => opt_number(row.try_get::<Option<i16>, _>(idx).map(|v| v.map(i64::from))),
        "INT4" => opt_number(row.try_get::<Option<i32>, _>(idx).map(|v| v.map(i64::from))),
        "INT8" => opt_number(row.try_get::<Option<i64>, _>(idx)),
        "FLOAT4" => opt_float(row.try_get::<Option<f32>, _>(idx).map(|v| v.map(f64::from))),
        "FLOAT8" => opt_float(row.try_get::<Option<f64>, _>(idx)),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => opt_string(row.try_get(idx)),
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(idx)
            .map(|v| match v {
                Some(u) => serde_json::Value::String(u.to_string()),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .map(|v| match v {
                Some(t) => serde_json::Value::String(t.to_rfc3339()),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .map(|v| match v {
                Some(t) => serde_json::Value::String(t.to_string()),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)
            .map(|v| match v {
                Some(d) => serde_json::Value::String(d.to_string()),
                None => serde_json::Value::Null,
            })
            .unwrap_or(serde_json::Value::Null),
        "JSON" | "JSONB" => row
            .try_get::<Option<serde_json::Value>, _>(idx)
            .map(|v| v.unwrap_or(serde_json::Value::Null))
            .unwrap_or(serde_json::Value::Null),
        // Unknown types fall back to text, else null.
        _ => opt_string(row.try_get(idx)),
    }
}

fn opt_number(value: std::result::Result<Option<i64>, sqlx::Error>) -> serde_json::Value {
    match value {
        Ok(Some(n)) => serde_json::Value::Number(n.into()),
        _ => serde_json::Value::Null,
    }
}

fn opt_float(value: std::result::Result<Option<f64>, sqlx::Error>) -> serde_json::Value {
    match value {
        Ok(Some(f)) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        _ => serde_json::Value::Null,
    }
}

fn opt_string(value: std::result::Result<Option<String>, sqlx::Error>) -> serde_json::Value {
    match value {
        Ok(Some(s)) => serde_json::Value::String(s),
        _ => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_rows_detection() {
        assert!(returns_rows("SELECT * FROM users"));
        assert!(returns_rows("  with x as (select 1) select * from x"));
        assert!(returns_rows("EXPLAIN SELECT 1"));
        assert!(returns_rows("INSERT INTO t (a) VALUES (1) RETURNING id"));
        assert!(!returns_rows("INSERT INTO t (a) VALUES (1)"));
        assert!(!returns_rows("UPDATE t SET a = 1"));
        assert!(!returns_rows("DELETE FROM t"));
    }
}
