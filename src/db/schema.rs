//! Schema discovery with a short-lived cache.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Result;

use super::Database;

/// Column metadata from information_schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub default_value: Option<String>,
    pub max_length: Option<i64>,
    pub is_primary_key: bool,
}

/// Table metadata, optionally with columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub schema: String,
    pub table_type: String,
    pub columns: Vec<ColumnInfo>,
    pub size: Option<String>,
}

/// Snapshot of the discovered schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub tables: Vec<TableInfo>,
    pub total_tables: usize,
    pub total_views: usize,
    pub database_size: Option<String>,
    pub last_updated: DateTime<Utc>,
}

const CACHE_TTL_SECS: i64 = 300;

/// Discovers and caches table metadata.
pub struct SchemaService {
    db: Arc<dyn Database>,
    cache: Mutex<HashMap<String, (SchemaSnapshot, DateTime<Utc>)>>,
}

impl SchemaService {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Full schema information for a schema, or a single table when
    /// `table_name` is given.
    pub async fn get_schema(
        &self,
        table_name: Option<&str>,
        schema_name: &str,
        include_columns: bool,
    ) -> Result<SchemaSnapshot> {
        let cache_key = format!(
            "{schema_name}:{}:{include_columns}",
            table_name.unwrap_or("*")
        );

        if let Some(snapshot) = self.cached(&cache_key) {
            debug!(cache_key, "Returning cached schema info");
            return Ok(snapshot);
        }

        info!(schema = schema_name, table = ?table_name, "Discovering database schema");

        let mut sql = String::from(
            "SELECT table_name, table_schema, table_type \
             FROM information_schema.tables \
             WHERE table_schema = $1 \
             AND table_type IN ('BASE TABLE', 'VIEW', 'MATERIALIZED VIEW')",
        );
        let mut params = vec![serde_json::Value::String(schema_name.to_string())];
        if let Some(table) = table_name {
            sql.push_str(" AND table_name = $2");
            params.push(serde_json::Value::String(table.to_string()));
        }
        sql.push_str(" ORDER BY table_name");

        let result = self.db.execute(&sql, &params).await?;

        let mut tables = Vec::with_capacity(result.rows.len());
        for row in &result.rows {
            let name = str_field(row, "table_name");
            let schema = str_field(row, "table_schema");
            let table_type = str_field(row, "table_type");

            let columns = if include_columns {
                self.table_columns(&name, &schema).await?
            } else {
                Vec::new()
            };
            let size = self.table_size(&name, &schema).await;

            tables.push(TableInfo {
                name,
                schema,
                table_type,
                columns,
                size,
            });
        }

        let snapshot = SchemaSnapshot {
            total_tables: tables
                .iter()
                .filter(|t| t.table_type == "BASE TABLE")
                .count(),
            total_views: tables.iter().filter(|t| t.table_type == "VIEW").count(),
            database_size: self.database_size().await,
            tables,
            last_updated: Utc::now(),
        };

        self.cache
            .lock()
            .insert(cache_key, (snapshot.clone(), Utc::now()));

        info!(
            total_tables = snapshot.total_tables,
            total_views = snapshot.total_views,
            "Schema discovery completed"
        );
        Ok(snapshot)
    }

    /// Column metadata for one table, primary key flagged.
    pub async fn table_columns(
        &self,
        table_name: &str,
        schema_name: &str,
    ) -> Result<Vec<ColumnInfo>> {
        let sql = "SELECT \
                c.column_name, \
                c.data_type, \
                c.is_nullable, \
                c.column_default, \
                c.character_maximum_length, \
                CASE WHEN pk.column_name IS NOT NULL THEN true ELSE false END AS is_primary_key \
            FROM information_schema.columns c \
            LEFT JOIN ( \
                SELECT ku.column_name \
                FROM information_schema.table_constraints tc \
                JOIN information_schema.key_column_usage ku \
                    ON tc.constraint_name = ku.constraint_name \
                WHERE tc.table_name = $1 \
                AND tc.table_schema = $2 \
                AND tc.constraint_type = 'PRIMARY KEY' \
            ) pk ON c.column_name = pk.column_name \
            WHERE c.table_name = $1 \
            AND c.table_schema = $2 \
            ORDER BY c.ordinal_position";

        let params = vec![
            serde_json::Value::String(table_name.to_string()),
            serde_json::Value::String(schema_name.to_string()),
        ];
        let result = self.db.execute(sql, &params).await?;

        Ok(result
            .rows
            .iter()
            .map(|row| ColumnInfo {
                name: str_field(row, "column_name"),
                data_type: str_field(row, "data_type"),
                is_nullable: str_field(row, "is_nullable") == "YES",
                default_value: row
                    .get("column_default")
                    .and_then(|v| v.as_str())
                    .map(String::from),
                max_length: row
                    .get("character_maximum_length")
                    .and_then(|v| v.as_i64()),
                is_primary_key: row
                    .get("is_primary_key")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            })
            .collect())
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
        info!("Schema cache cleared");
    }

    fn cached(&self, key: &str) -> Option<SchemaSnapshot> {
        let mut cache = self.cache.lock();
        if let Some((snapshot, stored_at)) = cache.get(key) {
            if Utc::now() - *stored_at < Duration::seconds(CACHE_TTL_SECS) {
                return Some(snapshot.clone());
            }
            cache.remove(key);
        }
        None
    }

    async fn database_size(&self) -> Option<String> {
        let result = self
            .db
            .execute(
                "SELECT pg_size_pretty(pg_database_size(current_database())) AS size",
                &[],
            )
            .await
            .ok()?;
        result.rows.first().map(|row| str_field(row, "size"))
    }

    async fn table_size(&self, table_name: &str, schema_name: &str) -> Option<String> {
        let params = vec![serde_json::Value::String(format!(
            "\"{schema_name}\".\"{table_name}\""
        ))];
        let result = self
            .db
            .execute(
                "SELECT pg_size_pretty(pg_total_relation_size($1::regclass)) AS size",
                &params,
            )
            .await
            .ok()?;
        result.rows.first().map(|row| str_field(row, "size"))
    }
}

fn str_field(row: &serde_json::Map<String, serde_json::Value>, key: &str) -> String {
    row.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}
