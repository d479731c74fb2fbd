//! Tool definitions and execution.
//!
//! Five tools are exposed: query_database, get_schema, crud_operations,
//! storage_operations and get_metrics. Execution failures surface as tool
//! results with `is_error` set rather than protocol errors.

use std::collections::BTreeMap;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{error, info, warn};

use crate::db::{CrudExecutor, Database, Filter, QueryResult, SchemaService};
use crate::error::AppError;
use crate::observability::Metrics;
use crate::security::{AdmissionPipeline, QueryAdmission, RiskLevel};
use crate::storage::StorageApi;

use super::protocol::{Tool, ToolContent, ToolParameter, ToolResult};

const MAX_DISPLAY_ROWS: usize = 100;
const MAX_CELL_WIDTH: usize = 50;
const SLOW_QUERY_SECS: f64 = 1.0;

/// Executes MCP tool invocations against the database and storage layers.
pub struct ToolRegistry {
    db: Arc<dyn Database>,
    schema: Arc<SchemaService>,
    crud: CrudExecutor,
    storage: Arc<dyn StorageApi>,
    pipeline: Arc<AdmissionPipeline>,
    metrics: Arc<Metrics>,
}

impl ToolRegistry {
    pub fn new(
        db: Arc<dyn Database>,
        schema: Arc<SchemaService>,
        storage: Arc<dyn StorageApi>,
        pipeline: Arc<AdmissionPipeline>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            crud: CrudExecutor::new(db.clone()),
            db,
            schema,
            storage,
            pipeline,
            metrics,
        }
    }

    /// Definitions served by tools/list.
    pub fn definitions(&self) -> Vec<Tool> {
        vec![
            Tool {
                name: "query_database".to_string(),
                description: "Execute SQL queries against the PostgreSQL database with risk screening".to_string(),
                parameters: BTreeMap::from([
                    (
                        "query".to_string(),
                        ToolParameter::new("string", "SQL query to execute").required(),
                    ),
                    (
                        "params".to_string(),
                        ToolParameter::new("array", "Positional query parameters"),
                    ),
                    (
                        "force_execute".to_string(),
                        ToolParameter::new(
                            "boolean",
                            "Execute even when the query requires confirmation",
                        )
                        .default_value(serde_json::json!(false)),
                    ),
                ]),
            },
            Tool {
                name: "get_schema".to_string(),
                description: "Inspect database schema: tables, views and columns".to_string(),
                parameters: BTreeMap::from([
                    (
                        "table_name".to_string(),
                        ToolParameter::new("string", "Limit output to a single table"),
                    ),
                    (
                        "include_columns".to_string(),
                        ToolParameter::new("boolean", "Include column details")
                            .default_value(serde_json::json!(true)),
                    ),
                ]),
            },
            Tool {
                name: "crud_operations".to_string(),
                description: "Structured create, read, update and delete operations".to_string(),
                parameters: BTreeMap::from([
                    (
                        "operation".to_string(),
                        ToolParameter::new("string", "Operation to perform")
                            .required()
                            .one_of(&["select", "insert", "update", "delete", "upsert"]),
                    ),
                    (
                        "table".to_string(),
                        ToolParameter::new("string", "Target table").required(),
                    ),
                    (
                        "data".to_string(),
                        ToolParameter::new("object", "Row data for insert, update and upsert"),
                    ),
                    (
                        "filters".to_string(),
                        ToolParameter::new(
                            "object",
                            "Column filters; values may be plain (equality) or operator objects",
                        ),
                    ),
                    (
                        "columns".to_string(),
                        ToolParameter::new("string", "Comma-separated columns for select"),
                    ),
                    (
                        "order_by".to_string(),
                        ToolParameter::new("string", "Order column; prefix with '-' for descending"),
                    ),
                    (
                        "limit".to_string(),
                        ToolParameter::new("integer", "Maximum rows for select"),
                    ),
                    (
                        "offset".to_string(),
                        ToolParameter::new("integer", "Rows to skip for select"),
                    ),
                    (
                        "on_conflict".to_string(),
                        ToolParameter::new("string", "Conflict column for insert and upsert"),
                    ),
                ]),
            },
            Tool {
                name: "storage_operations".to_string(),
                description: "Object storage operations: buckets, files and URLs".to_string(),
                parameters: BTreeMap::from([
                    (
                        "operation".to_string(),
                        ToolParameter::new("string", "Operation to perform")
                            .required()
                            .one_of(&[
                                "list_buckets",
                                "list",
                                "upload",
                                "download",
                                "delete",
                                "move",
                                "copy",
                                "get_public_url",
                                "create_signed_url",
                            ]),
                    ),
                    (
                        "bucket".to_string(),
                        ToolParameter::new("string", "Bucket name"),
                    ),
                    (
                        "path".to_string(),
                        ToolParameter::new("string", "Object path inside the bucket"),
                    ),
                    (
                        "content".to_string(),
                        ToolParameter::new("string", "File content for upload, base64 or plain text"),
                    ),
                    (
                        "content_type".to_string(),
                        ToolParameter::new("string", "MIME type for upload"),
                    ),
                    (
                        "from_path".to_string(),
                        ToolParameter::new("string", "Source path for move and copy"),
                    ),
                    (
                        "to_path".to_string(),
                        ToolParameter::new("string", "Destination path for move and copy"),
                    ),
                    (
                        "expires_in".to_string(),
                        ToolParameter::new("integer", "Signed URL lifetime in seconds")
                            .default_value(serde_json::json!(3600)),
                    ),
                    (
                        "as_base64".to_string(),
                        ToolParameter::new("boolean", "Return downloaded content as base64")
                            .default_value(serde_json::json!(true)),
                    ),
                    (
                        "upsert".to_string(),
                        ToolParameter::new("boolean", "Overwrite existing object on upload")
                            .default_value(serde_json::json!(false)),
                    ),
                ]),
            },
            Tool {
                name: "get_metrics".to_string(),
                description: "Server, database and security metrics".to_string(),
                parameters: BTreeMap::from([(
                    "metric_type".to_string(),
                    ToolParameter::new("string", "Which metric family to return")
                        .one_of(&["database", "server", "security", "prometheus", "all"])
                        .default_value(serde_json::json!("all")),
                )]),
            },
        ]
    }

    /// Dispatch a tool call by name.
    pub async fn call(
        &self,
        name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> ToolResult {
        let result = match name {
            "query_database" => self.query_database(arguments).await,
            "get_schema" => self.get_schema(arguments).await,
            "crud_operations" => self.crud_operations(arguments).await,
            "storage_operations" => self.storage_operations(arguments).await,
            "get_metrics" => self.get_metrics(arguments).await,
            other => ToolResult::error(format!("Unknown tool: {other}")),
        };
        self.metrics.record_tool_call(name, !result.is_error);
        result
    }

    async fn query_database(
        &self,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> ToolResult {
        let query = arguments
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if query.is_empty() {
            return ToolResult::error("Error: Query parameter is required");
        }

        let force_execute = arguments
            .get("force_execute")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let params: Vec<serde_json::Value> = arguments
            .get("params")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let admission = match self.pipeline.screen_query(query, force_execute) {
            Ok(admission) => admission,
            Err(AppError::QueryRejected { issues }) => {
                warn!(issues = issues.len(), "Query rejected");
                let mut lines = vec!["Query validation failed:".to_string()];
                for issue in &issues {
                    lines.push(format!("  - {issue}"));
                }
                let suggestions = self.pipeline.classifier().suggest(query);
                if !suggestions.is_empty() {
                    lines.push(String::new());
                    lines.push("Suggestions:".to_string());
                    for suggestion in suggestions {
                        lines.push(format!("  - {suggestion}"));
                    }
                }
                return ToolResult::error(lines.join("\n"));
            }
            Err(e) => return ToolResult::error(format!("Query screening failed: {e}")),
        };

        let (sql, validation) = match admission {
            QueryAdmission::NeedsConfirmation { validation } => {
                let mut lines = vec![format!(
                    "Query requires confirmation (risk level: {})",
                    validation.risk_level.as_str()
                )];
                for warning in &validation.warnings {
                    lines.push(format!("  - {warning}"));
                }
                lines.push(String::new());
                lines.push(
                    "Re-run with force_execute=true to execute this query.".to_string(),
                );
                return ToolResult::ok(vec![ToolContent::text(lines.join("\n"))]);
            }
            QueryAdmission::Execute { query, validation } => (query, validation),
        };

        match self.db.execute(&sql, &params).await {
            Ok(result) => {
                self.metrics.record_db_query(true);
                ToolResult::ok(format_query_result(&result, &validation.warnings, validation.risk_level))
            }
            Err(e) => {
                self.metrics.record_db_query(false);
                error!(error = %e, "Query execution failed");
                ToolResult::error(format!("Query execution failed: {e}"))
            }
        }
    }

    async fn get_schema(
        &self,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> ToolResult {
        let table_name = arguments.get("table_name").and_then(|v| v.as_str());
        let include_columns = arguments
            .get("include_columns")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let snapshot = match self.schema.get_schema(table_name, "public", include_columns).await {
            Ok(snapshot) => snapshot,
            Err(e) => return ToolResult::error(format!("Schema discovery failed: {e}")),
        };

        if let Some(table) = table_name {
            if snapshot.tables.is_empty() {
                return ToolResult::error(format!("Table '{table}' not found in schema 'public'"));
            }
        }

        let mut lines = vec![format!(
            "Schema 'public': {} tables, {} views{}",
            snapshot.total_tables,
            snapshot.total_views,
            snapshot
                .database_size
                .as_deref()
                .map(|s| format!(", database size {s}"))
                .unwrap_or_default()
        )];

        for table in &snapshot.tables {
            lines.push(String::new());
            lines.push(format!(
                "{} ({}){}",
                table.name,
                table.table_type.to_lowercase(),
                table
                    .size
                    .as_deref()
                    .map(|s| format!(", {s}"))
                    .unwrap_or_default()
            ));
            for column in &table.columns {
                let mut tags = Vec::new();
                if column.is_primary_key {
                    tags.push("primary key");
                }
                if !column.is_nullable {
                    tags.push("not null");
                }
                lines.push(format!(
                    "  {} {}{}",
                    column.name,
                    column.data_type,
                    if tags.is_empty() {
                        String::new()
                    } else {
                        format!(" [{}]", tags.join(", "))
                    }
                ));
            }
        }

        ToolResult::ok(vec![ToolContent::text(lines.join("\n"))])
    }

    async fn crud_operations(
        &self,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> ToolResult {
        let operation = arguments
            .get("operation")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let table = arguments.get("table").and_then(|v| v.as_str()).unwrap_or("");
        if table.is_empty() {
            return ToolResult::error("Error: 'table' is required");
        }

        let filters = match arguments.get("filters").and_then(|v| v.as_object()) {
            Some(map) => match Filter::parse_map(map) {
                Ok(filters) => filters,
                Err(e) => return ToolResult::error(format!("Error: {e}")),
            },
            None => Vec::new(),
        };
        let data = arguments.get("data");
        let on_conflict = arguments.get("on_conflict").and_then(|v| v.as_str());

        let result = match operation {
            "select" => {
                let columns = arguments.get("columns").and_then(|v| v.as_str());
                let order_by = arguments.get("order_by").and_then(|v| v.as_str());
                let limit = arguments.get("limit").and_then(|v| v.as_u64());
                let offset = arguments.get("offset").and_then(|v| v.as_u64());
                self.crud
                    .select(table, columns, &filters, order_by, limit, offset)
                    .await
            }
            "insert" => match data {
                Some(data) => self.crud.insert(table, data, on_conflict).await,
                None => return ToolResult::error("Error: 'data' is required for insert operation"),
            },
            "upsert" => match data {
                Some(data) => self.crud.upsert(table, data, on_conflict).await,
                None => return ToolResult::error("Error: 'data' is required for upsert operation"),
            },
            "update" => match data {
                Some(data) => {
                    if filters.is_empty() {
                        return ToolResult::error(
                            "Error: 'filters' are required for update operation",
                        );
                    }
                    self.crud.update(table, data, &filters).await
                }
                None => return ToolResult::error("Error: 'data' is required for update operation"),
            },
            "delete" => {
                if filters.is_empty() {
                    return ToolResult::error("Error: 'filters' are required for delete operation");
                }
                self.crud.delete(table, &filters).await
            }
            other => {
                return ToolResult::error(format!(
                    "Error: Unknown operation '{other}'. Supported operations: select, insert, update, delete, upsert"
                ));
            }
        };

        match result {
            Ok(result) => {
                info!(operation, table, count = result.row_count, "CRUD operation completed");
                let mut lines = vec![format!(
                    "{} completed on '{table}': {} row(s)",
                    operation.to_uppercase(),
                    result.row_count
                )];
                if !result.rows.is_empty() {
                    let shown = result.rows.len().min(20);
                    for row in result.rows.iter().take(shown) {
                        lines.push(
                            serde_json::to_string(row).unwrap_or_else(|_| "{}".to_string()),
                        );
                    }
                    if result.rows.len() > shown {
                        lines.push(format!("... and {} more rows", result.rows.len() - shown));
                    }
                }
                ToolResult::ok(vec![ToolContent::text(lines.join("\n"))])
            }
            Err(e) => ToolResult::error(format!("{} operation failed: {e}", operation.to_uppercase())),
        }
    }

    async fn storage_operations(
        &self,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> ToolResult {
        let operation = arguments
            .get("operation")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let bucket = arguments.get("bucket").and_then(|v| v.as_str()).unwrap_or("");
        let path = arguments.get("path").and_then(|v| v.as_str()).unwrap_or("");

        match operation {
            "list_buckets" => match self.storage.list_buckets().await {
                Ok(buckets) => {
                    let mut lines = vec![format!("Buckets ({}):", buckets.len())];
                    for bucket in &buckets {
                        lines.push(format!(
                            "  {} ({}){}",
                            bucket.name,
                            if bucket.public { "public" } else { "private" },
                            bucket
                                .created_at
                                .as_deref()
                                .map(|c| format!(", created {c}"))
                                .unwrap_or_default()
                        ));
                    }
                    ToolResult::ok(vec![ToolContent::text(lines.join("\n"))])
                }
                Err(e) => ToolResult::error(format!("LIST_BUCKETS operation failed: {e}")),
            },
            "list" => {
                if bucket.is_empty() {
                    return ToolResult::error("Error: 'bucket' is required for list operation");
                }
                let limit = arguments.get("limit").and_then(|v| v.as_u64());
                let offset = arguments.get("offset").and_then(|v| v.as_u64());
                match self.storage.list_objects(bucket, path, limit, offset).await {
                    Ok(objects) if objects.is_empty() => ToolResult::ok(vec![ToolContent::text(
                        format!("No files found in {bucket}/{path}"),
                    )]),
                    Ok(objects) => {
                        let mut lines = vec![format!("Files in {bucket}/{path}:")];
                        let shown = objects.len().min(20);
                        for object in objects.iter().take(shown) {
                            let size = object
                                .size()
                                .map(|s| format!(" ({s} bytes)"))
                                .unwrap_or_default();
                            let mime = object
                                .mime_type()
                                .map(|m| format!(" [{m}]"))
                                .unwrap_or_default();
                            lines.push(format!("  {}{size}{mime}", object.name));
                        }
                        if objects.len() > shown {
                            lines.push(format!("... and {} more files", objects.len() - shown));
                        }
                        ToolResult::ok(vec![ToolContent::text(lines.join("\n"))])
                    }
                    Err(e) => ToolResult::error(format!("LIST operation failed: {e}")),
                }
            }
            "upload" => {
                let content = arguments.get("content").and_then(|v| v.as_str());
                let Some(content) = content else {
                    return ToolResult::error(
                        "Error: 'bucket', 'path' and 'content' are required for upload operation",
                    );
                };
                if bucket.is_empty() || path.is_empty() {
                    return ToolResult::error(
                        "Error: 'bucket', 'path' and 'content' are required for upload operation",
                    );
                }
                // Content may arrive base64-encoded or as plain text.
                let bytes = BASE64
                    .decode(content)
                    .unwrap_or_else(|_| content.as_bytes().to_vec());
                let content_type = arguments
                    .get("content_type")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| {
                        mime_guess::from_path(path).first_or_octet_stream().to_string()
                    });
                let upsert = arguments
                    .get("upsert")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                match self
                    .storage
                    .upload(bucket, path, bytes, &content_type, upsert)
                    .await
                {
                    Ok(()) => ToolResult::ok(vec![ToolContent::text(format!(
                        "UPLOAD operation completed: {bucket}/{path}"
                    ))]),
                    Err(e) => ToolResult::error(format!("UPLOAD operation failed: {e}")),
                }
            }
            "download" => {
                if bucket.is_empty() || path.is_empty() {
                    return ToolResult::error(
                        "Error: 'bucket' and 'path' are required for download operation",
                    );
                }
                let as_base64 = arguments
                    .get("as_base64")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(true);
                match self.storage.download(bucket, path).await {
                    Ok(bytes) => {
                        let text = if as_base64 {
                            BASE64.encode(&bytes)
                        } else {
                            String::from_utf8_lossy(&bytes).into_owned()
                        };
                        let body = if text.chars().count() > 1000 {
                            // Truncate on a char boundary; lossy decoding of
                            // binary content yields multi-byte replacement
                            // characters that a byte slice could split.
                            let preview: String = text.chars().take(500).collect();
                            format!(
                                "File content (first 500 chars):\n{preview}...\n\n[Content truncated, total size: {} characters]",
                                text.chars().count()
                            )
                        } else {
                            format!("File content:\n{text}")
                        };
                        ToolResult::ok(vec![ToolContent::text(body)])
                    }
                    Err(e) => ToolResult::error(format!("DOWNLOAD operation failed: {e}")),
                }
            }
            "delete" => {
                if bucket.is_empty() || path.is_empty() {
                    return ToolResult::error(
                        "Error: 'bucket' and 'path' are required for delete operation",
                    );
                }
                // A JSON array deletes several objects at once.
                let paths: Vec<String> = match arguments.get("path") {
                    Some(serde_json::Value::Array(items)) => items
                        .iter()
                        .filter_map(|v| v.as_str().map(String::from))
                        .collect(),
                    _ => vec![path.to_string()],
                };
                match self.storage.delete(bucket, &paths).await {
                    Ok(()) => ToolResult::ok(vec![ToolContent::text(format!(
                        "DELETE operation completed: removed {} file(s) from {bucket}",
                        paths.len()
                    ))]),
                    Err(e) => ToolResult::error(format!("DELETE operation failed: {e}")),
                }
            }
            "move" | "copy" => {
                let from_path = arguments
                    .get("from_path")
                    .and_then(|v| v.as_str())
                    .unwrap_or(path);
                let to_path = arguments.get("to_path").and_then(|v| v.as_str()).unwrap_or("");
                if bucket.is_empty() || from_path.is_empty() || to_path.is_empty() {
                    return ToolResult::error(format!(
                        "Error: 'bucket', 'from_path', and 'to_path' are required for {operation} operation"
                    ));
                }
                let result = if operation == "move" {
                    self.storage.move_object(bucket, from_path, to_path).await
                } else {
                    self.storage.copy_object(bucket, from_path, to_path).await
                };
                match result {
                    Ok(()) => ToolResult::ok(vec![ToolContent::text(format!(
                        "{} operation completed: {from_path} -> {to_path} in {bucket}",
                        operation.to_uppercase()
                    ))]),
                    Err(e) => ToolResult::error(format!(
                        "{} operation failed: {e}",
                        operation.to_uppercase()
                    )),
                }
            }
            "get_public_url" => {
                if bucket.is_empty() || path.is_empty() {
                    return ToolResult::error(
                        "Error: 'bucket' and 'path' are required for get_public_url operation",
                    );
                }
                ToolResult::ok(vec![ToolContent::text(format!(
                    "URL: {}",
                    self.storage.public_url(bucket, path)
                ))])
            }
            "create_signed_url" => {
                if bucket.is_empty() || path.is_empty() {
                    return ToolResult::error(
                        "Error: 'bucket' and 'path' are required for create_signed_url operation",
                    );
                }
                let expires_in = arguments
                    .get("expires_in")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(3600);
                match self.storage.create_signed_url(bucket, path, expires_in).await {
                    Ok(url) => ToolResult::ok(vec![ToolContent::text(format!(
                        "URL: {url} (expires in {expires_in}s)"
                    ))]),
                    Err(e) => ToolResult::error(format!("CREATE_SIGNED_URL operation failed: {e}")),
                }
            }
            other => ToolResult::error(format!(
                "Error: Unknown operation '{other}'. Supported operations: list_buckets, list, upload, download, delete, move, copy, get_public_url, create_signed_url"
            )),
        }
    }

    async fn get_metrics(
        &self,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> ToolResult {
        let metric_type = arguments
            .get("metric_type")
            .and_then(|v| v.as_str())
            .unwrap_or("all");
        if !matches!(
            metric_type,
            "all" | "server" | "database" | "security" | "prometheus"
        ) {
            return ToolResult::error(format!(
                "Error: Unknown metric_type '{metric_type}'. Supported: database, server, security, prometheus, all"
            ));
        }

        let mut sections = Vec::new();

        if matches!(metric_type, "all" | "server") {
            sections.push(format!(
                "Server metrics:\n  uptime: {:.1}s\n  active connections: {}",
                self.metrics.uptime_seconds(),
                self.metrics.active_connections(),
            ));
        }

        if matches!(metric_type, "all" | "database") {
            let info = self.db.connection_info().await;
            let mut lines = vec!["Database metrics:".to_string()];
            if info.get("status").and_then(|v| v.as_str()) == Some("connected") {
                lines.push(format!(
                    "  pool: {}/{} idle",
                    info.get("pool_size").and_then(|v| v.as_u64()).unwrap_or(0),
                    info.get("pool_idle").and_then(|v| v.as_u64()).unwrap_or(0),
                ));
                if let Some(version) = info.get("version").and_then(|v| v.as_str()) {
                    lines.push(format!(
                        "  version: {}",
                        version.chars().take(50).collect::<String>()
                    ));
                }
                if let Some(size) = info.get("database_size").and_then(|v| v.as_str()) {
                    lines.push(format!("  database size: {size}"));
                }
            } else {
                lines.push("  status: not connected".to_string());
            }
            sections.push(lines.join("\n"));
        }

        if matches!(metric_type, "all" | "security") {
            let stats = self.pipeline.rate_limiter().stats();
            let mut lines = vec![
                "Security metrics:".to_string(),
                format!("  active rate limits: {}", stats.active_clients),
                format!("  blocked IPs: {}", stats.blocked_clients),
                format!(
                    "  security events (last hour): {}",
                    stats.events.events_last_hour
                ),
                format!(
                    "  security events (last day): {}",
                    stats.events.events_last_day
                ),
            ];
            if !stats.events.by_severity.is_empty() {
                let by_severity: Vec<String> = stats
                    .events
                    .by_severity
                    .iter()
                    .map(|(severity, count)| format!("{severity}: {count}"))
                    .collect();
                lines.push(format!("  events by severity: {}", by_severity.join(", ")));
            }
            sections.push(lines.join("\n"));
        }

        if matches!(metric_type, "all" | "prometheus") {
            let text = self.metrics.gather();
            let sample: String = text.lines().take(10).collect::<Vec<_>>().join("\n");
            sections.push(format!(
                "Prometheus metrics (sample):\n{sample}\n... (full output at /metrics)"
            ));
        }

        ToolResult::ok(
            sections
                .into_iter()
                .map(ToolContent::text)
                .collect(),
        )
    }
}

/// Renders a query result as readable text.
fn format_query_result(
    result: &QueryResult,
    warnings: &[String],
    risk_level: RiskLevel,
) -> Vec<ToolContent> {
    let mut lines = vec![format!(
        "Query executed in {:.3}s, {} row(s)",
        result.execution_time, result.row_count
    )];

    if risk_level > RiskLevel::Safe {
        lines.push(format!("Risk level: {}", risk_level.as_str()));
    }
    for warning in warnings {
        lines.push(format!("Warning: {warning}"));
    }
    if result.execution_time > SLOW_QUERY_SECS {
        lines.push("Note: slow query, consider adding indexes or limiting the result set".to_string());
    }

    if !result.rows.is_empty() {
        lines.push(String::new());
        lines.push(result.columns.join(" | "));
        let shown = result.rows.len().min(MAX_DISPLAY_ROWS);
        for row in result.rows.iter().take(shown) {
            let cells: Vec<String> = result
                .columns
                .iter()
                .map(|column| {
                    let text = match row.get(column) {
                        Some(serde_json::Value::Null) | None => "NULL".to_string(),
                        Some(serde_json::Value::String(s)) => s.clone(),
                        Some(other) => other.to_string(),
                    };
                    if text.chars().count() > MAX_CELL_WIDTH {
                        let truncated: String = text.chars().take(MAX_CELL_WIDTH - 3).collect();
                        format!("{truncated}...")
                    } else {
                        text
                    }
                })
                .collect();
            lines.push(cells.join(" | "));
        }
        if result.rows.len() > shown {
            lines.push(format!("... and {} more rows", result.rows.len() - shown));
        }
    }

    vec![ToolContent::text(lines.join("\n"))]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_query_result_truncates_wide_cells() {
        let mut row = serde_json::Map::new();
        row.insert(
            "body".to_string(),
            serde_json::Value::String("x".repeat(80)),
        );
        let result = QueryResult {
            rows: vec![row],
            row_count: 1,
            execution_time: 0.01,
            columns: vec!["body".to_string()],
        };

        let content = format_query_result(&result, &[], RiskLevel::Safe);
        let text = &content[0].text;
        assert!(text.contains("..."));
        assert!(!text.contains(&"x".repeat(80)));
    }

    #[test]
    fn test_format_query_result_reports_risk_and_warnings() {
        let result = QueryResult {
            rows: Vec::new(),
            row_count: 2,
            execution_time: 1.5,
            columns: Vec::new(),
        };

        let content = format_query_result(
            &result,
            &["Query uses SELECT *".to_string()],
            RiskLevel::Medium,
        );
        let text = &content[0].text;
        assert!(text.contains("Risk level: medium"));
        assert!(text.contains("Warning: Query uses SELECT *"));
        assert!(text.contains("slow query"));
    }
}
