//! End-to-end tests for the MCP handler: JSON-RPC envelope handling,
//! session initialization, and tool dispatch over mocked backends.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use async_trait::async_trait;
use mockall::predicate::always;
use serde_json::json;

use pgmcp::db::{Database, QueryResult, SchemaService};
use pgmcp::error::Result;
use pgmcp::mcp::{McpHandler, McpResponse, ToolRegistry};
use pgmcp::observability::Metrics;
use pgmcp::security::pipeline::AdmissionPipeline;
use pgmcp::security::query_guard::QueryRiskClassifier;
use pgmcp::security::rate_limit::{RateLimitConfig, RateLimiter};
use pgmcp::security::{Authenticator, RequestMeta, SecurityEventLog, ThreatScanner};
use pgmcp::storage::{BucketInfo, StorageApi, StorageObject};

mockall::mock! {
    Db {}

    #[async_trait]
    impl Database for Db {
        async fn execute(&self, query: &str, params: &[serde_json::Value]) -> Result<QueryResult>;
        async fn execute_transaction(
            &self,
            queries: &[(String, Vec<serde_json::Value>)],
        ) -> Result<Vec<QueryResult>>;
        async fn health_check(&self) -> bool;
        async fn connection_info(&self) -> serde_json::Value;
    }
}

mockall::mock! {
    Store {}

    #[async_trait]
    impl StorageApi for Store {
        async fn list_buckets(&self) -> Result<Vec<BucketInfo>>;
        async fn list_objects(
            &self,
            bucket: &str,
            prefix: &str,
            limit: Option<u64>,
            offset: Option<u64>,
        ) -> Result<Vec<StorageObject>>;
        async fn upload(
            &self,
            bucket: &str,
            path: &str,
            content: Vec<u8>,
            content_type: &str,
            upsert: bool,
        ) -> Result<()>;
        async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>>;
        async fn delete(&self, bucket: &str, paths: &[String]) -> Result<()>;
        async fn move_object(&self, bucket: &str, from_path: &str, to_path: &str) -> Result<()>;
        async fn copy_object(&self, bucket: &str, from_path: &str, to_path: &str) -> Result<()>;
        fn public_url(&self, bucket: &str, path: &str) -> String;
        async fn create_signed_url(
            &self,
            bucket: &str,
            path: &str,
            expires_in: u64,
        ) -> Result<String>;
    }
}

fn build_handler(db: MockDb, storage: MockStore) -> McpHandler {
    let db: Arc<dyn Database> = Arc::new(db);
    let storage: Arc<dyn StorageApi> = Arc::new(storage);
    let schema = Arc::new(SchemaService::new(db.clone()));

    let events = Arc::new(SecurityEventLog::new(SecurityEventLog::DEFAULT_CAPACITY));
    let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::default(), events.clone()));
    let authenticator = Arc::new(Authenticator::new(
        "test-api-key".to_string(),
        "test-service-role-key".to_string(),
        "test-jwt-secret",
    ));
    let pipeline = Arc::new(AdmissionPipeline::new(
        ThreatScanner::new(events),
        rate_limiter,
        authenticator,
        QueryRiskClassifier::new(),
        true,
    ));

    let metrics = Arc::new(Metrics::new().unwrap());
    let tools = ToolRegistry::new(db, schema, storage, pipeline.clone(), metrics.clone());
    McpHandler::new(tools, pipeline, metrics)
}

fn local_meta() -> RequestMeta {
    RequestMeta::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

async fn initialize(handler: &McpHandler, meta: &RequestMeta) {
    let response = handler
        .handle_message(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            meta,
        )
        .await;
    assert!(response.error.is_none());
}

fn tool_text(response: &McpResponse) -> String {
    let result = response.result.as_ref().expect("expected a tool result");
    result["content"]
        .as_array()
        .expect("content array")
        .iter()
        .map(|c| c["text"].as_str().unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test]
async fn test_parse_error_gets_null_id() {
    let handler = build_handler(MockDb::new(), MockStore::new());
    let response = handler.handle_message("{not json", &local_meta()).await;

    assert!(response.id.is_null());
    assert_eq!(response.error.unwrap().code, -32700);
}

#[tokio::test]
async fn test_wrong_jsonrpc_version_rejected() {
    let handler = build_handler(MockDb::new(), MockStore::new());
    let response = handler
        .handle_message(
            r#"{"jsonrpc":"1.0","id":1,"method":"initialize","params":{}}"#,
            &local_meta(),
        )
        .await;

    assert_eq!(response.error.unwrap().code, -32600);
}

#[tokio::test]
async fn test_unknown_method_rejected() {
    let handler = build_handler(MockDb::new(), MockStore::new());
    let meta = local_meta();
    initialize(&handler, &meta).await;

    let response = handler
        .handle_message(
            r#"{"jsonrpc":"2.0","id":2,"method":"resources/list","params":{}}"#,
            &meta,
        )
        .await;

    assert_eq!(response.error.unwrap().code, -32601);
}

#[tokio::test]
async fn test_tools_require_initialized_session() {
    let handler = build_handler(MockDb::new(), MockStore::new());
    let response = handler
        .handle_message(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/list","params":{}}"#,
            &local_meta(),
        )
        .await;

    let error = response.error.unwrap();
    assert_eq!(error.code, -32603);
    assert!(error.message.contains("Session not initialized"));
}

#[tokio::test]
async fn test_initialize_reports_protocol_and_server_info() {
    let handler = build_handler(MockDb::new(), MockStore::new());
    let response = handler
        .handle_message(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"clientInfo":{"name":"test"}}}"#,
            &local_meta(),
        )
        .await;

    let result = response.result.unwrap();
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], "pgmcp");
    assert!(handler.is_initialized());
}

#[tokio::test]
async fn test_missing_id_is_replaced_with_generated_one() {
    let handler = build_handler(MockDb::new(), MockStore::new());
    let response = handler
        .handle_message(
            r#"{"jsonrpc":"2.0","method":"initialize","params":{}}"#,
            &local_meta(),
        )
        .await;

    assert!(response.id.is_string());
    assert!(!response.id.as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_tools_list_exposes_all_tools() {
    let handler = build_handler(MockDb::new(), MockStore::new());
    let meta = local_meta();
    initialize(&handler, &meta).await;

    let response = handler
        .handle_message(
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list","params":{}}"#,
            &meta,
        )
        .await;

    let tools = response.result.unwrap()["tools"].as_array().unwrap().clone();
    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    assert_eq!(
        names,
        vec![
            "query_database",
            "get_schema",
            "crud_operations",
            "storage_operations",
            "get_metrics"
        ]
    );
}

#[tokio::test]
async fn test_safe_query_executes() {
    let mut db = MockDb::new();
    db.expect_execute().with(always(), always()).returning(|_, _| {
        let mut row = serde_json::Map::new();
        row.insert("id".to_string(), json!(1));
        row.insert("name".to_string(), json!("alice"));
        Ok(QueryResult {
            rows: vec![row],
            row_count: 1,
            execution_time: 0.004,
            columns: vec!["id".to_string(), "name".to_string()],
        })
    });

    let handler = build_handler(db, MockStore::new());
    let meta = local_meta();
    initialize(&handler, &meta).await;

    let request = json!({
        "jsonrpc": "2.0",
        "id": 2,
        "method": "tools/call",
        "params": {
            "name": "query_database",
            "arguments": {"query": "SELECT id, name FROM users LIMIT 10"}
        }
    });
    let response = handler
        .handle_message(&request.to_string(), &meta)
        .await;

    assert!(response.error.is_none());
    let result = response.result.as_ref().unwrap();
    assert_eq!(result["is_error"], false);
    let text = tool_text(&response);
    assert!(text.contains("1 row(s)"));
    assert!(text.contains("id | name"));
    assert!(text.contains("alice"));
}

#[tokio::test]
async fn test_risky_query_needs_confirmation_then_force_executes() {
    let mut db = MockDb::new();
    db.expect_execute()
        .with(always(), always())
        .times(1)
        .returning(|_, _| {
            Ok(QueryResult {
                rows: Vec::new(),
                row_count: 3,
                execution_time: 0.002,
                columns: Vec::new(),
            })
        });

    let handler = build_handler(db, MockStore::new());
    let meta = local_meta();
    initialize(&handler, &meta).await;

    let call = |force: bool| {
        json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {
                "name": "query_database",
                "arguments": {
                    "query": "DELETE FROM sessions WHERE expired = true",
                    "force_execute": force
                }
            }
        })
        .to_string()
    };

    // Without the force flag the statement is held for confirmation.
    let response = handler.handle_message(&call(false), &meta).await;
    let text = tool_text(&response);
    assert_eq!(response.result.as_ref().unwrap()["is_error"], false);
    assert!(text.contains("requires confirmation"));
    assert!(text.contains("force_execute=true"));

    let response = handler.handle_message(&call(true), &meta).await;
    assert_eq!(response.result.as_ref().unwrap()["is_error"], false);
    assert!(tool_text(&response).contains("3 row(s)"));
}

#[tokio::test]
async fn test_injection_attempt_is_rejected_with_issues() {
    let handler = build_handler(MockDb::new(), MockStore::new());
    let meta = local_meta();
    initialize(&handler, &meta).await;

    let request = json!({
        "jsonrpc": "2.0",
        "id": 2,
        "method": "tools/call",
        "params": {
            "name": "query_database",
            "arguments": {"query": "SELECT * FROM users; -- drop it"}
        }
    });
    let response = handler.handle_message(&request.to_string(), &meta).await;

    assert_eq!(response.result.as_ref().unwrap()["is_error"], true);
    assert!(tool_text(&response).contains("Query validation failed:"));
}

#[tokio::test]
async fn test_crud_rejects_unknown_filter_operator() {
    let handler = build_handler(MockDb::new(), MockStore::new());
    let meta = local_meta();
    initialize(&handler, &meta).await;

    let request = json!({
        "jsonrpc": "2.0",
        "id": 2,
        "method": "tools/call",
        "params": {
            "name": "crud_operations",
            "arguments": {
                "operation": "select",
                "table": "users",
                "filters": {"age": {"contains": 30}}
            }
        }
    });
    let response = handler.handle_message(&request.to_string(), &meta).await;

    assert_eq!(response.result.as_ref().unwrap()["is_error"], true);
    let text = tool_text(&response);
    assert!(text.contains("Unknown filter operator 'contains'"));
}

#[tokio::test]
async fn test_crud_select_renders_rows() {
    let mut db = MockDb::new();
    db.expect_execute().with(always(), always()).returning(|_, _| {
        let mut row = serde_json::Map::new();
        row.insert("id".to_string(), json!(7));
        Ok(QueryResult {
            rows: vec![row],
            row_count: 1,
            execution_time: 0.001,
            columns: vec!["id".to_string()],
        })
    });

    let handler = build_handler(db, MockStore::new());
    let meta = local_meta();
    initialize(&handler, &meta).await;

    let request = json!({
        "jsonrpc": "2.0",
        "id": 2,
        "method": "tools/call",
        "params": {
            "name": "crud_operations",
            "arguments": {
                "operation": "select",
                "table": "users",
                "filters": {"id": 7}
            }
        }
    });
    let response = handler.handle_message(&request.to_string(), &meta).await;

    assert_eq!(response.result.as_ref().unwrap()["is_error"], false);
    let text = tool_text(&response);
    assert!(text.contains("SELECT completed on 'users': 1 row(s)"));
    assert!(text.contains("\"id\":7"));
}

#[tokio::test]
async fn test_storage_list_buckets() {
    let mut storage = MockStore::new();
    storage.expect_list_buckets().returning(|| {
        Ok(vec![BucketInfo {
            id: "avatars".to_string(),
            name: "avatars".to_string(),
            public: true,
            created_at: None,
            updated_at: None,
        }])
    });

    let handler = build_handler(MockDb::new(), storage);
    let meta = local_meta();
    initialize(&handler, &meta).await;

    let request = json!({
        "jsonrpc": "2.0",
        "id": 2,
        "method": "tools/call",
        "params": {
            "name": "storage_operations",
            "arguments": {"operation": "list_buckets"}
        }
    });
    let response = handler.handle_message(&request.to_string(), &meta).await;

    assert_eq!(response.result.as_ref().unwrap()["is_error"], false);
    let text = tool_text(&response);
    assert!(text.contains("Buckets (1):"));
    assert!(text.contains("avatars"));
}

#[tokio::test]
async fn test_download_truncates_binary_content_without_panicking() {
    let mut storage = MockStore::new();
    // 1001 bytes of invalid UTF-8; lossy decoding turns every byte into a
    // 3-byte replacement character, so byte-indexed truncation would split
    // a character.
    storage
        .expect_download()
        .returning(|_, _| Ok(vec![0xFF; 1001]));

    let handler = build_handler(MockDb::new(), storage);
    let meta = local_meta();
    initialize(&handler, &meta).await;

    let request = json!({
        "jsonrpc": "2.0",
        "id": 2,
        "method": "tools/call",
        "params": {
            "name": "storage_operations",
            "arguments": {
                "operation": "download",
                "bucket": "exports",
                "path": "report.bin",
                "as_base64": false
            }
        }
    });
    let response = handler.handle_message(&request.to_string(), &meta).await;

    assert_eq!(response.result.as_ref().unwrap()["is_error"], false);
    let text = tool_text(&response);
    assert!(text.contains("File content (first 500 chars):"));
    assert!(text.contains("total size: 1001 characters"));
}

#[tokio::test]
async fn test_unknown_tool_is_an_execution_error() {
    let handler = build_handler(MockDb::new(), MockStore::new());
    let meta = local_meta();
    initialize(&handler, &meta).await;

    let request = json!({
        "jsonrpc": "2.0",
        "id": 2,
        "method": "tools/call",
        "params": {"name": "drop_everything", "arguments": {}}
    });
    let response = handler.handle_message(&request.to_string(), &meta).await;

    // Unknown tools come back as tool errors, not protocol errors.
    assert!(response.error.is_none());
    assert_eq!(response.result.as_ref().unwrap()["is_error"], true);
}
