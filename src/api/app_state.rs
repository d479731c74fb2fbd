use crate::config::config::AppConfig;
use crate::db::{Database, SchemaService};
use crate::mcp::McpHandler;
use crate::observability::Metrics;
use crate::security::pipeline::AdmissionPipeline;
use crate::storage::StorageApi;
use std::sync::Arc;

/// Application state containing all shared services and security components
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// Database backend for query execution
    pub database: Arc<dyn Database>,
    /// Schema discovery service with caching
    pub schema: Arc<SchemaService>,
    /// Object storage API client
    pub storage: Arc<dyn StorageApi>,
    /// Request admission pipeline
    pub pipeline: Arc<AdmissionPipeline>,
    /// MCP protocol handler
    pub handler: Arc<McpHandler>,
    /// Prometheus metrics
    pub metrics: Arc<Metrics>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"Arc<AppConfig>")
            .field("database", &"Arc<dyn Database>")
            .field("schema", &"Arc<SchemaService>")
            .field("storage", &"Arc<dyn StorageApi>")
            .field("pipeline", &"Arc<AdmissionPipeline>")
            .field("handler", &"Arc<McpHandler>")
            .field("metrics", &"Arc<Metrics>")
            .finish()
    }
}

impl AppState {
    /// Create new application state
    pub fn new(
        config: Arc<AppConfig>,
        database: Arc<dyn Database>,
        schema: Arc<SchemaService>,
        storage: Arc<dyn StorageApi>,
        pipeline: Arc<AdmissionPipeline>,
        handler: Arc<McpHandler>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            database,
            schema,
            storage,
            pipeline,
            handler,
            metrics,
        }
    }
}
