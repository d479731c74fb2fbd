use pgmcp::api::{self, app_state::AppState};
use pgmcp::config::loader::ConfigLoader;
use pgmcp::db::{Database, PgDatabase, SchemaService};
use pgmcp::mcp::{McpHandler, ToolRegistry};
use pgmcp::observability::{Metrics, init_tracing};
use pgmcp::security::pipeline::AdmissionPipeline;
use pgmcp::security::query_guard::QueryRiskClassifier;
use pgmcp::security::rate_limit::{RateLimitConfig, RateLimiter};
use pgmcp::security::{Authenticator, SecurityEventLog, ThreatScanner};
use pgmcp::storage::{HttpStorageApi, StorageApi};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load()?;
    ConfigLoader::validate(&config)?;

    let _log_guard = init_tracing(&config.logging);
    info!(
        app = %config.app_name,
        environment = %config.environment,
        "Starting PgMcp..."
    );
    info!("Configuration loaded successfully");

    let database: Arc<dyn Database> = Arc::new(PgDatabase::connect(&config.database).await?);
    info!("Database connection pool initialized");

    let storage: Arc<dyn StorageApi> = Arc::new(HttpStorageApi::new(&config.storage)?);
    info!("Storage API client initialized");

    let schema = Arc::new(SchemaService::new(database.clone()));
    info!("Schema service initialized");

    let events = Arc::new(SecurityEventLog::new(SecurityEventLog::DEFAULT_CAPACITY));
    let scanner = ThreatScanner::new(events.clone());
    let rate_limiter = Arc::new(RateLimiter::new(
        RateLimitConfig {
            max_requests_per_window: config.security.rate_limit_per_minute,
            trusted_networks: config.security.trusted_networks.clone(),
            ..RateLimitConfig::default()
        },
        events.clone(),
    ));
    let authenticator = Arc::new(Authenticator::new(
        config.security.api_key.clone(),
        config.security.service_role_key.clone(),
        &config.security.jwt_secret,
    ));
    let pipeline = Arc::new(AdmissionPipeline::new(
        scanner,
        rate_limiter.clone(),
        authenticator,
        QueryRiskClassifier::new(),
        config.security.enable_query_validation,
    ));
    info!(
        rate_limit_per_minute = config.security.rate_limit_per_minute,
        query_validation = config.security.enable_query_validation,
        "Admission pipeline initialized"
    );

    let metrics = Arc::new(Metrics::new()?);
    info!("Metrics registry initialized");

    let tools = ToolRegistry::new(
        database.clone(),
        schema.clone(),
        storage.clone(),
        pipeline.clone(),
        metrics.clone(),
    );
    let handler = Arc::new(McpHandler::new(tools, pipeline.clone(), metrics.clone()));
    info!("MCP handler initialized");

    let config = Arc::new(config);
    let state = Arc::new(AppState::new(
        config.clone(),
        database,
        schema,
        storage,
        pipeline,
        handler,
        metrics,
    ));
    info!("Application state created");

    let router = api::create_router(state);
    info!("API router created with MCP and observability endpoints");

    let sweeper = rate_limiter.start_sweep_task();
    info!("Rate limiter sweep task started");

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await?;

    sweeper.abort();
    info!("Server stopped");

    Ok(())
}
