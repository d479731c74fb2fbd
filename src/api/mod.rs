//! API 模块
//!
//! 组装 HTTP 路由、中间件和共享应用状态。

pub mod app_state;

use crate::api::app_state::AppState;
use crate::error::AppError;
use crate::mcp::create_mcp_router;
use crate::observability::create_observability_router;
use crate::security::middleware::{admission_middleware, security_headers_middleware};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn create_router(state: Arc<AppState>) -> Router {
    let pipeline = state.pipeline.clone();

    // Every MCP surface passes through the admission pipeline before
    // reaching a handler. The WebSocket upgrade is screened once at
    // connect time; tool calls are re-admitted per message.
    let mcp = create_mcp_router(state.clone()).layer(axum::middleware::from_fn(
        move |req, next| {
            let pipeline = pipeline.clone();
            async move { admission_middleware(req, next, pipeline).await }
        },
    ));

    let mut router = Router::new()
        .merge(mcp)
        .merge(create_observability_router(state.clone()))
        .layer(axum::middleware::from_fn(security_headers_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(state.config.server.max_request_size));

    if state.config.server.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    router
}

pub async fn initialize_api(state: Arc<AppState>) -> Result<Router, AppError> {
    tracing::info!("Initializing API router...");
    Ok(create_router(state))
}
