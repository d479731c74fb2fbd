//! MCP transport endpoints.
//!
//! The primary transport is a WebSocket at /mcp carrying JSON-RPC 2.0
//! messages. A handful of HTTP endpoints expose tool listings and
//! server status for non-WebSocket clients.

use axum::{
    Json, Router,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, Uri},
    response::{IntoResponse, Response},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::api::app_state::AppState;
use crate::mcp::protocol::{McpError, McpResponse, PROTOCOL_VERSION};
use crate::security::middleware::auth_context;
use crate::security::{Authenticator, RequestMeta};

/// Build request metadata at WebSocket upgrade time. The upgrade request
/// carries the headers the admission pipeline needs for every message on
/// the socket.
fn meta_from_upgrade(addr: SocketAddr, headers: &HeaderMap, uri: &Uri) -> RequestMeta {
    let mut client_ip: Option<IpAddr> = None;
    for header in [
        "x-forwarded-for",
        "x-real-ip",
        "x-forwarded",
        "x-cluster-client-ip",
        "forwarded-for",
        "forwarded",
    ] {
        if let Some(value) = headers.get(header).and_then(|v| v.to_str().ok()) {
            if let Some(ip) = value
                .split(',')
                .find_map(|candidate| candidate.trim().parse::<IpAddr>().ok())
            {
                client_ip = Some(ip);
                break;
            }
        }
    }

    RequestMeta {
        client_ip: client_ip.unwrap_or_else(|| addr.ip()),
        user_agent: headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_lowercase(), v.to_string()))
            })
            .collect(),
        path: uri.path().to_string(),
        query_string: uri.query().unwrap_or("").to_string(),
    }
}

/// WebSocket upgrade for the MCP transport.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    uri: Uri,
    State(state): State<Arc<AppState>>,
) -> Response {
    let meta = meta_from_upgrade(addr, &headers, &uri);
    ws.on_upgrade(move |socket| handle_socket(socket, state, meta))
}

/// Run the per-connection message loop.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, meta: RequestMeta) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    info!(%connection_id, client_ip = %meta.client_ip, "MCP WebSocket connected");
    state.metrics.connection_opened();

    let (mut sender, mut receiver) = socket.split();

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let response = state.handler.handle_message(&text, &meta).await;
                if let Err(e) = sender.send(Message::Text(response.to_json())).await {
                    error!(%connection_id, error = %e, "Failed to send MCP response");
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!(%connection_id, "Client closed MCP connection");
                break;
            }
            Ok(Message::Ping(payload)) => {
                if sender.send(Message::Pong(payload)).await.is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                let response = McpResponse::failure(
                    serde_json::Value::Null,
                    McpError::internal(format!("WebSocket error: {e}")),
                );
                let _ = sender.send(Message::Text(response.to_json())).await;
                error!(%connection_id, error = %e, "MCP WebSocket error");
                break;
            }
        }
    }

    state.metrics.connection_closed();
    info!(%connection_id, "MCP WebSocket disconnected");
}

/// GET /mcp/tools: tool definitions plus the caller's auth status.
async fn list_tools(State(state): State<Arc<AppState>>, req: Request) -> impl IntoResponse {
    let auth = auth_context(&req);
    Json(serde_json::json!({
        "tools": state.handler.tools().definitions(),
        "authenticated": auth.authenticated,
        "user_id": auth.subject,
    }))
}

/// GET /mcp/capabilities: protocol metadata for discovery.
async fn capabilities(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "protocol_version": PROTOCOL_VERSION,
        "capabilities": {
            "tools": { "list_changed": false },
            "authentication": {
                "methods": ["api_key", "jwt", "service_role"],
            },
        },
        "server_info": {
            "name": state.config.app_name,
            "version": env!("CARGO_PKG_VERSION"),
        },
    }))
}

/// GET /mcp/status: component health overview.
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_info = state.database.connection_info().await;
    let limiter_stats = state.pipeline.rate_limiter().stats();

    Json(serde_json::json!({
        "server": {
            "name": state.config.app_name,
            "version": env!("CARGO_PKG_VERSION"),
            "environment": state.config.environment,
            "uptime_seconds": state.metrics.uptime_seconds(),
            "initialized": state.handler.is_initialized(),
        },
        "database": db_info,
        "security": {
            "query_validation_enabled": state.config.security.enable_query_validation,
            "rate_limit_per_minute": state.config.security.rate_limit_per_minute,
            "active_clients": limiter_stats.active_clients,
            "blocked_clients": limiter_stats.blocked_clients,
        },
    }))
}

/// GET /mcp/security: limiter and event details. Requires an
/// authenticated caller.
async fn security_overview(State(state): State<Arc<AppState>>, req: Request) -> Response {
    let auth = auth_context(&req);
    if let Err(e) = Authenticator::require_authenticated(&auth) {
        return e.into_response();
    }

    let limiter = state.pipeline.rate_limiter();
    let stats = limiter.stats();
    let client_info = limiter.client_stats(crate::security::middleware::resolve_client_ip(&req));

    Json(serde_json::json!({
        "security_stats": stats,
        "client_info": client_info,
        "authenticated_as": {
            "subject": auth.subject,
            "role": auth.role,
            "auth_method": auth.auth_method.to_string(),
        },
    }))
    .into_response()
}

/// MCP routes. The WebSocket route performs admission per message; the
/// HTTP routes rely on the admission middleware applied by the caller.
pub fn create_mcp_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/mcp", get(ws_handler))
        .route("/mcp/tools", get(list_tools))
        .route("/mcp/capabilities", get(capabilities))
        .route("/mcp/status", get(status))
        .route("/mcp/security", get(security_overview))
        .with_state(state)
}
