//! 可观测性模块
//!
//! 提供 Prometheus 指标、结构化日志和健康检查。

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

use crate::api::app_state::AppState;
use crate::config::config::LoggingConfig;
use crate::error::{AppError, Result};

// ===== Prometheus Metrics =====

/// 应用指标
pub struct Metrics {
    registry: Registry,
    mcp_requests_total: IntCounterVec,
    tool_calls_total: IntCounterVec,
    database_queries_total: IntCounterVec,
    active_connections: IntGauge,
    started_at: DateTime<Utc>,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let mcp_requests_total = IntCounterVec::new(
            Opts::new("mcp_requests_total", "Total MCP requests by method"),
            &["method", "status"],
        )
        .map_err(|e| AppError::Internal(e.to_string()))?;
        let tool_calls_total = IntCounterVec::new(
            Opts::new("mcp_tool_calls_total", "Total MCP tool invocations"),
            &["tool", "status"],
        )
        .map_err(|e| AppError::Internal(e.to_string()))?;
        let database_queries_total = IntCounterVec::new(
            Opts::new("database_queries_total", "Total database queries"),
            &["status"],
        )
        .map_err(|e| AppError::Internal(e.to_string()))?;
        let active_connections = IntGauge::new(
            "active_connections",
            "Active MCP WebSocket connections",
        )
        .map_err(|e| AppError::Internal(e.to_string()))?;

        for collector in [
            Box::new(mcp_requests_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(tool_calls_total.clone()),
            Box::new(database_queries_total.clone()),
            Box::new(active_connections.clone()),
        ] {
            registry
                .register(collector)
                .map_err(|e| AppError::Internal(e.to_string()))?;
        }

        Ok(Self {
            registry,
            mcp_requests_total,
            tool_calls_total,
            database_queries_total,
            active_connections,
            started_at: Utc::now(),
        })
    }

    /// 记录 MCP 请求
    pub fn record_request(&self, method: &str, success: bool) {
        self.mcp_requests_total
            .with_label_values(&[method, if success { "ok" } else { "error" }])
            .inc();
    }

    /// 记录工具调用
    pub fn record_tool_call(&self, tool: &str, success: bool) {
        self.tool_calls_total
            .with_label_values(&[tool, if success { "ok" } else { "error" }])
            .inc();
    }

    /// 记录数据库查询
    pub fn record_db_query(&self, success: bool) {
        self.database_queries_total
            .with_label_values(&[if success { "ok" } else { "error" }])
            .inc();
    }

    pub fn connection_opened(&self) {
        self.active_connections.inc();
    }

    pub fn connection_closed(&self) {
        self.active_connections.dec();
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.get()
    }

    /// 获取应用正常运行时间
    pub fn uptime_seconds(&self) -> f64 {
        (Utc::now() - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// 生成 Prometheus 格式指标
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            error!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

// ===== Health Check =====

/// 健康检查状态
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub uptime_seconds: f64,
    pub checks: Vec<HealthCheck>,
}

/// 单个健康检查项
#[derive(Debug, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: String,
    pub message: Option<String>,
    pub latency_ms: Option<u64>,
}

async fn check_database(state: &AppState) -> HealthCheck {
    let start = Instant::now();
    let healthy = state.database.health_check().await;
    HealthCheck {
        name: "database".to_string(),
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        message: Some(if healthy {
            "Connected".to_string()
        } else {
            "Connection failed".to_string()
        }),
        latency_ms: Some(start.elapsed().as_millis() as u64),
    }
}

// ===== Health Check Handlers =====

/// 获取健康状态
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db = check_database(&state).await;
    let all_healthy = db.status == "healthy";

    let health_status = HealthStatus {
        status: if all_healthy { "healthy" } else { "unhealthy" }.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.metrics.uptime_seconds(),
        checks: vec![db],
    };

    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health_status))
}

/// 详细健康状态（含安全组件）
pub async fn health_detailed(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db = check_database(&state).await;
    let limiter_stats = state.pipeline.rate_limiter().stats();

    Json(serde_json::json!({
        "status": if db.status == "healthy" { "healthy" } else { "unhealthy" },
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.metrics.uptime_seconds(),
        "components": {
            "database": db,
            "rate_limiter": {
                "active_clients": limiter_stats.active_clients,
                "blocked_clients": limiter_stats.blocked_clients,
            },
            "security_events": limiter_stats.events,
        },
    }))
}

/// 简单存活检查
pub async fn liveness() -> impl IntoResponse {
    "OK"
}

/// 就绪检查（检查依赖服务）
pub async fn readiness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.database.health_check().await {
        (StatusCode::OK, "Ready")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Not Ready")
    }
}

/// Prometheus 指标端点
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics.gather())
}

/// 版本信息端点
pub async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "name": state.config.app_name,
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "uptime_seconds": state.metrics.uptime_seconds(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// 创建可观测性路由
pub fn create_observability_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/detailed", get(health_detailed))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(metrics))
        .route("/info", get(info))
        .with_state(state)
}

// ===== Structured Logging =====

/// 初始化结构化日志。返回的 guard 在进程退出前必须保持存活。
pub fn init_tracing(config: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.level.clone());

    match &config.log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "pgmcp.log");
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            if config.structured {
                tracing_subscriber::fmt()
                    .with_env_filter(env_filter)
                    .with_writer(writer)
                    .json()
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_env_filter(env_filter)
                    .with_writer(writer)
                    .init();
            }
            Some(guard)
        }
        None => {
            if config.structured {
                tracing_subscriber::fmt()
                    .with_env_filter(env_filter)
                    .json()
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_env_filter(env_filter)
                    .with_target(true)
                    .init();
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_gather_contains_families() {
        let metrics = Metrics::new().unwrap();
        metrics.record_request("tools/call", true);
        metrics.record_tool_call("query_database", false);
        metrics.record_db_query(true);
        metrics.connection_opened();

        let output = metrics.gather();
        assert!(output.contains("mcp_requests_total"));
        assert!(output.contains("mcp_tool_calls_total"));
        assert!(output.contains("database_queries_total"));
        assert!(output.contains("active_connections 1"));
    }

    #[test]
    fn test_connection_gauge_balances() {
        let metrics = Metrics::new().unwrap();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();
        assert_eq!(metrics.active_connections(), 1);
    }

    #[test]
    fn test_uptime_is_non_negative() {
        let metrics = Metrics::new().unwrap();
        assert!(metrics.uptime_seconds() >= 0.0);
    }
}
