//! PgMcp - PostgreSQL MCP 网关服务
//!
//! 在 PostgreSQL 与 MCP 客户端之间提供一层带安全审查的 JSON-RPC 网关，
//! 所有请求经过准入流水线（威胁扫描、限流、鉴权、查询风险分级）后执行。

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod observability;
pub mod security;
pub mod storage;
