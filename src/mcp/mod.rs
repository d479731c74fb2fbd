//! MCP (Model Context Protocol) Module
//!
//! JSON-RPC 2.0 over WebSocket, exposing database, storage and metrics
//! tools behind the request admission pipeline.

pub mod handler;
pub mod protocol;
pub mod server;
pub mod tools;

pub use handler::McpHandler;
pub use protocol::{
    CallToolParams, InitializeParams, InitializeResult, McpError, McpRequest, McpResponse,
    PROTOCOL_VERSION, Tool, ToolContent, ToolParameter, ToolResult,
};
pub use server::create_mcp_router;
pub use tools::ToolRegistry;
