//! JSON-RPC request routing.
//!
//! Every tools/call passes through the admission pipeline before the
//! tool runs: threat scan, rate limit, authentication, and (for SQL)
//! query risk screening inside the tool itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, warn};

use crate::observability::Metrics;
use crate::security::{AdmissionPipeline, RequestMeta};

use super::protocol::{
    CallToolParams, InitializeParams, InitializeResult, McpError, McpRequest, McpResponse,
};
use super::tools::ToolRegistry;

/// Routes MCP requests to the tool layer.
pub struct McpHandler {
    tools: ToolRegistry,
    pipeline: Arc<AdmissionPipeline>,
    metrics: Arc<Metrics>,
    initialized: AtomicBool,
}

impl McpHandler {
    pub fn new(tools: ToolRegistry, pipeline: Arc<AdmissionPipeline>, metrics: Arc<Metrics>) -> Self {
        Self {
            tools,
            pipeline,
            metrics,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Parse and dispatch one raw JSON-RPC message.
    pub async fn handle_message(&self, text: &str, meta: &RequestMeta) -> McpResponse {
        let request: McpRequest = match serde_json::from_str(text) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Failed to parse MCP request");
                return McpResponse::failure(serde_json::Value::Null, McpError::parse_error(e.to_string()));
            }
        };
        self.handle_request(request, meta).await
    }

    /// Dispatch a parsed request.
    pub async fn handle_request(&self, request: McpRequest, meta: &RequestMeta) -> McpResponse {
        if request.jsonrpc != "2.0" {
            return McpResponse::failure(
                request.id,
                McpError::new(McpError::INVALID_REQUEST, "Invalid JSON-RPC version"),
            );
        }

        // Requests without an explicit ID still get a correlatable response.
        let id = if request.id.is_null() {
            serde_json::Value::String(uuid::Uuid::new_v4().to_string())
        } else {
            request.id.clone()
        };

        debug!(method = %request.method, "Handling MCP request");

        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id, &request.params),
            "tools/list" => self.handle_list_tools(id),
            "tools/call" => self.handle_tool_call(id, &request.params, meta).await,
            method => {
                warn!(method, "Unknown MCP method");
                McpResponse::failure(id, McpError::method_not_found(method))
            }
        };

        self.metrics
            .record_request(&request.method, response.error.is_none());
        response
    }

    fn handle_initialize(&self, id: serde_json::Value, params: &serde_json::Value) -> McpResponse {
        let params: InitializeParams =
            serde_json::from_value(params.clone()).unwrap_or_default();
        info!(
            protocol_version = ?params.protocol_version,
            client_info = %params.client_info,
            "MCP session initialized"
        );

        self.initialized.store(true, Ordering::SeqCst);

        match serde_json::to_value(InitializeResult::current()) {
            Ok(result) => McpResponse::success(id, result),
            Err(e) => McpResponse::failure(id, McpError::internal(e.to_string())),
        }
    }

    fn handle_list_tools(&self, id: serde_json::Value) -> McpResponse {
        if !self.is_initialized() {
            return McpResponse::failure(id, McpError::internal("Session not initialized"));
        }

        match serde_json::to_value(self.tools.definitions()) {
            Ok(tools) => McpResponse::success(id, serde_json::json!({ "tools": tools })),
            Err(e) => McpResponse::failure(id, McpError::internal(e.to_string())),
        }
    }

    async fn handle_tool_call(
        &self,
        id: serde_json::Value,
        params: &serde_json::Value,
        meta: &RequestMeta,
    ) -> McpResponse {
        if !self.is_initialized() {
            return McpResponse::failure(id, McpError::internal("Session not initialized"));
        }

        // Admission runs before any tool side effect.
        let auth = match self.pipeline.admit(meta) {
            Ok(auth) => auth,
            Err(e) => {
                warn!(client_ip = %meta.client_ip, error = %e, "Tool call rejected by admission pipeline");
                return McpResponse::failure(id, McpError::from(e));
            }
        };

        let params: CallToolParams = match serde_json::from_value(params.clone()) {
            Ok(params) => params,
            Err(e) => {
                return McpResponse::failure(
                    id,
                    McpError::invalid_params(format!("Invalid tool call parameters: {e}")),
                );
            }
        };

        info!(
            tool = %params.name,
            client_ip = %meta.client_ip,
            auth_method = %auth.auth_method,
            "Executing tool"
        );

        let result = self.tools.call(&params.name, &params.arguments).await;
        match serde_json::to_value(&result) {
            Ok(result) => McpResponse::success(id, result),
            Err(e) => McpResponse::failure(id, McpError::internal(e.to_string())),
        }
    }
}
