//! MCP wire types.
//!
//! JSON-RPC 2.0 envelopes plus the MCP-specific payloads for
//! initialization, tool listing and tool invocation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Protocol revision implemented by this server.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Deserialize)]
pub struct McpRequest {
    pub jsonrpc: String,
    /// Request ID. Callers may send a string or a number.
    #[serde(default)]
    pub id: serde_json::Value,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    pub jsonrpc: String,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

impl McpResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: serde_json::Value, error: McpError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Serialize, falling back to a static internal-error envelope.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"serialization failed"}}"#
                .to_string()
        })
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl McpError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const AUTH_REQUIRED: i32 = -32001;
    pub const RATE_LIMITED: i32 = -32002;

    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(Self::PARSE_ERROR, format!("Parse error: {}", detail.into()))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("Method not found: {method}"))
            .with_data(serde_json::json!({ "method": method }))
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL_ERROR, detail)
    }
}

/// Maps admission and execution failures onto wire error codes.
impl From<AppError> for McpError {
    fn from(error: AppError) -> Self {
        match &error {
            AppError::Authentication(_) | AppError::Authorization(_) => {
                McpError::new(McpError::AUTH_REQUIRED, error.to_string())
            }
            AppError::RateLimited { kind, retry_after } => {
                McpError::new(McpError::RATE_LIMITED, error.to_string()).with_data(
                    serde_json::json!({
                        "kind": kind,
                        "retry_after": retry_after,
                    }),
                )
            }
            AppError::Validation(_) | AppError::QueryRejected { .. } => {
                McpError::invalid_params(error.to_string())
            }
            _ => McpError::internal(error.to_string()),
        }
    }
}

/// Parameters accepted by a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub r#type: String,
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

impl ToolParameter {
    pub fn new(kind: &str, description: &str) -> Self {
        Self {
            r#type: kind.to_string(),
            description: description.to_string(),
            required: false,
            allowed_values: None,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed_values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn default_value(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// A tool exposed over tools/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: BTreeMap<String, ToolParameter>,
}

/// One piece of tool output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContent {
    pub r#type: String,
    pub text: String,
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            r#type: "text".to_string(),
            text: text.into(),
        }
    }
}

/// Result of a tool invocation. Execution failures travel as a success
/// envelope with `is_error` set, per the MCP tool contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(content: Vec<ToolContent>) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(message)],
            is_error: true,
        }
    }
}

/// Parameters of the initialize request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default)]
    pub client_info: serde_json::Value,
}

/// Result of the initialize request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: serde_json::Value,
    pub server_info: serde_json::Value,
}

impl InitializeResult {
    pub fn current() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({
                "tools": { "list_changed": false },
            }),
            server_info: serde_json::json!({
                "name": "pgmcp",
                "version": env!("CARGO_PKG_VERSION"),
            }),
        }
    }
}

/// Parameters of a tools/call request.
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_omits_absent_fields() {
        let response = McpResponse::success(serde_json::json!(1), serde_json::json!({"ok": true}));
        let text = response.to_json();
        assert!(!text.contains("\"error\""));

        let response = McpResponse::failure(
            serde_json::json!("abc"),
            McpError::method_not_found("nope"),
        );
        let text = response.to_json();
        assert!(!text.contains("\"result\""));
        assert!(text.contains("-32601"));
    }

    #[test]
    fn test_request_id_accepts_string_and_number() {
        let request: McpRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":7,"method":"tools/list"}"#).unwrap();
        assert_eq!(request.id, serde_json::json!(7));

        let request: McpRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"x-1","method":"tools/list"}"#).unwrap();
        assert_eq!(request.id, serde_json::json!("x-1"));
    }

    #[test]
    fn test_rate_limit_error_carries_retry_after() {
        let app_error = AppError::RateLimited {
            kind: crate::error::RateLimitKind::Limited,
            retry_after: 60,
        };
        let error = McpError::from(app_error);
        assert_eq!(error.code, McpError::RATE_LIMITED);
        assert_eq!(error.data.unwrap()["retry_after"], 60);
    }

    #[test]
    fn test_auth_error_code() {
        let error = McpError::from(AppError::Authentication("Invalid API key".to_string()));
        assert_eq!(error.code, McpError::AUTH_REQUIRED);
    }

    #[test]
    fn test_tool_parameter_enum_serializes_as_enum() {
        let parameter = ToolParameter::new("string", "op").one_of(&["select", "insert"]);
        let value = serde_json::to_value(&parameter).unwrap();
        assert!(value.get("enum").is_some());
        assert!(value.get("allowed_values").is_none());
    }
}
