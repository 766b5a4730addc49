//! MCP wire types (JSON-RPC 2.0)

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// MCP protocol revision this server speaks.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name reported by `initialize`.
pub const SERVER_NAME: &str = "ros-mcp-bridge";

/// JSON-RPC request or notification
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    /// Protocol marker, `"2.0"`
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Request ID; absent for notifications
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name (e.g., "tools/call")
    pub method: String,
    /// Method parameters
    #[serde(default)]
    pub params: Value,
}

impl Request {
    /// Notifications carry no id and get no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC response
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    /// Always `"2.0"`
    pub jsonrpc: &'static str,
    /// Request ID for correlation; `null` when the request could not be parsed
    pub id: Value,
    /// Result on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

impl Response {
    /// Create a success response
    pub fn success(id: Value, result: impl Serialize) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(serde_json::to_value(result).unwrap_or(Value::Null)),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(ErrorResponse {
                code,
                message: message.into(),
            }),
        }
    }
}

/// JSON-RPC error
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error code
    pub code: i32,
    /// Error message
    pub message: String,
}

/// Result of `tools/call`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    /// Content blocks; always a single text block holding the JSON result
    pub content: Vec<Value>,
    /// Whether the result object reports an error
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolResult {
    /// Wrap a handler's JSON object.
    pub fn from_value(value: &Value) -> Self {
        Self {
            content: vec![json!({"type": "text", "text": value.to_string()})],
            is_error: value.get("error").is_some(),
        }
    }
}

// Standard JSON-RPC error codes

/// Input line is not valid JSON.
pub const PARSE_ERROR: i32 = -32700;
/// Not a JSON-RPC 2.0 request.
pub const INVALID_REQUEST: i32 = -32600;
/// Unknown method.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Malformed params or unknown tool.
pub const INVALID_PARAMS: i32 = -32602;
/// Server-side failure.
pub const INTERNAL_ERROR: i32 = -32603;
