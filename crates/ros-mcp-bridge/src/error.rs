//! Bridge error types

use rosbridge_client::ClientError;
use thiserror::Error;

/// Bridge error type
#[derive(Debug, Error)]
pub enum BridgeError {
    /// JSON parsing/serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Method not found
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Invalid parameters
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// Tool name not in the catalogue
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// A tool ran and failed; rendered as an error object, not an RPC error
    #[error("{0}")]
    Tool(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Get the JSON-RPC error code for this error
    pub fn code(&self) -> i32 {
        use crate::protocol::{INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR};
        match self {
            Self::Json(_) => PARSE_ERROR,
            Self::MethodNotFound(_) => METHOD_NOT_FOUND,
            Self::InvalidParams(_) | Self::UnknownTool(_) => INVALID_PARAMS,
            Self::Tool(_) | Self::Config(_) | Self::Io(_) => INTERNAL_ERROR,
        }
    }

    /// Tool failure with a message.
    pub fn tool(message: impl Into<String>) -> Self {
        Self::Tool(message.into())
    }
}

impl From<ClientError> for BridgeError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Connection(msg) => Self::Tool(format!("Connection error: {msg}")),
            other => Self::Tool(other.to_string()),
        }
    }
}

/// Bridge result type
pub type BridgeResult<T> = Result<T, BridgeError>;
