//! Error types for rosbridge client operations.

use thiserror::Error;

/// Errors that can occur while talking to a rosbridge server.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket open, send, or read failure. Aborts the current operation.
    #[error("connection error: {0}")]
    Connection(String),

    /// The bridge reported a status frame at level `error`.
    #[error("{0}")]
    Protocol(String),

    /// The bridge rejected a topic advertisement.
    #[error("Advertise failed: {0}")]
    Advertise(String),

    /// A single-message wait ran past its deadline.
    #[error("{0}")]
    Timeout(String),

    /// Input rejected before any network I/O.
    #[error("{0}")]
    Validation(String),

    /// An outbound frame could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ClientError {
    /// Whether this error came from the socket rather than the bridge.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ClientError::Connection("connection refused".to_string());
        assert_eq!(err.to_string(), "connection error: connection refused");
        assert!(err.is_connection());
    }

    #[test]
    fn test_advertise_error_display() {
        let err = ClientError::Advertise("topic type mismatch".to_string());
        assert_eq!(err.to_string(), "Advertise failed: topic type mismatch");
        assert!(!err.is_connection());
    }

    #[test]
    fn test_timeout_and_validation_display_verbatim() {
        let err = ClientError::Timeout("Timeout waiting for message from topic".to_string());
        assert_eq!(err.to_string(), "Timeout waiting for message from topic");

        let err = ClientError::Validation("queue_length must be an integer ≥ 1".to_string());
        assert_eq!(err.to_string(), "queue_length must be an integer ≥ 1");
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: ClientError = json_err.into();
        assert!(matches!(err, ClientError::Serialization(_)));
    }

    #[test]
    fn test_from_tungstenite_error() {
        let err: ClientError = tokio_tungstenite::tungstenite::Error::ConnectionClosed.into();
        assert!(err.is_connection());
    }
}
