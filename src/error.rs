//! Error types for the Axon MCP server runtime
//!
//! This module defines all error types used throughout the crate,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for server runtime operations
///
/// This enum encompasses all possible errors that can occur during
/// session handling, request dispatch, registry mutation, and
/// transport interaction.
#[derive(Error, Debug)]
pub enum McpServerError {
    /// A JSON-RPC error returned by the remote peer, carrying the wire
    /// error code and message.
    #[error("JSON-RPC error {code}: {message}")]
    Protocol {
        /// Numeric JSON-RPC error code.
        code: i64,
        /// Human-readable error description from the peer.
        message: String,
    },

    /// An operation was attempted without the corresponding capability
    /// having been configured or negotiated.
    #[error("Capability error: {0}")]
    Capability(String),

    /// Duplicate registration, or removal of an entry that does not exist.
    #[error("Registry error: {0}")]
    Registry(String),

    /// Failure to deliver a message over the underlying transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A session-initiated request did not receive a response in time.
    #[error("Request timeout: method={method}")]
    Timeout {
        /// The JSON-RPC method that timed out.
        method: String,
    },

    /// Structured output failed validation against a declared schema.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Session lifecycle violations and malformed inbound traffic.
    #[error("Session error: {0}")]
    Session(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for server runtime operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let error = McpServerError::Protocol {
            code: -32601,
            message: "Method not found".to_string(),
        };
        assert_eq!(error.to_string(), "JSON-RPC error -32601: Method not found");
    }

    #[test]
    fn test_capability_error_display() {
        let error =
            McpServerError::Capability("Server must be configured with tool capabilities".into());
        assert_eq!(
            error.to_string(),
            "Capability error: Server must be configured with tool capabilities"
        );
    }

    #[test]
    fn test_registry_error_display() {
        let error = McpServerError::Registry("Tool with name 'echo' already exists".into());
        assert_eq!(
            error.to_string(),
            "Registry error: Tool with name 'echo' already exists"
        );
    }

    #[test]
    fn test_transport_error_display() {
        let error = McpServerError::Transport("outbound channel closed".into());
        assert_eq!(
            error.to_string(),
            "Transport error: outbound channel closed"
        );
    }

    #[test]
    fn test_timeout_error_display() {
        let error = McpServerError::Timeout {
            method: "sampling/createMessage".to_string(),
        };
        assert!(error.to_string().contains("sampling/createMessage"));
    }

    #[test]
    fn test_validation_error_display() {
        let error = McpServerError::Validation("missing required property 'id'".into());
        assert_eq!(
            error.to_string(),
            "Validation error: missing required property 'id'"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "pipe closed");
        let error: McpServerError = io_error.into();
        assert!(matches!(error, McpServerError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: McpServerError = json_error.into();
        assert!(matches!(error, McpServerError::Serialization(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<McpServerError>();
    }
}
