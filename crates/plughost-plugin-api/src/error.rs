//! Plugin error types

use std::fmt;

/// Plugin error type
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The endpoint failed while handling the request
    #[error("Execution failed: {0}")]
    ExecutionError(String),

    /// The request is not acceptable to the endpoint
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Status or headers changed after the body was started
    #[error("Response already started: {0}")]
    ResponseStarted(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

/// Result type for plugin operations
pub type Result<T> = std::result::Result<T, PluginError>;

impl PluginError {
    /// Create a new execution error
    pub fn execution(msg: impl fmt::Display) -> Self {
        Self::ExecutionError(msg.to_string())
    }

    /// Create a new invalid request error
    pub fn invalid_request(msg: impl fmt::Display) -> Self {
        Self::InvalidRequest(msg.to_string())
    }

    /// Create a new response started error
    pub fn response_started(msg: impl fmt::Display) -> Self {
        Self::ResponseStarted(msg.to_string())
    }

    /// Create a new invalid state error
    pub fn invalid_state(msg: impl fmt::Display) -> Self {
        Self::InvalidState(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PluginError::execution("test");
        assert!(matches!(err, PluginError::ExecutionError(_)));

        let err = PluginError::response_started("status");
        assert!(matches!(err, PluginError::ResponseStarted(_)));

        let err = PluginError::invalid_request("test");
        assert!(matches!(err, PluginError::InvalidRequest(_)));
    }

    #[test]
    fn test_error_display() {
        let err = PluginError::ExecutionError("database unreachable".to_string());
        assert_eq!(err.to_string(), "Execution failed: database unreachable");
    }
}
