//! Error types for the remote store client.

use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur while talking to the remote project store.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The remote answered 404 for the resource.
    #[error("Not found: {resource}")]
    NotFound { resource: String },

    /// The remote answered with a non-success status.
    #[error("{resource} failed with status {status}: {message}")]
    Status {
        resource: String,
        status: u16,
        message: String,
    },

    /// Connection, timeout or protocol failure.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The run stream broke or carried an unreadable message.
    #[error("Stream error: {0}")]
    Stream(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error while reading or writing configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Create a not-found error for a resource.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Whether the remote reported the resource as missing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }
}
