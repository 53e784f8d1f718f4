//! Hub error types.

use thiserror::Error;

/// Hub error type.
#[derive(Debug, Error)]
pub enum HubError {
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Channel send error.
    #[error("Channel send error")]
    ChannelSend,
}

impl From<tokio::sync::mpsc::error::SendError<String>> for HubError {
    fn from(_: tokio::sync::mpsc::error::SendError<String>) -> Self {
        HubError::ChannelSend
    }
}

/// Result type for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;
