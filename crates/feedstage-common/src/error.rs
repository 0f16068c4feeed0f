//! Error types for feedstage

use thiserror::Error;

/// Result type alias for feedstage operations
pub type Result<T> = std::result::Result<T, FeedstageError>;

/// Workspace-level error type for configuration and setup failures
#[derive(Error, Debug)]
pub enum FeedstageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read configuration: {0}")]
    ConfigSource(#[from] config::ConfigError),
}

impl FeedstageError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
