//! Error types shared across Taskboard crates

use thiserror::Error;

/// Result type alias for Taskboard operations
pub type Result<T> = std::result::Result<T, TaskboardError>;

/// Main error type for Taskboard
#[derive(Error, Debug)]
pub enum TaskboardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(String),
}

impl TaskboardError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
