//! Error types for cache operations

use std::path::PathBuf;
use std::time::Duration;

/// Error types for cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Cache server error
    #[error("Server error: {0}")]
    ServerError(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid rule key
    #[error("Invalid rule key: {0}")]
    InvalidKey(String),

    /// A transport call took too long
    #[error("{operation} timed out after {}ms", .after.as_millis())]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
        /// Configured limit
        after: Duration,
    },

    /// Stored bytes could not be decoded
    #[error("Corrupt artifact: {0}")]
    Corrupt(String),

    /// An output path is absolute or escapes the project root
    #[error("Refusing to write outside the project root: {}", .0.display())]
    UnsafePath(PathBuf),

    /// Background task failed
    #[error("Task failed: {0}")]
    Task(String),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
