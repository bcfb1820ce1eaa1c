//! Error types for the change feed

use std::time::Duration;

/// Errors raised while talking to the watch service
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The watch service could not be reached or exited abnormally
    #[error("Watch transport error: {0}")]
    Transport(String),

    /// The watch service did not answer in time
    #[error("Timed out after {}s waiting for watch query", .0.as_secs())]
    Timeout(Duration),

    /// The watch service answered with an error message
    #[error("Watch query failed: {0}")]
    QueryFailed(String),

    /// The reply could not be understood
    #[error("Malformed watch response: {0}")]
    Malformed(String),

    /// An ignore glob was rejected
    #[error("Invalid ignore glob '{glob}': {reason}")]
    InvalidGlob {
        /// The offending pattern
        glob: String,
        /// Why the pattern was rejected
        reason: String,
    },

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for watch operations
pub type WatchResult<T> = Result<T, WatchError>;
