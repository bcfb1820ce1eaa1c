//! Errors surfaced by the command line

use crate::config::ConfigError;

/// Any failure of a `bitzel` command
#[derive(Debug, thiserror::Error)]
pub enum BitzelError {
    /// Configuration or rule file problem
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Change feed failure
    #[error("Watch error: {0}")]
    Watch(#[from] convenient_watch::WatchError),

    /// Fingerprint failure
    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] convenient_fingerprint::FingerprintError),

    /// Artifact store failure
    #[error("Cache error: {0}")]
    Cache(#[from] convenient_cache::CacheError),

    /// Build engine failure
    #[error(transparent)]
    Engine(#[from] convenient_engine::EngineError),

    /// Some targets failed to build
    #[error("{0} of {1} targets failed")]
    TargetsFailed(usize, usize),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for commands
pub type BitzelResult<T> = Result<T, BitzelError>;
