//! Error types for the build engine

use crate::rule::RuleId;
use std::sync::Arc;

/// Errors raised by the build engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Every tier missed and the local build failed
    #[error("Build of {rule} failed: {reason}")]
    BuildFailed {
        /// Rule that failed
        rule: RuleId,
        /// What went wrong
        reason: String,
    },

    /// A dependency failed, so the rule was not attempted
    #[error("{rule} not built because dependency {dependency} failed")]
    DependencyFailed {
        /// Rule that was skipped
        rule: RuleId,
        /// Dependency that failed
        dependency: RuleId,
    },

    /// The engine is shutting down
    #[error("Build engine is shutting down")]
    ShuttingDown,

    /// No such rule
    #[error("Unknown rule: {0}")]
    UnknownRule(RuleId),

    /// A dependency references a rule that does not exist
    #[error("{rule} depends on unknown rule {dependency}")]
    UnknownDependency {
        /// Rule with the dangling edge
        rule: RuleId,
        /// Missing dependency
        dependency: RuleId,
    },

    /// The rule graph has a cycle through this rule
    #[error("Dependency cycle through {0}")]
    DependencyCycle(RuleId),

    /// Persisted metadata could not be decoded
    #[error("Corrupt metadata for {rule}: {reason}")]
    CorruptMetadata {
        /// Rule whose record is damaged
        rule: RuleId,
        /// Decode failure
        reason: String,
    },

    /// Background task failed
    #[error("Task failed: {0}")]
    Task(String),

    /// Same error observed by another waiter on a shared build
    #[error(transparent)]
    Shared(Arc<EngineError>),

    /// Fingerprint error
    #[error("Fingerprint error: {0}")]
    Fingerprint(#[from] convenient_fingerprint::FingerprintError),

    /// Artifact store error
    #[error("Cache error: {0}")]
    Cache(#[from] convenient_cache::CacheError),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// The underlying error, looking through [`EngineError::Shared`]
    #[must_use]
    pub fn root(&self) -> &EngineError {
        match self {
            Self::Shared(inner) => inner.root(),
            other => other,
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
