//! Error types for fingerprinting

use std::path::PathBuf;

/// Errors raised while computing fingerprints
#[derive(Debug, thiserror::Error)]
pub enum FingerprintError {
    /// The path does not exist
    #[error("Path not found: {}", .0.display())]
    NotFound(PathBuf),

    /// No cache is responsible for the path
    #[error("Path not covered by any fingerprint cache: {}", .0.display())]
    NotCovered(PathBuf),

    /// An archive's hash manifest does not list the requested member
    #[error("No precomputed hash for '{member}' in {}", .archive.display())]
    MissingEntryHash {
        /// Archive that was read
        archive: PathBuf,
        /// Member that was requested
        member: String,
    },

    /// An archive or its hash manifest could not be read
    #[error("Invalid archive {}: {reason}", .archive.display())]
    InvalidArchive {
        /// Archive that was read
        archive: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// I/O error
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        /// Path being read
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}

impl FingerprintError {
    /// Map an I/O error, turning `NotFound` into [`FingerprintError::NotFound`]
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path)
        } else {
            Self::Io { path, source }
        }
    }
}

/// Result type for fingerprint operations
pub type FingerprintResult<T> = Result<T, FingerprintError>;
