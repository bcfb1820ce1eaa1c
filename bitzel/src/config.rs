//! `bitzel.yml` configuration
//!
//! Every section is optional; missing values take the defaults of the
//! component they configure.
//!
//! ```yaml
//! cells:
//!   - path: .
//!     ignore_dirs: [.bitzel, out]
//!     ignore_globs: ["**/*.swp"]
//! watch:
//!   timeout_secs: 10
//!   fresh_instance: overflow
//! cache:
//!   dir: .bitzel/cache
//!   remote_url: http://localhost:9090
//!   remote_mode: read-only
//!   fetch_attempts: 3
//! engine:
//!   max_manifest_entries: 256
//! fingerprint:
//!   output_dirs: [out]
//! ```

use convenient_cache::{CacheMode, RetryPolicy, StoreConfig};
use convenient_engine::EngineConfig;
use convenient_fingerprint::{ArchiveHashMode, FingerprintConfig};
use convenient_watch::{FeedConfig, FreshInstanceAction, IgnorePattern};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up in the project root
pub const CONFIG_FILE_NAME: &str = "bitzel.yml";

/// Directory for Bitzel's own state below the project root
pub const STATE_DIR: &str = ".bitzel";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File system I/O error
    #[error("IO error reading {0}: {1}")]
    IoError(PathBuf, String),

    /// YAML parsing error
    #[error("Parse error in {0}: {1}")]
    ParseError(PathBuf, String),

    /// A value is out of range or inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// One watched cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CellConfig {
    /// Cell root relative to the project root
    pub path: PathBuf,
    /// Directories below the cell the watch never reports
    #[serde(default)]
    pub ignore_dirs: Vec<PathBuf>,
    /// `wholename` globs the watch never reports
    #[serde(default)]
    pub ignore_globs: Vec<String>,
}

/// What to emit for a fresh watch instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreshInstance {
    /// Nothing
    None,
    /// One overflow for the cell
    #[default]
    Overflow,
}

/// Change feed settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// Watchman binary
    pub watchman: PathBuf,
    /// Per-query timeout
    pub timeout_secs: u64,
    /// File lists longer than this become one overflow
    pub overflow_threshold: usize,
    /// Reaction to a fresh watch instance
    pub fresh_instance: FreshInstance,
    /// Cap on concurrent cell queries
    pub max_workers: Option<usize>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        let feed = FeedConfig::default();
        Self {
            watchman: PathBuf::from("watchman"),
            timeout_secs: feed.timeout.as_secs(),
            overflow_threshold: feed.overflow_threshold,
            fresh_instance: FreshInstance::Overflow,
            max_workers: feed.max_workers,
        }
    }
}

/// Artifact store settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Local cache directory, relative to the project root
    pub dir: PathBuf,
    /// Remote HTTP cache, consulted after the local directory
    pub remote_url: Option<String>,
    /// Whether builds upload to the remote
    pub remote_mode: CacheMode,
    /// Attempts per remote fetch or lookup
    pub fetch_attempts: u32,
    /// Fetch timeout
    pub fetch_timeout_secs: u64,
    /// Store timeout
    pub store_timeout_secs: u64,
    /// zstd level for new artifacts
    pub compression_level: i32,
    /// Smaller artifacts are stored whole under each rule key
    pub two_level_min_bytes: u64,
    /// Larger artifacts are stored whole under each rule key
    pub two_level_max_bytes: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            dir: Path::new(STATE_DIR).join("cache"),
            remote_url: None,
            remote_mode: CacheMode::ReadWrite,
            fetch_attempts: RetryPolicy::default().max_attempts,
            fetch_timeout_secs: store.fetch_timeout.as_secs(),
            store_timeout_secs: store.store_timeout.as_secs(),
            compression_level: store.compression_level,
            two_level_min_bytes: store.two_level_min_bytes,
            two_level_max_bytes: store.two_level_max_bytes,
        }
    }
}

/// Build engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    /// Per-rule metadata directory, relative to the project root
    pub metadata_dir: PathBuf,
    /// Manifest entry cap
    pub max_manifest_entries: usize,
    /// Push locally built artifacts
    pub push_artifacts: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let engine = EngineConfig::default();
        Self {
            metadata_dir: Path::new(STATE_DIR).join("metadata"),
            max_manifest_entries: engine.max_manifest_entries,
            push_artifacts: engine.push_artifacts,
        }
    }
}

/// How archive members without a recorded hash are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveMode {
    /// Missing hashes are errors
    Strict,
    /// Missing hashes are computed from the bytes
    #[default]
    Lenient,
}

/// Fingerprint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FingerprintSettings {
    /// Archive member hashing
    pub archive_mode: ArchiveMode,
    /// Build output directories, relative to the project root; fingerprinted
    /// by their own cache in front of the source caches
    pub output_dirs: Vec<PathBuf>,
}

impl Default for FingerprintSettings {
    fn default() -> Self {
        Self {
            archive_mode: ArchiveMode::default(),
            output_dirs: vec![PathBuf::from("out")],
        }
    }
}

/// Whole `bitzel.yml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BitzelConfig {
    /// Watched cells; one cell at the project root when empty
    pub cells: Vec<CellConfig>,
    /// Change feed
    pub watch: WatchConfig,
    /// Artifact store
    pub cache: CacheConfig,
    /// Build engine
    pub engine: EngineSettings,
    /// Fingerprints
    pub fingerprint: FingerprintSettings,
}

impl BitzelConfig {
    /// Load and validate a configuration file
    ///
    /// # Errors
    ///
    /// `IoError`, `ParseError` or `Invalid`
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;
        Self::parse(&content).map_err(|e| match e {
            ConfigError::ParseError(_, reason) => ConfigError::ParseError(path.to_path_buf(), reason),
            other => other,
        })
    }

    /// Parse and validate YAML text
    ///
    /// # Errors
    ///
    /// `ParseError` or `Invalid`
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| ConfigError::ParseError(PathBuf::from("<inline>"), e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges and consistency
    ///
    /// # Errors
    ///
    /// `Invalid` naming the first offending value
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| Err(ConfigError::Invalid(reason));

        if self.watch.timeout_secs == 0 {
            return invalid("watch.timeout_secs must be positive".to_string());
        }
        if self.watch.overflow_threshold == 0 {
            return invalid("watch.overflow_threshold must be positive".to_string());
        }
        if self.watch.max_workers == Some(0) {
            return invalid("watch.max_workers must be positive".to_string());
        }
        if self.cache.fetch_timeout_secs == 0 || self.cache.store_timeout_secs == 0 {
            return invalid("cache timeouts must be positive".to_string());
        }
        if !(1..=22).contains(&self.cache.compression_level) {
            return invalid(format!(
                "cache.compression_level {} is outside 1..=22",
                self.cache.compression_level
            ));
        }
        if let Some(url) = &self.cache.remote_url
            && !url.starts_with("http://")
            && !url.starts_with("https://")
        {
            return invalid(format!("cache.remote_url {url} is not an http(s) URL"));
        }
        if self.cache.fetch_attempts == 0 {
            return invalid("cache.fetch_attempts must be positive".to_string());
        }
        if let Some(max) = self.cache.two_level_max_bytes
            && max < self.cache.two_level_min_bytes
        {
            return invalid(format!(
                "cache.two_level_max_bytes {max} is below two_level_min_bytes {}",
                self.cache.two_level_min_bytes
            ));
        }
        if self.engine.max_manifest_entries == 0 {
            return invalid("engine.max_manifest_entries must be positive".to_string());
        }

        for dir in &self.fingerprint.output_dirs {
            if dir.is_absolute() || dir.as_os_str().is_empty() {
                return invalid(format!(
                    "fingerprint output dir {} must be a relative subdirectory",
                    dir.display()
                ));
            }
        }

        let mut seen = BTreeSet::new();
        for cell in &self.cells {
            if cell.path.is_absolute() {
                return invalid(format!("cell {} must be relative", cell.path.display()));
            }
            if !seen.insert(&cell.path) {
                return invalid(format!("cell {} listed twice", cell.path.display()));
            }
            for glob in &cell.ignore_globs {
                let _ = IgnorePattern::glob(glob.clone())
                    .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Cells, with the implicit root cell when none are configured
    #[must_use]
    pub fn effective_cells(&self) -> Vec<CellConfig> {
        if self.cells.is_empty() {
            vec![CellConfig {
                path: PathBuf::from("."),
                ignore_dirs: vec![PathBuf::from(STATE_DIR)],
                ignore_globs: Vec::new(),
            }]
        } else {
            self.cells.clone()
        }
    }

    /// Change feed settings
    #[must_use]
    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            timeout: Duration::from_secs(self.watch.timeout_secs),
            overflow_threshold: self.watch.overflow_threshold,
            fresh_instance_action: match self.watch.fresh_instance {
                FreshInstance::None => FreshInstanceAction::None,
                FreshInstance::Overflow => FreshInstanceAction::PostOverflowEvent,
            },
            max_workers: self.watch.max_workers,
            ..FeedConfig::default()
        }
    }

    /// Artifact store settings
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            fetch_timeout: Duration::from_secs(self.cache.fetch_timeout_secs),
            store_timeout: Duration::from_secs(self.cache.store_timeout_secs),
            compression_level: self.cache.compression_level,
            two_level_min_bytes: self.cache.two_level_min_bytes,
            two_level_max_bytes: self.cache.two_level_max_bytes,
        }
    }

    /// Retry policy for the remote cache
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_attempts(self.cache.fetch_attempts)
    }

    /// Engine settings
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_manifest_entries: self.engine.max_manifest_entries,
            push_artifacts: self.engine.push_artifacts,
        }
    }

    /// Fingerprint settings
    #[must_use]
    pub fn fingerprint_config(&self) -> FingerprintConfig {
        FingerprintConfig {
            archive_mode: match self.fingerprint.archive_mode {
                ArchiveMode::Strict => ArchiveHashMode::Strict,
                ArchiveMode::Lenient => ArchiveHashMode::Lenient,
            },
        }
    }
}
