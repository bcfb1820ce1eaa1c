//! The two-level artifact store

use crate::archive::{self, Artifact, ArtifactMetadata};
use crate::content_key::SecondLevelContentKey;
use crate::error::{CacheError, CacheResult};
use crate::rule_key::RuleKey;
use crate::transport::CacheTransport;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

const RULE_KEY_NAMESPACE: &str = "rulekey";
const MANIFEST_NAMESPACE: &str = "manifest";
const DIRECT_NAMESPACE: &str = "artifact";

/// Artifact store tuning
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Limit for each transport call made while fetching
    pub fetch_timeout: Duration,
    /// Limit for each transport call made while storing
    pub store_timeout: Duration,
    /// zstd level for new archives
    pub compression_level: i32,
    /// Smallest archive stored behind a content key
    pub two_level_min_bytes: u64,
    /// Largest archive stored behind a content key, unbounded when `None`
    pub two_level_max_bytes: Option<u64>,
}

impl StoreConfig {
    /// Whether an archive of `size` bytes goes behind a content key
    #[must_use]
    pub fn is_two_level(&self, size: u64) -> bool {
        size >= self.two_level_min_bytes && self.two_level_max_bytes.is_none_or(|max| size <= max)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            store_timeout: Duration::from_secs(60),
            compression_level: 3, // Balance speed/compression
            two_level_min_bytes: 0,
            two_level_max_bytes: None,
        }
    }
}

/// Result of [`ArtifactStore::fetch`]
#[derive(Debug)]
pub enum FetchResult {
    /// The key resolved to a readable artifact
    Hit(Artifact),
    /// Nothing usable is stored under the key
    Miss,
    /// The transport failed or timed out
    Error(CacheError),
}

impl FetchResult {
    /// Whether this is a hit
    #[must_use]
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    /// Whether this is a miss
    #[must_use]
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }
}

/// Result of a successful [`ArtifactStore::store`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// New content was uploaded and the keys point at it
    Stored(SecondLevelContentKey),
    /// The keys were pointed at content already in the store
    Linked(SecondLevelContentKey),
    /// The archive, of the given size, was stored whole under each new key
    Direct(u64),
    /// Every key was already registered; nothing was written
    AlreadyStored,
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Fetches that returned an artifact
    pub hits: u64,
    /// Fetches that found nothing usable
    pub misses: u64,
    /// Fetches that failed
    pub errors: u64,
    /// Stores that wrote something
    pub stores: u64,
    /// Stores skipped because every key existed
    pub skipped_stores: u64,
}

impl StoreStats {
    /// Fraction of fetches that hit
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses + self.errors;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    stores: AtomicU64,
    skipped_stores: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    let _ = counter.fetch_add(1, Ordering::Relaxed);
}

fn pointer_key(key: &RuleKey) -> String {
    format!("{RULE_KEY_NAMESPACE}/{key}")
}

fn direct_key(key: &RuleKey) -> String {
    format!("{DIRECT_NAMESPACE}/{key}")
}

fn manifest_key(key: &RuleKey) -> String {
    format!("{MANIFEST_NAMESPACE}/{key}")
}

async fn blocking<T, F>(work: F) -> CacheResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> CacheResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| CacheError::Task(e.to_string()))?
}

/// Artifact store with rule-key → content-key indirection
pub struct ArtifactStore {
    transport: Arc<dyn CacheTransport>,
    config: StoreConfig,
    counters: Counters,
}

impl ArtifactStore {
    /// Store backed by `transport`
    pub fn new(transport: Arc<dyn CacheTransport>, config: StoreConfig) -> Self {
        Self {
            transport,
            config,
            counters: Counters::default(),
        }
    }

    /// Transport description
    #[must_use]
    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    /// Snapshot of the counters
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            stores: self.counters.stores.load(Ordering::Relaxed),
            skipped_stores: self.counters.skipped_stores.load(Ordering::Relaxed),
        }
    }

    async fn timed<T>(
        operation: &'static str,
        limit: Duration,
        call: impl Future<Output = CacheResult<T>>,
    ) -> CacheResult<T> {
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| CacheError::Timeout {
                operation,
                after: limit,
            })?
    }

    /// Archive `outputs` (relative to `root`) with `metadata` and register
    /// the archive under every key in `keys`.
    ///
    /// Keys that already resolve to stored content are left alone; when all
    /// of them do, no transport write happens at all. A pointer whose content
    /// has gone missing counts as unregistered and is rewritten.
    ///
    /// Archives outside the configured two-level size range skip the content
    /// indirection and are stored whole under each key.
    ///
    /// # Errors
    ///
    /// Transport errors, timeouts, and packing failures
    pub async fn store(
        &self,
        keys: &[RuleKey],
        root: &Path,
        outputs: &[PathBuf],
        metadata: ArtifactMetadata,
    ) -> CacheResult<StoreOutcome> {
        let limit = self.config.store_timeout;
        let (missing, reusable) = self.unregistered(keys, limit).await?;

        if missing.is_empty() {
            debug!("{} already stored under {} keys", metadata.target, keys.len());
            bump(&self.counters.skipped_stores);
            return Ok(StoreOutcome::AlreadyStored);
        }

        let (content_key, outcome) = if let Some(content_key) = reusable {
            (content_key.clone(), StoreOutcome::Linked(content_key))
        } else {
            let target = metadata.target.clone();
            let root = root.to_path_buf();
            let outputs = outputs.to_vec();
            let level = self.config.compression_level;
            let bytes =
                blocking(move || archive::pack(&root, &outputs, &metadata, level)).await?;

            let size = bytes.len() as u64;
            if !self.config.is_two_level(size) {
                for key in &missing {
                    let direct = direct_key(key);
                    let write = self.transport.store(&direct, bytes.clone());
                    Self::timed("store", limit, write).await?;
                }
                info!(
                    "stored {} ({} bytes) directly under {} keys in {}",
                    target,
                    size,
                    missing.len(),
                    self.transport.describe()
                );
                bump(&self.counters.stores);
                return Ok(StoreOutcome::Direct(size));
            }

            let digest = hex::encode(Sha256::digest(&bytes));
            let content_key = SecondLevelContentKey::cache_only(&digest, size);
            let content = content_key.to_string();
            if Self::timed("store", limit, self.transport.contains(&content)).await? {
                debug!("content {} for {} already present", content, target);
            } else {
                Self::timed("store", limit, self.transport.store(&content, bytes)).await?;
            }
            (content_key.clone(), StoreOutcome::Stored(content_key))
        };

        let content_key = content_key.to_string();
        for key in &missing {
            Self::timed(
                "store",
                limit,
                self.transport
                    .store(&pointer_key(key), content_key.clone().into_bytes()),
            )
            .await?;
        }

        info!(
            "stored {} under {} new keys in {}",
            content_key,
            missing.len(),
            self.transport.describe()
        );
        bump(&self.counters.stores);
        Ok(outcome)
    }

    /// Keys that do not resolve to stored content, and the first content key
    /// that is present and could be linked to
    async fn unregistered(
        &self,
        keys: &[RuleKey],
        limit: Duration,
    ) -> CacheResult<(Vec<RuleKey>, Option<SecondLevelContentKey>)> {
        let mut missing = Vec::new();
        let mut reusable = None;
        let mut present: HashMap<String, bool> = HashMap::new();

        for key in keys {
            let pointer = Self::timed("store", limit, self.transport.fetch(&pointer_key(key)))
                .await?
                .and_then(|raw| String::from_utf8(raw).ok())
                .map(|raw| SecondLevelContentKey::parse(raw.trim()));

            let Some(content_key) = pointer else {
                if !Self::timed("store", limit, self.transport.contains(&direct_key(key))).await? {
                    missing.push(*key);
                }
                continue;
            };

            let content = content_key.to_string();
            let found = match present.get(&content) {
                Some(found) => *found,
                None => {
                    let found =
                        Self::timed("store", limit, self.transport.contains(&content)).await?;
                    let _ = present.insert(content.clone(), found);
                    found
                }
            };
            if found {
                let _ = reusable.get_or_insert(content_key);
            } else {
                debug!("{} points at missing content {}, rewriting", key, content);
                missing.push(*key);
            }
        }
        Ok((missing, reusable))
    }

    /// Resolve `key` to an artifact.
    ///
    /// Missing pointers, dangling pointers and corrupt archives are misses;
    /// transport failures and timeouts are errors.
    pub async fn fetch(&self, key: &RuleKey) -> FetchResult {
        match self.try_fetch(key).await {
            Ok(Some(artifact)) => {
                debug!("cache hit for {}", key);
                bump(&self.counters.hits);
                FetchResult::Hit(artifact)
            }
            Ok(None) => {
                bump(&self.counters.misses);
                FetchResult::Miss
            }
            Err(CacheError::Corrupt(reason)) => {
                warn!("corrupt artifact for {}: {}", key, reason);
                bump(&self.counters.misses);
                FetchResult::Miss
            }
            Err(e) => {
                warn!("cache fetch for {} failed: {}", key, e);
                bump(&self.counters.errors);
                FetchResult::Error(e)
            }
        }
    }

    async fn try_fetch(&self, key: &RuleKey) -> CacheResult<Option<Artifact>> {
        let limit = self.config.fetch_timeout;

        let Some(pointer) =
            Self::timed("fetch", limit, self.transport.fetch(&pointer_key(key))).await?
        else {
            let direct_key = direct_key(key);
            let direct = self.transport.fetch(&direct_key);
            return match Self::timed("fetch", limit, direct).await? {
                Some(bytes) => blocking(move || archive::unpack(&bytes)).await.map(Some),
                None => Ok(None),
            };
        };
        let raw = String::from_utf8(pointer)
            .map_err(|e| CacheError::Corrupt(format!("pointer is not UTF-8: {e}")))?;
        let content_key = SecondLevelContentKey::parse(raw.trim());

        let Some(bytes) =
            Self::timed("fetch", limit, self.transport.fetch(&content_key.to_string())).await?
        else {
            warn!("{} points at missing content {}", key, content_key);
            return Ok(None);
        };

        blocking(move || archive::unpack(&bytes)).await.map(Some)
    }

    /// Store a manifest blob under `key`, replacing any previous one
    ///
    /// # Errors
    ///
    /// Transport errors and timeouts
    pub async fn store_manifest(&self, key: &RuleKey, bytes: Vec<u8>) -> CacheResult<()> {
        Self::timed(
            "store",
            self.config.store_timeout,
            self.transport.store(&manifest_key(key), bytes),
        )
        .await
    }

    /// Manifest blob under `key`
    ///
    /// # Errors
    ///
    /// Transport errors and timeouts
    pub async fn fetch_manifest(&self, key: &RuleKey) -> CacheResult<Option<Vec<u8>>> {
        Self::timed(
            "fetch",
            self.config.fetch_timeout,
            self.transport.fetch(&manifest_key(key)),
        )
        .await
    }
}
