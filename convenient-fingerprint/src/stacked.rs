//! Routing across caches that partition a workspace

use crate::cache::FingerprintCache;
use crate::error::{FingerprintError, FingerprintResult};
use crate::hash::{FingerprintEntry, HashCode};
use convenient_watch::{ChangeBatch, ChangeSubscriber};
use std::path::Path;
use std::sync::Arc;

/// Several caches, each authoritative for the paths its coverage accepts.
///
/// Paths are absolute. The first cache that covers a path answers for it.
#[derive(Debug, Clone, Default)]
pub struct StackedFingerprintCache {
    caches: Vec<Arc<FingerprintCache>>,
}

impl StackedFingerprintCache {
    /// Stack of `caches`, consulted in order
    #[must_use]
    pub fn new(caches: Vec<Arc<FingerprintCache>>) -> Self {
        Self { caches }
    }

    /// Add a cache at the end of the stack
    pub fn push(&mut self, cache: Arc<FingerprintCache>) {
        self.caches.push(cache);
    }

    /// Member caches
    #[must_use]
    pub fn caches(&self) -> &[Arc<FingerprintCache>] {
        &self.caches
    }

    /// Cache responsible for `path`
    ///
    /// # Errors
    ///
    /// `NotCovered` when no cache accepts the path
    pub fn cache_for(&self, path: &Path) -> FingerprintResult<&Arc<FingerprintCache>> {
        self.caches
            .iter()
            .find(|cache| cache.covers(path))
            .ok_or_else(|| FingerprintError::NotCovered(path.to_path_buf()))
    }

    /// Whether any cache covers `path`
    pub fn covers(&self, path: impl AsRef<Path>) -> bool {
        self.cache_for(path.as_ref()).is_ok()
    }

    /// See [`FingerprintCache::get`]
    ///
    /// # Errors
    ///
    /// `NotCovered`, or whatever the responsible cache reports
    pub fn get(&self, path: impl AsRef<Path>) -> FingerprintResult<HashCode> {
        let path = path.as_ref();
        self.cache_for(path)?.get(path)
    }

    /// See [`FingerprintCache::entry`]
    ///
    /// # Errors
    ///
    /// `NotCovered`, or whatever the responsible cache reports
    pub fn entry(&self, path: impl AsRef<Path>) -> FingerprintResult<FingerprintEntry> {
        let path = path.as_ref();
        self.cache_for(path)?.entry(path)
    }

    /// See [`FingerprintCache::get_if_present`]
    pub fn get_if_present(&self, path: impl AsRef<Path>) -> Option<HashCode> {
        let path = path.as_ref();
        self.cache_for(path).ok()?.get_if_present(path)
    }

    /// See [`FingerprintCache::get_size`]
    ///
    /// # Errors
    ///
    /// `NotCovered`, or whatever the responsible cache reports
    pub fn get_size(&self, path: impl AsRef<Path>) -> FingerprintResult<u64> {
        let path = path.as_ref();
        self.cache_for(path)?.get_size(path)
    }

    /// See [`FingerprintCache::get_for_archive_member`]
    ///
    /// # Errors
    ///
    /// `NotCovered`, or whatever the responsible cache reports
    pub fn get_for_archive_member(
        &self,
        archive: impl AsRef<Path>,
        member: &str,
    ) -> FingerprintResult<HashCode> {
        let archive = archive.as_ref();
        self.cache_for(archive)?.get_for_archive_member(archive, member)
    }

    /// Invalidate `path` in every cache below whose root it lies.
    ///
    /// A directory may span caches (e.g. the project root contains the
    /// output directory), so this is not routed through `cache_for`.
    pub fn invalidate(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        for cache in &self.caches {
            cache.invalidate(path);
        }
    }

    /// Clear every cache
    pub fn invalidate_all(&self) {
        for cache in &self.caches {
            cache.invalidate_all();
        }
    }
}

impl ChangeSubscriber for StackedFingerprintCache {
    fn on_change_batch(&self, batch: Arc<ChangeBatch>) {
        for cache in &self.caches {
            cache.apply_changes(&batch);
        }
    }
}
