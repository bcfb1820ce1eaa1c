//! Event-invalidated fingerprint cache for one root

use crate::archive::{self, ArchiveHashMode};
use crate::error::{FingerprintError, FingerprintResult};
use crate::hash::{FingerprintEntry, HashCode, PathKind};
use convenient_watch::{ChangeBatch, ChangeSubscriber, WatchEvent};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::fs;
use std::hash::Hash;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Which paths below the root a cache is responsible for
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Coverage {
    /// Every path below the root
    #[default]
    Everything,
    /// Only paths below one of these relative prefixes
    Only(Vec<PathBuf>),
    /// Every path except those below one of these relative prefixes
    Excluding(Vec<PathBuf>),
}

impl Coverage {
    fn accepts(&self, relative: &Path) -> bool {
        match self {
            Self::Everything => true,
            Self::Only(prefixes) => prefixes.iter().any(|p| relative.starts_with(p)),
            Self::Excluding(prefixes) => !prefixes.iter().any(|p| relative.starts_with(p)),
        }
    }
}

/// Fingerprint cache tuning
#[derive(Debug, Clone, Default)]
pub struct FingerprintConfig {
    /// How archive members missing from a hash manifest are treated
    pub archive_mode: ArchiveHashMode,
}

/// Lazily computed, event-invalidated hashes of paths below `root`.
///
/// Safe to share between threads. Two threads asking for the same missing
/// entry may both compute it; the results are identical. A computation that
/// races with an invalidation returns its hash but does not stay cached.
#[derive(Debug)]
pub struct FingerprintCache {
    root: PathBuf,
    coverage: Coverage,
    config: FingerprintConfig,
    entries: DashMap<PathBuf, FingerprintEntry>,
    sizes: DashMap<PathBuf, u64>,
    members: DashMap<(PathBuf, String), HashCode>,
    generation: AtomicU64,
}

impl FingerprintCache {
    /// Cache covering everything below `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_coverage(root, Coverage::Everything, FingerprintConfig::default())
    }

    /// Cache covering part of `root`
    pub fn with_coverage(
        root: impl Into<PathBuf>,
        coverage: Coverage,
        config: FingerprintConfig,
    ) -> Self {
        Self {
            root: root.into(),
            coverage,
            config,
            entries: DashMap::new(),
            sizes: DashMap::new(),
            members: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Watched root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether this cache is authoritative for `path`
    pub fn covers(&self, path: impl AsRef<Path>) -> bool {
        self.relativize(path.as_ref())
            .is_some_and(|relative| self.coverage.accepts(&relative))
    }

    /// Hash of `path`, computing and caching it if needed
    ///
    /// # Errors
    ///
    /// `NotFound` if the path does not exist, `NotCovered` if it lies
    /// outside the root
    pub fn get(&self, path: impl AsRef<Path>) -> FingerprintResult<HashCode> {
        self.entry(path).map(|entry| entry.hash)
    }

    /// Full cached entry of `path`, computing it if needed
    ///
    /// # Errors
    ///
    /// Same as [`FingerprintCache::get`]
    pub fn entry(&self, path: impl AsRef<Path>) -> FingerprintResult<FingerprintEntry> {
        let relative = self.relative(path.as_ref())?;
        self.entry_relative(&relative)
    }

    /// Cached hash of `path`, without computing anything
    pub fn get_if_present(&self, path: impl AsRef<Path>) -> Option<HashCode> {
        let relative = self.relativize(path.as_ref())?;
        self.entries.get(&relative).map(|entry| entry.hash)
    }

    /// Size of a file, or total size of the files below a directory
    ///
    /// # Errors
    ///
    /// `NotFound` if the path does not exist
    pub fn get_size(&self, path: impl AsRef<Path>) -> FingerprintResult<u64> {
        let relative = self.relative(path.as_ref())?;
        self.size_relative(&relative)
    }

    /// Hash of one member of a tar archive, using the configured mode
    ///
    /// # Errors
    ///
    /// `NotFound` if the archive or member is missing, `MissingEntryHash` in
    /// strict mode when the manifest lacks the member
    pub fn get_for_archive_member(
        &self,
        archive: impl AsRef<Path>,
        member: &str,
    ) -> FingerprintResult<HashCode> {
        self.get_for_archive_member_with(archive, member, self.config.archive_mode)
    }

    /// Hash of one member of a tar archive with an explicit mode
    ///
    /// # Errors
    ///
    /// Same as [`FingerprintCache::get_for_archive_member`]
    pub fn get_for_archive_member_with(
        &self,
        archive: impl AsRef<Path>,
        member: &str,
        mode: ArchiveHashMode,
    ) -> FingerprintResult<HashCode> {
        let relative = self.relative(archive.as_ref())?;
        let key = (relative, member.to_string());
        if let Some(hash) = self.members.get(&key).map(|hash| *hash) {
            return Ok(hash);
        }

        let generation = self.generation();
        let hash = archive::member_hash(&self.root.join(&key.0), member, mode)?;
        self.publish(&self.members, key, hash, generation);
        Ok(hash)
    }

    /// Drop `path`, everything cached below it, and every ancestor entry up
    /// to the root
    pub fn invalidate(&self, path: impl AsRef<Path>) {
        let Some(relative) = self.relativize(path.as_ref()) else {
            return;
        };
        let _ = self.generation.fetch_add(1, Ordering::SeqCst);

        let removed = self.entries.remove(&relative).map(|(_, entry)| entry.kind);
        let _ = self.sizes.remove(&relative);
        if !matches!(removed, Some(PathKind::File | PathKind::Symlink)) {
            self.entries.retain(|cached, _| !cached.starts_with(&relative));
            self.sizes.retain(|cached, _| !cached.starts_with(&relative));
        }
        self.members.retain(|(archive, _), _| !archive.starts_with(&relative));

        let mut ancestor = relative.parent();
        while let Some(dir) = ancestor {
            let _ = self.entries.remove(dir);
            let _ = self.sizes.remove(dir);
            ancestor = dir.parent();
        }
    }

    /// Drop everything
    pub fn invalidate_all(&self) {
        let _ = self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
        self.sizes.clear();
        self.members.clear();
    }

    /// Number of cached path entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is cached
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply a change batch: overflows clear, path events invalidate
    pub fn apply_changes(&self, batch: &ChangeBatch) {
        for event in batch.events() {
            match event {
                WatchEvent::Overflow(overflow) => {
                    if self.root.starts_with(&overflow.cell) {
                        info!(
                            "overflow for {} ({}), clearing fingerprints under {}",
                            overflow.cell.display(),
                            overflow.reason,
                            self.root.display()
                        );
                        self.invalidate_all();
                    } else if overflow.cell.starts_with(&self.root) {
                        self.invalidate(&overflow.cell);
                    }
                }
                WatchEvent::Path(event) => {
                    let path = event.absolute_path();
                    if self.covers(&path) {
                        debug!("invalidating {} ({:?})", path.display(), event.kind);
                        self.invalidate(&path);
                    }
                }
            }
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Cache a value computed since `generation`. The insert comes first and
    /// is undone if an invalidation started in the meantime, so a concurrent
    /// `invalidate` either sees the value and removes it or bumps the
    /// generation before the check here.
    fn publish<K, V>(&self, map: &DashMap<K, V>, key: K, value: V, generation: u64)
    where
        K: Eq + Hash + Clone,
        V: PartialEq + Copy,
    {
        let _ = map.insert(key.clone(), value);
        if generation != self.generation() {
            let _ = map.remove_if(&key, |_, cached| *cached == value);
        }
    }

    fn relative(&self, path: &Path) -> FingerprintResult<PathBuf> {
        self.relativize(path)
            .ok_or_else(|| FingerprintError::NotCovered(path.to_path_buf()))
    }

    /// Root-relative normal form of `path`, `None` if it is outside the root
    fn relativize(&self, path: &Path) -> Option<PathBuf> {
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root).ok()?
        } else {
            path
        };
        let mut normal = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => normal.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
            }
        }
        Some(normal)
    }

    fn entry_relative(&self, relative: &Path) -> FingerprintResult<FingerprintEntry> {
        if let Some(entry) = self.entries.get(relative).map(|entry| *entry) {
            return Ok(entry);
        }

        let generation = self.generation();
        let entry = self.compute(relative)?;
        self.publish(&self.entries, relative.to_path_buf(), entry, generation);
        self.publish(&self.sizes, relative.to_path_buf(), entry.size, generation);
        Ok(entry)
    }

    fn compute(&self, relative: &Path) -> FingerprintResult<FingerprintEntry> {
        let absolute = self.root.join(relative);
        let metadata =
            fs::symlink_metadata(&absolute).map_err(|e| FingerprintError::io(&absolute, e))?;

        if metadata.file_type().is_symlink() {
            let target = fs::read_link(&absolute).map_err(|e| FingerprintError::io(&absolute, e))?;
            let mut hasher = Sha256::new();
            hasher.update(b"symlink\0");
            hasher.update(target.to_string_lossy().as_bytes());
            return Ok(FingerprintEntry {
                hash: HashCode::from_digest(hasher.finalize().into()),
                kind: PathKind::Symlink,
                size: 0,
            });
        }

        if metadata.is_dir() {
            let mut hasher = Sha256::new();
            let mut size = 0u64;
            for (name, child) in self.children(relative)? {
                let entry = self.entry_relative(&child)?;
                hasher.update(name.as_bytes());
                hasher.update([0u8]);
                hasher.update(entry.hash.as_bytes());
                size += entry.size;
            }
            debug!("hashed directory {}", absolute.display());
            return Ok(FingerprintEntry {
                hash: HashCode::from_digest(hasher.finalize().into()),
                kind: PathKind::Directory,
                size,
            });
        }

        let content = fs::read(&absolute).map_err(|e| FingerprintError::io(&absolute, e))?;
        Ok(FingerprintEntry {
            hash: HashCode::of_bytes(&content),
            kind: PathKind::File,
            size: content.len() as u64,
        })
    }

    fn size_relative(&self, relative: &Path) -> FingerprintResult<u64> {
        if let Some(size) = self.sizes.get(relative).map(|size| *size) {
            return Ok(size);
        }

        let generation = self.generation();
        let absolute = self.root.join(relative);
        let metadata =
            fs::symlink_metadata(&absolute).map_err(|e| FingerprintError::io(&absolute, e))?;
        let size = if metadata.is_dir() {
            let mut total = 0;
            for (_, child) in self.children(relative)? {
                total += self.size_relative(&child)?;
            }
            total
        } else if metadata.file_type().is_symlink() {
            0
        } else {
            metadata.len()
        };

        self.publish(&self.sizes, relative.to_path_buf(), size, generation);
        Ok(size)
    }

    /// Covered children of a directory, sorted by name
    fn children(&self, relative: &Path) -> FingerprintResult<Vec<(String, PathBuf)>> {
        let absolute = self.root.join(relative);
        let mut children = Vec::new();
        for item in fs::read_dir(&absolute).map_err(|e| FingerprintError::io(&absolute, e))? {
            let item = item.map_err(|e| FingerprintError::io(&absolute, e))?;
            let name = item.file_name().to_string_lossy().into_owned();
            let child = relative.join(&name);
            if self.coverage.accepts(&child) {
                children.push((name, child));
            }
        }
        children.sort();
        Ok(children)
    }
}

impl ChangeSubscriber for FingerprintCache {
    fn on_change_batch(&self, batch: Arc<ChangeBatch>) {
        self.apply_changes(&batch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn tree() -> (TempDir, FingerprintCache) {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("d/sub")).unwrap();
        fs::write(temp.path().join("d/f"), b"one").unwrap();
        fs::write(temp.path().join("d/sub/g"), b"two!").unwrap();
        let cache = FingerprintCache::new(temp.path());
        (temp, cache)
    }

    #[test]
    fn test_file_hash_matches_content() {
        let (_temp, cache) = tree();
        assert_eq!(cache.get("d/f").unwrap(), HashCode::of_bytes(b"one"));
        assert_eq!(cache.get_if_present("d/f"), Some(HashCode::of_bytes(b"one")));
    }

    #[test]
    fn test_missing_path_is_not_found() {
        let (_temp, cache) = tree();
        assert!(matches!(cache.get("nope"), Err(FingerprintError::NotFound(_))));
        assert!(matches!(cache.get_size("nope"), Err(FingerprintError::NotFound(_))));
    }

    #[test]
    fn test_get_if_present_has_no_side_effect() {
        let (_temp, cache) = tree();
        assert_eq!(cache.get_if_present("d/f"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_directory_hash_follows_children() {
        let (temp, cache) = tree();
        let before = cache.get("d").unwrap();
        assert!(cache.get_if_present("d/sub/g").is_some());

        fs::write(temp.path().join("d/sub/g"), b"changed").unwrap();
        assert_eq!(cache.get("d").unwrap(), before);

        cache.invalidate("d/sub/g");
        assert_eq!(cache.get_if_present("d"), None);
        assert_eq!(cache.get_if_present("d/sub"), None);
        assert_eq!(cache.get_if_present(""), None);
        assert!(cache.get_if_present("d/f").is_some());
        assert_ne!(cache.get("d").unwrap(), before);
    }

    #[test]
    fn test_invalidate_directory_drops_descendants() {
        let (_temp, cache) = tree();
        let _ = cache.get("d").unwrap();

        cache.invalidate("d");

        assert_eq!(cache.get_if_present("d"), None);
        assert_eq!(cache.get_if_present("d/f"), None);
        assert_eq!(cache.get_if_present("d/sub/g"), None);
        cache.invalidate("d");
        cache.invalidate("never/seen");
    }

    #[test]
    fn test_sizes() {
        let (_temp, cache) = tree();
        assert_eq!(cache.get_size("d/f").unwrap(), 3);
        assert_eq!(cache.get_size("d").unwrap(), 7);
        assert_eq!(cache.entry("d").unwrap().size, 7);
    }

    #[test]
    fn test_absolute_and_relative_paths_agree() {
        let (temp, cache) = tree();
        let absolute = temp.path().join("d/f");
        assert_eq!(cache.get(&absolute).unwrap(), cache.get("./d/f").unwrap());
        assert!(matches!(
            cache.get("/somewhere/else"),
            Err(FingerprintError::NotCovered(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_hashes_target() {
        let (temp, cache) = tree();
        std::os::unix::fs::symlink("d/f", temp.path().join("link")).unwrap();
        let entry = cache.entry("link").unwrap();
        assert_eq!(entry.kind, PathKind::Symlink);
        assert_ne!(entry.hash, HashCode::of_bytes(b"one"));
    }

    #[test]
    fn test_coverage_partitions_tree() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("buck-out")).unwrap();
        fs::write(temp.path().join("buck-out/a"), b"x").unwrap();
        fs::write(temp.path().join("src"), b"y").unwrap();

        let sources = FingerprintCache::with_coverage(
            temp.path(),
            Coverage::Excluding(vec![PathBuf::from("buck-out")]),
            FingerprintConfig::default(),
        );
        assert!(sources.covers("src"));
        assert!(!sources.covers("buck-out/a"));
        assert!(!sources.covers("/elsewhere"));
        assert_eq!(sources.get_size("").unwrap(), 1);
    }

    #[test]
    fn test_value_computed_before_invalidation_does_not_stay_cached() {
        let (temp, cache) = tree();
        let generation = cache.generation();
        let stale = cache.compute(Path::new("d/f")).unwrap();

        fs::write(temp.path().join("d/f"), b"new").unwrap();
        cache.invalidate("d/f");
        cache.publish(&cache.entries, PathBuf::from("d/f"), stale, generation);

        assert_eq!(cache.get_if_present("d/f"), None);
        assert_eq!(cache.get("d/f").unwrap(), HashCode::of_bytes(b"new"));
    }

    #[test]
    fn test_concurrent_reads_never_outlive_invalidation() {
        let (temp, cache) = tree();
        let cache = Arc::new(cache);
        let path = temp.path().join("d/f");

        for round in 0..200 {
            let reader = {
                let cache = Arc::clone(&cache);
                let path = path.clone();
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        let _ = cache.get(&path);
                    }
                })
            };
            let content = format!("round {round}");
            fs::write(&path, &content).unwrap();
            cache.invalidate(&path);
            reader.join().unwrap();

            if let Some(cached) = cache.get_if_present(&path) {
                assert_eq!(cached, HashCode::of_bytes(content.as_bytes()), "round {round}");
            }
        }
    }
}
