//! Project root, configuration, and the components built from them

use crate::config::{BitzelConfig, CONFIG_FILE_NAME, CellConfig, ConfigError, STATE_DIR};
use crate::error::BitzelResult;
use convenient_cache::{
    ArtifactStore, CacheLayer, CacheMode, CacheTransport, DirTransport, HttpTransport,
    LayeredTransport, RetryingTransport,
};
use convenient_engine::FileMetadataStore;
use convenient_fingerprint::{Coverage, FingerprintCache, StackedFingerprintCache};
use convenient_watch::{CellWatch, ChangeFeed, Cursor, IgnorePattern, WatchClient};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// A project root with its configuration
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    config: BitzelConfig,
}

impl Workspace {
    /// Workspace over an already resolved root
    pub fn new(root: impl Into<PathBuf>, config: BitzelConfig) -> Self {
        Self {
            root: root.into(),
            config,
        }
    }

    /// Resolve `root` and load `config`, or `<root>/bitzel.yml` when present
    ///
    /// # Errors
    ///
    /// Unresolvable root or bad configuration
    pub async fn open(root: &Path, config: Option<&Path>) -> BitzelResult<Self> {
        let root = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| ConfigError::IoError(root.to_path_buf(), e.to_string()))?;

        let config = match config {
            Some(path) => BitzelConfig::load(path).await?,
            None => {
                let default = root.join(CONFIG_FILE_NAME);
                if tokio::fs::try_exists(&default).await.unwrap_or(false) {
                    BitzelConfig::load(&default).await?
                } else {
                    debug!("no {} in {}, using defaults", CONFIG_FILE_NAME, root.display());
                    BitzelConfig::default()
                }
            }
        };
        Ok(Self { root, config })
    }

    /// Project root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Configuration
    #[must_use]
    pub fn config(&self) -> &BitzelConfig {
        &self.config
    }

    /// `path` relative to the project root, unless already absolute
    #[must_use]
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(path).components().collect()
    }

    fn cell_root(&self, cell: &CellConfig) -> PathBuf {
        self.resolve(&cell.path)
    }

    /// Output directories below `root`, relative to it
    fn outputs_below(&self, root: &Path) -> Vec<PathBuf> {
        self.config
            .fingerprint
            .output_dirs
            .iter()
            .filter_map(|dir| {
                let dir = self.resolve(dir);
                dir.strip_prefix(root).ok().map(Path::to_path_buf)
            })
            .collect()
    }

    /// A build-output cache, then one source cache per cell, innermost
    /// cells first; output directories belong to the output cache only
    #[must_use]
    pub fn fingerprints(&self) -> StackedFingerprintCache {
        let config = self.config.fingerprint_config();
        let mut stack = StackedFingerprintCache::default();
        if !self.config.fingerprint.output_dirs.is_empty() {
            stack.push(Arc::new(FingerprintCache::with_coverage(
                self.root.clone(),
                Coverage::Only(self.config.fingerprint.output_dirs.clone()),
                config.clone(),
            )));
        }

        let mut roots: Vec<_> = self
            .config
            .effective_cells()
            .iter()
            .map(|cell| self.cell_root(cell))
            .collect();
        roots.sort_by_key(|root| Reverse(root.components().count()));

        for root in roots {
            let outputs = self.outputs_below(&root);
            let coverage = if outputs.is_empty() {
                Coverage::Everything
            } else {
                Coverage::Excluding(outputs)
            };
            stack.push(Arc::new(FingerprintCache::with_coverage(
                root,
                coverage,
                config.clone(),
            )));
        }
        stack
    }

    /// The local cache directory, stacked in front of the remote cache when
    /// one is configured. Remote fetches are retried.
    ///
    /// # Errors
    ///
    /// Malformed remote URL
    pub fn transport(&self) -> BitzelResult<Arc<dyn CacheTransport>> {
        let local: Arc<dyn CacheTransport> =
            Arc::new(DirTransport::new(self.resolve(&self.config.cache.dir)));
        let Some(url) = &self.config.cache.remote_url else {
            return Ok(local);
        };

        let remote = RetryingTransport::new(
            Arc::new(HttpTransport::new(url)?),
            self.config.retry_policy(),
        );
        Ok(Arc::new(LayeredTransport::new(vec![
            CacheLayer::new(local, CacheMode::ReadWrite),
            CacheLayer::new(Arc::new(remote), self.config.cache.remote_mode),
        ])))
    }

    /// Artifact store over [`Workspace::transport`]
    ///
    /// # Errors
    ///
    /// Malformed remote URL
    pub fn store(&self) -> BitzelResult<ArtifactStore> {
        Ok(ArtifactStore::new(self.transport()?, self.config.store_config()))
    }

    /// Per-rule metadata store
    #[must_use]
    pub fn metadata(&self) -> FileMetadataStore {
        FileMetadataStore::new(self.resolve(&self.config.engine.metadata_dir))
    }

    /// Where watch cursors persist between runs
    #[must_use]
    pub fn cursor_file(&self) -> PathBuf {
        self.root.join(STATE_DIR).join("cursors.json")
    }

    /// Saved cursors by cell root; unreadable state counts as none
    pub async fn load_cursors(&self) -> BTreeMap<PathBuf, String> {
        let path = self.cursor_file();
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return BTreeMap::new(),
            Err(e) => {
                warn!("cannot read {}: {}", path.display(), e);
                return BTreeMap::new();
            }
        };
        serde_json::from_slice(&raw).unwrap_or_else(|e| {
            warn!("ignoring corrupt {}: {}", path.display(), e);
            BTreeMap::new()
        })
    }

    /// Persist the feed's current cursors
    ///
    /// # Errors
    ///
    /// I/O failures
    pub async fn save_cursors(&self, feed: &ChangeFeed) -> BitzelResult<()> {
        let cursors: BTreeMap<PathBuf, String> = feed
            .cells()
            .filter_map(|cell| Some((cell.to_path_buf(), feed.cursor(cell)?)))
            .collect();
        let path = self.cursor_file();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, serde_json::to_vec_pretty(&cursors)?).await?;
        Ok(())
    }

    /// Cell watches, resuming from saved cursors
    ///
    /// # Errors
    ///
    /// Invalid ignore globs
    pub async fn cell_watches(&self) -> BitzelResult<Vec<CellWatch>> {
        let saved = self.load_cursors().await;
        let mut watches = Vec::new();
        for cell in self.config.effective_cells() {
            let root = self.cell_root(&cell);
            let mut ignore: Vec<IgnorePattern> = cell
                .ignore_dirs
                .iter()
                .cloned()
                .map(IgnorePattern::Directory)
                .collect();
            let state_dir = IgnorePattern::Directory(PathBuf::from(STATE_DIR));
            if root == self.root && !ignore.contains(&state_dir) {
                ignore.push(state_dir);
            }
            for glob in &cell.ignore_globs {
                ignore.push(IgnorePattern::glob(glob.clone())?);
            }

            let cursor = saved.get(&root).map_or_else(Cursor::null, Cursor::new);
            watches.push(CellWatch::new(root).with_ignore(ignore).with_cursor(cursor));
        }
        Ok(watches)
    }

    /// Change feed over every cell
    ///
    /// # Errors
    ///
    /// Invalid ignore globs
    pub async fn feed(&self, client: Arc<dyn WatchClient>) -> BitzelResult<ChangeFeed> {
        Ok(ChangeFeed::new(
            client,
            self.cell_watches().await?,
            self.config.feed_config(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn nested() -> BitzelConfig {
        BitzelConfig::parse(
            "cells:\n  - path: .\n  - path: vendor/lib\n    ignore_globs: [\"**/*.o\"]\n",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_without_config_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let workspace = Workspace::open(temp.path(), None).await.unwrap();
        assert_eq!(workspace.config(), &BitzelConfig::default());
        assert_eq!(workspace.root(), temp.path().canonicalize().unwrap());
    }

    #[tokio::test]
    async fn test_open_reads_root_config() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "engine:\n  max_manifest_entries: 4\n",
        )
        .unwrap();
        let workspace = Workspace::open(temp.path(), None).await.unwrap();
        assert_eq!(workspace.config().engine.max_manifest_entries, 4);
    }

    #[test]
    fn test_innermost_cell_is_consulted_first() {
        let workspace = Workspace::new("/project", nested());
        let fingerprints = workspace.fingerprints();
        let roots: Vec<_> = fingerprints.caches().iter().map(|c| c.root().to_path_buf()).collect();
        assert_eq!(
            roots,
            vec![
                PathBuf::from("/project"),
                PathBuf::from("/project/vendor/lib"),
                PathBuf::from("/project")
            ]
        );
    }

    #[test]
    fn test_build_outputs_have_their_own_cache() {
        let workspace = Workspace::new("/project", nested());
        let fingerprints = workspace.fingerprints();
        let caches = fingerprints.caches();
        let index_of = |path: &str| {
            caches
                .iter()
                .position(|cache| Arc::ptr_eq(cache, fingerprints.cache_for(Path::new(path)).unwrap()))
                .unwrap()
        };

        assert_eq!(index_of("/project/out/app"), 0);
        assert_eq!(index_of("/project/vendor/lib/x.c"), 1);
        assert_eq!(index_of("/project/src/main.c"), 2);
        assert!(!caches[0].covers("/project/src/main.c"));
        assert!(!caches[2].covers("/project/out/app"));
        assert!(!fingerprints.covers("/elsewhere/file"));
    }

    #[test]
    fn test_no_output_dirs_means_source_caches_only() {
        let config = BitzelConfig::parse("fingerprint:\n  output_dirs: []\n").unwrap();
        let workspace = Workspace::new("/project", config);
        let fingerprints = workspace.fingerprints();

        assert_eq!(fingerprints.caches().len(), 1);
        assert!(fingerprints.caches()[0].covers("/project/out/app"));
    }

    #[tokio::test]
    async fn test_output_and_source_hashes_invalidate_independently() {
        let temp = TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("out")).unwrap();
        std::fs::write(temp.path().join("out/app"), b"v1").unwrap();
        std::fs::write(temp.path().join("main.c"), b"int main;").unwrap();
        let workspace = Workspace::new(temp.path(), BitzelConfig::default());
        let fingerprints = workspace.fingerprints();
        let app = temp.path().join("out/app");
        let source = temp.path().join("main.c");

        let before = fingerprints.get(&app).unwrap();
        let _ = fingerprints.get(&source).unwrap();
        std::fs::write(&app, b"v2").unwrap();
        fingerprints.caches()[0].invalidate_all();

        assert_ne!(fingerprints.get(&app).unwrap(), before);
        assert!(fingerprints.caches()[1].get_if_present(&source).is_some());
    }

    #[test]
    fn test_resolve_drops_current_dir() {
        let workspace = Workspace::new("/project", BitzelConfig::default());
        assert_eq!(workspace.resolve("."), PathBuf::from("/project"));
        assert_eq!(workspace.resolve("./a/b"), PathBuf::from("/project/a/b"));
    }

    #[tokio::test]
    async fn test_cursors_resume_per_cell() {
        let temp = TempDir::new().unwrap();
        let workspace = Workspace::new(temp.path(), nested());
        let state = temp.path().join(STATE_DIR);
        std::fs::create_dir_all(&state).unwrap();
        let saved = BTreeMap::from([(temp.path().join("vendor/lib"), "c:1:42".to_string())]);
        std::fs::write(state.join("cursors.json"), serde_json::to_vec(&saved).unwrap()).unwrap();

        let watches = workspace.cell_watches().await.unwrap();

        assert_eq!(watches[0].cursor.get(), convenient_watch::NULL_CLOCK);
        assert!(watches[0].ignore.contains(&IgnorePattern::Directory(PathBuf::from(STATE_DIR))));
        assert_eq!(watches[1].cursor.get(), "c:1:42");
        assert_eq!(watches[1].ignore, vec![IgnorePattern::Glob("**/*.o".to_string())]);
    }

    #[tokio::test]
    async fn test_corrupt_cursor_file_is_ignored() {
        let temp = TempDir::new().unwrap();
        let workspace = Workspace::new(temp.path(), BitzelConfig::default());
        std::fs::create_dir_all(temp.path().join(STATE_DIR)).unwrap();
        std::fs::write(workspace.cursor_file(), b"not json").unwrap();

        assert!(workspace.load_cursors().await.is_empty());
    }

    #[test]
    fn test_remote_is_stacked_behind_local_dir() {
        let config = BitzelConfig::parse(
            "cache:\n  remote_url: http://localhost:9090/\n  remote_mode: read-only\n",
        )
        .unwrap();
        let workspace = Workspace::new("/project", config);
        let described = workspace.transport().unwrap().describe();
        assert!(described.starts_with("layered[dir:/project/.bitzel/cache, "));
        assert!(described.contains("localhost:9090"));
        assert!(described.ends_with("(read-only)]"));

        let local = Workspace::new("/project", BitzelConfig::default());
        assert_eq!(local.transport().unwrap().describe(), "dir:/project/.bitzel/cache");
    }
}
