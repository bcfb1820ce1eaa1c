//! Sharded local directory transport

use super::CacheTransport;
use crate::atomic::atomic_write;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Stores each key as a file under `root/<namespace>/<shard>/<name>`
#[derive(Debug, Clone)]
pub struct DirTransport {
    root: PathBuf,
}

impl DirTransport {
    /// Transport rooted at `root`; directories are created on first write
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File path of `key`
    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        let (namespace, name) = key.split_once('/').unwrap_or(("default", key));
        let name = name.replace(['/', '\\'], "_");
        let shard: String = name.chars().take(2).collect();
        self.root.join(namespace).join(shard).join(name)
    }
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

#[async_trait]
impl CacheTransport for DirTransport {
    async fn store(&self, key: &str, bytes: Vec<u8>) -> CacheResult<()> {
        let path = self.path_for(key);
        blocking(move || Ok(atomic_write(&path, &bytes)?)).await
    }

    async fn fetch(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn contains(&self, key: &str) -> CacheResult<bool> {
        Ok(tokio::fs::try_exists(self.path_for(key)).await?)
    }

    fn describe(&self) -> String {
        format!("dir:{}", self.root.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_sharded_layout() {
        let transport = DirTransport::new("/cache");
        assert_eq!(
            transport.path_for("cache/abcdef:10"),
            PathBuf::from("/cache/cache/ab/abcdef:10")
        );
        assert_eq!(
            transport.path_for("rulekey/0123"),
            PathBuf::from("/cache/rulekey/01/0123")
        );
    }

    #[tokio::test]
    async fn test_store_fetch_contains() {
        let temp = TempDir::new().unwrap();
        let transport = DirTransport::new(temp.path());

        assert!(!transport.contains("rulekey/aa").await.unwrap());
        assert_eq!(transport.fetch("rulekey/aa").await.unwrap(), None);

        transport.store("rulekey/aa", b"one".to_vec()).await.unwrap();
        transport.store("rulekey/aa", b"two".to_vec()).await.unwrap();

        assert!(transport.contains("rulekey/aa").await.unwrap());
        assert_eq!(transport.fetch("rulekey/aa").await.unwrap(), Some(b"two".to_vec()));
        let leftovers: Vec<_> = fs::read_dir(temp.path().join("rulekey/aa"))
            .unwrap()
            .collect();
        assert_eq!(leftovers.len(), 1);
    }
}
