//! `bitzel cache`

use crate::error::BitzelResult;
use crate::workspace::Workspace;
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::WalkDir;

/// Entry count and bytes per top-level directory of a local cache
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DirUsage {
    /// Per namespace, e.g. `artifacts` or `keys`
    pub namespaces: BTreeMap<String, (usize, u64)>,
}

impl DirUsage {
    /// Walk `root`; a missing directory is empty
    #[must_use]
    pub fn scan(root: &Path) -> Self {
        let mut usage = Self::default();
        for entry in WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
        {
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let namespace = match relative.components().next() {
                Some(first) if relative.components().count() > 1 => {
                    first.as_os_str().to_string_lossy().into_owned()
                }
                _ => ".".to_string(),
            };
            let size = entry.metadata().map_or(0, |m| m.len());
            let slot = usage.namespaces.entry(namespace).or_default();
            slot.0 += 1;
            slot.1 += size;
        }
        usage
    }

    /// Files across every namespace
    #[must_use]
    pub fn files(&self) -> usize {
        self.namespaces.values().map(|(files, _)| files).sum()
    }

    /// Bytes across every namespace
    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.namespaces.values().map(|(_, bytes)| bytes).sum()
    }
}

/// Describe the cache and the stored metadata
///
/// # Errors
///
/// Malformed remote URL
pub async fn info(workspace: &Workspace) -> BitzelResult<()> {
    let config = workspace.config();
    println!("Cache: {}", workspace.transport()?.describe());

    let dir = workspace.resolve(&config.cache.dir);
    let usage = tokio::task::spawn_blocking(move || DirUsage::scan(&dir))
        .await
        .unwrap_or_default();
    println!("Local: {} files, {} bytes", usage.files(), usage.bytes());
    for (namespace, (files, bytes)) in &usage.namespaces {
        println!("  {namespace}: {files} files, {bytes} bytes");
    }

    let metadata = workspace.metadata();
    let records = DirUsage::scan(metadata.dir());
    println!(
        "Metadata: {} ({} rule records)",
        metadata.dir().display(),
        records.files()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_scan_groups_by_namespace() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        std::fs::create_dir_all(root.join("artifacts/ab")).unwrap();
        std::fs::create_dir_all(root.join("keys")).unwrap();
        std::fs::write(root.join("artifacts/ab/abcd"), b"12345").unwrap();
        std::fs::write(root.join("keys/k1"), b"12").unwrap();
        std::fs::write(root.join("keys/k2"), b"3").unwrap();
        std::fs::write(root.join("stray"), b"x").unwrap();

        let usage = DirUsage::scan(root);

        assert_eq!(usage.namespaces["artifacts"], (1, 5));
        assert_eq!(usage.namespaces["keys"], (2, 3));
        assert_eq!(usage.namespaces["."], (1, 1));
        assert_eq!(usage.files(), 4);
        assert_eq!(usage.bytes(), 10);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let temp = TempDir::new().unwrap();
        let usage = DirUsage::scan(&temp.path().join("absent"));
        assert_eq!(usage, DirUsage::default());
    }
}
