//! Artifact archive codec
//!
//! An artifact is a tar archive of output files, relative to the project
//! root, plus one [`METADATA_ENTRY_NAME`] entry. The archive is
//! zstd-compressed; readers detect compression by magic bytes so plain tar
//! archives are accepted too.

use crate::error::{CacheError, CacheResult};
use crate::rule_key::RuleKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Name of the metadata entry inside every artifact
pub const METADATA_ENTRY_NAME: &str = ".artifact-metadata.json";

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

/// Describes what an artifact was built from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Rule that produced the outputs
    pub target: String,
    /// Keys the artifact was stored under
    pub rule_keys: Vec<RuleKey>,
    /// Hex content hash per output path
    #[serde(default)]
    pub output_hashes: BTreeMap<PathBuf, String>,
    /// Inputs the build actually read, when the rule records them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dep_file: Option<Vec<PathBuf>>,
    /// Creation time, milliseconds since the epoch
    pub created_at_ms: i64,
}

impl ArtifactMetadata {
    /// Metadata stamped with the current time
    pub fn new(target: impl Into<String>, rule_keys: Vec<RuleKey>) -> Self {
        Self {
            target: target.into(),
            rule_keys,
            output_hashes: BTreeMap::new(),
            dep_file: None,
            created_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Attach output hashes
    #[must_use]
    pub fn with_output_hashes(mut self, output_hashes: BTreeMap<PathBuf, String>) -> Self {
        self.output_hashes = output_hashes;
        self
    }

    /// Attach the recorded dep file
    #[must_use]
    pub fn with_dep_file(mut self, dep_file: Option<Vec<PathBuf>>) -> Self {
        self.dep_file = dep_file;
        self
    }
}

/// One file inside an artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactEntry {
    /// Path relative to the project root
    pub path: PathBuf,
    /// File content
    pub data: Vec<u8>,
    /// Unix permission bits
    pub mode: u32,
}

/// A decoded artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Metadata entry
    pub metadata: ArtifactMetadata,
    /// Output files
    pub entries: Vec<ArtifactEntry>,
}

impl Artifact {
    /// Relative paths of the output files
    pub fn output_paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|entry| entry.path.as_path())
    }

    /// Write every output below `root` and return the written paths.
    ///
    /// # Errors
    ///
    /// `UnsafePath` if an entry is absolute or climbs out of `root`; I/O
    /// errors from writing
    pub fn materialize(&self, root: &Path) -> CacheResult<Vec<PathBuf>> {
        for entry in &self.entries {
            check_relative(&entry.path)?;
        }

        let mut written = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let target = root.join(&entry.path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, &entry.data)?;
            set_mode(&target, entry.mode)?;
            written.push(target);
        }
        debug!(
            "materialized {} outputs of {} under {}",
            written.len(),
            self.metadata.target,
            root.display()
        );
        Ok(written)
    }
}

/// Remove each output (file, symlink or whole directory) below `root`.
/// Outputs that do not exist are skipped.
///
/// # Errors
///
/// `UnsafePath` if an output is absolute or climbs out of `root`; I/O
/// errors from removal
pub fn clear_outputs(root: &Path, outputs: &[PathBuf]) -> CacheResult<()> {
    for output in outputs {
        check_relative(output)?;
    }

    for output in outputs {
        let target = root.join(output);
        let removed = match fs::symlink_metadata(&target) {
            Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(&target),
            Ok(_) => fs::remove_file(&target),
            Err(e) => Err(e),
        };
        match removed {
            Ok(()) => debug!("cleared {}", target.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn check_relative(path: &Path) -> CacheResult<()> {
    let safe = path.components().count() > 0
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
    if safe {
        Ok(())
    } else {
        Err(CacheError::UnsafePath(path.to_path_buf()))
    }
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &fs::Metadata) -> u32 {
    0o644
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> CacheResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> CacheResult<()> {
    Ok(())
}

fn append(
    builder: &mut tar::Builder<Vec<u8>>,
    path: &Path,
    data: &[u8],
    mode: u32,
) -> CacheResult<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(mode);
    header.set_mtime(0);
    builder.append_data(&mut header, path, data)?;
    Ok(())
}

/// Archive `outputs` (files or directories relative to `root`) with
/// `metadata`, zstd-compressed at `level`
///
/// # Errors
///
/// `UnsafePath` for outputs outside `root`, I/O errors for unreadable or
/// missing outputs
pub fn pack(
    root: &Path,
    outputs: &[PathBuf],
    metadata: &ArtifactMetadata,
    level: i32,
) -> CacheResult<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    append(
        &mut builder,
        Path::new(METADATA_ENTRY_NAME),
        &serde_json::to_vec(metadata)?,
        0o644,
    )?;

    for output in outputs {
        check_relative(output)?;
        let absolute = root.join(output);
        for item in WalkDir::new(&absolute)
            .follow_links(true)
            .sort_by_file_name()
        {
            let item = item.map_err(|e| CacheError::Io(e.into()))?;
            if !item.file_type().is_file() {
                continue;
            }
            let relative = item
                .path()
                .strip_prefix(root)
                .map_err(|_| CacheError::UnsafePath(item.path().to_path_buf()))?;
            let data = fs::read(item.path())?;
            let file_metadata = item.metadata().map_err(|e| CacheError::Io(e.into()))?;
            append(&mut builder, relative, &data, file_mode(&file_metadata))?;
        }
    }

    let tar = builder.into_inner()?;
    Ok(zstd::encode_all(tar.as_slice(), level)?)
}

/// Decode an archive produced by [`pack`]
///
/// # Errors
///
/// `Corrupt` when the bytes are not a readable artifact
pub fn unpack(bytes: &[u8]) -> CacheResult<Artifact> {
    fn corrupt(e: impl std::fmt::Display) -> CacheError {
        CacheError::Corrupt(e.to_string())
    }

    let tar = if bytes.starts_with(&ZSTD_MAGIC) {
        zstd::decode_all(bytes).map_err(corrupt)?
    } else {
        bytes.to_vec()
    };

    let mut archive = tar::Archive::new(tar.as_slice());
    let mut metadata = None;
    let mut entries = Vec::new();

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let path = entry.path().map_err(corrupt)?.into_owned();
        let mode = entry.header().mode().unwrap_or(0o644);
        let mut data = Vec::new();
        let _ = entry.read_to_end(&mut data).map_err(corrupt)?;

        if path == Path::new(METADATA_ENTRY_NAME) {
            metadata = Some(serde_json::from_slice(&data).map_err(corrupt)?);
        } else {
            entries.push(ArtifactEntry { path, data, mode });
        }
    }

    let metadata = metadata.ok_or_else(|| {
        CacheError::Corrupt(format!("archive has no {METADATA_ENTRY_NAME} entry"))
    })?;
    Ok(Artifact { metadata, entries })
}
