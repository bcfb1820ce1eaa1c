//! Hashing single members of tar archives
//!
//! Archives produced by Bitzel carry a `.hashes.json` member mapping each
//! member name to its hex SHA-256, so a member can be fingerprinted without
//! hashing its bytes.

use crate::error::{FingerprintError, FingerprintResult};
use crate::hash::HashCode;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Name of the precomputed hash manifest inside an archive
pub const HASH_MANIFEST_NAME: &str = ".hashes.json";

/// Behaviour when the hash manifest does not list a member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchiveHashMode {
    /// Fail with `MissingEntryHash`
    Strict,
    /// Hash the member's bytes instead
    #[default]
    Lenient,
}

fn member_name(path: &Path) -> String {
    let name = path.to_string_lossy();
    name.strip_prefix("./").unwrap_or(&name).to_string()
}

/// Hash of `member` inside the tar archive at `archive`
pub(crate) fn member_hash(
    archive: &Path,
    member: &str,
    mode: ArchiveHashMode,
) -> FingerprintResult<HashCode> {
    let invalid = |reason: String| FingerprintError::InvalidArchive {
        archive: archive.to_path_buf(),
        reason,
    };

    let file = File::open(archive).map_err(|e| FingerprintError::io(archive, e))?;
    let mut reader = tar::Archive::new(file);

    let mut manifest: Option<HashMap<String, String>> = None;
    let mut content: Option<Vec<u8>> = None;

    for entry in reader.entries().map_err(|e| invalid(e.to_string()))? {
        let mut entry = entry.map_err(|e| invalid(e.to_string()))?;
        let name = member_name(&entry.path().map_err(|e| invalid(e.to_string()))?);

        if name == HASH_MANIFEST_NAME {
            let parsed = serde_json::from_reader(&mut entry)
                .map_err(|e| invalid(format!("bad hash manifest: {e}")))?;
            manifest = Some(parsed);
        } else if name == member {
            let mut bytes = Vec::new();
            let _ = entry
                .read_to_end(&mut bytes)
                .map_err(|e| invalid(e.to_string()))?;
            content = Some(bytes);
        }
    }

    if let Some(manifest) = &manifest {
        if let Some(hex) = manifest.get(member) {
            return HashCode::from_hex(hex)
                .ok_or_else(|| invalid(format!("bad hash '{hex}' for '{member}'")));
        }
        if mode == ArchiveHashMode::Strict {
            return Err(FingerprintError::MissingEntryHash {
                archive: archive.to_path_buf(),
                member: member.to_string(),
            });
        }
    }

    content
        .map(|bytes| HashCode::of_bytes(&bytes))
        .ok_or_else(|| FingerprintError::NotFound(archive.join(member)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_archive(dir: &Path, members: &[(&str, &[u8])]) -> std::path::PathBuf {
        let path = dir.join("out.tar");
        let mut builder = tar::Builder::new(File::create(&path).unwrap());
        for (name, data) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.finish().unwrap();
        path
    }

    #[test]
    fn test_manifest_hash_wins() {
        let temp = TempDir::new().unwrap();
        let listed = HashCode::of_bytes(b"precomputed");
        let manifest = format!(r#"{{"lib/a.o": "{}"}}"#, listed.to_hex());
        let archive = write_archive(
            temp.path(),
            &[(HASH_MANIFEST_NAME, manifest.as_bytes()), ("lib/a.o", b"bytes")],
        );

        let hash = member_hash(&archive, "lib/a.o", ArchiveHashMode::Strict).unwrap();
        assert_eq!(hash, listed);
    }

    #[test]
    fn test_unlisted_member_strict_vs_lenient() {
        let temp = TempDir::new().unwrap();
        let archive = write_archive(
            temp.path(),
            &[(HASH_MANIFEST_NAME, b"{}"), ("b.o", b"bytes")],
        );

        let err = member_hash(&archive, "b.o", ArchiveHashMode::Strict).unwrap_err();
        assert!(matches!(err, FingerprintError::MissingEntryHash { .. }));

        let hash = member_hash(&archive, "b.o", ArchiveHashMode::Lenient).unwrap();
        assert_eq!(hash, HashCode::of_bytes(b"bytes"));
    }

    #[test]
    fn test_no_manifest_hashes_bytes_in_any_mode() {
        let temp = TempDir::new().unwrap();
        let archive = write_archive(temp.path(), &[("c.o", b"data")]);

        let hash = member_hash(&archive, "c.o", ArchiveHashMode::Strict).unwrap();
        assert_eq!(hash, HashCode::of_bytes(b"data"));
        assert!(matches!(
            member_hash(&archive, "missing.o", ArchiveHashMode::Lenient),
            Err(FingerprintError::NotFound(_))
        ));
    }
}
