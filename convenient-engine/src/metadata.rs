//! Persisted per-rule build metadata
//!
//! Each rule has one record of `kind → bytes` entries. The engine reads the
//! record once at the start of a ladder run and commits a whole new record
//! once at the end, so a crash never leaves keys from two different builds
//! side by side.

use crate::error::{EngineError, EngineResult};
use crate::keys::OutputHashes;
use crate::outcome::SuccessType;
use crate::rule::RuleId;
use convenient_cache::{RuleKey, atomic_write};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Entry kinds of a metadata record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetadataKind {
    /// Default rule key
    RuleKey,
    /// Input-based rule key
    InputBasedKey,
    /// Dep-file rule key
    DepFileKey,
    /// Manifest key
    ManifestKey,
    /// Output path → hash map
    RecordedOutputs,
    /// Inputs the last build read
    DepFile,
    /// How the last build concluded
    SuccessType,
}

impl MetadataKind {
    /// Every kind
    pub const ALL: [Self; 7] = [
        Self::RuleKey,
        Self::InputBasedKey,
        Self::DepFileKey,
        Self::ManifestKey,
        Self::RecordedOutputs,
        Self::DepFile,
        Self::SuccessType,
    ];

    /// Stable name used on disk
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RuleKey => "RULE_KEY",
            Self::InputBasedKey => "INPUT_BASED_RULE_KEY",
            Self::DepFileKey => "DEP_FILE_RULE_KEY",
            Self::ManifestKey => "MANIFEST_KEY",
            Self::RecordedOutputs => "RECORDED_OUTPUTS",
            Self::DepFile => "DEP_FILE",
            Self::SuccessType => "SUCCESS_TYPE",
        }
    }

    /// Inverse of [`MetadataKind::as_str`]
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

/// Storage for per-rule metadata records
pub trait MetadataStore: Send + Sync {
    /// One entry of a rule's record
    ///
    /// # Errors
    ///
    /// I/O or decode failures of the backing storage
    fn read(&self, rule: &RuleId, kind: MetadataKind) -> EngineResult<Option<Vec<u8>>>;

    /// Replace one entry, keeping the others
    ///
    /// # Errors
    ///
    /// I/O failures of the backing storage
    fn write(&self, rule: &RuleId, kind: MetadataKind, bytes: Vec<u8>) -> EngineResult<()>;

    /// Replace the whole record at once
    ///
    /// # Errors
    ///
    /// I/O failures of the backing storage
    fn commit(&self, rule: &RuleId, entries: BTreeMap<MetadataKind, Vec<u8>>) -> EngineResult<()>;
}

/// Decoded metadata record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildMetadata {
    /// Default rule key
    pub rule_key: Option<RuleKey>,
    /// Input-based rule key
    pub input_based_key: Option<RuleKey>,
    /// Dep-file rule key
    pub dep_file_key: Option<RuleKey>,
    /// Manifest key
    pub manifest_key: Option<RuleKey>,
    /// Output hashes after the last build
    pub recorded_outputs: OutputHashes,
    /// Inputs the last build read
    pub dep_file: Option<Vec<PathBuf>>,
    /// How the last build concluded
    pub success_type: Option<SuccessType>,
}

impl BuildMetadata {
    /// Read and decode the record of `rule`
    ///
    /// # Errors
    ///
    /// Store errors, or `CorruptMetadata` when an entry does not decode
    pub fn load(store: &dyn MetadataStore, rule: &RuleId) -> EngineResult<Self> {
        let corrupt = |kind: MetadataKind, reason: String| EngineError::CorruptMetadata {
            rule: rule.clone(),
            reason: format!("{}: {reason}", kind.as_str()),
        };
        let key = |kind: MetadataKind| -> EngineResult<Option<RuleKey>> {
            store
                .read(rule, kind)?
                .map(|bytes| {
                    let hex = String::from_utf8(bytes).map_err(|e| corrupt(kind, e.to_string()))?;
                    RuleKey::from_hex(hex.trim()).map_err(|e| corrupt(kind, e.to_string()))
                })
                .transpose()
        };

        let mut metadata = Self {
            rule_key: key(MetadataKind::RuleKey)?,
            input_based_key: key(MetadataKind::InputBasedKey)?,
            dep_file_key: key(MetadataKind::DepFileKey)?,
            manifest_key: key(MetadataKind::ManifestKey)?,
            ..Self::default()
        };

        if let Some(bytes) = store.read(rule, MetadataKind::RecordedOutputs)? {
            metadata.recorded_outputs = serde_json::from_slice(&bytes)
                .map_err(|e| corrupt(MetadataKind::RecordedOutputs, e.to_string()))?;
        }
        if let Some(bytes) = store.read(rule, MetadataKind::DepFile)? {
            metadata.dep_file = Some(
                serde_json::from_slice(&bytes)
                    .map_err(|e| corrupt(MetadataKind::DepFile, e.to_string()))?,
            );
        }
        if let Some(bytes) = store.read(rule, MetadataKind::SuccessType)? {
            metadata.success_type = Some(
                serde_json::from_slice(&bytes)
                    .map_err(|e| corrupt(MetadataKind::SuccessType, e.to_string()))?,
            );
        }
        Ok(metadata)
    }

    /// Encode for [`MetadataStore::commit`]
    ///
    /// # Errors
    ///
    /// JSON encoding failures
    pub fn to_entries(&self) -> EngineResult<BTreeMap<MetadataKind, Vec<u8>>> {
        let mut entries = BTreeMap::new();
        let keys = [
            (MetadataKind::RuleKey, self.rule_key),
            (MetadataKind::InputBasedKey, self.input_based_key),
            (MetadataKind::DepFileKey, self.dep_file_key),
            (MetadataKind::ManifestKey, self.manifest_key),
        ];
        for (kind, key) in keys.into_iter().filter_map(|(kind, key)| Some((kind, key?))) {
            let _ = entries.insert(kind, key.to_hex().into_bytes());
        }
        let _ = entries.insert(
            MetadataKind::RecordedOutputs,
            serde_json::to_vec(&self.recorded_outputs)?,
        );
        if let Some(dep_file) = &self.dep_file {
            let _ = entries.insert(MetadataKind::DepFile, serde_json::to_vec(dep_file)?);
        }
        if let Some(success_type) = self.success_type {
            let _ = entries.insert(MetadataKind::SuccessType, serde_json::to_vec(&success_type)?);
        }
        Ok(entries)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct RecordFile {
    rule: RuleId,
    entries: BTreeMap<String, String>,
}

/// One JSON file per rule under a directory
///
/// File names are the SHA-256 of the rule name, so any rule name is safe
/// on disk. Entry bytes are stored hex-encoded.
#[derive(Debug, Clone)]
pub struct FileMetadataStore {
    dir: PathBuf,
}

impl FileMetadataStore {
    /// Store under `dir`; the directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the records
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the record of `rule`
    #[must_use]
    pub fn path_for(&self, rule: &RuleId) -> PathBuf {
        let digest = hex::encode(Sha256::digest(rule.as_str().as_bytes()));
        self.dir.join(format!("{digest}.json"))
    }

    fn load(&self, rule: &RuleId) -> EngineResult<BTreeMap<MetadataKind, Vec<u8>>> {
        let path = self.path_for(rule);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        let corrupt = |reason: String| EngineError::CorruptMetadata {
            rule: rule.clone(),
            reason,
        };
        let record: RecordFile =
            serde_json::from_slice(&raw).map_err(|e| corrupt(e.to_string()))?;

        let mut entries = BTreeMap::new();
        for (name, value) in record.entries {
            let Some(kind) = MetadataKind::parse(&name) else {
                debug!("ignoring unknown metadata entry {} for {}", name, rule);
                continue;
            };
            let bytes = hex::decode(&value).map_err(|e| corrupt(format!("{name}: {e}")))?;
            let _ = entries.insert(kind, bytes);
        }
        Ok(entries)
    }

    fn save(&self, rule: &RuleId, entries: &BTreeMap<MetadataKind, Vec<u8>>) -> EngineResult<()> {
        let record = RecordFile {
            rule: rule.clone(),
            entries: entries
                .iter()
                .map(|(kind, bytes)| (kind.as_str().to_string(), hex::encode(bytes)))
                .collect(),
        };
        let data = serde_json::to_vec_pretty(&record)?;
        atomic_write(&self.path_for(rule), &data)?;
        Ok(())
    }
}

impl MetadataStore for FileMetadataStore {
    fn read(&self, rule: &RuleId, kind: MetadataKind) -> EngineResult<Option<Vec<u8>>> {
        Ok(self.load(rule)?.remove(&kind))
    }

    fn write(&self, rule: &RuleId, kind: MetadataKind, bytes: Vec<u8>) -> EngineResult<()> {
        let mut entries = match self.load(rule) {
            Ok(entries) => entries,
            Err(EngineError::CorruptMetadata { reason, .. }) => {
                warn!("replacing corrupt metadata for {}: {}", rule, reason);
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };
        let _ = entries.insert(kind, bytes);
        self.save(rule, &entries)
    }

    fn commit(&self, rule: &RuleId, entries: BTreeMap<MetadataKind, Vec<u8>>) -> EngineResult<()> {
        self.save(rule, &entries)
    }
}

/// Map-backed store that counts writes
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    records: Mutex<HashMap<RuleId, BTreeMap<MetadataKind, Vec<u8>>>>,
    commits: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryMetadataStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `commit` calls so far
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of single-entry `write` calls so far
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Whole record of `rule`
    #[must_use]
    pub fn record(&self, rule: &RuleId) -> Option<BTreeMap<MetadataKind, Vec<u8>>> {
        self.records().get(rule).cloned()
    }

    /// Overwrite an entry without counting it
    pub fn insert_raw(&self, rule: &RuleId, kind: MetadataKind, bytes: Vec<u8>) {
        let _ = self
            .records()
            .entry(rule.clone())
            .or_default()
            .insert(kind, bytes);
    }

    fn records(&self) -> MutexGuard<'_, HashMap<RuleId, BTreeMap<MetadataKind, Vec<u8>>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn read(&self, rule: &RuleId, kind: MetadataKind) -> EngineResult<Option<Vec<u8>>> {
        Ok(self
            .records()
            .get(rule)
            .and_then(|record| record.get(&kind))
            .cloned())
    }

    fn write(&self, rule: &RuleId, kind: MetadataKind, bytes: Vec<u8>) -> EngineResult<()> {
        let _ = self.writes.fetch_add(1, Ordering::SeqCst);
        self.insert_raw(rule, kind, bytes);
        Ok(())
    }

    fn commit(&self, rule: &RuleId, entries: BTreeMap<MetadataKind, Vec<u8>>) -> EngineResult<()> {
        let _ = self.commits.fetch_add(1, Ordering::SeqCst);
        let _ = self.records().insert(rule.clone(), entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convenient_fingerprint::HashCode;
    use tempfile::TempDir;

    fn sample() -> BuildMetadata {
        BuildMetadata {
            rule_key: Some(RuleKey::of_bytes(b"default")),
            input_based_key: Some(RuleKey::of_bytes(b"input")),
            dep_file_key: None,
            manifest_key: Some(RuleKey::of_bytes(b"manifest")),
            recorded_outputs: BTreeMap::from([(
                PathBuf::from("out/app"),
                HashCode::of_bytes(b"binary"),
            )]),
            dep_file: Some(vec![PathBuf::from("a.h")]),
            success_type: Some(SuccessType::BuiltLocally),
        }
    }

    #[test]
    fn test_kind_names_parse_back() {
        for kind in MetadataKind::ALL {
            assert_eq!(MetadataKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(MetadataKind::parse("ABI_KEY"), None);
    }

    #[test]
    fn test_memory_store_commit_and_load() {
        let store = MemoryMetadataStore::new();
        let rule = RuleId::from("//app:main");
        store.commit(&rule, sample().to_entries().unwrap()).unwrap();

        assert_eq!(BuildMetadata::load(&store, &rule).unwrap(), sample());
        assert_eq!(store.commit_count(), 1);
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn test_missing_record_is_empty() {
        let store = MemoryMetadataStore::new();
        let metadata = BuildMetadata::load(&store, &RuleId::from("//none")).unwrap();
        assert_eq!(metadata, BuildMetadata::default());
    }

    #[test]
    fn test_corrupt_key_is_reported() {
        let store = MemoryMetadataStore::new();
        let rule = RuleId::from("//app:main");
        store.insert_raw(&rule, MetadataKind::RuleKey, b"not hex".to_vec());

        let err = BuildMetadata::load(&store, &rule).unwrap_err();
        assert!(matches!(err, EngineError::CorruptMetadata { .. }));
        assert!(err.to_string().contains("RULE_KEY"));
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let temp = TempDir::new().unwrap();
        let rule = RuleId::from("//app:main");
        FileMetadataStore::new(temp.path())
            .commit(&rule, sample().to_entries().unwrap())
            .unwrap();

        let reopened = FileMetadataStore::new(temp.path());
        assert_eq!(BuildMetadata::load(&reopened, &rule).unwrap(), sample());
        assert!(reopened.path_for(&rule).exists());
    }

    #[test]
    fn test_file_store_write_keeps_other_entries() {
        let temp = TempDir::new().unwrap();
        let store = FileMetadataStore::new(temp.path());
        let rule = RuleId::from("//app:main");
        store.commit(&rule, sample().to_entries().unwrap()).unwrap();

        let key = RuleKey::of_bytes(b"dep-file");
        store
            .write(&rule, MetadataKind::DepFileKey, key.to_hex().into_bytes())
            .unwrap();

        let metadata = BuildMetadata::load(&store, &rule).unwrap();
        assert_eq!(metadata.dep_file_key, Some(key));
        assert_eq!(metadata.rule_key, sample().rule_key);
    }

    #[test]
    fn test_file_store_commit_replaces_record() {
        let temp = TempDir::new().unwrap();
        let store = FileMetadataStore::new(temp.path());
        let rule = RuleId::from("//app:main");
        store.commit(&rule, sample().to_entries().unwrap()).unwrap();

        let smaller = BuildMetadata {
            rule_key: Some(RuleKey::of_bytes(b"other")),
            ..BuildMetadata::default()
        };
        store.commit(&rule, smaller.to_entries().unwrap()).unwrap();

        let metadata = BuildMetadata::load(&store, &rule).unwrap();
        assert_eq!(metadata.rule_key, smaller.rule_key);
        assert_eq!(metadata.input_based_key, None);
        assert!(metadata.recorded_outputs.is_empty());
    }

    #[test]
    fn test_file_store_creates_dir_and_leaves_one_file_per_rule() {
        let temp = TempDir::new().unwrap();
        let store = FileMetadataStore::new(temp.path().join("fresh/metadata"));
        let rule = RuleId::from("//app:main");

        for _ in 0..3 {
            store.commit(&rule, sample().to_entries().unwrap()).unwrap();
        }

        let files: Vec<_> = fs::read_dir(store.dir())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        assert_eq!(files, vec![store.path_for(&rule)]);
    }

    #[test]
    fn test_file_store_rejects_garbage() {
        let temp = TempDir::new().unwrap();
        let store = FileMetadataStore::new(temp.path());
        let rule = RuleId::from("//app:main");
        fs::write(store.path_for(&rule), b"{ nope").unwrap();

        assert!(matches!(
            store.read(&rule, MetadataKind::RuleKey),
            Err(EngineError::CorruptMetadata { .. })
        ));
    }
}
