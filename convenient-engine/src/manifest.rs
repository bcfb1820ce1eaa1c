//! Manifests: historical dep-file input combinations of a rule
//!
//! A manifest is keyed by the rule's manifest key and maps each combination
//! of `(input path, hash)` the rule has been built with to the dep-file key
//! its artifact was stored under. Entries are kept least- to most-recently
//! used; the cap evicts from the front.

use crate::error::EngineResult;
use convenient_cache::RuleKey;
use convenient_fingerprint::HashCode;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// One input combination and the artifact built from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Input path → hash at build time
    pub inputs: BTreeMap<PathBuf, HashCode>,
    /// Dep-file key of the artifact
    pub rule_key: RuleKey,
}

impl ManifestEntry {
    /// True when every input still hashes to its recorded value
    pub fn matches(&self, mut hash_of: impl FnMut(&Path) -> Option<HashCode>) -> bool {
        self.inputs
            .iter()
            .all(|(path, hash)| hash_of(path).as_ref() == Some(hash))
    }
}

/// Input combinations of one rule, least recently used first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    key: RuleKey,
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Empty manifest for `key`
    #[must_use]
    pub fn new(key: RuleKey) -> Self {
        Self {
            key,
            entries: Vec::new(),
        }
    }

    /// Manifest key
    #[must_use]
    pub fn key(&self) -> RuleKey {
        self.key
    }

    /// Entries, least recently used first
    #[must_use]
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dep-file keys of entries matching current hashes, most recent first
    pub fn matching(&self, mut hash_of: impl FnMut(&Path) -> Option<HashCode>) -> Vec<RuleKey> {
        self.entries
            .iter()
            .rev()
            .filter(|entry| entry.matches(&mut hash_of))
            .map(|entry| entry.rule_key)
            .collect()
    }

    /// Mark the entry for `rule_key` most recently used
    ///
    /// Returns false when no entry has that key.
    pub fn touch(&mut self, rule_key: &RuleKey) -> bool {
        let Some(index) = self.entries.iter().position(|e| &e.rule_key == rule_key) else {
            return false;
        };
        let entry = self.entries.remove(index);
        self.entries.push(entry);
        true
    }

    /// Add `entry` as most recently used
    ///
    /// An entry with the same input combination is replaced. Entries beyond
    /// `max_entries` are evicted least recently used first and returned.
    pub fn add(&mut self, entry: ManifestEntry, max_entries: usize) -> Vec<ManifestEntry> {
        self.entries.retain(|existing| existing.inputs != entry.inputs);
        self.entries.push(entry);

        let excess = self.entries.len().saturating_sub(max_entries.max(1));
        self.entries.drain(..excess).collect()
    }

    /// Gzip-compressed JSON
    ///
    /// # Errors
    ///
    /// Encoding failures
    pub fn encode(&self) -> EngineResult<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        serde_json::to_writer(&mut encoder, self)?;
        encoder.flush()?;
        Ok(encoder.finish()?)
    }

    /// Inverse of [`Manifest::encode`]
    ///
    /// # Errors
    ///
    /// I/O errors for bad gzip, JSON errors for bad content
    pub fn decode(bytes: &[u8]) -> EngineResult<Self> {
        let mut json = Vec::new();
        let _ = GzDecoder::new(bytes).read_to_end(&mut json)?;
        Ok(serde_json::from_slice(&json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(header: &[u8], key: &[u8]) -> ManifestEntry {
        ManifestEntry {
            inputs: BTreeMap::from([(PathBuf::from("a.h"), HashCode::of_bytes(header))]),
            rule_key: RuleKey::of_bytes(key),
        }
    }

    fn current(header: &'static [u8]) -> impl FnMut(&Path) -> Option<HashCode> {
        move |path| (path == Path::new("a.h")).then(|| HashCode::of_bytes(header))
    }

    #[test]
    fn test_matching_checks_current_hashes() {
        let mut manifest = Manifest::new(RuleKey::of_bytes(b"m"));
        let _ = manifest.add(entry(b"v1", b"k1"), 8);
        let _ = manifest.add(entry(b"v2", b"k2"), 8);

        assert_eq!(manifest.matching(current(b"v1")), vec![RuleKey::of_bytes(b"k1")]);
        assert!(manifest.matching(current(b"v3")).is_empty());
        assert!(manifest.matching(|_| None).is_empty());
    }

    #[test]
    fn test_same_combination_replaces_entry() {
        let mut manifest = Manifest::new(RuleKey::of_bytes(b"m"));
        let _ = manifest.add(entry(b"v1", b"old"), 8);
        let _ = manifest.add(entry(b"v1", b"new"), 8);

        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.entries()[0].rule_key, RuleKey::of_bytes(b"new"));
    }

    #[test]
    fn test_cap_evicts_least_recently_used() {
        let mut manifest = Manifest::new(RuleKey::of_bytes(b"m"));
        let _ = manifest.add(entry(b"v1", b"k1"), 2);
        let _ = manifest.add(entry(b"v2", b"k2"), 2);
        assert!(manifest.touch(&RuleKey::of_bytes(b"k1")));

        let evicted = manifest.add(entry(b"v3", b"k3"), 2);

        assert_eq!(evicted, vec![entry(b"v2", b"k2")]);
        let keys: Vec<_> = manifest.entries().iter().map(|e| e.rule_key).collect();
        assert_eq!(keys, vec![RuleKey::of_bytes(b"k1"), RuleKey::of_bytes(b"k3")]);
    }

    #[test]
    fn test_touch_unknown_key() {
        let mut manifest = Manifest::new(RuleKey::of_bytes(b"m"));
        assert!(!manifest.touch(&RuleKey::of_bytes(b"nothing")));
    }

    #[test]
    fn test_encoded_form_is_gzip() {
        let mut manifest = Manifest::new(RuleKey::of_bytes(b"m"));
        let _ = manifest.add(entry(b"v1", b"k1"), 8);

        let bytes = manifest.encode().unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
        assert_eq!(Manifest::decode(&bytes).unwrap(), manifest);
        assert!(Manifest::decode(b"plain text").is_err());
    }
}
