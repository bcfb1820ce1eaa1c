//! Rule key computation
//!
//! Every key is a SHA-256 over length-prefixed `(name, value)` fields, so
//! no two different field sequences can collide by concatenation. Each
//! flavor starts with its own tag.
//!
//! | flavor | rule fields | inputs | dependencies |
//! |---|---|---|---|
//! | default | yes | all declared | default keys |
//! | input-based | yes | all declared | output hashes |
//! | manifest | yes | mandatory only | output hashes |
//! | dep-file | yes | mandatory + recorded as read | output hashes |

use crate::error::EngineResult;
use crate::rule::{RuleId, RuleSpec};
use convenient_cache::RuleKey;
use convenient_fingerprint::{HashCode, StackedFingerprintCache};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Recorded output hashes of one rule
pub type OutputHashes = BTreeMap<PathBuf, HashCode>;

struct KeyHasher(Sha256);

impl KeyHasher {
    fn new(flavor: &str) -> Self {
        let mut hasher = Self(Sha256::new());
        hasher.field("flavor", flavor.as_bytes());
        hasher
    }

    fn field(&mut self, name: &str, value: &[u8]) {
        self.0.update((name.len() as u64).to_le_bytes());
        self.0.update(name.as_bytes());
        self.0.update((value.len() as u64).to_le_bytes());
        self.0.update(value);
    }

    fn finish(self) -> RuleKey {
        RuleKey::from_digest(self.0.finalize().into())
    }
}

/// Computes the four key flavors from current fingerprints
#[derive(Debug, Clone)]
pub struct RuleKeyFactory {
    root: PathBuf,
    fingerprints: Arc<StackedFingerprintCache>,
}

impl RuleKeyFactory {
    /// Factory hashing paths relative to `root`
    pub fn new(root: impl Into<PathBuf>, fingerprints: Arc<StackedFingerprintCache>) -> Self {
        Self {
            root: root.into(),
            fingerprints,
        }
    }

    /// Current fingerprint of a root-relative path
    ///
    /// # Errors
    ///
    /// Fingerprint errors for missing or uncovered paths
    pub fn hash_of(&self, path: &Path) -> EngineResult<HashCode> {
        Ok(self.fingerprints.get(self.root.join(path))?)
    }

    /// Default key
    ///
    /// # Errors
    ///
    /// Fingerprint errors for missing inputs
    pub fn default_key(&self, rule: &RuleSpec, deps: &[(RuleId, RuleKey)]) -> EngineResult<RuleKey> {
        let mut hasher = KeyHasher::new("default");
        Self::rule_fields(&mut hasher, rule);
        self.inputs(&mut hasher, rule.declared_inputs())?;

        let mut deps: Vec<_> = deps.iter().collect();
        deps.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, key) in deps {
            hasher.field("dep", id.as_str().as_bytes());
            hasher.field("dep_key", key.as_bytes());
        }
        Ok(hasher.finish())
    }

    /// Input-based key
    ///
    /// # Errors
    ///
    /// Fingerprint errors for missing inputs
    pub fn input_based_key(
        &self,
        rule: &RuleSpec,
        deps: &[(RuleId, &OutputHashes)],
    ) -> EngineResult<RuleKey> {
        let mut hasher = KeyHasher::new("input-based");
        Self::rule_fields(&mut hasher, rule);
        self.inputs(&mut hasher, rule.declared_inputs())?;
        Self::dep_outputs(&mut hasher, deps);
        Ok(hasher.finish())
    }

    /// Manifest key: input-based fields without the dep-file inputs
    ///
    /// # Errors
    ///
    /// Fingerprint errors for missing inputs
    pub fn manifest_key(
        &self,
        rule: &RuleSpec,
        deps: &[(RuleId, &OutputHashes)],
    ) -> EngineResult<RuleKey> {
        Ok(self.manifest_hasher("manifest", rule, deps)?.finish())
    }

    /// Dep-file key: manifest fields plus the inputs the build read
    ///
    /// # Errors
    ///
    /// Fingerprint errors for missing inputs
    pub fn dep_file_key(
        &self,
        rule: &RuleSpec,
        deps: &[(RuleId, &OutputHashes)],
        used_inputs: &[PathBuf],
    ) -> EngineResult<RuleKey> {
        let mut hasher = self.manifest_hasher("dep-file", rule, deps)?;
        self.inputs(&mut hasher, used_inputs)?;
        Ok(hasher.finish())
    }

    fn manifest_hasher(
        &self,
        flavor: &str,
        rule: &RuleSpec,
        deps: &[(RuleId, &OutputHashes)],
    ) -> EngineResult<KeyHasher> {
        let mut hasher = KeyHasher::new(flavor);
        Self::rule_fields(&mut hasher, rule);
        self.inputs(&mut hasher, &rule.inputs)?;
        Self::dep_outputs(&mut hasher, deps);
        Ok(hasher)
    }

    fn rule_fields(hasher: &mut KeyHasher, rule: &RuleSpec) {
        hasher.field("name", rule.name.as_str().as_bytes());
        hasher.field("type", rule.rule_type.as_bytes());
        for (key, value) in &rule.config {
            hasher.field("config", key.as_bytes());
            hasher.field("value", value.as_bytes());
        }
        for step in &rule.steps {
            hasher.field("step", step.as_bytes());
        }
        for output in &rule.outputs {
            hasher.field("output", output.to_string_lossy().as_bytes());
        }
    }

    fn inputs<'a>(
        &self,
        hasher: &mut KeyHasher,
        paths: impl IntoIterator<Item = &'a PathBuf>,
    ) -> EngineResult<()> {
        let mut paths: Vec<_> = paths.into_iter().collect();
        paths.sort();
        paths.dedup();
        for path in paths {
            hasher.field("input", path.to_string_lossy().as_bytes());
            hasher.field("hash", self.hash_of(path)?.as_bytes());
        }
        Ok(())
    }

    fn dep_outputs(hasher: &mut KeyHasher, deps: &[(RuleId, &OutputHashes)]) {
        let mut deps: Vec<_> = deps.iter().collect();
        deps.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, outputs) in deps {
            hasher.field("dep", id.as_str().as_bytes());
            for (path, hash) in *outputs {
                hasher.field("dep_output", path.to_string_lossy().as_bytes());
                hasher.field("hash", hash.as_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convenient_fingerprint::FingerprintCache;
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, RuleKeyFactory, RuleSpec) {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("main.c"), b"int main;").unwrap();
        fs::write(temp.path().join("a.h"), b"#define A").unwrap();
        fs::write(temp.path().join("b.h"), b"#define B").unwrap();
        let cache = Arc::new(FingerprintCache::new(temp.path()));
        let factory = RuleKeyFactory::new(
            temp.path(),
            Arc::new(StackedFingerprintCache::new(vec![cache])),
        );
        let mut rule = RuleSpec::new("//app:main");
        rule.inputs = vec![PathBuf::from("main.c")];
        rule.dep_file_inputs = vec![PathBuf::from("a.h"), PathBuf::from("b.h")];
        (temp, factory, rule)
    }

    fn outputs(content: &[u8]) -> OutputHashes {
        BTreeMap::from([(PathBuf::from("out/lib.a"), HashCode::of_bytes(content))])
    }

    #[test]
    fn test_flavors_differ() {
        let (_temp, factory, rule) = setup();
        let default = factory.default_key(&rule, &[]).unwrap();
        let input_based = factory.input_based_key(&rule, &[]).unwrap();
        let manifest = factory.manifest_key(&rule, &[]).unwrap();
        let dep_file = factory.dep_file_key(&rule, &[], &[]).unwrap();

        let mut all = vec![default, input_based, manifest, dep_file];
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 4);
    }

    #[test]
    fn test_default_key_tracks_every_declared_input() {
        let (temp, factory, rule) = setup();
        let before = factory.default_key(&rule, &[]).unwrap();

        fs::write(temp.path().join("b.h"), b"#define B 2").unwrap();
        factory.fingerprints.invalidate(temp.path().join("b.h"));

        assert_ne!(factory.default_key(&rule, &[]).unwrap(), before);
    }

    #[test]
    fn test_dep_file_key_ignores_unread_inputs() {
        let (temp, factory, rule) = setup();
        let used = vec![PathBuf::from("a.h")];
        let manifest_before = factory.manifest_key(&rule, &[]).unwrap();
        let before = factory.dep_file_key(&rule, &[], &used).unwrap();

        fs::write(temp.path().join("b.h"), b"#define B 2").unwrap();
        factory.fingerprints.invalidate(temp.path().join("b.h"));

        assert_eq!(factory.dep_file_key(&rule, &[], &used).unwrap(), before);
        assert_eq!(factory.manifest_key(&rule, &[]).unwrap(), manifest_before);

        fs::write(temp.path().join("a.h"), b"#define A 2").unwrap();
        factory.fingerprints.invalidate(temp.path().join("a.h"));
        assert_ne!(factory.dep_file_key(&rule, &[], &used).unwrap(), before);
    }

    #[test]
    fn test_input_based_key_uses_dependency_outputs() {
        let (_temp, factory, rule) = setup();
        let lib = RuleId::from("//lib");
        let (v1, v1_again, v2) = (outputs(b"v1"), outputs(b"v1"), outputs(b"v2"));
        let same = factory.input_based_key(&rule, &[(lib.clone(), &v1)]).unwrap();
        assert_eq!(factory.input_based_key(&rule, &[(lib.clone(), &v1_again)]).unwrap(), same);
        assert_ne!(factory.input_based_key(&rule, &[(lib, &v2)]).unwrap(), same);
    }

    #[test]
    fn test_dependency_order_does_not_matter() {
        let (_temp, factory, rule) = setup();
        let a = (RuleId::from("//a"), RuleKey::of_bytes(b"a"));
        let b = (RuleId::from("//b"), RuleKey::of_bytes(b"b"));
        assert_eq!(
            factory.default_key(&rule, &[a.clone(), b.clone()]).unwrap(),
            factory.default_key(&rule, &[b, a]).unwrap()
        );
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let (_temp, factory, mut rule) = setup();
        rule.inputs.push(PathBuf::from("gone.c"));
        assert!(factory.default_key(&rule, &[]).is_err());
    }
}
