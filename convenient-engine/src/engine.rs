//! The caching build engine

use crate::builder::RuleBuilder;
use crate::error::{EngineError, EngineResult};
use crate::keys::{OutputHashes, RuleKeyFactory};
use crate::manifest::{Manifest, ManifestEntry};
use crate::metadata::{BuildMetadata, MetadataStore};
use crate::outcome::{BuildOutcome, BuildSummary};
use crate::rule::{RuleGraph, RuleId, RuleSpec};
use convenient_cache::{
    Artifact, ArtifactMetadata, ArtifactStore, FetchResult, RuleKey, clear_outputs,
};
use convenient_fingerprint::StackedFingerprintCache;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared, join_all};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Entries kept per manifest before the least recently used is evicted
    pub max_manifest_entries: usize,
    /// Push locally built artifacts to the store
    pub push_artifacts: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_manifest_entries: 256,
            push_artifacts: true,
        }
    }
}

/// In-memory view of a rule's outputs, initialized from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputState {
    /// Owning rule
    pub rule: RuleId,
    /// Output path → hash
    pub outputs: OutputHashes,
}

/// Output state of every rule seen so far
#[derive(Debug, Default)]
pub struct OutputStates {
    states: DashMap<RuleId, Arc<OutputState>>,
}

impl OutputStates {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// State of `rule`
    #[must_use]
    pub fn get(&self, rule: &RuleId) -> Option<Arc<OutputState>> {
        self.states.get(rule).map(|state| Arc::clone(state.value()))
    }

    /// Number of rules with state
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True when no rule has state
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn replace(&self, state: OutputState) -> Arc<OutputState> {
        let state = Arc::new(state);
        let _ = self.states.insert(state.rule.clone(), Arc::clone(&state));
        state
    }

    fn get_or_init(&self, state: OutputState) -> Arc<OutputState> {
        let entry = self
            .states
            .entry(state.rule.clone())
            .or_insert_with(|| Arc::new(state));
        Arc::clone(entry.value())
    }
}

/// Keys of a rule as of its last ladder run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleKeys {
    /// Default key
    pub default: RuleKey,
    /// Input-based key, when the rule supports it
    pub input_based: Option<RuleKey>,
    /// Dep-file key, when the rule supports it and its used inputs are known
    pub dep_file: Option<RuleKey>,
    /// Manifest key, when the rule supports dep files
    pub manifest: Option<RuleKey>,
}

/// Result of one ladder run
#[derive(Debug, Clone)]
pub struct BuildResult {
    /// Rule built
    pub rule: RuleId,
    /// How the outputs came to be up to date
    pub outcome: BuildOutcome,
    /// Keys computed along the way
    pub keys: RuleKeys,
    /// Output state after the run
    pub outputs: Arc<OutputState>,
}

type SharedBuild = Shared<BoxFuture<'static, Result<Arc<BuildResult>, Arc<EngineError>>>>;

struct EngineInner {
    rules: RuleGraph,
    root: PathBuf,
    fingerprints: Arc<StackedFingerprintCache>,
    keys: RuleKeyFactory,
    metadata: Arc<dyn MetadataStore>,
    store: Arc<ArtifactStore>,
    builder: Arc<dyn RuleBuilder>,
    config: EngineConfig,
    output_states: OutputStates,
    in_flight: DashMap<RuleId, SharedBuild>,
    summary: Mutex<BuildSummary>,
    shutdown: AtomicBool,
}

/// Builds rules through the cache ladder
///
/// Cloning is cheap; clones share all state. Concurrent requests for the
/// same rule share one ladder run until [`CachingBuildEngine::new_session`].
#[derive(Clone)]
pub struct CachingBuildEngine {
    inner: Arc<EngineInner>,
}

impl CachingBuildEngine {
    /// Engine over `rules`, whose paths are relative to `root`
    pub fn new(
        rules: RuleGraph,
        root: impl Into<PathBuf>,
        fingerprints: Arc<StackedFingerprintCache>,
        metadata: Arc<dyn MetadataStore>,
        store: Arc<ArtifactStore>,
        builder: Arc<dyn RuleBuilder>,
        config: EngineConfig,
    ) -> Self {
        let root = root.into();
        Self {
            inner: Arc::new(EngineInner {
                rules,
                keys: RuleKeyFactory::new(root.clone(), Arc::clone(&fingerprints)),
                root,
                fingerprints,
                metadata,
                store,
                builder,
                config,
                output_states: OutputStates::new(),
                in_flight: DashMap::new(),
                summary: Mutex::new(BuildSummary::default()),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Bring `id` and its dependencies up to date
    ///
    /// # Errors
    ///
    /// `UnknownRule`, `ShuttingDown`, `DependencyFailed`, or `BuildFailed`
    /// when every tier missed and the local build failed. Errors observed
    /// by several waiters arrive wrapped in `EngineError::Shared`; use
    /// [`EngineError::root`] to inspect them.
    pub async fn build(&self, id: &RuleId) -> EngineResult<Arc<BuildResult>> {
        if self.inner.rules.get(id).is_none() {
            return Err(EngineError::UnknownRule(id.clone()));
        }
        self.inner
            .shared_build(id.clone())
            .await
            .map_err(|e| Arc::try_unwrap(e).unwrap_or_else(EngineError::Shared))
    }

    /// Build several targets concurrently and log the session summary
    pub async fn build_all(
        &self,
        targets: &[RuleId],
    ) -> Vec<(RuleId, EngineResult<Arc<BuildResult>>)> {
        let results = join_all(targets.iter().map(|id| self.build(id))).await;
        self.summary().log();
        targets.iter().cloned().zip(results).collect()
    }

    /// Forget in-flight results so the next build re-evaluates every rule
    ///
    /// Returns the summary of the session that ended.
    pub fn new_session(&self) -> BuildSummary {
        self.inner.in_flight.clear();
        std::mem::take(&mut *self.inner.summary())
    }

    /// Refuse to start new ladder runs; running ones finish
    pub fn shutdown(&self) {
        info!("build engine shutting down");
        self.inner.shutdown.store(true, Ordering::SeqCst);
    }

    /// True after [`CachingBuildEngine::shutdown`]
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    /// Outcome counts of the current session
    #[must_use]
    pub fn summary(&self) -> BuildSummary {
        self.inner.summary().clone()
    }

    /// Output state of `rule`
    #[must_use]
    pub fn output_state(&self, rule: &RuleId) -> Option<Arc<OutputState>> {
        self.inner.output_states.get(rule)
    }

    /// All output states
    #[must_use]
    pub fn output_states(&self) -> &OutputStates {
        &self.inner.output_states
    }

    /// Rule graph
    #[must_use]
    pub fn rules(&self) -> &RuleGraph {
        &self.inner.rules
    }

    /// Key factory
    #[must_use]
    pub fn key_factory(&self) -> &RuleKeyFactory {
        &self.inner.keys
    }

    /// Artifact store
    #[must_use]
    pub fn store(&self) -> &ArtifactStore {
        &self.inner.store
    }
}

impl EngineInner {
    fn summary(&self) -> MutexGuard<'_, BuildSummary> {
        self.summary.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn shared_build(self: &Arc<Self>, id: RuleId) -> SharedBuild {
        self.in_flight
            .entry(id.clone())
            .or_insert_with(|| {
                let inner = Arc::clone(self);
                let handle = tokio::spawn(async move { inner.build_rule(id).await });
                async move {
                    match handle.await {
                        Ok(result) => result.map_err(Arc::new),
                        Err(e) => Err(Arc::new(EngineError::Task(e.to_string()))),
                    }
                }
                .boxed()
                .shared()
            })
            .clone()
    }

    async fn build_rule(self: Arc<Self>, id: RuleId) -> EngineResult<Arc<BuildResult>> {
        if self.is_shut_down() {
            return Err(EngineError::ShuttingDown);
        }
        let rule = Arc::clone(
            self.rules
                .get(&id)
                .ok_or_else(|| EngineError::UnknownRule(id.clone()))?,
        );

        let results = join_all(rule.deps.iter().map(|dep| self.shared_build(dep.clone()))).await;
        let mut deps = Vec::with_capacity(results.len());
        for (dep, result) in rule.deps.iter().zip(results) {
            match result {
                Ok(result) => deps.push(result),
                Err(e) => {
                    if matches!(e.root(), EngineError::ShuttingDown) {
                        return Err(EngineError::ShuttingDown);
                    }
                    warn!("{}: dependency {} failed: {}", id, dep, e);
                    self.summary().record_failure();
                    return Err(EngineError::DependencyFailed {
                        rule: id,
                        dependency: dep.clone(),
                    });
                }
            }
        }

        if self.is_shut_down() {
            return Err(EngineError::ShuttingDown);
        }

        let previous = match BuildMetadata::load(self.metadata.as_ref(), &id) {
            Ok(previous) => previous,
            Err(e) => {
                warn!("{}: ignoring unreadable metadata: {}", id, e);
                BuildMetadata::default()
            }
        };

        let ladder = Ladder {
            engine: &*self,
            rule: &rule,
            dep_keys: deps.iter().map(|d| (d.rule.clone(), d.keys.default)).collect(),
            dep_outputs: deps.iter().map(|d| (d.rule.clone(), &d.outputs.outputs)).collect(),
            previous,
        };
        match ladder.run().await {
            Ok(concluded) => {
                let result = self.conclude(&rule, ladder.previous, concluded);
                self.summary().record(&result.outcome);
                Ok(Arc::new(result))
            }
            Err(e) => {
                warn!("{}: {}", id, e);
                self.summary().record_failure();
                Err(e)
            }
        }
    }

    fn conclude(&self, rule: &RuleSpec, previous: BuildMetadata, concluded: Concluded) -> BuildResult {
        let Concluded {
            outcome,
            keys,
            outputs,
            dep_file,
        } = concluded;
        let recorded = outputs.unwrap_or(previous.recorded_outputs);

        let metadata = BuildMetadata {
            rule_key: Some(keys.default),
            input_based_key: keys.input_based,
            dep_file_key: keys.dep_file,
            manifest_key: keys.manifest,
            recorded_outputs: recorded.clone(),
            dep_file,
            success_type: Some(outcome.success_type()),
        };
        if let Err(e) = metadata
            .to_entries()
            .and_then(|entries| self.metadata.commit(&rule.name, entries))
        {
            warn!("{}: writing metadata failed: {}", rule.name, e);
        }

        let state = OutputState {
            rule: rule.name.clone(),
            outputs: recorded,
        };
        let state = if outcome.invalidates_initialized_state() {
            self.output_states.replace(state)
        } else {
            self.output_states.get_or_init(state)
        };

        info!("{}: {}", rule.name, outcome);
        BuildResult {
            rule: rule.name.clone(),
            outcome,
            keys,
            outputs: state,
        }
    }

    /// Invalidate and rehash the rule's outputs
    fn hash_outputs(&self, rule: &RuleSpec) -> EngineResult<OutputHashes> {
        for path in rule.outputs.iter().chain(&rule.dep_file) {
            self.fingerprints.invalidate(self.root.join(path));
        }
        rule.outputs
            .iter()
            .map(|path| Ok((path.clone(), self.keys.hash_of(path)?)))
            .collect()
    }

    async fn save_manifest(&self, manifest: &Manifest) {
        let result = match manifest.encode() {
            Ok(bytes) => self
                .store
                .store_manifest(&manifest.key(), bytes)
                .await
                .map_err(EngineError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("storing manifest {:?} failed: {}", manifest.key(), e);
        }
    }
}

/// How a ladder run concluded, before metadata is written
struct Concluded {
    outcome: BuildOutcome,
    keys: RuleKeys,
    /// Fresh output hashes; `None` keeps the recorded ones
    outputs: Option<OutputHashes>,
    dep_file: Option<Vec<PathBuf>>,
}

struct Ladder<'a> {
    engine: &'a EngineInner,
    rule: &'a RuleSpec,
    dep_keys: Vec<(RuleId, RuleKey)>,
    dep_outputs: Vec<(RuleId, &'a OutputHashes)>,
    previous: BuildMetadata,
}

impl Ladder<'_> {
    async fn run(&self) -> EngineResult<Concluded> {
        let factory = &self.engine.keys;
        let default = match factory.default_key(self.rule, &self.dep_keys) {
            Ok(key) => key,
            Err(e) => {
                warn!("{}: no rule key ({}), building locally", self.rule.name, e);
                return self.build_locally().await;
            }
        };
        let mut current = RuleKeys {
            default,
            input_based: None,
            dep_file: None,
            manifest: None,
        };

        if self.previous.rule_key == Some(default) && self.outputs_intact() {
            return Ok(self.matching(BuildOutcome::MatchingRuleKey, current));
        }
        if let Some(concluded) = self
            .fetch(default, current, |key| BuildOutcome::FetchedFromCache { key })
            .await
        {
            return Ok(concluded);
        }

        if self.rule.supports_input_based {
            current.input_based =
                self.tier_key("input-based", factory.input_based_key(self.rule, &self.dep_outputs));
            if let Some(input_based) = current.input_based {
                if self.previous.input_based_key == Some(input_based) && self.outputs_intact() {
                    return Ok(self.matching(BuildOutcome::MatchingInputBasedRuleKey, current));
                }
                if let Some(concluded) = self
                    .fetch(input_based, current, |key| {
                        BuildOutcome::FetchedFromCacheInputBased { key }
                    })
                    .await
                {
                    return Ok(concluded);
                }
            }
        }

        if self.rule.supports_dep_file {
            current.manifest =
                self.tier_key("manifest", factory.manifest_key(self.rule, &self.dep_outputs));
            if let Some(used) = &self.previous.dep_file {
                current.dep_file = self.tier_key(
                    "dep-file",
                    factory.dep_file_key(self.rule, &self.dep_outputs, used),
                );
                if current.dep_file.is_some()
                    && current.dep_file == self.previous.dep_file_key
                    && self.outputs_intact()
                {
                    return Ok(self.matching(BuildOutcome::MatchingDepFileRuleKey, current));
                }
            }
            if let Some(manifest_key) = current.manifest
                && let Some(concluded) = self.fetch_via_manifest(manifest_key, current).await
            {
                return Ok(concluded);
            }
        }

        self.build_locally().await
    }

    fn tier_key(&self, flavor: &str, key: EngineResult<RuleKey>) -> Option<RuleKey> {
        key.map_err(|e| debug!("{}: no {} key: {}", self.rule.name, flavor, e))
            .ok()
    }

    /// Recorded outputs exist and still hash to their recorded values
    fn outputs_intact(&self) -> bool {
        let intact = self.rule.outputs.iter().all(|path| {
            self.previous
                .recorded_outputs
                .get(path)
                .is_some_and(|recorded| self.engine.keys.hash_of(path).is_ok_and(|h| &h == recorded))
        });
        if !intact {
            debug!("{}: outputs changed since last build", self.rule.name);
        }
        intact
    }

    fn matching(&self, outcome: BuildOutcome, current: RuleKeys) -> Concluded {
        Concluded {
            outcome,
            keys: RuleKeys {
                default: current.default,
                input_based: current.input_based.or(self.previous.input_based_key),
                dep_file: current.dep_file.or(self.previous.dep_file_key),
                manifest: current.manifest.or(self.previous.manifest_key),
            },
            outputs: None,
            dep_file: self.previous.dep_file.clone(),
        }
    }

    /// Fill in the keys a rule supports that are not yet known
    fn complete_keys(&self, mut keys: RuleKeys, used: Option<&[PathBuf]>) -> RuleKeys {
        let factory = &self.engine.keys;
        if self.rule.supports_input_based && keys.input_based.is_none() {
            keys.input_based =
                self.tier_key("input-based", factory.input_based_key(self.rule, &self.dep_outputs));
        }
        if self.rule.supports_dep_file {
            if keys.manifest.is_none() {
                keys.manifest =
                    self.tier_key("manifest", factory.manifest_key(self.rule, &self.dep_outputs));
            }
            if keys.dep_file.is_none()
                && let Some(used) = used
            {
                keys.dep_file = self.tier_key(
                    "dep-file",
                    factory.dep_file_key(self.rule, &self.dep_outputs, used),
                );
            }
        }
        keys
    }

    async fn adopt(&self, artifact: Artifact) -> EngineResult<OutputHashes> {
        let root = self.engine.root.clone();
        let outputs = self.rule.outputs.clone();
        let _ = tokio::task::spawn_blocking(move || {
            clear_outputs(&root, &outputs)?;
            artifact.materialize(&root)
        })
        .await
        .map_err(|e| EngineError::Task(e.to_string()))??;
        self.engine.hash_outputs(self.rule)
    }

    async fn fetch(
        &self,
        key: RuleKey,
        current: RuleKeys,
        outcome: impl FnOnce(RuleKey) -> BuildOutcome,
    ) -> Option<Concluded> {
        let artifact = match self.engine.store.fetch(&key).await {
            FetchResult::Hit(artifact) => artifact,
            FetchResult::Miss => return None,
            FetchResult::Error(e) => {
                warn!("{}: fetch of {:?} failed, trying next tier: {}", self.rule.name, key, e);
                return None;
            }
        };
        let dep_file = artifact.metadata.dep_file.clone();
        match self.adopt(artifact).await {
            Ok(outputs) => Some(Concluded {
                outcome: outcome(key),
                keys: self.complete_keys(current, dep_file.as_deref()),
                outputs: Some(outputs),
                dep_file,
            }),
            Err(e) => {
                warn!("{}: unusable artifact {:?}: {}", self.rule.name, key, e);
                None
            }
        }
    }

    async fn fetch_via_manifest(&self, manifest_key: RuleKey, current: RuleKeys) -> Option<Concluded> {
        let bytes = match self.engine.store.fetch_manifest(&manifest_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!("{}: no manifest {:?}", self.rule.name, manifest_key);
                return None;
            }
            Err(e) => {
                warn!("{}: manifest fetch failed: {}", self.rule.name, e);
                return None;
            }
        };
        let mut manifest = match Manifest::decode(&bytes) {
            Ok(manifest) if manifest.key() == manifest_key => manifest,
            Ok(manifest) => {
                warn!(
                    "{}: manifest keyed {:?}, expected {:?}",
                    self.rule.name,
                    manifest.key(),
                    manifest_key
                );
                return None;
            }
            Err(e) => {
                warn!("{}: corrupt manifest: {}", self.rule.name, e);
                return None;
            }
        };

        let candidates = manifest.matching(|path| self.engine.keys.hash_of(path).ok());
        debug!(
            "{}: {} of {} manifest entries match",
            self.rule.name,
            candidates.len(),
            manifest.len()
        );
        for key in candidates {
            let mut keys = current;
            keys.dep_file = Some(key);
            if let Some(concluded) = self
                .fetch(key, keys, |key| BuildOutcome::FetchedFromCacheManifestBased { key })
                .await
            {
                let _ = manifest.touch(&key);
                self.engine.save_manifest(&manifest).await;
                return Some(concluded);
            }
        }
        None
    }

    async fn build_locally(&self) -> EngineResult<Concluded> {
        let engine = self.engine;
        let rule = self.rule;
        let failed = |reason: String| EngineError::BuildFailed {
            rule: rule.name.clone(),
            reason,
        };

        let root = engine.root.clone();
        let stale: Vec<PathBuf> = rule.outputs.iter().chain(&rule.dep_file).cloned().collect();
        tokio::task::spawn_blocking(move || clear_outputs(&root, &stale))
            .await
            .map_err(|e| EngineError::Task(e.to_string()))?
            .map_err(|e| failed(format!("cannot clear outputs: {e}")))?;

        let report = engine.builder.build(rule, &engine.root).await?;
        let outputs = engine
            .hash_outputs(rule)
            .map_err(|e| failed(format!("missing output after build: {e}")))?;

        let used = match report.used_inputs {
            Some(mut used) => {
                used.retain(|path| rule.dep_file_inputs.contains(path));
                Some(used)
            }
            None if rule.supports_dep_file => Some(rule.dep_file_inputs.clone()),
            None => None,
        };

        let default = engine
            .keys
            .default_key(rule, &self.dep_keys)
            .map_err(|e| failed(format!("cannot compute rule key: {e}")))?;
        let keys = self.complete_keys(
            RuleKeys {
                default,
                input_based: None,
                dep_file: None,
                manifest: None,
            },
            used.as_deref(),
        );

        let pushed = self.push(&keys, &outputs, used.clone()).await;
        if pushed {
            self.append_manifest(&keys, used.as_deref()).await;
        }

        Ok(Concluded {
            outcome: BuildOutcome::BuiltLocally { pushed },
            keys,
            outputs: Some(outputs),
            dep_file: used,
        })
    }

    async fn push(
        &self,
        keys: &RuleKeys,
        outputs: &OutputHashes,
        dep_file: Option<Vec<PathBuf>>,
    ) -> bool {
        if !self.engine.config.push_artifacts {
            return false;
        }
        let mut store_keys = vec![keys.default];
        store_keys.extend(keys.input_based);
        store_keys.extend(keys.dep_file);

        let metadata = ArtifactMetadata::new(self.rule.name.to_string(), store_keys.clone())
            .with_output_hashes(
                outputs
                    .iter()
                    .map(|(path, hash)| (path.clone(), hash.to_hex()))
                    .collect(),
            )
            .with_dep_file(dep_file);
        match self
            .engine
            .store
            .store(&store_keys, &self.engine.root, &self.rule.outputs, metadata)
            .await
        {
            Ok(outcome) => {
                debug!("{}: pushed artifact: {:?}", self.rule.name, outcome);
                true
            }
            Err(e) => {
                warn!("{}: artifact push failed: {}", self.rule.name, e);
                false
            }
        }
    }

    /// Record this build's input combination. Only local builds get here, and
    /// a rule runs its ladder at most once per session.
    async fn append_manifest(&self, keys: &RuleKeys, used: Option<&[PathBuf]>) {
        let (Some(manifest_key), Some(dep_file_key), Some(used)) =
            (keys.manifest, keys.dep_file, used)
        else {
            return;
        };

        let mut inputs = BTreeMap::new();
        for path in used {
            match self.engine.keys.hash_of(path) {
                Ok(hash) => {
                    let _ = inputs.insert(path.clone(), hash);
                }
                Err(e) => {
                    warn!("{}: not updating manifest: {}", self.rule.name, e);
                    return;
                }
            }
        }

        let mut manifest = match self.engine.store.fetch_manifest(&manifest_key).await {
            Ok(Some(bytes)) => Manifest::decode(&bytes)
                .ok()
                .filter(|manifest| manifest.key() == manifest_key)
                .unwrap_or_else(|| {
                    warn!("{}: replacing unreadable manifest", self.rule.name);
                    Manifest::new(manifest_key)
                }),
            Ok(None) => Manifest::new(manifest_key),
            Err(e) => {
                warn!("{}: manifest fetch failed: {}", self.rule.name, e);
                return;
            }
        };

        let evicted = manifest.add(
            ManifestEntry {
                inputs,
                rule_key: dep_file_key,
            },
            self.engine.config.max_manifest_entries,
        );
        if !evicted.is_empty() {
            debug!("{}: evicted {} manifest entries", self.rule.name, evicted.len());
        }
        self.engine.save_manifest(&manifest).await;
    }
}

impl std::fmt::Debug for CachingBuildEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingBuildEngine")
            .field("root", &self.inner.root)
            .field("rules", &self.inner.rules.len())
            .field("store", &self.inner.store.describe())
            .finish_non_exhaustive()
    }
}

