//! Ladder outcomes and per-build summaries

use convenient_cache::RuleKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

/// How a rule's outputs came to be up to date
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Default key unchanged since the last build
    MatchingRuleKey,
    /// Fetched by default key
    FetchedFromCache {
        /// Key the artifact was found under
        key: RuleKey,
    },
    /// Input-based key unchanged
    MatchingInputBasedRuleKey,
    /// Fetched by input-based key
    FetchedFromCacheInputBased {
        /// Key the artifact was found under
        key: RuleKey,
    },
    /// Dep-file key unchanged
    MatchingDepFileRuleKey,
    /// Fetched through a manifest entry
    FetchedFromCacheManifestBased {
        /// Dep-file key of the matching entry
        key: RuleKey,
    },
    /// Built by running the rule's steps
    BuiltLocally {
        /// Whether the artifact reached the store
        pushed: bool,
    },
}

impl BuildOutcome {
    /// True when the outputs on disk may have changed, so in-memory state
    /// derived from them must be rebuilt
    #[must_use]
    pub const fn invalidates_initialized_state(&self) -> bool {
        !matches!(
            self,
            Self::MatchingRuleKey | Self::MatchingInputBasedRuleKey | Self::MatchingDepFileRuleKey
        )
    }

    /// Payload-free form, as persisted
    #[must_use]
    pub const fn success_type(&self) -> SuccessType {
        match self {
            Self::MatchingRuleKey => SuccessType::MatchingRuleKey,
            Self::FetchedFromCache { .. } => SuccessType::FetchedFromCache,
            Self::MatchingInputBasedRuleKey => SuccessType::MatchingInputBasedRuleKey,
            Self::FetchedFromCacheInputBased { .. } => SuccessType::FetchedFromCacheInputBased,
            Self::MatchingDepFileRuleKey => SuccessType::MatchingDepFileRuleKey,
            Self::FetchedFromCacheManifestBased { .. } => {
                SuccessType::FetchedFromCacheManifestBased
            }
            Self::BuiltLocally { .. } => SuccessType::BuiltLocally,
        }
    }
}

impl fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FetchedFromCache { key }
            | Self::FetchedFromCacheInputBased { key }
            | Self::FetchedFromCacheManifestBased { key } => {
                write!(f, "{} ({:?})", self.success_type(), key)
            }
            Self::BuiltLocally { pushed: true } => write!(f, "{} (pushed)", self.success_type()),
            _ => write!(f, "{}", self.success_type()),
        }
    }
}

/// Persisted outcome kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SuccessType {
    /// See [`BuildOutcome::MatchingRuleKey`]
    MatchingRuleKey,
    /// See [`BuildOutcome::FetchedFromCache`]
    FetchedFromCache,
    /// See [`BuildOutcome::MatchingInputBasedRuleKey`]
    MatchingInputBasedRuleKey,
    /// See [`BuildOutcome::FetchedFromCacheInputBased`]
    FetchedFromCacheInputBased,
    /// See [`BuildOutcome::MatchingDepFileRuleKey`]
    MatchingDepFileRuleKey,
    /// See [`BuildOutcome::FetchedFromCacheManifestBased`]
    FetchedFromCacheManifestBased,
    /// See [`BuildOutcome::BuiltLocally`]
    BuiltLocally,
}

impl SuccessType {
    /// Upper snake case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MatchingRuleKey => "MATCHING_RULE_KEY",
            Self::FetchedFromCache => "FETCHED_FROM_CACHE",
            Self::MatchingInputBasedRuleKey => "MATCHING_INPUT_BASED_RULE_KEY",
            Self::FetchedFromCacheInputBased => "FETCHED_FROM_CACHE_INPUT_BASED",
            Self::MatchingDepFileRuleKey => "MATCHING_DEP_FILE_RULE_KEY",
            Self::FetchedFromCacheManifestBased => "FETCHED_FROM_CACHE_MANIFEST_BASED",
            Self::BuiltLocally => "BUILT_LOCALLY",
        }
    }
}

impl fmt::Display for SuccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome counts for one build session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSummary {
    /// Count per outcome kind
    pub outcomes: BTreeMap<SuccessType, usize>,
    /// Rules that failed
    pub failures: usize,
}

impl BuildSummary {
    /// Record one finished rule
    pub fn record(&mut self, outcome: &BuildOutcome) {
        *self.outcomes.entry(outcome.success_type()).or_default() += 1;
    }

    /// Record one failed rule
    pub fn record_failure(&mut self) {
        self.failures += 1;
    }

    /// Count for one kind
    #[must_use]
    pub fn count(&self, kind: SuccessType) -> usize {
        self.outcomes.get(&kind).copied().unwrap_or(0)
    }

    /// Successful rules
    #[must_use]
    pub fn total(&self) -> usize {
        self.outcomes.values().sum()
    }

    /// Share of successful rules that did not build locally
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            (total - self.count(SuccessType::BuiltLocally)) as f64 / total as f64
        }
    }

    /// Log the summary
    pub fn log(&self) {
        info!("{}", self);
    }
}

impl fmt::Display for BuildSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rules up to date, {} failed, {:.1}% without local build",
            self.total(),
            self.failures,
            self.hit_rate() * 100.0
        )?;
        for (kind, count) in &self.outcomes {
            write!(f, "\n  {kind}: {count}")?;
        }
        Ok(())
    }
}
