//! Cache-tier decision engine for Bitzel
//!
//! For every rule of a build the [`CachingBuildEngine`] walks a ladder of
//! cheaper-to-costlier ways of producing its outputs and stops at the first
//! one that works:
//!
//! 1. the default rule key matches what was recorded last time
//! 2. the artifact store has an artifact under the default key
//! 3. the input-based key matches
//! 4. the artifact store has an artifact under the input-based key
//! 5. the dep-file key, over the inputs the last build actually read, matches
//! 6. the rule's manifest lists an input combination that matches now and
//!    whose artifact can be fetched
//! 7. build locally
//!
//! Matching outcomes keep the rule's in-memory output state; fetched and
//! built outcomes replace it. A failing tier is a miss, never an error:
//! only a failed local build fails the rule.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

pub mod builder;
pub mod engine;
pub mod error;
pub mod keys;
pub mod manifest;
pub mod metadata;
pub mod outcome;
pub mod rule;

pub use builder::{BuildReport, RuleBuilder, ShellRuleBuilder};
pub use engine::{BuildResult, CachingBuildEngine, EngineConfig, OutputState, OutputStates, RuleKeys};
pub use error::{EngineError, EngineResult};
pub use keys::RuleKeyFactory;
pub use manifest::{Manifest, ManifestEntry};
pub use metadata::{
    BuildMetadata, FileMetadataStore, MemoryMetadataStore, MetadataKind, MetadataStore,
};
pub use outcome::{BuildOutcome, BuildSummary, SuccessType};
pub use rule::{RuleGraph, RuleId, RuleSpec};
