//! Bitzel - incremental builds backed by a tiered artifact cache
//!
//! Bitzel wires together:
//! - **convenient-fingerprint**: memoised content hashes of project files
//! - **convenient-watch**: a cursor-based change feed that invalidates them
//! - **convenient-cache**: the artifact store and its transports
//! - **convenient-engine**: the ladder of cache tiers each rule walks
//!
//! ## Usage
//!
//! ```no_run
//! use bitzel::{Workspace, load_rules};
//! use bitzel::commands::build::{build_targets, engine_for, select_targets};
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let workspace = Workspace::open(std::path::Path::new("."), None).await?;
//! let rules = load_rules(workspace.resolve("rules.yml")).await?;
//! let targets = select_targets(&rules, &[]);
//! let (engine, _fingerprints) = engine_for(&workspace, rules)?;
//! let _failed = build_targets(&engine, &targets).await;
//! # Ok(())
//! # }
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod rules;
pub mod workspace;

pub use config::{BitzelConfig, ConfigError};
pub use error::{BitzelError, BitzelResult};
pub use rules::{load_rules, parse_rules};
pub use workspace::Workspace;
