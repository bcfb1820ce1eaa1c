//! Bitzel command-line interface
//!
//! - `hash`: fingerprint files, directories and archive members
//! - `content-key`: decode second-level content keys
//! - `watch`: poll the change feed
//! - `build`: bring rules up to date through the cache tiers
//! - `cache`: inspect the artifact cache

use crate::error::BitzelResult;
use crate::workspace::Workspace;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod build;
pub mod cache;
pub mod content_key;
pub mod hash;
pub mod watch;

/// Bitzel - cache-tiered incremental builds
#[derive(Debug, Parser)]
#[command(name = "bitzel")]
#[command(about = "Incremental builds backed by fingerprints, a change feed and an artifact cache")]
#[command(version)]
pub struct Cli {
    /// Project root
    #[arg(short = 'C', long, global = true, default_value = ".")]
    pub root: PathBuf,

    /// Configuration file (default: `<root>/bitzel.yml` when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print fingerprints; `archive.zip!member` addresses an archive member
    Hash {
        /// Paths relative to the project root
        #[arg(required = true)]
        paths: Vec<String>,

        /// Emit JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Decode second-level content keys
    ContentKey {
        /// Keys such as `cas/<hash>:<size>`
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Poll the change feed and print each batch
    Watch {
        /// Poll a single time and exit
        #[arg(long)]
        once: bool,

        /// Delay between polls
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,

        /// Emit JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Build rules
    Build {
        /// Rule file
        #[arg(short, long, default_value = "rules.yml")]
        rules: PathBuf,

        /// Targets to build (default: every rule)
        targets: Vec<String>,

        /// Rebuild whenever the change feed reports file changes
        #[arg(long)]
        watch: bool,

        /// Delay between polls in watch mode
        #[arg(long, default_value_t = 1000)]
        interval_ms: u64,
    },

    /// Cache management operations
    Cache {
        #[command(subcommand)]
        operation: CacheOperation,
    },
}

/// `cache` operations
#[derive(Debug, Subcommand)]
pub enum CacheOperation {
    /// Show where artifacts live and how much is stored
    Info,
}

/// Run the parsed command line
///
/// # Errors
///
/// Whatever the selected command reports
pub async fn run(cli: Cli) -> BitzelResult<()> {
    if let Commands::ContentKey { keys } = &cli.command {
        content_key::execute(keys);
        return Ok(());
    }

    let workspace = Workspace::open(&cli.root, cli.config.as_deref()).await?;
    match cli.command {
        Commands::Hash { paths, json } => hash::execute(&workspace, &paths, json),
        Commands::ContentKey { .. } => Ok(()),
        Commands::Watch {
            once,
            interval_ms,
            json,
        } => watch::execute(&workspace, once, interval_ms, json).await,
        Commands::Build {
            rules,
            targets,
            watch,
            interval_ms,
        } => build::execute(&workspace, &rules, &targets, watch, interval_ms).await,
        Commands::Cache { operation } => match operation {
            CacheOperation::Info => cache::info(&workspace).await,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_root_after_subcommand() {
        let cli = Cli::parse_from(["bitzel", "build", "-C", "/tmp/project", "//app"]);
        assert_eq!(cli.root, PathBuf::from("/tmp/project"));
        match cli.command {
            Commands::Build { rules, targets, watch, .. } => {
                assert_eq!(rules, PathBuf::from("rules.yml"));
                assert_eq!(targets, vec!["//app".to_string()]);
                assert!(!watch);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_hash_requires_a_path() {
        assert!(Cli::try_parse_from(["bitzel", "hash"]).is_err());
    }
}
