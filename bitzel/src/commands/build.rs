//! `bitzel build`

use super::watch::pause;
use crate::error::{BitzelError, BitzelResult};
use crate::rules::load_rules;
use crate::workspace::Workspace;
use convenient_engine::{CachingBuildEngine, RuleGraph, RuleId, ShellRuleBuilder};
use convenient_fingerprint::StackedFingerprintCache;
use convenient_watch::{ChangeSubscriber, WatchmanCli};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Engine wired to the workspace's fingerprints, metadata and cache
///
/// # Errors
///
/// Malformed remote cache URL
pub fn engine_for(
    workspace: &Workspace,
    rules: RuleGraph,
) -> BitzelResult<(CachingBuildEngine, Arc<StackedFingerprintCache>)> {
    let fingerprints = Arc::new(workspace.fingerprints());
    let engine = CachingBuildEngine::new(
        rules,
        workspace.root(),
        Arc::clone(&fingerprints),
        Arc::new(workspace.metadata()),
        Arc::new(workspace.store()?),
        Arc::new(ShellRuleBuilder::default()),
        workspace.config().engine_config(),
    );
    Ok((engine, fingerprints))
}

/// Requested targets, or every rule when none are named
#[must_use]
pub fn select_targets(rules: &RuleGraph, names: &[String]) -> Vec<RuleId> {
    if names.is_empty() {
        let mut all: Vec<_> = rules.rules().map(|rule| rule.name.clone()).collect();
        all.sort();
        all
    } else {
        names.iter().map(|name| RuleId::new(name.as_str())).collect()
    }
}

/// Build `targets` once and print each result; returns the failure count
pub async fn build_targets(engine: &CachingBuildEngine, targets: &[RuleId]) -> usize {
    let mut failed = 0;
    for (id, result) in engine.build_all(targets).await {
        match result {
            Ok(result) => println!("{id}: {}", result.outcome),
            Err(e) => {
                failed += 1;
                println!("{id}: FAILED: {e}");
            }
        }
    }
    println!("{}", engine.summary());
    failed
}

/// Build, optionally rebuilding on every change the feed reports
///
/// # Errors
///
/// Bad rule file or configuration, or `TargetsFailed` outside watch mode
pub async fn execute(
    workspace: &Workspace,
    rules: &Path,
    targets: &[String],
    watch: bool,
    interval_ms: u64,
) -> BitzelResult<()> {
    let rules = load_rules(workspace.resolve(rules)).await?;
    let targets = select_targets(&rules, targets);
    let (engine, fingerprints) = engine_for(workspace, rules)?;

    if !watch {
        let failed = build_targets(&engine, &targets).await;
        return if failed == 0 {
            Ok(())
        } else {
            Err(BitzelError::TargetsFailed(failed, targets.len()))
        };
    }

    let client = Arc::new(WatchmanCli::new(&workspace.config().watch.watchman));
    let feed = workspace.feed(client).await?;
    feed.subscribe(Arc::clone(&fingerprints) as Arc<dyn ChangeSubscriber>);

    // Cursors start before the first build
    let _ = feed.poll_once().await;
    workspace.save_cursors(&feed).await?;
    let _ = build_targets(&engine, &targets).await;

    while pause(Duration::from_millis(interval_ms)).await {
        let report = feed.poll_once().await;
        for (cell, error) in &report.errors {
            warn!("{}: {}", cell.display(), error);
        }
        workspace.save_cursors(&feed).await?;

        let fresh = !report.fresh_instances.is_empty();
        if fresh {
            // A silent fresh instance published no overflow
            fingerprints.invalidate_all();
        }
        if fresh || report.files_changed || report.batch.has_overflow() {
            info!("{} changes, rebuilding", report.batch.len());
            let _ = engine.new_session();
            let _ = build_targets(&engine, &targets).await;
        }
    }

    engine.shutdown();
    feed.shutdown();
    Ok(())
}
