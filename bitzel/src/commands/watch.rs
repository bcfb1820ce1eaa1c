//! `bitzel watch`

use crate::error::BitzelResult;
use crate::workspace::Workspace;
use convenient_watch::{ChangeBatch, WatchEvent, WatchmanCli};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Poll the feed until interrupted, or once
///
/// # Errors
///
/// Invalid ignore patterns or unwritable cursor state
pub async fn execute(
    workspace: &Workspace,
    once: bool,
    interval_ms: u64,
    json: bool,
) -> BitzelResult<()> {
    let client = Arc::new(WatchmanCli::new(&workspace.config().watch.watchman));
    let feed = workspace.feed(client).await?;

    loop {
        let report = feed.poll_once().await;
        for (cell, error) in &report.errors {
            warn!("{}: {}", cell.display(), error);
        }
        print_batch(&report.batch, json)?;
        workspace.save_cursors(&feed).await?;

        if once || !pause(Duration::from_millis(interval_ms)).await {
            break;
        }
    }

    feed.shutdown();
    Ok(())
}

/// Sleep for `interval`; false when interrupted
pub(crate) async fn pause(interval: Duration) -> bool {
    tokio::select! {
        () = tokio::time::sleep(interval) => true,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
            false
        }
    }
}

fn print_batch(batch: &ChangeBatch, json: bool) -> BitzelResult<()> {
    if json {
        if !batch.is_empty() {
            println!("{}", serde_json::to_string(batch)?);
        }
        return Ok(());
    }

    for event in batch.events() {
        match event {
            WatchEvent::Path(event) => println!(
                "{:<9} {:<9} {}",
                format!("{:?}", event.kind).to_lowercase(),
                format!("{:?}", event.file_type).to_lowercase(),
                event.absolute_path().display()
            ),
            WatchEvent::Overflow(overflow) => {
                println!("overflow  {}  ({})", overflow.cell.display(), overflow.reason);
            }
        }
    }
    Ok(())
}
