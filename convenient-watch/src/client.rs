//! Transport to the watch service

use crate::error::{WatchError, WatchResult};
use crate::query::{WatchQuery, WatchResponse};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Something that can answer watch queries
#[async_trait]
pub trait WatchClient: Send + Sync {
    /// Run one query and return the decoded reply
    async fn query(&self, query: &WatchQuery) -> WatchResult<WatchResponse>;
}

/// Client that runs `watchman -j` once per query.
///
/// The child is killed when the query future is dropped, so an outer
/// timeout never leaves a stray process behind.
#[derive(Debug, Clone)]
pub struct WatchmanCli {
    binary: PathBuf,
}

impl WatchmanCli {
    /// Client using a specific watchman binary
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for WatchmanCli {
    fn default() -> Self {
        Self::new("watchman")
    }
}

#[async_trait]
impl WatchClient for WatchmanCli {
    async fn query(&self, query: &WatchQuery) -> WatchResult<WatchResponse> {
        let payload = serde_json::to_vec(&query.to_command())?;
        debug!("watchman query for {} since {}", query.root.display(), query.since);

        let mut child = Command::new(&self.binary)
            .args(["-j", "--no-pretty"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                WatchError::Transport(format!("Failed to spawn {}: {e}", self.binary.display()))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WatchError::Transport(format!(
                "watchman exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let response: WatchResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| WatchError::Malformed(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(WatchError::QueryFailed(error));
        }
        if let Some(warning) = &response.warning {
            warn!("watchman: {}", warning);
        }

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::CellQuery;
    use std::path::Path;

    #[tokio::test]
    async fn test_missing_binary_is_transport_error() {
        let client = WatchmanCli::new("/nonexistent/bin/watchman-for-tests");
        let query = CellQuery::new(Path::new("/tmp"), None, &[]).at("c:0:0");

        let err = client.query(&query).await.unwrap_err();
        assert!(matches!(err, WatchError::Transport(_)));
    }
}
