//! Several transports consulted in order
//!
//! The usual stack is a local directory in front of a shared remote cache.
//! Fetches try each layer in turn and copy a hit back into the writable
//! layers in front of it, so the next fetch stays local. Stores go to every
//! writable layer.

use super::CacheTransport;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Whether a layer accepts writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    /// Fetch only
    ReadOnly,
    /// Fetch and store
    #[default]
    ReadWrite,
}

impl CacheMode {
    /// Whether stores reach this layer
    #[must_use]
    pub fn is_writable(self) -> bool {
        self == Self::ReadWrite
    }
}

/// One transport in a [`LayeredTransport`]
#[derive(Clone)]
pub struct CacheLayer {
    /// Underlying transport
    pub transport: Arc<dyn CacheTransport>,
    /// Access mode
    pub mode: CacheMode,
}

impl CacheLayer {
    /// Layer over `transport`
    pub fn new(transport: Arc<dyn CacheTransport>, mode: CacheMode) -> Self {
        Self { transport, mode }
    }
}

/// Ordered stack of transports, nearest first
pub struct LayeredTransport {
    layers: Vec<CacheLayer>,
}

impl LayeredTransport {
    /// Stack `layers`, nearest first
    #[must_use]
    pub fn new(layers: Vec<CacheLayer>) -> Self {
        Self { layers }
    }

    /// Layers, nearest first
    #[must_use]
    pub fn layers(&self) -> &[CacheLayer] {
        &self.layers
    }

    /// Copy a hit from layer `found` into the writable layers before it;
    /// copy failures are logged and ignored
    async fn backfill(&self, found: usize, key: &str, bytes: &[u8]) {
        for layer in self.layers[..found].iter().filter(|l| l.mode.is_writable()) {
            match layer.transport.store(key, bytes.to_vec()).await {
                Ok(()) => debug!("copied {} into {}", key, layer.transport.describe()),
                Err(e) => warn!(
                    "cannot copy {} into {}: {}",
                    key,
                    layer.transport.describe(),
                    e
                ),
            }
        }
    }
}

#[async_trait]
impl CacheTransport for LayeredTransport {
    async fn store(&self, key: &str, bytes: Vec<u8>) -> CacheResult<()> {
        let mut first_error: Option<CacheError> = None;
        for layer in self.layers.iter().filter(|l| l.mode.is_writable()) {
            if let Err(e) = layer.transport.store(key, bytes.clone()).await {
                warn!("store {} into {} failed: {}", key, layer.transport.describe(), e);
                let _ = first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn fetch(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut first_error: Option<CacheError> = None;
        for (index, layer) in self.layers.iter().enumerate() {
            match layer.transport.fetch(key).await {
                Ok(Some(bytes)) => {
                    self.backfill(index, key, &bytes).await;
                    return Ok(Some(bytes));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("fetch {} from {} failed: {}", key, layer.transport.describe(), e);
                    let _ = first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(None), Err)
    }

    async fn contains(&self, key: &str) -> CacheResult<bool> {
        let mut first_error: Option<CacheError> = None;
        for layer in &self.layers {
            match layer.transport.contains(key).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => {
                    let _ = first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(false), Err)
    }

    fn describe(&self) -> String {
        let layers: Vec<String> = self
            .layers
            .iter()
            .map(|layer| match layer.mode {
                CacheMode::ReadWrite => layer.transport.describe(),
                CacheMode::ReadOnly => format!("{} (read-only)", layer.transport.describe()),
            })
            .collect();
        format!("layered[{}]", layers.join(", "))
    }
}
