//! Byte transports behind the artifact store
//!
//! Keys are namespaced strings such as `rulekey/<hex>`,
//! `cache/<hash>:<size>`, `artifact/<hex>` or `manifest/<hex>`.
//!
//! [`RetryingTransport`] and [`LayeredTransport`] wrap other transports, e.g.
//! a local directory stacked in front of a retried remote.

mod dir;
mod http;
mod layered;
mod memory;
mod retry;

pub use dir::DirTransport;
pub use http::HttpTransport;
pub use layered::{CacheLayer, CacheMode, LayeredTransport};
pub use memory::MemoryTransport;
pub use retry::{RetryPolicy, RetryingTransport};

use crate::error::CacheResult;
use async_trait::async_trait;

/// Key/value byte storage
#[async_trait]
pub trait CacheTransport: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous value
    async fn store(&self, key: &str, bytes: Vec<u8>) -> CacheResult<()>;

    /// Bytes under `key`, `None` when absent
    async fn fetch(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Whether `key` is present
    async fn contains(&self, key: &str) -> CacheResult<bool>;

    /// Short description for logs
    fn describe(&self) -> String;
}
