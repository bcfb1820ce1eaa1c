//! In-memory transport with call counters

use super::CacheTransport;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Map-backed transport that counts calls and can simulate failures
#[derive(Debug, Default)]
pub struct MemoryTransport {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    store_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    contains_calls: AtomicUsize,
    failing: AtomicBool,
    delay: Option<Duration>,
}

impl MemoryTransport {
    /// Empty transport
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every call, to exercise timeouts
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make every call fail with a server error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `store` calls so far
    #[must_use]
    pub fn store_calls(&self) -> usize {
        self.store_calls.load(Ordering::SeqCst)
    }

    /// Number of `fetch` calls so far
    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of `contains` calls so far
    #[must_use]
    pub fn contains_calls(&self) -> usize {
        self.contains_calls.load(Ordering::SeqCst)
    }

    /// Stored keys, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.blobs().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Overwrite a value directly, bypassing the counters
    pub fn insert_raw(&self, key: &str, bytes: Vec<u8>) {
        let _ = self.blobs().insert(key.to_string(), bytes);
    }

    fn blobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, counter: &AtomicUsize) -> CacheResult<()> {
        let _ = counter.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::ServerError("memory transport failing".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheTransport for MemoryTransport {
    async fn store(&self, key: &str, bytes: Vec<u8>) -> CacheResult<()> {
        self.enter(&self.store_calls).await?;
        let _ = self.blobs().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn fetch(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.enter(&self.fetch_calls).await?;
        Ok(self.blobs().get(key).cloned())
    }

    async fn contains(&self, key: &str) -> CacheResult<bool> {
        self.enter(&self.contains_calls).await?;
        Ok(self.blobs().contains_key(key))
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
