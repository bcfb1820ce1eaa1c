//! Retrying wrapper around another transport
//!
//! Fetches and lookups that fail with a transient error are repeated with
//! exponential backoff. Misses are answers, not failures, and are returned
//! as-is. Stores go straight through.

use super::CacheTransport;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How often and how patiently to retry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts per call, the first one included
    pub max_attempts: u32,
    /// Wait before the second attempt
    pub initial_backoff: Duration,
    /// Upper bound on any single wait
    pub max_backoff: Duration,
    /// Growth factor between waits
    pub backoff_multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(2),
            backoff_multiplier: 2,
        }
    }
}

impl RetryPolicy {
    /// Single attempt
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Policy with `max_attempts` attempts and default backoff
    #[must_use]
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Whether `error` may go away on its own
    #[must_use]
    pub fn should_retry(&self, error: &CacheError) -> bool {
        matches!(
            error,
            CacheError::Http(_)
                | CacheError::ServerError(_)
                | CacheError::Timeout { .. }
                | CacheError::Io(_)
        )
    }

    /// Wait after failed attempt number `attempt` (1-based)
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Transport that repeats failed fetches and lookups on `inner`
pub struct RetryingTransport {
    inner: Arc<dyn CacheTransport>,
    policy: RetryPolicy,
}

impl RetryingTransport {
    /// Wrap `inner`
    pub fn new(inner: Arc<dyn CacheTransport>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    /// Retry policy
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn attempt<T, F, Fut>(&self, operation: &str, key: &str, mut call: F) -> CacheResult<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = CacheResult<T>> + Send,
        T: Send,
    {
        let max = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{} {} succeeded on attempt {}/{}", operation, key, attempt, max);
                    }
                    return Ok(value);
                }
                Err(e) if attempt < max && self.policy.should_retry(&e) => {
                    let backoff = self.policy.backoff(attempt);
                    debug!(
                        "{} {} failed on attempt {}/{}, retrying in {:?}: {}",
                        operation, key, attempt, max, backoff, e
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        "{} {} over {} failed after {} attempts: {}",
                        operation,
                        key,
                        self.inner.describe(),
                        attempt,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl CacheTransport for RetryingTransport {
    async fn store(&self, key: &str, bytes: Vec<u8>) -> CacheResult<()> {
        self.inner.store(key, bytes).await
    }

    async fn fetch(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.attempt("fetch", key, || self.inner.fetch(key)).await
    }

    async fn contains(&self, key: &str) -> CacheResult<bool> {
        self.attempt("contains", key, || self.inner.contains(key)).await
    }

    fn describe(&self) -> String {
        format!(
            "{} (up to {} attempts)",
            self.inner.describe(),
            self.policy.max_attempts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` fetches, then answers from a map
    struct Flaky {
        inner: MemoryTransport,
        failures: AtomicU32,
        error: fn() -> CacheError,
    }

    impl Flaky {
        fn new(failures: u32, error: fn() -> CacheError) -> Self {
            Self {
                inner: MemoryTransport::new(),
                failures: AtomicU32::new(failures),
                error,
            }
        }

        fn fail_once_more(&self) -> bool {
            self.failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl CacheTransport for Flaky {
        async fn store(&self, key: &str, bytes: Vec<u8>) -> CacheResult<()> {
            self.inner.store(key, bytes).await
        }

        async fn fetch(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
            if self.fail_once_more() {
                return Err((self.error)());
            }
            self.inner.fetch(key).await
        }

        async fn contains(&self, key: &str) -> CacheResult<bool> {
            if self.fail_once_more() {
                return Err((self.error)());
            }
            self.inner.contains(key).await
        }

        fn describe(&self) -> String {
            "flaky".to_string()
        }
    }

    fn unavailable() -> CacheError {
        CacheError::ServerError("503".to_string())
    }

    #[test]
    fn test_backoff_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_only_transient_errors_are_retried() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(&unavailable()));
        assert!(policy.should_retry(&CacheError::Timeout {
            operation: "fetch",
            after: Duration::from_secs(1),
        }));
        assert!(!policy.should_retry(&CacheError::InvalidUrl("x".to_string())));
        assert!(!policy.should_retry(&CacheError::Corrupt("x".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let flaky = Arc::new(Flaky::new(2, unavailable));
        flaky.inner.insert_raw("rulekey/aa", b"cache/bb:1".to_vec());
        let transport = RetryingTransport::new(flaky.clone(), RetryPolicy::with_attempts(3));

        let fetched = transport.fetch("rulekey/aa").await.unwrap();

        assert_eq!(fetched, Some(b"cache/bb:1".to_vec()));
        assert_eq!(flaky.inner.fetch_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let flaky = Arc::new(Flaky::new(5, unavailable));
        let transport = RetryingTransport::new(flaky.clone(), RetryPolicy::with_attempts(3));

        let err = transport.contains("rulekey/aa").await.unwrap_err();

        assert!(matches!(err, CacheError::ServerError(_)));
        assert_eq!(flaky.failures.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let flaky = Arc::new(Flaky::new(5, || CacheError::InvalidKey("bad".to_string())));
        let transport = RetryingTransport::new(flaky.clone(), RetryPolicy::with_attempts(3));

        assert!(transport.fetch("rulekey/aa").await.is_err());
        assert_eq!(flaky.failures.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_miss_is_not_retried() {
        let memory = Arc::new(MemoryTransport::new());
        let transport = RetryingTransport::new(memory.clone(), RetryPolicy::with_attempts(5));

        assert_eq!(transport.fetch("rulekey/absent").await.unwrap(), None);
        assert_eq!(memory.fetch_calls(), 1);
    }
}
