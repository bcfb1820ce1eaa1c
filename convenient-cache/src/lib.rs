//! Two-level artifact store for Bitzel
//!
//! Build outputs are archived (tar + zstd) together with an
//! [`ArtifactMetadata`] blob and stored once under a content key. Every rule
//! key that should resolve to the archive gets a small pointer record
//! (`RuleKey → SecondLevelContentKey`), so registering the same outputs under
//! a default key and an input-based key does not store the bytes twice.
//!
//! The store talks to a [`CacheTransport`]: a sharded local directory, an
//! HTTP remote cache, or an in-memory map. Transports stack: a
//! [`LayeredTransport`] puts the local directory in front of a remote wrapped
//! in a [`RetryingTransport`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use convenient_cache::{ArtifactMetadata, ArtifactStore, DirTransport, FetchResult, RuleKey, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = ArtifactStore::new(Arc::new(DirTransport::new(".bitzel/cache")), StoreConfig::default());
//!     let key = RuleKey::of_bytes(b"//app:main");
//!
//!     let metadata = ArtifactMetadata::new("//app:main", vec![key]);
//!     store.store(&[key], "/repo".as_ref(), &["out/main".into()], metadata).await?;
//!
//!     if let FetchResult::Hit(artifact) = store.fetch(&key).await {
//!         artifact.materialize("/repo".as_ref())?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

pub mod archive;
pub mod atomic;
pub mod content_key;
pub mod error;
pub mod rule_key;
pub mod store;
pub mod transport;

pub use atomic::atomic_write;
pub use archive::{Artifact, ArtifactEntry, ArtifactMetadata, METADATA_ENTRY_NAME, clear_outputs};
pub use content_key::{ContentKeyType, SecondLevelContentKey};
pub use error::{CacheError, CacheResult};
pub use rule_key::RuleKey;
pub use store::{ArtifactStore, FetchResult, StoreConfig, StoreOutcome, StoreStats};
pub use transport::{
    CacheLayer, CacheMode, CacheTransport, DirTransport, HttpTransport, LayeredTransport,
    MemoryTransport, RetryPolicy, RetryingTransport,
};
