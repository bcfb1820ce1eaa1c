//! Content fingerprints for Bitzel
//!
//! A [`FingerprintCache`] hashes files, symlinks and directories below one
//! root and keeps the results until a change event invalidates them.
//! Directory hashes are derived from their children, so invalidating a file
//! also drops every ancestor directory entry up to the root.
//!
//! Several caches partition a workspace (sources vs. build outputs); a
//! [`StackedFingerprintCache`] routes each path to the one cache that covers
//! it.
//!
//! # Example
//!
//! ```no_run
//! use convenient_fingerprint::FingerprintCache;
//!
//! let cache = FingerprintCache::new("/repo");
//! let hash = cache.get("src/main.rs")?;
//! println!("{hash}");
//! cache.invalidate("src/main.rs");
//! # Ok::<(), convenient_fingerprint::FingerprintError>(())
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

pub mod archive;
pub mod cache;
pub mod error;
pub mod hash;
pub mod stacked;

pub use archive::{ArchiveHashMode, HASH_MANIFEST_NAME};
pub use cache::{Coverage, FingerprintCache, FingerprintConfig};
pub use error::{FingerprintError, FingerprintResult};
pub use hash::{FingerprintEntry, HashCode, PathKind};
pub use stacked::StackedFingerprintCache;
