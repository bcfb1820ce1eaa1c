//! File change feed for Bitzel
//!
//! Polls a server-side watch service (Watchman's JSON protocol) for every
//! watched cell, converts the reply into path and overflow events, and
//! publishes one merged [`ChangeBatch`] per poll cycle.
//!
//! The feed never reports "nothing changed" when it could not find out:
//! timeouts, transport failures, malformed replies, oversized file lists and
//! fresh service instances all turn into an [`OverflowEvent`] for the cell,
//! which subscribers treat as "everything under this cell changed".
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use convenient_watch::{CellWatch, ChangeFeed, FeedConfig, WatchmanCli};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = Arc::new(WatchmanCli::default());
//!     let feed = ChangeFeed::new(client, vec![CellWatch::new("/repo")], FeedConfig::default());
//!
//!     let report = feed.poll_once().await;
//!     println!("{} events, changed: {}", report.batch.len(), report.files_changed);
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

pub mod client;
pub mod cursor;
pub mod error;
pub mod event;
pub mod feed;
pub mod query;

pub use client::{WatchClient, WatchmanCli};
pub use cursor::{Cursor, NULL_CLOCK};
pub use error::{WatchError, WatchResult};
pub use event::{ChangeBatch, ChangeKind, FileType, OverflowEvent, PathEvent, WatchEvent};
pub use feed::{
    CellPhase, CellWatch, ChangeFeed, ChangeSubscriber, FeedConfig, FreshInstanceAction,
    PollReport,
};
pub use query::{CellQuery, IgnorePattern, WatchQuery, WatchResponse};
