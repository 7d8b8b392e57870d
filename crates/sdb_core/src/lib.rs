//! # SDB Core
//!
//! Embedded key-value bucket engine for SDB.
//!
//! This crate provides:
//! - A framed, checksummed write-ahead log (WAL) that is the single source of truth
//! - An in-memory key index rebuilt by replaying the WAL on open
//! - Online compaction into "snapshot + tail" form
//! - The [`Store`] facade tying them together behind `get`/`set`/`remove`/`iterate`
//!
//! ```rust,ignore
//! use sdb_core::Store;
//! use std::path::Path;
//!
//! let store = Store::open(Path::new("bucket"))?;
//! store.set(b"a", b"1")?;
//! store.remove(b"a")?;
//! store.compact()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compaction;
mod config;
mod dir;
mod error;
mod index;
mod stats;
mod store;
mod types;
pub mod wal;

pub use compaction::{BackgroundCompactor, CancelToken, CompactionResult};
pub use config::{CompactionConfig, Config};
pub use dir::BucketDir;
pub use error::{CoreError, CoreResult};
pub use index::{DiscardedTail, IndexEntry, KeyIndex, Rebuild, RecoveryReport};
pub use stats::StoreStats;
pub use store::Store;
pub use types::TransactionId;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
