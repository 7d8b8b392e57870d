//! Store statistics.
//!
//! Operation counters are atomic and can be bumped from any thread without
//! taking the store's locks. [`crate::Store::stats`] combines them with the
//! current index and WAL sizes into a [`StoreStats`] snapshot.
//!
//! ```rust,ignore
//! let store = Store::open(path)?;
//! store.set(b"k", b"v")?;
//!
//! let stats = store.stats()?;
//! println!("sets: {}, wal bytes: {}", stats.sets, stats.wal_bytes);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Running operation counters.
#[derive(Debug, Default)]
pub(crate) struct StoreMetrics {
    gets: AtomicU64,
    sets: AtomicU64,
    removes: AtomicU64,
    bytes_written: AtomicU64,
    syncs: AtomicU64,
    compactions: AtomicU64,
}

impl StoreMetrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_set(&self, frame_bytes: u64) {
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(frame_bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_remove(&self, frame_bytes: u64) {
        self.removes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(frame_bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_sync(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    /// Fills the counter fields of a snapshot; gauges are left at zero.
    pub(crate) fn snapshot(&self) -> StoreStats {
        StoreStats {
            gets: self.gets.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            syncs: self.syncs.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
            ..StoreStats::default()
        }
    }
}

/// A point-in-time view of a store.
///
/// Counters cover the lifetime of the handle; gauges describe the bucket at
/// the moment of the call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreStats {
    /// Number of `get`/`contains` calls.
    pub gets: u64,
    /// Number of successful `set` calls.
    pub sets: u64,
    /// Number of successful `remove` calls.
    pub removes: u64,
    /// Frame bytes appended by this handle.
    pub bytes_written: u64,
    /// Number of explicit syncs.
    pub syncs: u64,
    /// Number of completed compaction passes.
    pub compactions: u64,
    /// Current WAL size in bytes.
    pub wal_bytes: u64,
    /// WAL bytes still referenced by live keys.
    pub live_bytes: u64,
    /// Number of live keys.
    pub live_keys: u64,
    /// Number of tombstoned keys awaiting compaction.
    pub tombstones: u64,
}

impl StoreStats {
    /// WAL bytes not backing any live key.
    #[must_use]
    pub fn garbage_bytes(&self) -> u64 {
        self.wal_bytes.saturating_sub(self.live_bytes)
    }
}
