//! Store configuration.

use std::time::Duration;

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the bucket directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether to fsync the WAL after every write (safer but slower).
    ///
    /// When disabled, callers batch durability with [`crate::Store::sync`].
    pub sync_on_write: bool,

    /// When and how often compaction should run.
    pub compaction: CompactionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            sync_on_write: true,
            compaction: CompactionConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the bucket directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether to sync the WAL on every write.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the compaction policy.
    #[must_use]
    pub const fn compaction(mut self, value: CompactionConfig) -> Self {
        self.compaction = value;
        self
    }
}

/// Compaction trigger policy.
///
/// Compaction is due when the WAL is at least `min_wal_bytes` long and the
/// share of bytes not backing a live key is at least `min_garbage_ratio`.
/// The background compactor re-evaluates the policy every `interval`.
#[derive(Debug, Clone, Copy)]
pub struct CompactionConfig {
    /// WAL size below which compaction is never due.
    pub min_wal_bytes: u64,
    /// Fraction (0.0..=1.0) of dead bytes required before compacting.
    pub min_garbage_ratio: f64,
    /// Tick interval for [`crate::BackgroundCompactor`].
    pub interval: Duration,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            min_wal_bytes: 1024 * 1024, // 1 MiB
            min_garbage_ratio: 0.5,
            interval: Duration::from_secs(30),
        }
    }
}

impl CompactionConfig {
    /// Sets the minimum WAL size.
    #[must_use]
    pub const fn min_wal_bytes(mut self, bytes: u64) -> Self {
        self.min_wal_bytes = bytes;
        self
    }

    /// Sets the minimum garbage ratio.
    #[must_use]
    pub const fn min_garbage_ratio(mut self, ratio: f64) -> Self {
        self.min_garbage_ratio = ratio;
        self
    }

    /// Sets the background tick interval.
    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Returns whether a WAL of `wal_bytes` with `live_bytes` still in use
    /// should be compacted.
    #[must_use]
    pub fn is_due(&self, wal_bytes: u64, live_bytes: u64) -> bool {
        if wal_bytes == 0 || wal_bytes < self.min_wal_bytes {
            return false;
        }
        let garbage = wal_bytes.saturating_sub(live_bytes) as f64;
        garbage / wal_bytes as f64 >= self.min_garbage_ratio
    }
}
