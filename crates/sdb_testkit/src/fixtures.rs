//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test buckets in temporary
//! directories and for turning on log output in tests.

use sdb_core::{Config, Store};
use std::path::{Path, PathBuf};
use std::sync::Once;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a `tracing` subscriber that writes through the test harness.
///
/// Honors `RUST_LOG`; defaults to `warn`. Safe to call from every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// A store in a temporary directory that is removed on drop.
pub struct TestStore {
    store: Option<Store>,
    config: Config,
    /// Kept alive to prevent cleanup.
    temp_dir: TempDir,
}

impl TestStore {
    /// Opens a store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Opens a store with `config`.
    pub fn with_config(config: Config) -> Self {
        init_tracing();
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let store = Store::open_with_config(temp_dir.path(), config.clone())
            .expect("Failed to open store");
        Self {
            store: Some(store),
            config,
            temp_dir,
        }
    }

    /// Opens a store with fsync-per-write disabled, for faster tests.
    pub fn unsynced() -> Self {
        Self::with_config(Config::new().sync_on_write(false))
    }

    /// Returns the bucket directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Returns the WAL file path.
    pub fn wal_path(&self) -> PathBuf {
        self.temp_dir.path().join("wal.log")
    }

    /// Closes the store, leaving the bucket on disk.
    pub fn close(&mut self) {
        if let Some(store) = self.store.take() {
            store.close().expect("Failed to close store");
        }
    }

    /// Runs `f` while the store is closed, then opens it again.
    ///
    /// Use this to damage or inspect the WAL between runs.
    pub fn while_closed<F: FnOnce(&Path)>(&mut self, f: F) {
        self.close();
        f(self.temp_dir.path());
        self.open();
    }

    /// Closes and reopens the store, forcing a full replay.
    pub fn reopen(&mut self) {
        self.while_closed(|_| {});
    }

    fn open(&mut self) {
        let store = Store::open_with_config(self.temp_dir.path(), self.config.clone())
            .expect("Failed to reopen store");
        self.store = Some(store);
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        self.store.as_ref().expect("store is closed")
    }
}

/// Runs a test with a temporary store.
///
/// # Example
///
/// ```rust,ignore
/// use sdb_testkit::with_temp_store;
///
/// #[test]
/// fn my_test() {
///     with_temp_store(|store| {
///         store.set(b"k", b"v").unwrap();
///     });
/// }
/// ```
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&Store) -> R,
{
    let test_store = TestStore::new();
    f(&test_store)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// Creates a store holding `count` keys `key-0000..` with small values.
    pub fn populated_store(count: usize) -> TestStore {
        let store = TestStore::unsynced();
        for i in 0..count {
            store
                .set(format!("key-{i:04}").as_bytes(), format!("value-{i}").as_bytes())
                .expect("Failed to set key");
        }
        store
    }

    /// Creates a store where every key has been overwritten `versions` times.
    ///
    /// Most of the WAL is garbage, so compaction has work to do.
    pub fn churned_store(keys: usize, versions: usize) -> TestStore {
        let store = TestStore::unsynced();
        for v in 0..versions {
            for k in 0..keys {
                store
                    .set(format!("key-{k:04}").as_bytes(), format!("v{v}").as_bytes())
                    .expect("Failed to set key");
            }
        }
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_reopen() {
        let mut store = TestStore::new();
        store.set(b"a", b"1").unwrap();
        store.reopen();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_with_temp_store() {
        let len = with_temp_store(|store| {
            store.set(b"k", b"v").unwrap();
            store.len()
        });
        assert_eq!(len, 1);
    }

    #[test]
    fn test_populated_scenario() {
        let store = scenarios::populated_store(10);
        assert_eq!(store.len(), 10);
        assert_eq!(
            store.get(b"key-0003").unwrap(),
            Some(b"value-3".to_vec())
        );
    }

    #[test]
    fn test_churned_scenario() {
        let store = scenarios::churned_store(5, 4);
        assert_eq!(store.len(), 5);
        assert_eq!(store.get(b"key-0000").unwrap(), Some(b"v3".to_vec()));
    }
}
