//! Benchmark utilities shared by the SDB bench targets.

use rand::Rng;
use sdb_core::{Config, Store};
use tempfile::TempDir;

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::thread_rng();
    (0..size).map(|_| rng.gen()).collect()
}

/// Key `i` of a benchmark data set. Fixed width, so keys sort numerically.
pub fn bench_key(i: usize) -> Vec<u8> {
    format!("bench-{i:08}").into_bytes()
}

/// A store in a temporary directory, kept alive alongside the directory.
pub struct BenchStore {
    /// The open store.
    pub store: Store,
    _dir: TempDir,
}

impl BenchStore {
    /// Opens an empty store. Benchmarks default to no fsync per write.
    pub fn new() -> Self {
        Self::with_config(Config::new().sync_on_write(false))
    }

    /// Opens an empty store with `config`.
    pub fn with_config(config: Config) -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let store = Store::open_with_config(dir.path(), config).expect("Failed to open store");
        Self { store, _dir: dir }
    }

    /// Opens a store holding `count` keys with random values of `value_size` bytes.
    pub fn populated(count: usize, value_size: usize) -> Self {
        let bench = Self::new();
        for i in 0..count {
            bench
                .store
                .set(&bench_key(i), &random_data(value_size))
                .expect("Failed to populate store");
        }
        bench
    }

    /// Overwrites every key `versions` more times, leaving that much garbage in the WAL.
    pub fn churn(&self, count: usize, versions: usize, value_size: usize) {
        for _ in 0..versions {
            for i in 0..count {
                self.store
                    .set(&bench_key(i), &random_data(value_size))
                    .expect("Failed to churn store");
            }
        }
    }
}

impl Default for BenchStore {
    fn default() -> Self {
        Self::new()
    }
}
