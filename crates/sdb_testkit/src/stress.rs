//! Stress tests for SDB.
//!
//! These tests verify behavior under heavy load and concurrent access,
//! including readers and writers running while compaction swaps the WAL.

use sdb_core::{CoreError, Store};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Size of each value in bytes.
    pub value_size: usize,
    /// Number of distinct keys.
    pub key_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 10_000,
            threads: 4,
            value_size: 256,
            key_count: 1_000,
        }
    }
}

fn stress_key(i: usize) -> Vec<u8> {
    format!("stress-{i:06}").into_bytes()
}

/// Writes one value for each of `config.key_count` keys.
pub fn populate(store: &Store, config: &StressConfig) {
    let value = vec![0xABu8; config.value_size];
    for i in 0..config.key_count {
        let _ = store.set(&stress_key(i), &value);
    }
}

/// Run a sequential write stress test.
pub fn stress_sequential_writes(store: &Store, config: &StressConfig) -> StressTestResult {
    let value = vec![0xABu8; config.value_size];

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        match store.set(&stress_key(i % config.key_count), &value) {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a mixed set/get/remove stress test.
pub fn stress_mixed_operations(store: &Store, config: &StressConfig) -> StressTestResult {
    let value = vec![0xABu8; config.value_size];

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = stress_key(i % config.key_count);
        let result = match i % 3 {
            0 => store.set(&key, &value),
            1 => store.get(&key).map(|_| ()),
            _ => store.remove(&key),
        };

        match result {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Run a concurrent read stress test over a populated store.
pub fn stress_concurrent_reads(store: Arc<Store>, config: &StressConfig) -> StressTestResult {
    populate(&store, config);

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let store = Arc::clone(&store);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let key_count = config.key_count;

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let key = stress_key((t * ops_per_thread + i) % key_count);
                    match store.get(&key) {
                        Ok(Some(_)) => successful.fetch_add(1, Ordering::Relaxed),
                        _ => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run concurrent writers, each owning a disjoint key range.
pub fn stress_concurrent_writes(store: Arc<Store>, config: &StressConfig) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let ops_per_thread = config.operations / config.threads;
    let keys_per_thread = (config.key_count / config.threads).max(1);

    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|t| {
            let store = Arc::clone(&store);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let value = vec![t as u8; config.value_size];

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let key = stress_key(t * keys_per_thread + i % keys_per_thread);
                    match store.set(&key, &value) {
                        Ok(()) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Run readers and writers while another thread compacts in a loop.
///
/// Every key is seeded first, and writers only overwrite, so a read that
/// returns `None` or an error counts as a failure. The result counts reads
/// and writes; compaction passes are not included.
pub fn stress_reads_during_compaction(store: Arc<Store>, config: &StressConfig) -> StressTestResult {
    populate(&store, config);

    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let done = Arc::new(AtomicBool::new(false));
    let ops_per_thread = config.operations / config.threads;

    let start = Instant::now();

    let compactor = {
        let store = Arc::clone(&store);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut passes = 0usize;
            loop {
                match store.compact() {
                    Ok(_) => passes += 1,
                    Err(CoreError::CompactionInProgress) => {}
                    Err(e) => panic!("compaction failed under load: {e}"),
                }
                if done.load(Ordering::Acquire) {
                    break passes;
                }
            }
        })
    };

    let workers: Vec<_> = (0..config.threads)
        .map(|t| {
            let store = Arc::clone(&store);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let key_count = config.key_count;
            let value = vec![0xCDu8; config.value_size];

            thread::spawn(move || {
                for i in 0..ops_per_thread {
                    let key = stress_key((t * 7919 + i) % key_count);
                    let ok = if i % 4 == 0 {
                        store.set(&key, &value).is_ok()
                    } else {
                        matches!(store.get(&key), Ok(Some(_)))
                    };
                    if ok {
                        successful.fetch_add(1, Ordering::Relaxed);
                    } else {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("Thread panicked");
    }
    done.store(true, Ordering::Release);
    compactor.join().expect("Compactor panicked");

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestStore;
    use sdb_core::{Config, Store};
    use tempfile::TempDir;

    fn small_config() -> StressConfig {
        StressConfig {
            operations: 400,
            threads: 4,
            value_size: 64,
            key_count: 50,
        }
    }

    fn shared_store() -> (TempDir, Arc<Store>) {
        crate::fixtures::init_tracing();
        let dir = TempDir::new().unwrap();
        let store =
            Store::open_with_config(dir.path(), Config::new().sync_on_write(false)).unwrap();
        (dir, Arc::new(store))
    }

    #[test]
    fn test_sequential_writes() {
        let store = TestStore::unsynced();
        let config = small_config();
        let result = stress_sequential_writes(&store, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.successful_ops, config.operations);
        assert_eq!(store.len(), config.key_count);
    }

    #[test]
    fn test_mixed_operations() {
        let store = TestStore::unsynced();
        let result = stress_mixed_operations(&store, &small_config());
        assert_eq!(result.failed_ops, 0);
    }

    #[test]
    fn test_concurrent_reads() {
        let (_dir, store) = shared_store();
        let result = stress_concurrent_reads(store, &small_config());
        assert_eq!(result.failed_ops, 0);
    }

    #[test]
    fn test_concurrent_writes() {
        let (_dir, store) = shared_store();
        let config = small_config();
        let result = stress_concurrent_writes(Arc::clone(&store), &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(store.len(), config.key_count / config.threads * config.threads);
    }

    #[test]
    fn test_reads_during_compaction() {
        let (_dir, store) = shared_store();
        let config = small_config();
        let result = stress_reads_during_compaction(Arc::clone(&store), &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(store.len(), config.key_count);
        assert!(store.stats().unwrap().compactions >= 1);
    }
}
