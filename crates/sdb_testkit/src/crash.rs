//! Crash recovery testing for SDB.
//!
//! This module provides utilities for testing crash recovery behavior.
//! It simulates crashes at various points and verifies that the bucket
//! reopens with exactly the writes that reached the WAL.
//!
//! ## Test Strategy
//!
//! 1. **Crash during WAL write** - a torn final frame is discarded
//! 2. **Crash between append and index update** - the frame is recovered by replay
//! 3. **Crash during compaction rewrite** - the partial output is deleted on open
//! 4. **Crash after compaction** - the compacted WAL replays to the same state
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sdb_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::with_temp_dir()?;
//! assert!(harness.test_torn_tail_discarded().passed);
//! ```

use sdb_core::wal::{LogEntry, Wal};
use sdb_core::{CoreError, CoreResult, KeyIndex, Store, TransactionId};
use sdb_storage::{StorageBackend, StorageError, StorageResult};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Points at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Crash part way through writing a frame.
    DuringWalWrite,
    /// Crash after the WAL append, before the index update.
    AfterAppendBeforeIndex,
    /// Crash while compaction output is being written.
    DuringCompaction,
    /// Crash right after the compacted WAL was installed.
    AfterCompaction,
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Where the crash was simulated.
    pub point: CrashPoint,
    /// Whether the test passed.
    pub passed: bool,
    /// Keys expected after recovery.
    pub expected_keys: usize,
    /// Keys found after recovery.
    pub actual_keys: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(point: CrashPoint, keys: usize) -> Self {
        Self {
            point,
            passed: true,
            expected_keys: keys,
            actual_keys: keys,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(point: CrashPoint, expected: usize, actual: usize, error: &str) -> Self {
        Self {
            point,
            passed: false,
            expected_keys: expected,
            actual_keys: actual,
            error: Some(error.to_string()),
        }
    }

    fn check(point: CrashPoint, expected: usize, store: &Store) -> Self {
        let actual = store.len();
        if actual == expected {
            Self::pass(point, expected)
        } else {
            Self::fail(point, expected, actual, "key count differs after recovery")
        }
    }
}

/// A storage backend wrapper that can simulate crashes.
///
/// Once the configured byte budget is exhausted, the write that crosses it
/// is cut short and every later append fails, like a process dying mid-write.
pub struct CrashableBackend {
    inner: Arc<dyn StorageBackend>,
    crash_after_bytes: AtomicUsize,
    bytes_written: AtomicUsize,
    crashed: AtomicBool,
    fail_on_sync: AtomicBool,
}

impl CrashableBackend {
    /// Creates a new crashable backend wrapping an inner backend.
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self {
            inner,
            crash_after_bytes: AtomicUsize::new(usize::MAX),
            bytes_written: AtomicUsize::new(0),
            crashed: AtomicBool::new(false),
            fail_on_sync: AtomicBool::new(false),
        }
    }

    /// Sets the backend to crash after writing the specified number of bytes.
    pub fn crash_after(&self, bytes: usize) {
        self.crash_after_bytes.store(bytes, Ordering::SeqCst);
    }

    /// Sets whether flush and sync should fail.
    pub fn set_fail_on_sync(&self, fail: bool) {
        self.fail_on_sync.store(fail, Ordering::SeqCst);
    }

    /// Returns whether the backend has crashed.
    pub fn has_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    /// Returns the wrapped backend, which holds whatever reached "disk".
    pub fn inner(&self) -> Arc<dyn StorageBackend> {
        Arc::clone(&self.inner)
    }

    fn simulated(&self, what: &str) -> StorageError {
        self.crashed.store(true, Ordering::SeqCst);
        StorageError::Io(io::Error::new(
            io::ErrorKind::Other,
            format!("simulated crash during {what}"),
        ))
    }
}

impl StorageBackend for CrashableBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&self, data: &[u8]) -> StorageResult<u64> {
        if self.has_crashed() {
            return Err(self.simulated("write"));
        }

        let current = self.bytes_written.fetch_add(data.len(), Ordering::SeqCst);
        let threshold = self.crash_after_bytes.load(Ordering::SeqCst);

        if current >= threshold {
            return Err(self.simulated("write"));
        }

        if current + data.len() > threshold {
            let partial_len = threshold - current;
            if partial_len > 0 {
                let _ = self.inner.append(&data[..partial_len]);
            }
            return Err(self.simulated("partial write"));
        }

        self.inner.append(data)
    }

    fn flush(&self) -> StorageResult<()> {
        if self.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.simulated("flush"));
        }
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&self) -> StorageResult<()> {
        if self.fail_on_sync.load(Ordering::SeqCst) {
            return Err(self.simulated("sync"));
        }
        self.inner.sync()
    }

    fn truncate(&self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }
}

/// Cuts `path` down to `len` bytes.
pub fn truncate_file(path: &Path, len: u64) -> io::Result<()> {
    OpenOptions::new().write(true).open(path)?.set_len(len)
}

/// Flips one bit of the byte at `offset` in `path`.
pub fn flip_bit_in_file(path: &Path, offset: u64, bit: u8) -> io::Result<()> {
    let mut bytes = fs::read(path)?;
    let index = usize::try_from(offset).map_err(|_| io::ErrorKind::InvalidInput)?;
    let byte = bytes.get_mut(index).ok_or(io::ErrorKind::UnexpectedEof)?;
    *byte ^= 1 << (bit % 8);
    fs::write(path, bytes)
}

/// Rebuilds an index from whatever `backend` holds.
pub fn recover(backend: Arc<dyn StorageBackend>) -> CoreResult<KeyIndex> {
    let wal = Wal::new(backend, false);
    let rebuild = KeyIndex::rebuild(&wal)?;
    if let Some(tail) = &rebuild.report.discarded {
        wal.truncate(tail.offset)?;
    }
    Ok(rebuild.index)
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    /// Path to the bucket directory.
    pub path: PathBuf,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
    _temp_dir: Option<TempDir>,
}

impl CrashRecoveryHarness {
    /// Creates a harness over an existing directory.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            results: Vec::new(),
            _temp_dir: None,
        }
    }

    /// Creates a harness over a fresh temporary directory.
    pub fn with_temp_dir() -> io::Result<Self> {
        let temp_dir = TempDir::new()?;
        Ok(Self {
            path: temp_dir.path().join("bucket"),
            results: Vec::new(),
            _temp_dir: Some(temp_dir),
        })
    }

    fn wal_path(&self) -> PathBuf {
        self.path.join("wal.log")
    }

    fn open_fresh(&self) -> CoreResult<Store> {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Store::open(&self.path)
    }

    fn reopen(&self) -> CoreResult<Store> {
        Store::open(&self.path)
    }

    fn record(
        &mut self,
        point: CrashPoint,
        expected: usize,
        run: CoreResult<CrashRecoveryResult>,
    ) -> CrashRecoveryResult {
        let result = run.unwrap_or_else(|e: CoreError| {
            CrashRecoveryResult::fail(point, expected, 0, &e.to_string())
        });
        self.results.push(result.clone());
        result
    }

    /// A frame cut off part way is discarded; earlier writes survive.
    pub fn test_torn_tail_discarded(&mut self) -> CrashRecoveryResult {
        let point = CrashPoint::DuringWalWrite;
        let run = (|| -> CoreResult<CrashRecoveryResult> {
            let store = self.open_fresh()?;
            for i in 0..10u8 {
                store.set(&[b'k', i], &[i; 64])?;
            }
            drop(store);

            let len = fs::metadata(self.wal_path())?.len();
            truncate_file(&self.wal_path(), len - 20)?;

            let store = self.reopen()?;
            let torn_key_absent = store.get(&[b'k', 9])?.is_none();
            let mut result = CrashRecoveryResult::check(point, 9, &store);
            if !torn_key_absent {
                result = CrashRecoveryResult::fail(point, 9, store.len(), "torn frame was applied");
            }
            Ok(result)
        })();
        self.record(point, 9, run)
    }

    /// A frame that reached the WAL but not the index is recovered by replay.
    pub fn test_append_before_index(&mut self) -> CrashRecoveryResult {
        let point = CrashPoint::AfterAppendBeforeIndex;
        let run = (|| -> CoreResult<CrashRecoveryResult> {
            let store = self.open_fresh()?;
            store.set(b"a", b"1")?;
            drop(store);

            // Append a frame the way the writer would, then "crash" before
            // any index sees it.
            let backend = sdb_storage::FileBackend::open(&self.wal_path())?;
            let wal = Wal::new(Arc::new(backend), true);
            wal.append(&LogEntry::set(TransactionId::new(2), b"b".to_vec(), b"2".to_vec()))?;
            drop(wal);

            let store = self.reopen()?;
            if store.get(b"b")?.as_deref() != Some(b"2".as_slice()) {
                return Ok(CrashRecoveryResult::fail(point, 2, store.len(), "appended frame lost"));
            }
            Ok(CrashRecoveryResult::check(point, 2, &store))
        })();
        self.record(point, 2, run)
    }

    /// A partial compaction output is removed and the old WAL stays in use.
    pub fn test_crash_during_compaction(&mut self) -> CrashRecoveryResult {
        let point = CrashPoint::DuringCompaction;
        let run = (|| -> CoreResult<CrashRecoveryResult> {
            let store = self.open_fresh()?;
            for i in 0..5u8 {
                store.set(b"x", &[i])?;
                store.set(&[i], b"v")?;
            }
            drop(store);

            fs::write(self.path.join("wal.log.compact"), [0xAB; 37])?;

            let store = self.reopen()?;
            if self.path.join("wal.log.compact").exists() {
                return Ok(CrashRecoveryResult::fail(point, 6, store.len(), "stray output kept"));
            }
            if store.get(b"x")?.as_deref() != Some([4u8].as_slice()) {
                return Ok(CrashRecoveryResult::fail(point, 6, store.len(), "wrong value for x"));
            }
            Ok(CrashRecoveryResult::check(point, 6, &store))
        })();
        self.record(point, 6, run)
    }

    /// The compacted WAL replays to the state it was compacted from.
    pub fn test_crash_after_compaction(&mut self) -> CrashRecoveryResult {
        let point = CrashPoint::AfterCompaction;
        let run = (|| -> CoreResult<CrashRecoveryResult> {
            let store = self.open_fresh()?;
            for i in 0..20u8 {
                store.set(&[i % 4], &[i; 16])?;
            }
            store.remove(&[0])?;
            store.compact()?;
            drop(store);

            let store = self.reopen()?;
            if store.get(&[3])?.as_deref() != Some([19u8; 16].as_slice()) {
                return Ok(CrashRecoveryResult::fail(point, 3, store.len(), "latest version lost"));
            }
            Ok(CrashRecoveryResult::check(point, 3, &store))
        })();
        self.record(point, 3, run)
    }

    /// Runs every scenario.
    pub fn run_all(&mut self) -> &[CrashRecoveryResult] {
        self.test_torn_tail_discarded();
        self.test_append_before_index();
        self.test_crash_during_compaction();
        self.test_crash_after_compaction();
        &self.results
    }
}
