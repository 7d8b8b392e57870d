//! Store facade and recovery.

use crate::compaction::{CancelToken, CompactionResult, Compactor};
use crate::config::Config;
use crate::dir::BucketDir;
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexEntry, KeyIndex, Rebuild, RecoveryReport};
use crate::stats::{StoreMetrics, StoreStats};
use crate::types::TransactionId;
use crate::wal::{frame_len, LogEntry, Wal, WalReader};
use parking_lot::{Mutex, RwLock};
use sdb_storage::{FileBackend, StorageError};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A durable key-value bucket.
///
/// `Store` is the entry point for reading and writing one bucket. Every
/// mutation is appended to the WAL and only then applied to the in-memory
/// index, so a lookup never returns data that is not in the log.
///
/// # Opening a Store
///
/// ```rust,ignore
/// use sdb_core::Store;
/// use std::path::Path;
///
/// let store = Store::open(Path::new("my_bucket"))?;
/// store.set(b"a", b"1")?;
/// assert_eq!(store.get(b"a")?, Some(b"1".to_vec()));
/// store.close()?;
/// ```
///
/// # Concurrency
///
/// `Store` is `Send + Sync`; share it with `Arc<Store>`. Writes are
/// serialized by one writer lock. Reads copy the key's location under a
/// short read lock and then read the WAL without holding any lock.
pub struct Store {
    config: Config,
    /// Bucket directory (holds the lock).
    dir: BucketDir,
    wal: Wal,
    index: RwLock<KeyIndex>,
    /// Next transaction ID. Held across append and index update so the
    /// index applies frames in append order.
    writer: Mutex<TransactionId>,
    /// Held for the duration of a compaction pass.
    compaction: Mutex<()>,
    metrics: StoreMetrics,
    recovery: RecoveryReport,
}

impl Store {
    /// Opens a bucket with the default configuration.
    ///
    /// # Errors
    ///
    /// See [`Self::open_with_config`].
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a bucket, replaying its WAL to rebuild the index.
    ///
    /// The method:
    /// - Creates the directory if it doesn't exist (unless `create_if_missing` is false)
    /// - Acquires an exclusive lock on the bucket
    /// - Deletes output left by an interrupted compaction
    /// - Replays the WAL; a torn or corrupt final frame, one with no valid
    ///   frame anywhere after it, is truncated away and recorded in
    ///   [`Self::recovery_report`]
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory or WAL cannot be opened ([`CoreError::Open`])
    /// - Another handle holds the bucket ([`CoreError::Locked`])
    /// - A damaged frame is followed by valid frames ([`CoreError::CorruptFrame`]
    ///   or [`CoreError::TruncatedRecord`]); the WAL is left untouched
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = BucketDir::open(path, config.create_if_missing)?;
        dir.remove_stray_temp()?;

        let wal_path = dir.wal_path();
        let backend = FileBackend::open(&wal_path).map_err(|e| match e {
            StorageError::Io(source) => CoreError::open(&wal_path, source),
            other => other.into(),
        })?;
        let wal = Wal::new(Arc::new(backend), config.sync_on_write);

        let Rebuild {
            index,
            max_tx,
            report,
        } = KeyIndex::rebuild(&wal)?;

        if let Some(tail) = &report.discarded {
            warn!(
                path = %wal_path.display(),
                offset = tail.offset,
                len = tail.len,
                reason = %tail.reason,
                "discarding damaged WAL tail"
            );
            wal.truncate(tail.offset)?;
            wal.sync()?;
        }

        let next_tx = max_tx.map_or(TransactionId::new(1), TransactionId::next);

        info!(
            path = %path.display(),
            keys = index.len(),
            frames = report.frames,
            wal_bytes = report.end_offset,
            next_tx = %next_tx,
            "store opened"
        );

        Ok(Self {
            config,
            dir,
            wal,
            index: RwLock::new(index),
            writer: Mutex::new(next_tx),
            compaction: Mutex::new(()),
            metrics: StoreMetrics::new(),
            recovery: report,
        })
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.wal.is_closed() {
            return Err(CoreError::Closed);
        }
        Ok(())
    }

    /// Copies a key's location and a reader for the file it lives in.
    ///
    /// Both are taken under the same index read lock, so a concurrent
    /// compaction swap cannot pair an old offset with the new file.
    fn locate(&self, key: &[u8]) -> Option<(IndexEntry, WalReader)> {
        let index = self.index.read();
        let entry = index.lookup(key)?;
        Some((entry, self.wal.reader()))
    }

    /// Reads the value for a located key.
    fn read_value(reader: &WalReader, key: &[u8], entry: IndexEntry) -> CoreResult<Vec<u8>> {
        let frame = reader.read_frame_sized(entry.offset, entry.len)?;
        if frame.entry.key() != key {
            return Err(CoreError::corrupt_frame(
                entry.offset,
                u64::from(entry.len),
                "frame key does not match index",
            ));
        }
        frame.entry.into_value().ok_or_else(|| {
            CoreError::corrupt_frame(
                entry.offset,
                u64::from(entry.len),
                "index points at a remove frame",
            )
        })
    }

    /// Returns the value for `key`, or `None` if it is absent or removed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Closed`] after [`Self::close`], or an error if
    /// the frame cannot be read or fails its checksum.
    pub fn get(&self, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        self.metrics.record_get();

        match self.locate(key) {
            Some((entry, reader)) => Self::read_value(&reader, key, entry).map(Some),
            None => Ok(None),
        }
    }

    /// Returns whether `key` has a live value. Does not touch the WAL.
    pub fn contains(&self, key: &[u8]) -> CoreResult<bool> {
        self.ensure_open()?;
        self.metrics.record_get();
        Ok(self.index.read().lookup(key).is_some())
    }

    /// Stores `val` under `key`.
    ///
    /// Empty keys and empty values are allowed. An empty value is distinct
    /// from a removed key.
    ///
    /// # Errors
    ///
    /// Returns an error if the WAL append or sync fails; the index is left
    /// unchanged in that case.
    pub fn set(&self, key: &[u8], val: &[u8]) -> CoreResult<()> {
        self.ensure_open()?;
        let mut next_tx = self.writer.lock();
        let tx = *next_tx;

        let entry = LogEntry::set(tx, key, val);
        let len = frame_len(&entry)?;
        let offset = self.wal.append(&entry)?;
        *next_tx = tx.next();

        self.index.write().put(
            key.to_vec(),
            IndexEntry {
                offset,
                len,
                tx,
                tombstoned: false,
            },
        );
        self.metrics.record_set(u64::from(len));
        Ok(())
    }

    /// Removes `key`.
    ///
    /// Removing an absent key is not an error; a `Remove` frame is still
    /// appended.
    pub fn remove(&self, key: &[u8]) -> CoreResult<()> {
        self.ensure_open()?;
        let mut next_tx = self.writer.lock();
        let tx = *next_tx;

        let entry = LogEntry::remove(tx, key);
        let len = frame_len(&entry)?;
        let offset = self.wal.append(&entry)?;
        *next_tx = tx.next();

        self.index.write().delete(
            key.to_vec(),
            IndexEntry {
                offset,
                len,
                tx,
                tombstoned: true,
            },
        );
        self.metrics.record_remove(u64::from(len));
        Ok(())
    }

    /// Calls `visit` for every live key in ascending key order.
    ///
    /// The set of keys is fixed when the call starts; values are read one at
    /// a time as the visit proceeds. `visit` returns `Ok(false)` to stop.
    ///
    /// # Errors
    ///
    /// Returns the first read error or the first error from `visit`.
    pub fn iterate<F>(&self, mut visit: F) -> CoreResult<()>
    where
        F: FnMut(&[u8], &[u8]) -> CoreResult<bool>,
    {
        self.ensure_open()?;
        let (mut entries, reader) = {
            let index = self.index.read();
            (index.live_entries(), self.wal.reader())
        };
        entries.sort_unstable_by(|a, b| a.0.cmp(&b.0));

        for (key, entry) in entries {
            let value = Self::read_value(&reader, &key, entry)?;
            if !visit(&key, &value)? {
                break;
            }
        }
        Ok(())
    }

    /// Returns all live keys in ascending order.
    pub fn keys(&self) -> CoreResult<Vec<Vec<u8>>> {
        self.ensure_open()?;
        let mut keys: Vec<Vec<u8>> = self.index.read().keys().map(<[u8]>::to_vec).collect();
        keys.sort_unstable();
        Ok(keys)
    }

    /// Returns the number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Returns `true` if the bucket holds no live keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flushes and fsyncs the WAL.
    ///
    /// With `sync_on_write` disabled, this is the durability boundary for
    /// all writes made so far.
    pub fn sync(&self) -> CoreResult<()> {
        self.ensure_open()?;
        self.wal.sync()?;
        self.metrics.record_sync();
        Ok(())
    }

    /// Runs a compaction pass.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CompactionInProgress`] if another pass is running.
    pub fn compact(&self) -> CoreResult<CompactionResult> {
        self.compact_with(&CancelToken::new())
    }

    /// Runs a compaction pass that can be cancelled through `cancel`.
    ///
    /// A cancelled pass returns [`CoreError::CompactionCancelled`] and leaves
    /// the bucket unchanged.
    pub fn compact_with(&self, cancel: &CancelToken) -> CoreResult<CompactionResult> {
        self.ensure_open()?;
        let _guard = self
            .compaction
            .try_lock()
            .ok_or(CoreError::CompactionInProgress)?;

        let compactor = Compactor {
            dir: &self.dir,
            wal: &self.wal,
            index: &self.index,
            writer: &self.writer,
        };

        match compactor.run(cancel) {
            Ok(result) => {
                self.metrics.record_compaction();
                info!(
                    live_records = result.live_records,
                    tail_bytes = result.tail_bytes,
                    bytes_before = result.bytes_before,
                    bytes_after = result.bytes_after,
                    tombstones_dropped = result.tombstones_dropped,
                    "compaction finished"
                );
                Ok(result)
            }
            Err(CoreError::CompactionCancelled) => {
                debug!("compaction cancelled");
                Err(CoreError::CompactionCancelled)
            }
            Err(e) => {
                warn!(error = %e, "compaction failed, keeping existing WAL");
                Err(e)
            }
        }
    }

    /// Returns whether the configured compaction policy says a pass is due.
    pub fn should_compact(&self) -> CoreResult<bool> {
        let stats = self.stats()?;
        Ok(self
            .config
            .compaction
            .is_due(stats.wal_bytes, stats.live_bytes))
    }

    /// Returns counters and current sizes.
    pub fn stats(&self) -> CoreResult<StoreStats> {
        self.ensure_open()?;
        let index = self.index.read();
        Ok(StoreStats {
            wal_bytes: self.wal.size()?,
            live_bytes: index.live_bytes(),
            live_keys: index.len() as u64,
            tombstones: index.tombstones() as u64,
            ..self.metrics.snapshot()
        })
    }

    /// Returns what replay found when the store was opened.
    #[must_use]
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Returns the bucket directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Returns the configuration the store was opened with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Syncs and closes the WAL.
    ///
    /// Every later operation returns [`CoreError::Closed`]. Calling `close`
    /// again is a no-op. The bucket lock is released when the `Store` is
    /// dropped.
    pub fn close(&self) -> CoreResult<()> {
        let _writer = self.writer.lock();
        if self.wal.is_closed() {
            return Ok(());
        }
        self.wal.close()?;
        info!(path = %self.dir.path().display(), "store closed");
        Ok(())
    }

    /// Returns whether [`Self::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.wal.is_closed()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "failed to close store on drop");
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.dir.path())
            .field("keys", &self.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::FRAME_HEADER_SIZE;
    use std::collections::BTreeMap;
    use std::fs::{self, OpenOptions};
    use std::thread;
    use tempfile::{tempdir, TempDir};

    fn open_temp() -> (TempDir, Store) {
        let temp = tempdir().unwrap();
        let store = Store::open(temp.path()).unwrap();
        (temp, store)
    }

    fn collect(store: &Store) -> BTreeMap<Vec<u8>, Vec<u8>> {
        let mut out = BTreeMap::new();
        store
            .iterate(|k, v| {
                out.insert(k.to_vec(), v.to_vec());
                Ok(true)
            })
            .unwrap();
        out
    }

    #[test]
    fn set_get_remove_scenario() {
        let (_temp, store) = open_temp();
        store.set(b"a", b"1").unwrap();
        store.set(b"b", b"2").unwrap();
        store.set(b"a", b"3").unwrap();
        store.remove(b"b").unwrap();

        assert_eq!(store.get(b"a").unwrap(), Some(b"3".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), None);
        assert_eq!(
            collect(&store),
            BTreeMap::from([(b"a".to_vec(), b"3".to_vec())])
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn empty_value_is_not_removal() {
        let (_temp, store) = open_temp();
        store.set(b"k", b"").unwrap();
        store.set(b"", b"empty key").unwrap();

        assert_eq!(store.get(b"k").unwrap(), Some(Vec::new()));
        assert!(store.contains(b"k").unwrap());
        assert_eq!(store.get(b"").unwrap(), Some(b"empty key".to_vec()));
    }

    #[test]
    fn remove_absent_key_appends_frame() {
        let (_temp, store) = open_temp();
        let before = store.stats().unwrap().wal_bytes;

        store.remove(b"never-set").unwrap();

        let stats = store.stats().unwrap();
        assert!(stats.wal_bytes > before);
        assert_eq!(stats.removes, 1);
        assert!(store.is_empty());
    }

    #[test]
    fn reopen_replays_state() {
        let temp = tempdir().unwrap();
        {
            let store = Store::open(temp.path()).unwrap();
            store.set(b"x", b"1").unwrap();
            store.set(b"y", b"2").unwrap();
            store.remove(b"x").unwrap();
            store.set(b"z", b"3").unwrap();
        }

        let store = Store::open(temp.path()).unwrap();
        assert_eq!(store.get(b"x").unwrap(), None);
        assert_eq!(store.get(b"y").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.keys().unwrap(), vec![b"y".to_vec(), b"z".to_vec()]);
        assert!(store.recovery_report().discarded.is_none());
        assert_eq!(store.recovery_report().frames, 4);
    }

    #[test]
    fn transaction_ids_continue_after_reopen() {
        let temp = tempdir().unwrap();
        {
            let store = Store::open(temp.path()).unwrap();
            store.set(b"a", b"1").unwrap();
            store.set(b"b", b"2").unwrap();
        }

        let store = Store::open(temp.path()).unwrap();
        store.set(b"c", b"3").unwrap();
        let tx = store.index.read().lookup(b"c").unwrap().tx;
        assert_eq!(tx, TransactionId::new(3));
    }

    #[test]
    fn frame_appended_but_not_indexed_is_recovered() {
        let temp = tempdir().unwrap();
        {
            let store = Store::open(temp.path()).unwrap();
            store.set(b"a", b"1").unwrap();
            // Crash between WAL append and index update.
            store
                .wal
                .append(&LogEntry::set(TransactionId::new(2), b"b".to_vec(), b"2".to_vec()))
                .unwrap();
            assert_eq!(store.get(b"b").unwrap(), None);
        }

        let store = Store::open(temp.path()).unwrap();
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let temp = tempdir().unwrap();
        let wal_path = temp.path().join("wal.log");
        {
            let store = Store::open(temp.path()).unwrap();
            store.set(b"a", b"1").unwrap();
            store.set(b"b", b"2").unwrap();
        }
        let good_len = fs::metadata(&wal_path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&wal_path).unwrap();
        file.set_len(good_len - 3).unwrap();
        drop(file);

        let store = Store::open(temp.path()).unwrap();
        let discarded = store.recovery_report().discarded.clone().unwrap();
        assert_eq!(discarded.offset + discarded.len, good_len - 3);
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"b").unwrap(), None);
        assert_eq!(fs::metadata(&wal_path).unwrap().len(), discarded.offset);

        // Appends continue from the truncation point.
        store.set(b"c", b"3").unwrap();
        drop(store);
        let store = Store::open(temp.path()).unwrap();
        assert!(store.recovery_report().discarded.is_none());
        assert_eq!(store.get(b"c").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn mid_log_corruption_fails_open() {
        let temp = tempdir().unwrap();
        let wal_path = temp.path().join("wal.log");
        {
            let store = Store::open(temp.path()).unwrap();
            store.set(b"a", b"first").unwrap();
            store.set(b"b", b"second").unwrap();
        }
        let mut bytes = fs::read(&wal_path).unwrap();
        bytes[FRAME_HEADER_SIZE + 1] ^= 0x01;
        fs::write(&wal_path, &bytes).unwrap();

        let err = Store::open(temp.path()).unwrap_err();
        assert!(matches!(err, CoreError::CorruptFrame { offset: 0, .. }));
    }

    #[test]
    fn damaged_length_field_never_truncates_valid_frames() {
        let temp = tempdir().unwrap();
        let wal_path = temp.path().join("wal.log");
        {
            let store = Store::open(temp.path()).unwrap();
            for i in 0..100u32 {
                store.set(format!("key-{i:03}").as_bytes(), &i.to_le_bytes()).unwrap();
            }
        }
        let mut bytes = fs::read(&wal_path).unwrap();
        let len_before = bytes.len() as u64;
        // High bit of the first frame's payload length.
        bytes[7] ^= 0x80;
        fs::write(&wal_path, &bytes).unwrap();

        let err = Store::open(temp.path()).unwrap_err();
        assert!(matches!(err, CoreError::TruncatedRecord { offset: 0, .. }));
        assert_eq!(fs::metadata(&wal_path).unwrap().len(), len_before);

        // Restoring the bit brings every key back.
        bytes[7] ^= 0x80;
        fs::write(&wal_path, &bytes).unwrap();
        let store = Store::open(temp.path()).unwrap();
        assert_eq!(store.len(), 100);
    }

    #[test]
    fn second_open_is_locked() {
        let (temp, _store) = open_temp();
        assert!(matches!(Store::open(temp.path()), Err(CoreError::Locked)));
    }

    #[test]
    fn open_missing_without_create() {
        let temp = tempdir().unwrap();
        let config = Config::new().create_if_missing(false);
        let err = Store::open_with_config(&temp.path().join("nope"), config).unwrap_err();
        assert!(matches!(err, CoreError::Open { .. }));
    }

    #[test]
    fn operations_after_close_fail() {
        let (_temp, store) = open_temp();
        store.set(b"a", b"1").unwrap();
        store.close().unwrap();
        store.close().unwrap();

        assert!(store.is_closed());
        assert!(matches!(store.get(b"a"), Err(CoreError::Closed)));
        assert!(matches!(store.set(b"a", b"2"), Err(CoreError::Closed)));
        assert!(matches!(store.remove(b"a"), Err(CoreError::Closed)));
        assert!(matches!(store.sync(), Err(CoreError::Closed)));
        assert!(matches!(store.compact(), Err(CoreError::Closed)));
        assert!(matches!(store.iterate(|_, _| Ok(true)), Err(CoreError::Closed)));
    }

    #[test]
    fn iterate_stops_early() {
        let (_temp, store) = open_temp();
        for i in 0..10u8 {
            store.set(&[i], &[i]).unwrap();
        }

        let mut seen = Vec::new();
        store
            .iterate(|k, _| {
                seen.push(k.to_vec());
                Ok(seen.len() < 3)
            })
            .unwrap();
        assert_eq!(seen, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn iterate_propagates_visitor_error() {
        let (_temp, store) = open_temp();
        store.set(b"a", b"1").unwrap();

        let err = store
            .iterate(|_, _| Err(CoreError::invalid_argument("stop")))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
    }

    #[test]
    fn compaction_preserves_state_and_shrinks_wal() {
        let (temp, store) = open_temp();
        for i in 0..100u32 {
            store.set(format!("k{}", i % 10).as_bytes(), &i.to_le_bytes()).unwrap();
        }
        store.remove(b"k3").unwrap();
        let expected = collect(&store);

        let result = store.compact().unwrap();
        assert_eq!(result.live_records, 9);
        assert_eq!(result.tail_bytes, 0);
        assert_eq!(result.tombstones_dropped, 1);
        assert!(result.bytes_after < result.bytes_before);

        assert_eq!(collect(&store), expected);
        let stats = store.stats().unwrap();
        assert_eq!(stats.wal_bytes, result.bytes_after);
        assert_eq!(stats.tombstones, 0);
        assert_eq!(stats.garbage_bytes(), 0);
        assert!(!temp.path().join("wal.log.compact").exists());

        // Writes after compaction land in the new file.
        store.set(b"k3", b"back").unwrap();
        drop(store);
        let store = Store::open(temp.path()).unwrap();
        let mut expected = expected;
        expected.insert(b"k3".to_vec(), b"back".to_vec());
        assert_eq!(collect(&store), expected);
    }

    #[test]
    fn compacted_wal_keeps_tx_order() {
        let (temp, store) = open_temp();
        store.set(b"b", b"1").unwrap();
        store.set(b"a", b"2").unwrap();
        store.set(b"b", b"3").unwrap();
        store.compact().unwrap();
        drop(store);

        let store = Store::open(temp.path()).unwrap();
        let mut txs = Vec::new();
        store
            .wal
            .replay_from(0, |frame| {
                txs.push(frame.entry.tx().as_u64());
                Ok(true)
            })
            .unwrap();
        assert_eq!(txs, vec![2, 3]);
    }

    #[test]
    fn cancelled_compaction_changes_nothing() {
        let (temp, store) = open_temp();
        store.set(b"a", b"1").unwrap();
        store.set(b"a", b"2").unwrap();
        let before = store.stats().unwrap().wal_bytes;

        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            store.compact_with(&cancel),
            Err(CoreError::CompactionCancelled)
        ));

        assert_eq!(store.stats().unwrap().wal_bytes, before);
        assert_eq!(store.get(b"a").unwrap(), Some(b"2".to_vec()));
        assert!(!temp.path().join("wal.log.compact").exists());
    }

    #[test]
    fn stray_compaction_file_removed_on_open() {
        let temp = tempdir().unwrap();
        drop(Store::open(temp.path()).unwrap());
        fs::write(temp.path().join("wal.log.compact"), b"garbage").unwrap();

        let _store = Store::open(temp.path()).unwrap();
        assert!(!temp.path().join("wal.log.compact").exists());
    }

    #[test]
    fn should_compact_follows_policy() {
        let temp = tempdir().unwrap();
        let config = Config::new().compaction(
            crate::config::CompactionConfig::default()
                .min_wal_bytes(64)
                .min_garbage_ratio(0.5),
        );
        let store = Store::open_with_config(temp.path(), config).unwrap();
        assert!(!store.should_compact().unwrap());

        for i in 0..20u32 {
            store.set(b"same", &i.to_le_bytes()).unwrap();
        }
        assert!(store.should_compact().unwrap());

        store.compact().unwrap();
        assert!(!store.should_compact().unwrap());
    }

    #[test]
    fn readers_run_during_compaction() {
        let temp = tempdir().unwrap();
        let store = Arc::new(
            Store::open_with_config(temp.path(), Config::new().sync_on_write(false)).unwrap(),
        );
        for i in 0..200u32 {
            store.set(format!("key{i}").as_bytes(), &i.to_le_bytes()).unwrap();
        }

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for round in 0..50u32 {
                        let i = (round * 7) % 200;
                        let value = store.get(format!("key{i}").as_bytes()).unwrap();
                        assert_eq!(value, Some(i.to_le_bytes().to_vec()));
                    }
                })
            })
            .collect();

        for _ in 0..3 {
            store.compact().unwrap();
        }
        for r in readers {
            r.join().unwrap();
        }
    }

    #[test]
    fn stats_track_operations() {
        let (_temp, store) = open_temp();
        store.set(b"a", b"1").unwrap();
        store.get(b"a").unwrap();
        store.remove(b"a").unwrap();
        store.sync().unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.sets, 1);
        assert_eq!(stats.gets, 1);
        assert_eq!(stats.removes, 1);
        assert_eq!(stats.syncs, 1);
        assert_eq!(stats.live_keys, 0);
        assert_eq!(stats.tombstones, 1);
        assert_eq!(stats.bytes_written, stats.wal_bytes);
    }
}
