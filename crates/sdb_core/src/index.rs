//! In-memory key index.
//!
//! Maps each key to the location of its most recent frame in the WAL. The
//! index is a cache: it is never persisted and is always derivable by
//! replaying the WAL from offset 0.
//!
//! ## Invariants
//!
//! - Replay applies frames in append order, so the last frame for a key wins
//! - Entries are installed only for frames already written to the WAL
//! - Tombstoned entries are kept until compaction and report "not found"

use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use crate::wal::{Frame, LogEntry, Wal};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Location and state of a key's latest frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Offset of the frame in the WAL.
    pub offset: u64,
    /// Total frame length.
    pub len: u32,
    /// Transaction that wrote the frame.
    pub tx: TransactionId,
    /// Whether the frame is a `Remove`.
    pub tombstoned: bool,
}

impl IndexEntry {
    /// Builds the index entry for a decoded frame.
    #[must_use]
    pub fn for_frame(frame: &Frame) -> Self {
        Self {
            offset: frame.offset,
            len: frame.len,
            tx: frame.entry.tx(),
            tombstoned: matches!(frame.entry, LogEntry::Remove { .. }),
        }
    }
}

/// Hash map from key to [`IndexEntry`] with running totals.
#[derive(Debug, Default, Clone)]
pub struct KeyIndex {
    entries: HashMap<Vec<u8>, IndexEntry>,
    /// Sum of frame lengths of live (non-tombstoned) entries.
    live_bytes: u64,
    tombstones: usize,
}

/// A log tail dropped during rebuild because it was torn or corrupt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscardedTail {
    /// Offset of the first bad frame.
    pub offset: u64,
    /// Bytes from `offset` to the end of the log.
    pub len: u64,
    /// Why the bytes were rejected.
    pub reason: String,
}

/// What replay found when the index was rebuilt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Number of frames replayed.
    pub frames: u64,
    /// Offset just past the last valid frame.
    pub end_offset: u64,
    /// Trailing bytes that must be cut off before appending.
    pub discarded: Option<DiscardedTail>,
}

/// Outcome of [`KeyIndex::rebuild`].
#[derive(Debug)]
pub struct Rebuild {
    /// The rebuilt index.
    pub index: KeyIndex,
    /// Highest transaction ID seen, if any frame was replayed.
    pub max_tx: Option<TransactionId>,
    /// Replay summary.
    pub report: RecoveryReport,
}

impl KeyIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replays `wal` from offset 0 and builds the index.
    ///
    /// A torn or corrupt frame ends replay. It is reported in
    /// [`RecoveryReport::discarded`] only when it is the final frame, meaning
    /// no valid frame starts anywhere after it; the index then reflects the
    /// consistent prefix before it.
    ///
    /// # Errors
    ///
    /// Returns the replay error when a valid frame follows the damaged one,
    /// or for I/O failures.
    pub fn rebuild(wal: &Wal) -> CoreResult<Rebuild> {
        let size = wal.size()?;
        let mut index = Self::new();
        let mut max_tx: Option<TransactionId> = None;
        let mut frames = 0u64;

        let result = wal.replay_from(0, |frame| {
            max_tx = max_tx.max(Some(frame.entry.tx()));
            frames += 1;
            index.apply(frame);
            Ok(true)
        });

        let (end_offset, discarded) = match result {
            Ok(end) => (end, None),
            Err(err) => {
                let Some((offset, reason)) = damaged_frame(&err) else {
                    return Err(err);
                };
                if let Some(next) = wal.reader().next_valid_frame(offset)? {
                    warn!(
                        offset,
                        next_valid = next,
                        "damaged frame is followed by valid frames; refusing to truncate"
                    );
                    return Err(err);
                }
                (
                    offset,
                    Some(DiscardedTail {
                        offset,
                        len: size - offset,
                        reason,
                    }),
                )
            }
        };

        debug!(
            frames,
            end_offset,
            live_keys = index.len(),
            tombstones = index.tombstones(),
            "index rebuilt from WAL"
        );

        Ok(Rebuild {
            index,
            max_tx,
            report: RecoveryReport {
                frames,
                end_offset,
                discarded,
            },
        })
    }

    /// Applies one replayed frame.
    pub fn apply(&mut self, frame: Frame) {
        let entry = IndexEntry::for_frame(&frame);
        let key = match frame.entry {
            LogEntry::Set { key, .. } | LogEntry::Remove { key, .. } => key,
        };
        if entry.tombstoned {
            self.delete(key, entry);
        } else {
            self.put(key, entry);
        }
    }

    /// Looks up a live key.
    ///
    /// Returns `None` for absent and tombstoned keys.
    #[must_use]
    pub fn lookup(&self, key: &[u8]) -> Option<IndexEntry> {
        self.entries.get(key).copied().filter(|e| !e.tombstoned)
    }

    /// Records a `Set` frame for `key`.
    pub fn put(&mut self, key: Vec<u8>, entry: IndexEntry) {
        debug_assert!(!entry.tombstoned);
        self.live_bytes += u64::from(entry.len);
        if let Some(previous) = self.entries.insert(key, entry) {
            self.forget(previous);
        }
    }

    /// Records a `Remove` frame for `key`.
    pub fn delete(&mut self, key: Vec<u8>, entry: IndexEntry) {
        let entry = IndexEntry {
            tombstoned: true,
            ..entry
        };
        self.tombstones += 1;
        if let Some(previous) = self.entries.insert(key, entry) {
            self.forget(previous);
        }
    }

    fn forget(&mut self, previous: IndexEntry) {
        if previous.tombstoned {
            self.tombstones -= 1;
        } else {
            self.live_bytes -= u64::from(previous.len);
        }
    }

    /// Iterates live keys in unspecified order.
    pub fn keys(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.entries
            .iter()
            .filter(|(_, e)| !e.tombstoned)
            .map(|(k, _)| k.as_slice())
    }

    /// Copies out all live `(key, entry)` pairs.
    #[must_use]
    pub fn live_entries(&self) -> Vec<(Vec<u8>, IndexEntry)> {
        self.entries
            .iter()
            .filter(|(_, e)| !e.tombstoned)
            .map(|(k, e)| (k.clone(), *e))
            .collect()
    }

    /// Rewrites every entry through `f`, dropping those for which it
    /// returns `None`. Totals are recomputed.
    pub(crate) fn remap<F>(&mut self, mut f: F)
    where
        F: FnMut(&[u8], &IndexEntry) -> Option<IndexEntry>,
    {
        let old = std::mem::take(&mut self.entries);
        self.live_bytes = 0;
        self.tombstones = 0;
        self.entries.reserve(old.len());

        for (key, entry) in old {
            if let Some(new_entry) = f(&key, &entry) {
                if new_entry.tombstoned {
                    self.tombstones += 1;
                } else {
                    self.live_bytes += u64::from(new_entry.len);
                }
                self.entries.insert(key, new_entry);
            }
        }
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len() - self.tombstones
    }

    /// Returns `true` if no key is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tombstoned keys awaiting compaction.
    #[must_use]
    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// Bytes of WAL still referenced by live keys.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }
}

/// Offset and description of the frame a replay error points at, if the
/// error is one a damaged frame produces.
fn damaged_frame(err: &CoreError) -> Option<(u64, String)> {
    match err {
        CoreError::TruncatedRecord {
            offset,
            needed,
            available,
        } => Some((
            *offset,
            format!("torn frame: needed {needed} bytes, {available} available"),
        )),
        CoreError::CorruptFrame { offset, reason, .. } => Some((*offset, reason.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::FRAME_HEADER_SIZE;
    use sdb_storage::{InMemoryBackend, StorageBackend};
    use std::sync::Arc;

    fn entry(offset: u64, len: u32, tx: u64) -> IndexEntry {
        IndexEntry {
            offset,
            len,
            tx: TransactionId::new(tx),
            tombstoned: false,
        }
    }

    fn wal_with(entries: &[LogEntry]) -> (Wal, Arc<InMemoryBackend>) {
        let backend = Arc::new(InMemoryBackend::new());
        let wal = Wal::new(backend.clone(), false);
        for e in entries {
            wal.append(e).unwrap();
        }
        (wal, backend)
    }

    fn set(tx: u64, key: &str, val: &str) -> LogEntry {
        LogEntry::set(TransactionId::new(tx), key, val)
    }

    fn remove(tx: u64, key: &str) -> LogEntry {
        LogEntry::remove(TransactionId::new(tx), key)
    }

    #[test]
    fn put_and_lookup() {
        let mut index = KeyIndex::new();
        index.put(b"a".to_vec(), entry(0, 20, 1));

        assert_eq!(index.lookup(b"a"), Some(entry(0, 20, 1)));
        assert_eq!(index.lookup(b"b"), None);
        assert_eq!(index.len(), 1);
        assert_eq!(index.live_bytes(), 20);
    }

    #[test]
    fn overwrite_adjusts_totals() {
        let mut index = KeyIndex::new();
        index.put(b"a".to_vec(), entry(0, 20, 1));
        index.put(b"a".to_vec(), entry(20, 30, 2));

        assert_eq!(index.len(), 1);
        assert_eq!(index.live_bytes(), 30);
        assert_eq!(index.lookup(b"a").unwrap().offset, 20);
    }

    #[test]
    fn delete_tombstones_key() {
        let mut index = KeyIndex::new();
        index.put(b"a".to_vec(), entry(0, 20, 1));
        index.delete(b"a".to_vec(), entry(20, 12, 2));

        assert_eq!(index.lookup(b"a"), None);
        assert_eq!(index.len(), 0);
        assert!(index.is_empty());
        assert_eq!(index.tombstones(), 1);
        assert_eq!(index.live_bytes(), 0);

        index.put(b"a".to_vec(), entry(32, 20, 3));
        assert_eq!(index.tombstones(), 0);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn keys_skip_tombstones() {
        let mut index = KeyIndex::new();
        index.put(b"a".to_vec(), entry(0, 10, 1));
        index.put(b"b".to_vec(), entry(10, 10, 2));
        index.delete(b"b".to_vec(), entry(20, 10, 3));

        let keys: Vec<_> = index.keys().collect();
        assert_eq!(keys, vec![b"a".as_slice()]);
        assert_eq!(index.live_entries().len(), 1);
    }

    #[test]
    fn remap_recomputes_totals() {
        let mut index = KeyIndex::new();
        index.put(b"a".to_vec(), entry(0, 10, 1));
        index.put(b"b".to_vec(), entry(10, 10, 2));
        index.delete(b"c".to_vec(), entry(20, 10, 3));

        index.remap(|key, e| {
            if e.tombstoned {
                None
            } else if key == b"a" {
                Some(IndexEntry { offset: 100, ..*e })
            } else {
                Some(IndexEntry { len: 40, ..*e })
            }
        });

        assert_eq!(index.tombstones(), 0);
        assert_eq!(index.len(), 2);
        assert_eq!(index.live_bytes(), 50);
        assert_eq!(index.lookup(b"a").unwrap().offset, 100);
    }

    #[test]
    fn rebuild_last_write_wins() {
        let (wal, _) = wal_with(&[
            set(1, "a", "1"),
            set(2, "b", "2"),
            set(3, "a", "3"),
            remove(4, "b"),
        ]);

        let rebuild = KeyIndex::rebuild(&wal).unwrap();
        let index = rebuild.index;

        assert!(rebuild.report.discarded.is_none());
        assert_eq!(rebuild.report.frames, 4);
        assert_eq!(rebuild.max_tx, Some(TransactionId::new(4)));
        assert_eq!(rebuild.report.end_offset, wal.size().unwrap());

        let a = index.lookup(b"a").unwrap();
        assert_eq!(wal.read_at(a.offset).unwrap(), set(3, "a", "3"));
        assert_eq!(index.lookup(b"b"), None);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn rebuild_empty_wal() {
        let (wal, _) = wal_with(&[]);
        let rebuild = KeyIndex::rebuild(&wal).unwrap();
        assert!(rebuild.index.is_empty());
        assert_eq!(rebuild.max_tx, None);
        assert_eq!(rebuild.report.end_offset, 0);
    }

    #[test]
    fn rebuild_discards_torn_tail() {
        let (wal, backend) = wal_with(&[set(1, "a", "1")]);
        let second = wal.append(&set(2, "b", "2")).unwrap();
        backend.truncate(backend.size().unwrap() - 2).unwrap();

        let rebuild = KeyIndex::rebuild(&wal).unwrap();
        let discarded = rebuild.report.discarded.unwrap();
        assert_eq!(discarded.offset, second);
        assert_eq!(discarded.len, backend.size().unwrap() - second);
        assert_eq!(rebuild.report.end_offset, second);
        assert!(rebuild.index.lookup(b"a").is_some());
        assert!(rebuild.index.lookup(b"b").is_none());
    }

    #[test]
    fn rebuild_discards_corrupt_final_frame() {
        let (wal, backend) = wal_with(&[set(1, "a", "1")]);
        let last = wal.append(&set(2, "b", "2")).unwrap();
        let size = backend.size().unwrap();
        backend.flip_bit(size - 1, 0);

        let rebuild = KeyIndex::rebuild(&wal).unwrap();
        let discarded = rebuild.report.discarded.unwrap();
        assert_eq!(discarded.offset, last);
        assert!(discarded.reason.contains("checksum"));
        assert_eq!(rebuild.index.len(), 1);
    }

    #[test]
    fn rebuild_fails_on_mid_log_corruption() {
        let (wal, backend) = wal_with(&[set(1, "a", "1"), set(2, "b", "2")]);
        // Last byte of the first frame's payload.
        let first_len = u64::from(crate::wal::frame_len(&set(1, "a", "1")).unwrap());
        backend.flip_bit(first_len - 1, 4);

        let err = KeyIndex::rebuild(&wal).unwrap_err();
        assert!(matches!(err, CoreError::CorruptFrame { offset: 0, .. }));
    }

    fn ten_frames() -> (Wal, Arc<InMemoryBackend>, Vec<u64>) {
        let backend = Arc::new(InMemoryBackend::new());
        let wal = Wal::new(backend.clone(), false);
        let offsets = (1..=10)
            .map(|i| wal.append(&set(i, &format!("key-{i}"), "value")).unwrap())
            .collect();
        (wal, backend, offsets)
    }

    #[test]
    fn rebuild_refuses_oversized_length_at_log_start() {
        let (wal, backend, _) = ten_frames();
        let size = backend.size().unwrap();
        // High bit of the first frame's payload length.
        backend.flip_bit(7, 7);

        let err = KeyIndex::rebuild(&wal).unwrap_err();
        assert!(matches!(err, CoreError::TruncatedRecord { offset: 0, .. }));
        assert_eq!(backend.size().unwrap(), size);
    }

    #[test]
    fn every_mid_log_header_bit_flip_fails_rebuild() {
        for byte in 0..FRAME_HEADER_SIZE as u64 {
            for bit in 0..8 {
                let (wal, backend, offsets) = ten_frames();
                backend.flip_bit(offsets[4] + byte, bit);

                let err = KeyIndex::rebuild(&wal).unwrap_err();
                assert!(
                    err.is_corruption(),
                    "header byte {byte} bit {bit}: unexpected {err:?}"
                );
            }
        }
    }

    #[test]
    fn rebuild_discards_final_frame_with_damaged_length() {
        let (wal, backend, offsets) = ten_frames();
        backend.flip_bit(offsets[9] + 6, 3);

        let rebuild = KeyIndex::rebuild(&wal).unwrap();
        assert_eq!(rebuild.report.discarded.unwrap().offset, offsets[9]);
        assert_eq!(rebuild.index.len(), 9);
    }

    #[test]
    fn rebuild_discards_zero_filled_tail() {
        let (wal, backend, _) = ten_frames();
        let end = backend.size().unwrap();
        backend.append(&[0u8; 64]).unwrap();

        let rebuild = KeyIndex::rebuild(&wal).unwrap();
        let discarded = rebuild.report.discarded.unwrap();
        assert_eq!(discarded.offset, end);
        assert_eq!(discarded.len, 64);
        assert_eq!(rebuild.index.len(), 10);
    }

    #[test]
    fn next_valid_frame_finds_following_frame() {
        let (wal, _, offsets) = ten_frames();
        let reader = wal.reader();
        assert_eq!(reader.next_valid_frame(offsets[2]).unwrap(), Some(offsets[3]));
        assert_eq!(reader.next_valid_frame(offsets[9]).unwrap(), None);
    }
}
