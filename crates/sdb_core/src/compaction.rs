//! WAL compaction.
//!
//! Compaction rewrites the WAL into "snapshot + tail" form: one `Set` frame
//! per live key, followed by every frame appended while the rewrite ran.
//! Superseded frames and tombstones are dropped.
//!
//! ## Phases
//!
//! 1. **Snapshot**: copy the live index entries and the WAL end offset.
//! 2. **Rewrite**: write `wal.log.compact` from the snapshot, re-reading each
//!    value from the old WAL, and sync it. Writers are not blocked.
//! 3. **Swap**: under the writer lock and the index write lock, copy the tail,
//!    sync, rename over `wal.log`, and point the index at the new file.
//!
//! Readers that captured a handle on the old file keep reading it until they
//! drop the handle.
//!
//! ## Invariants
//!
//! - Compaction **MUST NOT** change logical state
//! - Surviving frames keep their original transaction ID
//! - Snapshot frames are written in ascending transaction order
//! - Until the rename, the old WAL stays authoritative

use crate::config::CompactionConfig;
use crate::dir::BucketDir;
use crate::error::{CoreError, CoreResult};
use crate::index::{IndexEntry, KeyIndex};
use crate::store::Store;
use crate::types::TransactionId;
use crate::wal::{encode_frame, Wal};
use parking_lot::{Mutex, RwLock};
use sdb_storage::{FileBackend, StorageBackend};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Tail bytes are copied into the new file in chunks of this size.
const TAIL_COPY_CHUNK: u64 = 1024 * 1024; // 1 MiB

/// Cooperative cancellation flag for a compaction pass.
///
/// Cancelling is checked between frames of the rewrite and once more before
/// the swap. A cancelled pass returns [`CoreError::CompactionCancelled`] and
/// leaves the bucket as it was.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn check(&self) -> CoreResult<()> {
        if self.is_cancelled() {
            return Err(CoreError::CompactionCancelled);
        }
        Ok(())
    }
}

/// Result of a compaction pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// Set frames written for the snapshot.
    pub live_records: usize,
    /// Bytes appended during the rewrite and carried over verbatim.
    pub tail_bytes: u64,
    /// WAL size just before the swap.
    pub bytes_before: u64,
    /// WAL size just after the swap.
    pub bytes_after: u64,
    /// Tombstones removed from the index.
    pub tombstones_dropped: usize,
}

impl CompactionResult {
    /// Bytes reclaimed by the pass.
    #[must_use]
    pub fn bytes_saved(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// Point-in-time copy of the index taken at the start of a pass.
struct Snapshot {
    /// Live entries sorted by transaction ID.
    entries: Vec<(Vec<u8>, IndexEntry)>,
    /// WAL size when the copy was taken; every indexed frame lies below it.
    end: u64,
}

/// One compaction pass over a store's parts.
///
/// The caller must hold the store's compaction mutex.
pub(crate) struct Compactor<'a> {
    pub dir: &'a BucketDir,
    pub wal: &'a Wal,
    pub index: &'a RwLock<KeyIndex>,
    pub writer: &'a Mutex<TransactionId>,
}

impl Compactor<'_> {
    /// Runs snapshot, rewrite, and swap.
    ///
    /// On any failure before the rename, the temporary file is deleted and
    /// the old WAL remains in use.
    pub(crate) fn run(&self, cancel: &CancelToken) -> CoreResult<CompactionResult> {
        let snapshot = self.snapshot()?;
        let temp_path = self.dir.compact_temp_path();

        debug!(
            live_keys = snapshot.entries.len(),
            snapshot_end = snapshot.end,
            "compaction started"
        );

        let result = self
            .rewrite(&snapshot, cancel)
            .and_then(|(temp, offsets)| self.swap(&snapshot, temp, &offsets, cancel));

        if result.is_err() {
            match fs::remove_file(&temp_path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    path = %temp_path.display(),
                    error = %e,
                    "failed to remove compaction output"
                ),
            }
        }
        result
    }

    fn snapshot(&self) -> CoreResult<Snapshot> {
        // The writer lock keeps the end offset in step with the index: no
        // frame can be appended but not yet indexed while we copy.
        let _writer = self.writer.lock();
        let index = self.index.read();
        let mut entries = index.live_entries();
        entries.sort_by_key(|(_, e)| e.tx);
        Ok(Snapshot {
            entries,
            end: self.wal.size()?,
        })
    }

    /// Writes the snapshot frames to the temporary file and syncs it.
    ///
    /// Returns the new backend and each key's new `(offset, len)`.
    fn rewrite(
        &self,
        snapshot: &Snapshot,
        cancel: &CancelToken,
    ) -> CoreResult<(FileBackend, HashMap<Vec<u8>, (u64, u32)>)> {
        cancel.check()?;
        let reader = self.wal.reader();
        let temp = FileBackend::create_new(&self.dir.compact_temp_path())?;
        let mut offsets = HashMap::with_capacity(snapshot.entries.len());
        let mut buf = Vec::new();

        for (key, entry) in &snapshot.entries {
            cancel.check()?;
            let frame = reader.read_frame_sized(entry.offset, entry.len)?;
            encode_frame(&frame.entry, &mut buf)?;
            let offset = temp.append(&buf)?;
            offsets.insert(key.clone(), (offset, frame.len));
        }

        temp.flush()?;
        temp.sync()?;
        Ok((temp, offsets))
    }

    fn swap(
        &self,
        snapshot: &Snapshot,
        temp: FileBackend,
        offsets: &HashMap<Vec<u8>, (u64, u32)>,
        cancel: &CancelToken,
    ) -> CoreResult<CompactionResult> {
        let _writer = self.writer.lock();
        let mut index = self.index.write();

        cancel.check()?;
        if self.wal.is_closed() {
            return Err(CoreError::Closed);
        }

        let reader = self.wal.reader();
        let bytes_before = reader.size()?;
        let tail_base = temp.size()?;

        let mut copied = snapshot.end;
        while copied < bytes_before {
            let chunk = (bytes_before - copied).min(TAIL_COPY_CHUNK);
            temp.append(&reader.read_raw(copied, chunk as usize)?)?;
            copied += chunk;
        }
        temp.flush()?;
        temp.sync()?;
        let bytes_after = temp.size()?;

        self.dir.install_compacted()?;

        // The rename has happened: from here on the new file is the WAL. The
        // open handle follows the file to its new name.
        drop(self.wal.replace_backend(Arc::new(temp)));

        let mut tombstones_dropped = 0;
        index.remap(|key, entry| {
            if entry.offset >= snapshot.end {
                return Some(IndexEntry {
                    offset: entry.offset - snapshot.end + tail_base,
                    ..*entry
                });
            }
            if entry.tombstoned {
                tombstones_dropped += 1;
                return None;
            }
            let (offset, len) = offsets.get(key).copied()?;
            Some(IndexEntry {
                offset,
                len,
                ..*entry
            })
        });

        self.dir.sync_directory()?;

        Ok(CompactionResult {
            live_records: snapshot.entries.len(),
            tail_bytes: bytes_before - snapshot.end,
            bytes_before,
            bytes_after,
            tombstones_dropped,
        })
    }
}

/// Periodically compacts a store on a background thread.
///
/// Every `interval` the thread evaluates the [`CompactionConfig`] against the
/// store's current sizes and runs a pass when it is due. Failures are logged
/// and the thread keeps ticking. The thread stops on [`Self::shutdown`], on
/// drop, or once the store is closed.
#[derive(Debug)]
pub struct BackgroundCompactor {
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    cancel: CancelToken,
}

impl BackgroundCompactor {
    /// Starts the compaction thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn(store: Arc<Store>, config: CompactionConfig) -> CoreResult<Self> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let cancel = CancelToken::new();
        let thread_cancel = cancel.clone();

        let handle = thread::Builder::new()
            .name("sdb-compactor".into())
            .spawn(move || run_loop(&store, &config, &shutdown_rx, &thread_cancel))?;

        Ok(Self {
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            cancel,
        })
    }

    /// Stops the thread, cancelling any pass in flight, and waits for it.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("compaction thread panicked");
            }
        }
    }
}

impl Drop for BackgroundCompactor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    store: &Store,
    config: &CompactionConfig,
    shutdown_rx: &mpsc::Receiver<()>,
    cancel: &CancelToken,
) {
    let mut run_id = 0u64;

    loop {
        match shutdown_rx.recv_timeout(config.interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }

        run_id += 1;
        match tick(store, config, cancel) {
            Ok(Some(result)) => info!(
                run_id,
                live_records = result.live_records,
                bytes_before = result.bytes_before,
                bytes_after = result.bytes_after,
                "background compaction finished"
            ),
            Ok(None) => debug!(run_id, "compaction not due"),
            Err(CoreError::Closed | CoreError::CompactionCancelled) => break,
            Err(CoreError::CompactionInProgress) => {
                debug!(run_id, "compaction already running, skipping tick");
            }
            Err(e) => error!(run_id, error = %e, "background compaction failed"),
        }
    }

    info!("compaction thread shutting down");
}

fn tick(
    store: &Store,
    config: &CompactionConfig,
    cancel: &CancelToken,
) -> CoreResult<Option<CompactionResult>> {
    let stats = store.stats()?;
    if !config.is_due(stats.wal_bytes, stats.live_bytes) {
        return Ok(None);
    }
    store.compact_with(cancel).map(Some)
}
