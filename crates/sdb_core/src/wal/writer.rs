//! WAL writer and reader.

use crate::error::{CoreError, CoreResult};
use crate::wal::frame::{decode_payload, encode_frame, Frame, FrameHeader, FRAME_HEADER_SIZE};
use crate::wal::iterator::FrameIterator;
use crate::wal::record::{EntryKind, LogEntry};
use parking_lot::{Mutex, RwLock};
use sdb_storage::StorageBackend;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

/// Encode buffers above this capacity are released after the append.
const MAX_RETAINED_BUFFER: usize = 1024 * 1024;

/// Smallest payload any entry encodes to: kind, tx and key length bytes.
const MIN_PAYLOAD_LEN: u32 = 3;

/// Bytes read per step when scanning for a frame boundary.
const SCAN_CHUNK: u64 = 1024 * 1024;

/// Append-only log of framed entries.
///
/// The `Wal` serializes appends through one mutex that also guards a reusable
/// encode buffer. Reads go through [`WalReader`] handles, which hold their own
/// reference to the backend and never take the append mutex.
pub struct Wal {
    /// Current backing file; replaced wholesale by compaction.
    backend: RwLock<Arc<dyn StorageBackend>>,
    /// Append mutex and reusable encode buffer.
    writer: Mutex<Vec<u8>>,
    /// Whether to fsync after each append.
    sync_on_write: bool,
    closed: AtomicBool,
    /// Set when an append failed and its bytes could not be cut back off.
    failed: AtomicBool,
}

impl Wal {
    /// Creates a WAL over `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>, sync_on_write: bool) -> Self {
        Self {
            backend: RwLock::new(backend),
            writer: Mutex::new(Vec::new()),
            sync_on_write,
            closed: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::Closed);
        }
        Ok(())
    }

    /// Appends an entry to the WAL.
    ///
    /// Returns the offset where the frame begins. Either the whole frame is
    /// handed to the backend or an error is returned.
    ///
    /// When `sync_on_write` is set and the flush or fsync fails, the frame
    /// is cut back off so the failed write cannot reappear on replay. If
    /// that truncation fails too, the WAL refuses further appends.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The WAL is closed
    /// - An earlier failed append could not be rolled back ([`CoreError::WalFailed`])
    /// - The entry is too large for a frame
    /// - I/O errors occur during write or sync
    pub fn append(&self, entry: &LogEntry) -> CoreResult<u64> {
        self.ensure_open()?;

        let mut buf = self.writer.lock();
        if self.failed.load(Ordering::Acquire) {
            return Err(CoreError::WalFailed);
        }
        encode_frame(entry, &mut buf)?;

        let backend = self.backend.read().clone();
        let offset = backend.append(&buf)?;

        if self.sync_on_write {
            if let Err(e) = backend.flush().and_then(|()| backend.sync()) {
                self.roll_back(backend.as_ref(), offset);
                return Err(e.into());
            }
        }

        if buf.capacity() > MAX_RETAINED_BUFFER {
            *buf = Vec::new();
        }

        Ok(offset)
    }

    /// Cuts a frame whose sync failed back off the log.
    fn roll_back(&self, backend: &dyn StorageBackend, offset: u64) {
        match backend.truncate(offset) {
            Ok(()) => warn!(offset, "WAL sync failed; append rolled back"),
            Err(e) => {
                self.failed.store(true, Ordering::Release);
                error!(offset, error = %e, "WAL sync failed and rollback failed; refusing writes");
            }
        }
    }

    /// Reads the entry whose frame starts at `offset`.
    ///
    /// # Errors
    ///
    /// - [`CoreError::CorruptFrame`] on checksum mismatch
    /// - [`CoreError::TruncatedRecord`] if the frame runs past the end of the log
    pub fn read_at(&self, offset: u64) -> CoreResult<LogEntry> {
        self.ensure_open()?;
        Ok(self.reader().read_frame(offset)?.entry)
    }

    /// Decodes frames from `offset` to the end of the log, calling `visit`
    /// for each. `visit` returns `Ok(false)` to stop early.
    ///
    /// Returns the offset just past the last visited frame. Reaching the end
    /// of the log is a clean stop.
    ///
    /// # Errors
    ///
    /// - [`CoreError::TruncatedRecord`] if the final frame is incomplete
    /// - [`CoreError::CorruptFrame`] at the first frame failing its checksum
    /// - Any error returned by `visit`
    pub fn replay_from<F>(&self, offset: u64, mut visit: F) -> CoreResult<u64>
    where
        F: FnMut(Frame) -> CoreResult<bool>,
    {
        self.ensure_open()?;
        let reader = self.reader();
        let mut iter = reader.iter_from(offset)?;

        for frame in iter.by_ref() {
            let frame = frame?;
            let end = frame.end();
            if !visit(frame)? {
                return Ok(end);
            }
        }

        Ok(iter.position())
    }

    /// Flushes and fsyncs the log.
    ///
    /// This is the durability boundary: appends made before a successful
    /// `sync` survive a crash.
    pub fn sync(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let backend = self.reader();
        backend.backend.flush()?;
        backend.backend.sync()?;
        Ok(())
    }

    /// Returns the current log size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.read().size()?)
    }

    /// Returns whether appends fsync immediately.
    #[must_use]
    pub fn sync_on_write(&self) -> bool {
        self.sync_on_write
    }

    /// Returns a read handle on the current backing file.
    ///
    /// The handle stays valid after compaction swaps in a new file; it keeps
    /// reading the file it was created from.
    #[must_use]
    pub fn reader(&self) -> WalReader {
        WalReader {
            backend: self.backend.read().clone(),
        }
    }

    /// Cuts the log back to `offset`.
    ///
    /// Used by recovery to discard a torn tail.
    pub fn truncate(&self, offset: u64) -> CoreResult<()> {
        self.ensure_open()?;
        let _writer = self.writer.lock();
        self.backend.read().truncate(offset)?;
        Ok(())
    }

    /// Replaces the backing file. Returns the previous backend.
    ///
    /// Callers must have made the new file durable and must prevent
    /// concurrent appends.
    pub(crate) fn replace_backend(
        &self,
        backend: Arc<dyn StorageBackend>,
    ) -> Arc<dyn StorageBackend> {
        let _writer = self.writer.lock();
        std::mem::replace(&mut *self.backend.write(), backend)
    }

    /// Syncs the log and marks it closed. Later calls return `Ok(())`.
    pub fn close(&self) -> CoreResult<()> {
        let _writer = self.writer.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let backend = self.backend.read();
        backend.flush()?;
        backend.sync()?;
        Ok(())
    }

    /// Returns whether [`Self::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("sync_on_write", &self.sync_on_write)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Positioned-read handle on one WAL file.
///
/// Cheap to clone. Reads never take the append mutex and never share a
/// file cursor.
#[derive(Clone)]
pub struct WalReader {
    backend: Arc<dyn StorageBackend>,
}

impl WalReader {
    /// Reads and validates the frame at `offset`.
    pub fn read_frame(&self, offset: u64) -> CoreResult<Frame> {
        let size = self.backend.size()?;
        let available = size.saturating_sub(offset);

        if available < FRAME_HEADER_SIZE as u64 {
            return Err(CoreError::TruncatedRecord {
                offset,
                needed: FRAME_HEADER_SIZE as u64,
                available,
            });
        }

        let header = FrameHeader::parse(&self.backend.read_at(offset, FRAME_HEADER_SIZE)?);
        let len = header.frame_len().ok_or_else(|| {
            CoreError::corrupt_frame(offset, u64::from(header.payload_len), "frame length overflows u32")
        })?;

        if available < u64::from(len) {
            return Err(CoreError::TruncatedRecord {
                offset,
                needed: u64::from(len),
                available,
            });
        }

        let payload = self.backend.read_at(
            offset + FRAME_HEADER_SIZE as u64,
            header.payload_len as usize,
        )?;
        let entry = decode_payload(offset, header, &payload)?;
        Ok(Frame { offset, len, entry })
    }

    /// Reads a frame whose total length is already known, in one read.
    ///
    /// Used on the lookup path where the index recorded the frame length.
    pub fn read_frame_sized(&self, offset: u64, len: u32) -> CoreResult<Frame> {
        if (len as usize) < FRAME_HEADER_SIZE {
            return Err(CoreError::invalid_argument(format!(
                "frame length {len} is shorter than the header"
            )));
        }

        let bytes = self.backend.read_at(offset, len as usize)?;
        let header = FrameHeader::parse(&bytes);
        if header.frame_len() != Some(len) {
            return Err(CoreError::corrupt_frame(
                offset,
                u64::from(len),
                format!(
                    "header declares {} payload bytes, index expects {}",
                    header.payload_len,
                    len as usize - FRAME_HEADER_SIZE
                ),
            ));
        }

        let entry = decode_payload(offset, header, &bytes[FRAME_HEADER_SIZE..])?;
        Ok(Frame { offset, len, entry })
    }

    /// Returns the offset of the first valid frame starting after `from`.
    ///
    /// Every byte position past `from` is tried as a frame header; a hit
    /// must fit inside the log, pass its checksum and decode. An interrupted
    /// final append leaves no such frame behind it, while a damaged header
    /// in the middle of the log does.
    ///
    /// # Errors
    ///
    /// Returns an error only for I/O failures.
    pub fn next_valid_frame(&self, from: u64) -> CoreResult<Option<u64>> {
        let size = self.backend.size()?;
        let min_frame = FRAME_HEADER_SIZE as u64 + u64::from(MIN_PAYLOAD_LEN);
        let mut chunk_start = from + 1;

        while chunk_start + min_frame <= size {
            let chunk_len = (size - chunk_start).min(SCAN_CHUNK) as usize;
            let chunk = self.backend.read_at(chunk_start, chunk_len)?;

            // Header plus the kind byte is enough to reject most positions.
            for (i, window) in chunk.windows(FRAME_HEADER_SIZE + 1).enumerate() {
                let offset = chunk_start + i as u64;
                let header = FrameHeader::parse(window);
                if header.payload_len < MIN_PAYLOAD_LEN
                    || EntryKind::from_byte(window[FRAME_HEADER_SIZE]).is_none()
                    || offset + FRAME_HEADER_SIZE as u64 + u64::from(header.payload_len) > size
                {
                    continue;
                }
                match self.read_frame(offset) {
                    Ok(_) => return Ok(Some(offset)),
                    Err(CoreError::CorruptFrame { .. }) => {}
                    Err(e) => return Err(e),
                }
            }

            chunk_start += (chunk_len - FRAME_HEADER_SIZE) as u64;
        }

        Ok(None)
    }

    /// Returns a streaming iterator starting at `offset`.
    pub fn iter_from(&self, offset: u64) -> CoreResult<FrameIterator<'_>> {
        FrameIterator::new(self.backend.as_ref(), offset)
    }

    /// Reads raw bytes, used to copy the tail during compaction.
    pub(crate) fn read_raw(&self, offset: u64, len: usize) -> CoreResult<Vec<u8>> {
        Ok(self.backend.read_at(offset, len)?)
    }

    /// Size of the file this handle reads.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }
}

impl std::fmt::Debug for WalReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalReader").finish_non_exhaustive()
    }
}
