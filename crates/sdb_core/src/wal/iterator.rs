//! Streaming frame iterator.
//!
//! Reads frames one-by-one from a storage backend through positioned reads,
//! keeping memory bounded regardless of log size.

use crate::error::{CoreError, CoreResult};
use crate::wal::frame::{decode_payload, Frame, FrameHeader, FRAME_HEADER_SIZE};
use sdb_storage::StorageBackend;

/// Read buffer size for streaming iteration.
const READ_BUFFER_SIZE: usize = 64 * 1024; // 64 KB

/// A streaming iterator over WAL frames.
///
/// # Termination
///
/// - Reaching the end of the log exactly on a frame boundary ends the
///   iteration with `None` (clean end of history).
/// - A frame whose header or payload runs past the end of the log yields
///   [`CoreError::TruncatedRecord`] once, then `None`.
/// - A checksum mismatch or undecodable payload yields
///   [`CoreError::CorruptFrame`] once, then `None`. The iterator never skips
///   ahead looking for the next valid frame.
///
/// The log size is captured at construction; frames appended afterwards are
/// not visited.
pub struct FrameIterator<'a> {
    backend: &'a dyn StorageBackend,
    /// Size of the log when iteration started.
    total_size: u64,
    /// Offset of the next frame to decode.
    current_offset: u64,
    buffer: Vec<u8>,
    /// Current position within the buffer.
    buffer_pos: usize,
    /// Number of valid bytes in the buffer.
    buffer_len: usize,
    finished: bool,
}

impl<'a> FrameIterator<'a> {
    /// Creates a new streaming iterator starting at `start_offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined or if
    /// `start_offset` lies beyond the end of the log.
    pub fn new(backend: &'a dyn StorageBackend, start_offset: u64) -> CoreResult<Self> {
        let total_size = backend.size()?;
        if start_offset > total_size {
            return Err(CoreError::invalid_argument(format!(
                "replay offset {start_offset} is beyond end of log ({total_size} bytes)"
            )));
        }
        Ok(Self {
            backend,
            total_size,
            current_offset: start_offset,
            buffer: vec![0u8; READ_BUFFER_SIZE],
            buffer_pos: 0,
            buffer_len: 0,
            finished: false,
        })
    }

    /// Offset just past the last frame successfully yielded.
    ///
    /// After a clean end this equals the log size; after a truncated or
    /// corrupt frame it is the offset of that frame.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.current_offset
    }

    /// Size of the log when iteration started.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Ensures at least `min_bytes` are buffered from the current position.
    ///
    /// Returns `false` if the log ends first. The buffer grows to fit frames
    /// larger than the default size.
    fn ensure_buffered(&mut self, min_bytes: usize) -> CoreResult<bool> {
        let available = self.buffer_len - self.buffer_pos;
        if available >= min_bytes {
            return Ok(true);
        }

        let remaining_in_log = (self.total_size - self.current_offset) as usize;
        if remaining_in_log < min_bytes {
            return Ok(false);
        }

        // Move any remaining data to the start of the buffer
        if self.buffer_pos > 0 && available > 0 {
            self.buffer.copy_within(self.buffer_pos..self.buffer_len, 0);
        }
        self.buffer_len = available;
        self.buffer_pos = 0;

        if min_bytes > self.buffer.len() {
            self.buffer.resize(min_bytes.next_power_of_two(), 0);
        }

        let bytes_to_read =
            std::cmp::min(self.buffer.len() - self.buffer_len, remaining_in_log - available);

        if bytes_to_read > 0 {
            let read_offset = self.current_offset + self.buffer_len as u64;
            let data = self.backend.read_at(read_offset, bytes_to_read)?;
            self.buffer[self.buffer_len..self.buffer_len + data.len()].copy_from_slice(&data);
            self.buffer_len += data.len();
        }

        Ok(self.buffer_len - self.buffer_pos >= min_bytes)
    }

    fn truncated(&self, needed: u64) -> CoreError {
        CoreError::TruncatedRecord {
            offset: self.current_offset,
            needed,
            available: self.total_size - self.current_offset,
        }
    }

    fn read_next_frame(&mut self) -> CoreResult<Option<Frame>> {
        if self.finished || self.current_offset == self.total_size {
            self.finished = true;
            return Ok(None);
        }

        let frame_offset = self.current_offset;

        if !self.ensure_buffered(FRAME_HEADER_SIZE)? {
            self.finished = true;
            return Err(self.truncated(FRAME_HEADER_SIZE as u64));
        }

        let header =
            FrameHeader::parse(&self.buffer[self.buffer_pos..self.buffer_pos + FRAME_HEADER_SIZE]);
        let frame_len = header.frame_len().ok_or_else(|| {
            self.finished = true;
            CoreError::corrupt_frame(
                frame_offset,
                FRAME_HEADER_SIZE as u64 + u64::from(header.payload_len),
                "frame length overflows u32",
            )
        })?;

        if !self.ensure_buffered(frame_len as usize)? {
            self.finished = true;
            return Err(self.truncated(u64::from(frame_len)));
        }

        let payload_start = self.buffer_pos + FRAME_HEADER_SIZE;
        let payload_end = self.buffer_pos + frame_len as usize;
        let entry = decode_payload(frame_offset, header, &self.buffer[payload_start..payload_end])
            .inspect_err(|_| self.finished = true)?;

        self.buffer_pos += frame_len as usize;
        self.current_offset += u64::from(frame_len);

        Ok(Some(Frame {
            offset: frame_offset,
            len: frame_len,
            entry,
        }))
    }
}

impl Iterator for FrameIterator<'_> {
    type Item = CoreResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next_frame().transpose()
    }
}
