//! Frame envelope: checksum and length header around an entry payload.

use crate::error::{CoreError, CoreResult};
use crate::wal::record::{compute_crc32, LogEntry};

/// Header size: crc32 (4) + payload length (4).
pub const FRAME_HEADER_SIZE: usize = 8;

/// A decoded frame together with its position in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Offset of the frame header.
    pub offset: u64,
    /// Total frame length (header + payload).
    pub len: u32,
    /// The decoded entry.
    pub entry: LogEntry,
}

impl Frame {
    /// Offset just past this frame.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + u64::from(self.len)
    }
}

/// Parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct FrameHeader {
    pub crc: u32,
    pub payload_len: u32,
}

impl FrameHeader {
    pub fn parse(bytes: &[u8]) -> Self {
        Self {
            crc: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            payload_len: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    /// Total frame length, or `None` if it cannot be represented in a `u32`.
    pub fn frame_len(self) -> Option<u32> {
        self.payload_len.checked_add(FRAME_HEADER_SIZE as u32)
    }
}

/// Returns the full frame length for `entry`, or an error if it would not
/// fit the 4-byte length field.
pub fn frame_len(entry: &LogEntry) -> CoreResult<u32> {
    let payload_len = entry.encoded_len();
    u32::try_from(payload_len)
        .ok()
        .and_then(|len| len.checked_add(FRAME_HEADER_SIZE as u32))
        .ok_or_else(|| {
            CoreError::invalid_argument(format!(
                "entry payload of {payload_len} bytes does not fit in a frame"
            ))
        })
}

/// Writes a complete frame for `entry` into `buf`, replacing its contents.
///
/// `buf` keeps its capacity between calls, which is what lets the WAL reuse
/// one allocation for every append.
pub fn encode_frame(entry: &LogEntry, buf: &mut Vec<u8>) -> CoreResult<()> {
    let total = frame_len(entry)?;
    buf.clear();
    buf.reserve(total as usize);
    buf.extend_from_slice(&[0u8; FRAME_HEADER_SIZE]);
    entry.encode_into(buf);

    let payload_len = total - FRAME_HEADER_SIZE as u32;
    let crc = compute_crc32(&buf[FRAME_HEADER_SIZE..]);
    buf[0..4].copy_from_slice(&crc.to_le_bytes());
    buf[4..8].copy_from_slice(&payload_len.to_le_bytes());
    Ok(())
}

/// Verifies the checksum of a payload read from `offset` and decodes it.
pub(crate) fn decode_payload(offset: u64, header: FrameHeader, payload: &[u8]) -> CoreResult<LogEntry> {
    let len = FRAME_HEADER_SIZE as u64 + u64::from(header.payload_len);
    let computed = compute_crc32(payload);
    if computed != header.crc {
        return Err(CoreError::corrupt_frame(
            offset,
            len,
            format!(
                "checksum mismatch: stored {:08x}, computed {computed:08x}",
                header.crc
            ),
        ));
    }

    LogEntry::decode(payload)
        .map_err(|e| CoreError::corrupt_frame(offset, len, format!("undecodable payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionId;

    #[test]
    fn frame_layout() {
        let entry = LogEntry::set(TransactionId::new(1), b"a".to_vec(), b"1".to_vec());
        let mut buf = Vec::new();
        encode_frame(&entry, &mut buf).unwrap();

        let payload = entry.encode();
        assert_eq!(buf.len(), FRAME_HEADER_SIZE + payload.len());
        assert_eq!(&buf[FRAME_HEADER_SIZE..], &payload[..]);

        let header = FrameHeader::parse(&buf);
        assert_eq!(header.crc, compute_crc32(&payload));
        assert_eq!(header.payload_len as usize, payload.len());
        assert_eq!(header.frame_len(), Some(frame_len(&entry).unwrap()));
    }

    #[test]
    fn encode_frame_reuses_buffer() {
        let mut buf = Vec::new();
        let big = LogEntry::set(TransactionId::new(1), b"k".to_vec(), vec![0u8; 4096]);
        encode_frame(&big, &mut buf).unwrap();
        let capacity = buf.capacity();

        let small = LogEntry::remove(TransactionId::new(2), b"k".to_vec());
        encode_frame(&small, &mut buf).unwrap();
        assert_eq!(buf.capacity(), capacity);
        assert_eq!(buf.len(), frame_len(&small).unwrap() as usize);
    }

    #[test]
    fn decode_payload_detects_crc_mismatch() {
        let entry = LogEntry::set(TransactionId::new(1), b"k".to_vec(), b"v".to_vec());
        let mut buf = Vec::new();
        encode_frame(&entry, &mut buf).unwrap();
        let header = FrameHeader::parse(&buf);

        let mut payload = buf[FRAME_HEADER_SIZE..].to_vec();
        payload[2] ^= 0x10;

        let err = decode_payload(64, header, &payload).unwrap_err();
        assert!(matches!(err, CoreError::CorruptFrame { offset: 64, .. }));
    }
}
