//! Known-answer vectors for the WAL frame format.
//!
//! Each vector pins the exact bytes a log entry must encode to, so an
//! accidental change to the varint layout or checksum shows up as a test
//! failure rather than as a bucket that older builds cannot read.

use sdb_core::wal::LogEntry;
use sdb_core::TransactionId;

/// A log entry together with its expected on-disk frame.
#[derive(Debug, Clone)]
pub struct FrameVector {
    /// Unique identifier for this vector.
    pub id: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// The entry that produces the frame.
    pub entry: LogEntry,
    /// Expected frame bytes (hex-encoded).
    pub frame_hex: &'static str,
}

impl FrameVector {
    /// Returns the expected frame bytes.
    pub fn frame_bytes(&self) -> Vec<u8> {
        hex_decode(self.frame_hex)
    }
}

/// A damaged frame and the way a reader must classify it.
#[derive(Debug, Clone)]
pub struct DamagedVector {
    /// Unique identifier for this vector.
    pub id: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// Log contents (hex-encoded).
    pub log_hex: &'static str,
    /// Whether the reader should report a torn tail rather than corruption.
    pub torn: bool,
}

/// Well-formed frames.
pub fn frame_vectors() -> Vec<FrameVector> {
    vec![
        FrameVector {
            id: "set_minimal",
            description: "single-byte key and value at tx 1",
            entry: LogEntry::set(TransactionId::new(1), b"a".to_vec(), b"1".to_vec()),
            frame_hex: "bfac92fe06000000010101610131",
        },
        FrameVector {
            id: "set_two_byte_tx",
            description: "tx 300 needs a two-byte varint",
            entry: LogEntry::set(TransactionId::new(300), b"k".to_vec(), b"vv".to_vec()),
            frame_hex: "43408b760800000001ac02016b027676",
        },
        FrameVector {
            id: "remove",
            description: "remove carries no value field",
            entry: LogEntry::remove(TransactionId::new(7), b"gone".to_vec()),
            frame_hex: "76c8aac107000000020704676f6e65",
        },
        FrameVector {
            id: "set_empty",
            description: "empty key and empty value",
            entry: LogEntry::set(TransactionId::new(1), Vec::new(), Vec::new()),
            frame_hex: "4ed23a980400000001010000",
        },
        FrameVector {
            id: "remove_varint_edge",
            description: "tx 127 is the largest single-byte varint",
            entry: LogEntry::remove(TransactionId::new(127), b"x".to_vec()),
            frame_hex: "b5f0259304000000027f0178",
        },
    ]
}

/// Logs whose final frame is damaged.
pub fn damaged_vectors() -> Vec<DamagedVector> {
    vec![
        DamagedVector {
            id: "header_cut",
            description: "log ends four bytes into a frame header",
            log_hex: "bfac92fe06000000010101610131b5f02593",
            torn: true,
        },
        DamagedVector {
            id: "payload_cut",
            description: "payload is two bytes short of its declared length",
            log_hex: "bfac92fe0600000001010161013143408b760800000001ac02016b02",
            torn: true,
        },
        DamagedVector {
            id: "checksum_mismatch",
            description: "last payload byte of a complete frame altered",
            log_hex: "bfac92fe06000000010101610132",
            torn: false,
        },
        DamagedVector {
            id: "unknown_kind",
            description: "kind byte 0x03 with a matching checksum",
            log_hex: "c51a33320400000003010000",
            torn: false,
        },
    ]
}

/// Encodes bytes as lowercase hex.
pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Decodes a hex string. Panics on malformed input.
pub fn hex_decode(hex: &str) -> Vec<u8> {
    assert!(hex.len() % 2 == 0, "odd-length hex string");
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).expect("invalid hex digit"))
        .collect()
}
