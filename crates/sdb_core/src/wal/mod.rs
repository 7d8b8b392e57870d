//! Write-Ahead Log (WAL) for durability and crash recovery.
//!
//! Every mutation is appended to the WAL before the in-memory index is
//! updated. On open, the WAL is replayed to rebuild the index.
//!
//! ## Frame Format
//!
//! ```text
//! | crc32 (4) | payload_len (4) | payload (N) |
//! ```
//!
//! Both header fields are little-endian. The CRC covers the payload only.
//! See [`LogEntry`] for the payload layout.
//!
//! ## Replay Outcomes
//!
//! - **Clean end**: the log ends on a frame boundary. Replay returns the end offset.
//! - **Torn tail**: the last frame's header or payload runs past the end of the
//!   log. Replay returns [`CoreError::TruncatedRecord`](crate::CoreError::TruncatedRecord).
//! - **Corruption**: a frame fails its checksum or does not decode. Replay returns
//!   [`CoreError::CorruptFrame`](crate::CoreError::CorruptFrame) and stops there.
//!
//! The caller decides what is recoverable; see [`crate::Store::open`].
//!
//! ## Invariants
//!
//! - WAL is **append-only** outside of recovery truncation and compaction swaps
//! - Frames are ordered by append position; `tx` is non-decreasing
//! - Replay never skips a bad frame to resynchronize

mod frame;
mod iterator;
mod record;
mod writer;

pub use frame::{encode_frame, frame_len, Frame, FRAME_HEADER_SIZE};
pub use iterator::FrameIterator;
pub use record::{compute_crc32, EntryKind, LogEntry};
pub use writer::{Wal, WalReader};
