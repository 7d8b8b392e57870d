//! Error types for SDB core.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in SDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] sdb_storage::StorageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Fewer bytes were available than a declared length required.
    ///
    /// From the WAL this means the frame at `offset` runs past the end of the
    /// log (a torn tail). From the codec, offsets are relative to the payload.
    #[error("truncated record at offset {offset}: needed {needed} bytes, {available} available")]
    TruncatedRecord {
        /// Where the incomplete record starts.
        offset: u64,
        /// Bytes the record declared.
        needed: u64,
        /// Bytes actually available.
        available: u64,
    },

    /// A frame failed its checksum or its payload could not be decoded.
    #[error("corrupt frame at offset {offset} ({len} bytes): {reason}")]
    CorruptFrame {
        /// Offset of the frame header.
        offset: u64,
        /// Total bytes the frame claims (header + payload).
        len: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// Payload carried a kind byte that is neither `Set` nor `Remove`.
    #[error("unknown log entry kind {kind:#04x}")]
    UnknownEntryKind {
        /// The offending byte.
        kind: u8,
    },

    /// Payload is structurally invalid (varint overflow, trailing bytes).
    #[error("malformed record: {message}")]
    MalformedRecord {
        /// Description of the problem.
        message: String,
    },

    /// The bucket directory or WAL file could not be opened or created.
    #[error("cannot open bucket at {}: {source}", path.display())]
    Open {
        /// Path that failed.
        path: PathBuf,
        /// Underlying cause.
        #[source]
        source: io::Error,
    },

    /// Another handle holds the bucket lock.
    #[error("bucket locked: another handle has exclusive access")]
    Locked,

    /// The store or WAL has been closed.
    #[error("store is closed")]
    Closed,

    /// A failed append could not be rolled back; the WAL refuses writes
    /// until the store is reopened.
    #[error("WAL is unusable after a failed append; reopen the store")]
    WalFailed,

    /// Caller passed an unusable argument.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Compaction was cancelled between steps.
    #[error("compaction cancelled")]
    CompactionCancelled,

    /// Another compaction pass is already running.
    #[error("compaction already in progress")]
    CompactionInProgress,
}

impl CoreError {
    /// Creates a corrupt frame error.
    pub fn corrupt_frame(offset: u64, len: u64, reason: impl Into<String>) -> Self {
        Self::CorruptFrame {
            offset,
            len,
            reason: reason.into(),
        }
    }

    /// Creates a malformed record error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRecord {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an open error for `path`.
    pub fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Open {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for errors that indicate damaged log bytes.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::TruncatedRecord { .. }
                | Self::CorruptFrame { .. }
                | Self::UnknownEntryKind { .. }
                | Self::MalformedRecord { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_classification() {
        assert!(CoreError::corrupt_frame(0, 12, "crc").is_corruption());
        assert!(CoreError::malformed("x").is_corruption());
        assert!(!CoreError::Closed.is_corruption());
        assert!(!CoreError::invalid_argument("x").is_corruption());
    }

    #[test]
    fn open_error_mentions_path() {
        let err = CoreError::open(
            "/nope/bucket",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let message = err.to_string();
        assert!(message.contains("/nope/bucket"));
        assert!(message.contains("denied"));
    }
}
