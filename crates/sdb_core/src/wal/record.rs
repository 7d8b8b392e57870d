//! Log entry types and the payload codec.
//!
//! ## Payload Format
//!
//! ```text
//! | kind (1) | tx (uvarint) | key_len (uvarint) | key | [val_len (uvarint) | val] |
//! ```
//!
//! The value fields are present only for `Set`. Integers use unsigned LEB128.

use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;

/// Longest LEB128 encoding of a `u64`.
const MAX_UVARINT_LEN: usize = 10;

/// Kind tag of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryKind {
    /// Install or overwrite a value.
    Set = 1,
    /// Logically delete a key.
    Remove = 2,
}

impl EntryKind {
    /// Converts a byte to an entry kind.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Set),
            2 => Some(Self::Remove),
            _ => None,
        }
    }

    /// Converts the entry kind to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// The unit of durability: one mutation of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    /// Install `val` under `key`.
    Set {
        /// Transaction ID.
        tx: TransactionId,
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes (may be empty).
        val: Vec<u8>,
    },

    /// Delete `key`.
    Remove {
        /// Transaction ID.
        tx: TransactionId,
        /// Key bytes.
        key: Vec<u8>,
    },
}

impl LogEntry {
    /// Creates a `Set` entry.
    pub fn set(tx: TransactionId, key: impl Into<Vec<u8>>, val: impl Into<Vec<u8>>) -> Self {
        Self::Set {
            tx,
            key: key.into(),
            val: val.into(),
        }
    }

    /// Creates a `Remove` entry.
    pub fn remove(tx: TransactionId, key: impl Into<Vec<u8>>) -> Self {
        Self::Remove {
            tx,
            key: key.into(),
        }
    }

    /// Returns the entry kind.
    #[must_use]
    pub fn kind(&self) -> EntryKind {
        match self {
            Self::Set { .. } => EntryKind::Set,
            Self::Remove { .. } => EntryKind::Remove,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn tx(&self) -> TransactionId {
        match self {
            Self::Set { tx, .. } | Self::Remove { tx, .. } => *tx,
        }
    }

    /// Returns the key.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        match self {
            Self::Set { key, .. } | Self::Remove { key, .. } => key,
        }
    }

    /// Returns the value, or `None` for a `Remove`.
    #[must_use]
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Self::Set { val, .. } => Some(val),
            Self::Remove { .. } => None,
        }
    }

    /// Consumes the entry and returns its value, or `None` for a `Remove`.
    #[must_use]
    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            Self::Set { val, .. } => Some(val),
            Self::Remove { .. } => None,
        }
    }

    /// Returns the exact size of the encoded payload.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let key = self.key();
        let mut len = 1 + uvarint_len(self.tx().as_u64()) + uvarint_len(key.len() as u64) + key.len();
        if let Self::Set { val, .. } = self {
            len += uvarint_len(val.len() as u64) + val.len();
        }
        len
    }

    /// Serializes the entry payload (without frame header).
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Appends the entry payload to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.reserve(self.encoded_len());
        buf.push(self.kind().as_byte());
        put_uvarint(buf, self.tx().as_u64());

        let key = self.key();
        put_uvarint(buf, key.len() as u64);
        buf.extend_from_slice(key);

        if let Self::Set { val, .. } = self {
            put_uvarint(buf, val.len() as u64);
            buf.extend_from_slice(val);
        }
    }

    /// Deserializes an entry from its payload.
    ///
    /// # Errors
    ///
    /// - [`CoreError::TruncatedRecord`] if a declared length runs past `payload`
    /// - [`CoreError::UnknownEntryKind`] for an unrecognized kind byte
    /// - [`CoreError::MalformedRecord`] for varint overflow or trailing bytes
    pub fn decode(payload: &[u8]) -> CoreResult<Self> {
        let mut reader = PayloadReader::new(payload);

        let kind_byte = reader.read_u8()?;
        let kind = EntryKind::from_byte(kind_byte)
            .ok_or(CoreError::UnknownEntryKind { kind: kind_byte })?;

        let tx = TransactionId::new(reader.read_uvarint()?);
        let key = reader.read_len_prefixed()?.to_vec();

        let entry = match kind {
            EntryKind::Set => {
                let val = reader.read_len_prefixed()?.to_vec();
                Self::Set { tx, key, val }
            }
            EntryKind::Remove => Self::Remove { tx, key },
        };

        if reader.remaining() != 0 {
            return Err(CoreError::malformed(format!(
                "{} trailing bytes after {:?} entry",
                reader.remaining(),
                kind
            )));
        }

        Ok(entry)
    }
}

/// Computes the CRC-32 (IEEE) checksum of `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

fn uvarint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Bounds-checked cursor over a payload.
struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn truncated(&self, needed: u64) -> CoreError {
        CoreError::TruncatedRecord {
            offset: self.pos as u64,
            needed,
            available: self.remaining() as u64,
        }
    }

    fn read_u8(&mut self) -> CoreResult<u8> {
        let byte = *self.data.get(self.pos).ok_or_else(|| self.truncated(1))?;
        self.pos += 1;
        Ok(byte)
    }

    fn read_uvarint(&mut self) -> CoreResult<u64> {
        let mut value = 0u64;
        for i in 0..MAX_UVARINT_LEN {
            let byte = self.read_u8()?;
            let bits = u64::from(byte & 0x7F);
            if i == MAX_UVARINT_LEN - 1 && bits > 1 {
                return Err(CoreError::malformed("uvarint overflows u64"));
            }
            value |= bits << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(CoreError::malformed("uvarint longer than 10 bytes"))
    }

    fn read_len_prefixed(&mut self) -> CoreResult<&'a [u8]> {
        let declared = self.read_uvarint()?;
        let len = match usize::try_from(declared) {
            Ok(len) if len <= self.remaining() => len,
            _ => return Err(self.truncated(declared)),
        };
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(n: u64) -> TransactionId {
        TransactionId::new(n)
    }

    #[test]
    fn entry_kind_roundtrip() {
        for kind in [EntryKind::Set, EntryKind::Remove] {
            assert_eq!(EntryKind::from_byte(kind.as_byte()), Some(kind));
        }
        assert_eq!(EntryKind::from_byte(0), None);
        assert_eq!(EntryKind::from_byte(3), None);
    }

    #[test]
    fn set_roundtrip() {
        let entry = LogEntry::set(tx(7), b"user:1".to_vec(), b"alice".to_vec());
        let payload = entry.encode();
        assert_eq!(payload.len(), entry.encoded_len());
        assert_eq!(LogEntry::decode(&payload).unwrap(), entry);
    }

    #[test]
    fn remove_roundtrip() {
        let entry = LogEntry::remove(tx(u64::MAX), b"gone".to_vec());
        let payload = entry.encode();
        assert_eq!(payload.len(), entry.encoded_len());
        assert_eq!(LogEntry::decode(&payload).unwrap(), entry);
    }

    #[test]
    fn known_encoding() {
        // kind=Set, tx=300 (0xAC 0x02), key "k", val "vv"
        let entry = LogEntry::set(tx(300), b"k".to_vec(), b"vv".to_vec());
        assert_eq!(
            entry.encode(),
            vec![0x01, 0xAC, 0x02, 0x01, b'k', 0x02, b'v', b'v']
        );
    }

    #[test]
    fn empty_key_and_value_are_legal() {
        let entry = LogEntry::set(tx(1), Vec::new(), Vec::new());
        let decoded = LogEntry::decode(&entry.encode()).unwrap();
        assert_eq!(decoded.value(), Some(&[][..]));
        assert_eq!(decoded.kind(), EntryKind::Set);
    }

    #[test]
    fn empty_set_differs_from_remove() {
        let set = LogEntry::set(tx(1), b"k".to_vec(), Vec::new()).encode();
        let remove = LogEntry::remove(tx(1), b"k".to_vec()).encode();
        assert_ne!(set, remove);
    }

    #[test]
    fn encode_into_appends() {
        let mut buf = vec![0xFF];
        LogEntry::remove(tx(1), b"a".to_vec()).encode_into(&mut buf);
        assert_eq!(buf, vec![0xFF, 0x02, 0x01, 0x01, b'a']);
    }

    #[test]
    fn decode_truncated_value() {
        let mut payload = LogEntry::set(tx(1), b"key".to_vec(), b"value".to_vec()).encode();
        payload.truncate(payload.len() - 2);

        let err = LogEntry::decode(&payload).unwrap_err();
        assert!(matches!(
            err,
            CoreError::TruncatedRecord {
                needed: 5,
                available: 3,
                ..
            }
        ));
    }

    #[test]
    fn decode_empty_payload() {
        let err = LogEntry::decode(&[]).unwrap_err();
        assert!(matches!(err, CoreError::TruncatedRecord { offset: 0, .. }));
    }

    #[test]
    fn decode_unknown_kind() {
        let err = LogEntry::decode(&[0x09, 0x00, 0x00]).unwrap_err();
        assert!(matches!(err, CoreError::UnknownEntryKind { kind: 0x09 }));
    }

    #[test]
    fn decode_trailing_bytes() {
        let mut payload = LogEntry::remove(tx(1), b"k".to_vec()).encode();
        payload.push(0);
        let err = LogEntry::decode(&payload).unwrap_err();
        assert!(matches!(err, CoreError::MalformedRecord { .. }));
    }

    #[test]
    fn decode_varint_overflow() {
        let mut payload = vec![0x02];
        payload.extend_from_slice(&[0xFF; 10]);
        let err = LogEntry::decode(&payload).unwrap_err();
        assert!(matches!(err, CoreError::MalformedRecord { .. }));
    }

    #[test]
    fn uvarint_boundaries() {
        for value in [0u64, 127, 128, 16_383, 16_384, u64::from(u32::MAX), u64::MAX] {
            let mut buf = Vec::new();
            put_uvarint(&mut buf, value);
            assert_eq!(buf.len(), uvarint_len(value));
            let mut reader = PayloadReader::new(&buf);
            assert_eq!(reader.read_uvarint().unwrap(), value);
            assert_eq!(reader.remaining(), 0);
        }
    }

    #[test]
    fn crc32_known_value() {
        // Known test vector: "123456789" should give 0xCBF43926
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decode_never_panics(payload in prop::collection::vec(any::<u8>(), 0..64)) {
                let _ = LogEntry::decode(&payload);
            }

            #[test]
            fn decode_inverts_encode(
                tx in any::<u64>(),
                key in prop::collection::vec(any::<u8>(), 0..32),
                val in prop::option::of(prop::collection::vec(any::<u8>(), 0..256)),
            ) {
                let entry = match val {
                    Some(val) => LogEntry::set(TransactionId::new(tx), key, val),
                    None => LogEntry::remove(TransactionId::new(tx), key),
                };
                let payload = entry.encode();
                prop_assert_eq!(payload.len(), entry.encoded_len());
                prop_assert_eq!(LogEntry::decode(&payload).unwrap(), entry);
            }
        }
    }
}
