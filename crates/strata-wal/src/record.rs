//! WAL record frames.
//!
//! Frame layout:
//!
//! ```text
//! [magic u32][version u16][kind u8][flags u8][lsn u64][len u32][crc u32][payload...]
//! ```
//!
//! The CRC covers the payload. A frame that fails any check is treated as
//! the partially-written tail of the log, never as data.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use strata_common::constants::{FORMAT_VERSION, WAL_MAGIC};
use strata_common::types::Lsn;

/// Fixed frame header size in bytes.
pub const FRAME_HEADER_LEN: usize = 4 + 2 + 1 + 1 + 8 + 4 + 4;

/// The payload class of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordKind {
    /// Catalog mutation (create/drop/soft-delete of entries).
    CatalogOp = 1,
    /// Block mutation (append, delete, meta/delta location install).
    BlockMutation = 2,
    /// Schema alteration.
    AlterOp = 3,
    /// Pointer to a written checkpoint object.
    CheckpointPointer = 4,
}

impl RecordKind {
    /// Decodes a kind from its wire tag.
    #[must_use]
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::CatalogOp),
            2 => Some(Self::BlockMutation),
            3 => Some(Self::AlterOp),
            4 => Some(Self::CheckpointPointer),
            _ => None,
        }
    }

    /// Returns the wire tag.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

bitflags! {
    /// Per-record flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RecordFlags: u8 {
        /// The record closes a transaction (last record of its commit).
        const COMMIT_BOUNDARY = 0b0000_0001;
    }
}

/// One WAL record.
#[derive(Debug, Clone, PartialEq)]
pub struct WalRecord {
    /// Sequence number assigned at append.
    pub lsn: Lsn,
    /// Payload class.
    pub kind: RecordKind,
    /// Flags.
    pub flags: RecordFlags,
    /// Opaque payload, encoded by the engine.
    pub payload: Bytes,
}

impl WalRecord {
    /// Creates a record.
    #[must_use]
    pub fn new(lsn: Lsn, kind: RecordKind, flags: RecordFlags, payload: Bytes) -> Self {
        Self {
            lsn,
            kind,
            flags,
            payload,
        }
    }

    /// Returns the encoded frame size.
    #[must_use]
    pub fn frame_len(&self) -> usize {
        FRAME_HEADER_LEN + self.payload.len()
    }

    /// Encodes the frame.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.frame_len());
        buf.put_u32(WAL_MAGIC);
        buf.put_u16(FORMAT_VERSION);
        buf.put_u8(self.kind.as_u8());
        buf.put_u8(self.flags.bits());
        buf.put_u64(self.lsn.as_u64());
        buf.put_u32(self.payload.len() as u32);
        buf.put_u32(crc32fast::hash(&self.payload));
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decodes the next frame from `buf`.
    ///
    /// Returns `None` when no complete, valid frame is available: short
    /// buffer, bad magic, bad version, unknown kind, or checksum mismatch
    /// all mean the rest of the segment is a partially-written tail.
    pub fn decode(buf: &mut Bytes) -> Option<Self> {
        if buf.len() < FRAME_HEADER_LEN {
            return None;
        }
        let mut peek = buf.clone();
        if peek.get_u32() != WAL_MAGIC {
            return None;
        }
        if peek.get_u16() != FORMAT_VERSION {
            return None;
        }
        let kind = RecordKind::from_u8(peek.get_u8())?;
        let flags = RecordFlags::from_bits_truncate(peek.get_u8());
        let lsn = Lsn::new(peek.get_u64());
        let len = peek.get_u32() as usize;
        let crc = peek.get_u32();
        if peek.remaining() < len {
            return None;
        }
        let payload = peek.copy_to_bytes(len);
        if crc32fast::hash(&payload) != crc {
            return None;
        }
        buf.advance(FRAME_HEADER_LEN + len);
        Some(Self {
            lsn,
            kind,
            flags,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(lsn: u64) -> WalRecord {
        WalRecord::new(
            Lsn::new(lsn),
            RecordKind::BlockMutation,
            RecordFlags::COMMIT_BOUNDARY,
            Bytes::from_static(b"payload-bytes"),
        )
    }

    #[test]
    fn test_encode_decode() {
        let rec = sample(42);
        let mut buf = rec.encode();
        let decoded = WalRecord::decode(&mut buf).unwrap();
        assert_eq!(decoded, rec);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_consecutive() {
        let mut all = BytesMut::new();
        all.extend_from_slice(&sample(1).encode());
        all.extend_from_slice(&sample(2).encode());
        let mut buf = all.freeze();
        assert_eq!(WalRecord::decode(&mut buf).unwrap().lsn, Lsn::new(1));
        assert_eq!(WalRecord::decode(&mut buf).unwrap().lsn, Lsn::new(2));
        assert!(WalRecord::decode(&mut buf).is_none());
    }

    #[test]
    fn test_partial_tail_ignored() {
        let rec = sample(1);
        let encoded = rec.encode();
        let mut truncated = encoded.slice(..encoded.len() - 4);
        assert!(WalRecord::decode(&mut truncated).is_none());
    }

    #[test]
    fn test_corrupt_payload_ignored() {
        let rec = sample(1);
        let mut raw = rec.encode().to_vec();
        let n = raw.len();
        raw[n - 1] ^= 0xff;
        let mut buf = Bytes::from(raw);
        assert!(WalRecord::decode(&mut buf).is_none());
    }
}
