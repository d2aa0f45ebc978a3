//! Typed identifiers for catalog entries and transactions.
//!
//! These types provide type-safe wrappers around numeric identifiers,
//! preventing accidental misuse of different id classes. A block id embeds
//! its owning segment id, so block-to-segment affinity is a field read
//! rather than a catalog lookup.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Database identifier.
///
/// # Example
///
/// ```rust
/// use strata_common::types::DatabaseId;
///
/// let db = DatabaseId::new(42);
/// assert_eq!(db.as_u64(), 42);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct DatabaseId(u64);

impl DatabaseId {
    /// Invalid database id, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// The reserved system database (`mo_catalog`).
    pub const SYSTEM: Self = Self(1);

    /// Creates a new `DatabaseId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Checks if this is a valid database id.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }

    /// Checks if this is the reserved system database.
    #[inline]
    #[must_use]
    pub const fn is_system(self) -> bool {
        self.0 == Self::SYSTEM.0
    }
}

impl fmt::Debug for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatabaseId({})", self.0)
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Table identifier, unique within the engine (not per database).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TableId(u64);

impl TableId {
    /// Invalid table id, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// Creates a new `TableId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Checks if this is a valid table id.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableId({})", self.0)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Segment identifier.
///
/// Segment ids are 128 bits and allocated monotonically, so they sort
/// globally across tables and databases. Block ids embed the segment id.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SegmentId(u128);

impl SegmentId {
    /// Invalid segment id, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// Creates a new `SegmentId` from a raw u128 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u128) -> Self {
        Self(id)
    }

    /// Returns the raw u128 value.
    #[inline]
    #[must_use]
    pub const fn as_u128(self) -> u128 {
        self.0
    }

    /// Checks if this is a valid segment id.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }

    /// Converts to bytes (big-endian).
    #[inline]
    #[must_use]
    pub fn to_be_bytes(self) -> [u8; 16] {
        self.0.to_be_bytes()
    }

    /// Creates a `SegmentId` from bytes (big-endian).
    #[inline]
    #[must_use]
    pub fn from_be_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }
}

impl fmt::Debug for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SegmentId({})", self.0)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Block identifier.
///
/// A block id is the owning segment id plus the block's offset within that
/// segment. The segment id is part of the block id by construction, so no
/// lookup is needed to route a block operation to its segment.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId {
    /// The owning segment.
    pub segment: SegmentId,
    /// Offset of the block within the segment.
    pub offset: u32,
}

impl BlockId {
    /// Invalid block id, used as a sentinel value.
    pub const INVALID: Self = Self {
        segment: SegmentId::INVALID,
        offset: u32::MAX,
    };

    /// Creates a new `BlockId`.
    #[inline]
    #[must_use]
    pub const fn new(segment: SegmentId, offset: u32) -> Self {
        Self { segment, offset }
    }

    /// Checks if this is a valid block id.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.segment.is_valid()
    }

    /// Converts to bytes (big-endian, 20 bytes).
    #[must_use]
    pub fn to_be_bytes(self) -> [u8; 20] {
        let mut out = [0u8; 20];
        out[..16].copy_from_slice(&self.segment.to_be_bytes());
        out[16..].copy_from_slice(&self.offset.to_be_bytes());
        out
    }

    /// Creates a `BlockId` from bytes (big-endian, 20 bytes).
    #[must_use]
    pub fn from_be_bytes(bytes: [u8; 20]) -> Self {
        let mut seg = [0u8; 16];
        seg.copy_from_slice(&bytes[..16]);
        let mut off = [0u8; 4];
        off.copy_from_slice(&bytes[16..]);
        Self {
            segment: SegmentId::from_be_bytes(seg),
            offset: u32::from_be_bytes(off),
        }
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({}/{})", self.segment, self.offset)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.segment, self.offset)
    }
}

/// Transaction identifier.
///
/// Transaction ids are monotonically increasing and are used to tag
/// uncommitted chain nodes, append nodes, and delete nodes so that a
/// transaction can see its own pending writes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TxnId(u64);

impl TxnId {
    /// Invalid transaction id, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// Creates a new `TxnId` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Checks if this is a valid transaction id.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxnId({})", self.0)
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Log sequence number identifying a position in the write-ahead log.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Lsn(u64);

impl Lsn {
    /// Invalid LSN, used as a sentinel value.
    pub const INVALID: Self = Self(0);

    /// First valid LSN.
    pub const FIRST: Self = Self(1);

    /// Maximum LSN value.
    pub const MAX: Self = Self(u64::MAX);

    /// Creates a new `Lsn` from a raw u64 value.
    #[inline]
    #[must_use]
    pub const fn new(lsn: u64) -> Self {
        Self(lsn)
    }

    /// Returns the raw u64 value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the next LSN.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Checks if this is a valid LSN.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl fmt::Debug for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lsn({})", self.0)
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tenant identifier scoping catalog name lookups and logtail reads.
///
/// The reserved system tenant owns the system database entries, which are
/// visible to every tenant.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TenantId(u32);

impl TenantId {
    /// The reserved system tenant.
    pub const SYS: Self = Self(0);

    /// Creates a new `TenantId` from a raw u32 value.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Checks if this is the reserved system tenant.
    #[inline]
    #[must_use]
    pub const fn is_sys(self) -> bool {
        self.0 == Self::SYS.0
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable column sequence number.
///
/// A column's `SeqNum` never changes across rename or reordering and is
/// never reused after a drop; it is the column identity used by logtail,
/// checkpoints, and persisted blocks.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SeqNum(u16);

impl SeqNum {
    /// Creates a new `SeqNum` from a raw u16 value.
    #[inline]
    #[must_use]
    pub const fn new(n: u16) -> Self {
        Self(n)
    }

    /// Returns the raw u16 value.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns the next sequence number.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Debug for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeqNum({})", self.0)
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_id() {
        let db = DatabaseId::new(42);
        assert_eq!(db.as_u64(), 42);
        assert!(db.is_valid());
        assert!(!DatabaseId::INVALID.is_valid());
        assert!(DatabaseId::SYSTEM.is_system());
        assert!(!db.is_system());
    }

    #[test]
    fn test_block_id_embeds_segment() {
        let seg = SegmentId::new(7);
        let blk = BlockId::new(seg, 3);
        assert_eq!(blk.segment, seg);
        assert_eq!(blk.offset, 3);

        let bytes = blk.to_be_bytes();
        assert_eq!(BlockId::from_be_bytes(bytes), blk);
    }

    #[test]
    fn test_segment_id_global_order() {
        assert!(SegmentId::new(1) < SegmentId::new(2));
        let bytes = SegmentId::new(99).to_be_bytes();
        assert_eq!(SegmentId::from_be_bytes(bytes), SegmentId::new(99));
    }

    #[test]
    fn test_lsn() {
        let lsn = Lsn::new(1000);
        assert!(lsn.is_valid());
        assert_eq!(lsn.next().as_u64(), 1001);
        assert!(!Lsn::INVALID.is_valid());
    }

    #[test]
    fn test_tenant_id() {
        assert!(TenantId::SYS.is_sys());
        assert!(!TenantId::new(5).is_sys());
    }

    #[test]
    fn test_seq_num() {
        let s = SeqNum::new(3);
        assert_eq!(s.next().as_u16(), 4);
    }
}
