//! The id allocation service.
//!
//! One [`Sequence`] instance per engine owns an atomic counter per id
//! class. Seeds are injectable so tests and restart replay can resume
//! allocation above everything already in use.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::{DatabaseId, SegmentId, TableId, TxnId};

/// Atomic id counters, one per id class.
#[derive(Debug)]
pub struct Sequence {
    next_database: AtomicU64,
    next_table: AtomicU64,
    next_segment: AtomicU64,
    next_txn: AtomicU64,
}

impl Sequence {
    /// Creates a sequence with default seeds. Database ids start at 2
    /// because id 1 is the reserved system database.
    #[must_use]
    pub fn new() -> Self {
        Self::with_seeds(2, 1, 1, 1)
    }

    /// Creates a sequence with explicit seeds for each id class.
    #[must_use]
    pub fn with_seeds(database: u64, table: u64, segment: u64, txn: u64) -> Self {
        Self {
            next_database: AtomicU64::new(database),
            next_table: AtomicU64::new(table),
            next_segment: AtomicU64::new(segment),
            next_txn: AtomicU64::new(txn),
        }
    }

    /// Allocates the next database id.
    pub fn next_database_id(&self) -> DatabaseId {
        DatabaseId::new(self.next_database.fetch_add(1, Ordering::SeqCst))
    }

    /// Allocates the next table id.
    pub fn next_table_id(&self) -> TableId {
        TableId::new(self.next_table.fetch_add(1, Ordering::SeqCst))
    }

    /// Allocates the next segment id. Monotone, so segment ids sort
    /// globally in allocation order.
    pub fn next_segment_id(&self) -> SegmentId {
        SegmentId::new(self.next_segment.fetch_add(1, Ordering::SeqCst) as u128)
    }

    /// Allocates the next transaction id.
    pub fn next_txn_id(&self) -> TxnId {
        TxnId::new(self.next_txn.fetch_add(1, Ordering::SeqCst))
    }

    /// Raises the database seed so future allocations are above `floor`.
    pub fn observe_database_id(&self, floor: DatabaseId) {
        self.next_database
            .fetch_max(floor.as_u64() + 1, Ordering::SeqCst);
    }

    /// Raises the table seed so future allocations are above `floor`.
    pub fn observe_table_id(&self, floor: TableId) {
        self.next_table
            .fetch_max(floor.as_u64() + 1, Ordering::SeqCst);
    }

    /// Raises the segment seed so future allocations are above `floor`.
    pub fn observe_segment_id(&self, floor: SegmentId) {
        self.next_segment
            .fetch_max(floor.as_u128() as u64 + 1, Ordering::SeqCst);
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_monotone() {
        let seq = Sequence::new();
        let a = seq.next_table_id();
        let b = seq.next_table_id();
        assert!(b > a);

        let s1 = seq.next_segment_id();
        let s2 = seq.next_segment_id();
        assert!(s2 > s1);
    }

    #[test]
    fn test_sequence_seeds() {
        let seq = Sequence::with_seeds(10, 20, 30, 40);
        assert_eq!(seq.next_database_id().as_u64(), 10);
        assert_eq!(seq.next_table_id().as_u64(), 20);
        assert_eq!(seq.next_segment_id().as_u128(), 30);
        assert_eq!(seq.next_txn_id().as_u64(), 40);
    }

    #[test]
    fn test_sequence_observe() {
        let seq = Sequence::new();
        seq.observe_table_id(TableId::new(100));
        assert_eq!(seq.next_table_id().as_u64(), 101);
        // Observing a smaller floor never regresses the counter.
        seq.observe_table_id(TableId::new(5));
        assert_eq!(seq.next_table_id().as_u64(), 102);
    }
}
