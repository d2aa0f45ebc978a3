//! Core type definitions.

mod ids;
mod timestamp;

pub use ids::{BlockId, DatabaseId, Lsn, SegmentId, SeqNum, TableId, TenantId, TxnId};
pub use timestamp::{Timestamp, TsAllocator};
