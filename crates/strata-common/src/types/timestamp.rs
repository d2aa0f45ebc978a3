//! Hybrid-logical timestamps.
//!
//! A [`Timestamp`] combines wall-clock nanoseconds with a logical counter,
//! giving a strict total order that advances even when the physical clock
//! stalls. Every committed transaction, catalog chain node, and checkpoint
//! window boundary is stamped with one.
//!
//! On a local event the allocator takes
//! `physical = max(wall_ns, last.physical)` and bumps the logical counter
//! when the physical part did not advance, so two calls never return the
//! same value.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A hybrid-logical timestamp: physical nanoseconds plus a logical counter.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Physical time in nanoseconds since the UNIX epoch.
    pub physical: i64,
    /// Logical counter for events at the same physical time.
    pub logical: u32,
}

impl Timestamp {
    /// The zero/minimum timestamp.
    pub const ZERO: Self = Self {
        physical: 0,
        logical: 0,
    };

    /// The maximum timestamp.
    pub const MAX: Self = Self {
        physical: i64::MAX,
        logical: u32::MAX,
    };

    /// Creates a new timestamp.
    #[inline]
    #[must_use]
    pub const fn new(physical: i64, logical: u32) -> Self {
        Self { physical, logical }
    }

    /// Returns the minimal timestamp strictly greater than this one.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        if self.logical == u32::MAX {
            Self {
                physical: self.physical + 1,
                logical: 0,
            }
        } else {
            Self {
                physical: self.physical,
                logical: self.logical + 1,
            }
        }
    }

    /// Checks if this timestamp is zero.
    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.physical == 0 && self.logical == 0
    }

    /// Converts to bytes (12 bytes, big-endian, order-preserving).
    #[must_use]
    pub fn to_be_bytes(self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[..8].copy_from_slice(&self.physical.to_be_bytes());
        out[8..].copy_from_slice(&self.logical.to_be_bytes());
        out
    }

    /// Creates a timestamp from bytes (big-endian).
    #[must_use]
    pub fn from_be_bytes(bytes: [u8; 12]) -> Self {
        let mut p = [0u8; 8];
        p.copy_from_slice(&bytes[..8]);
        let mut l = [0u8; 4];
        l.copy_from_slice(&bytes[8..]);
        Self {
            physical: i64::from_be_bytes(p),
            logical: u32::from_be_bytes(l),
        }
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ts({}.{})", self.physical, self.logical)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.physical, self.logical)
    }
}

/// Allocator of strictly increasing timestamps.
///
/// Thread-safe; the read-modify-write is guarded by a mutex, matching the
/// short critical section the commit pipeline needs.
pub struct TsAllocator {
    last: Mutex<Timestamp>,
}

impl TsAllocator {
    /// Creates a new allocator starting at the current wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Timestamp::new(Self::wall_ns(), 0)),
        }
    }

    /// Returns the current wall clock in nanoseconds.
    #[inline]
    fn wall_ns() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0)
    }

    /// Allocates the next timestamp, strictly greater than every previous
    /// allocation and every timestamp passed to [`TsAllocator::advance_to`].
    pub fn alloc(&self) -> Timestamp {
        let mut last = self.last.lock();
        let wall = Self::wall_ns();
        let ts = if wall > last.physical {
            Timestamp::new(wall, 0)
        } else {
            last.next()
        };
        *last = ts;
        ts
    }

    /// Returns the last allocated timestamp without advancing.
    pub fn peek(&self) -> Timestamp {
        *self.last.lock()
    }

    /// Advances the allocator past `ts`, so subsequent allocations are
    /// strictly greater. Used when replaying committed state on restart.
    pub fn advance_to(&self, ts: Timestamp) {
        let mut last = self.last.lock();
        if ts > *last {
            *last = ts;
        }
    }
}

impl Default for TsAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TsAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsAllocator")
            .field("last", &*self.last.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_ordering() {
        let a = Timestamp::new(100, 0);
        let b = Timestamp::new(100, 1);
        let c = Timestamp::new(101, 0);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_timestamp_next_is_minimal_successor() {
        let a = Timestamp::new(100, 7);
        let n = a.next();
        assert!(n > a);
        assert_eq!(n, Timestamp::new(100, 8));

        let rollover = Timestamp::new(100, u32::MAX).next();
        assert_eq!(rollover, Timestamp::new(101, 0));
    }

    #[test]
    fn test_timestamp_bytes_roundtrip() {
        let ts = Timestamp::new(1_234_567_890, 42);
        assert_eq!(Timestamp::from_be_bytes(ts.to_be_bytes()), ts);
    }

    #[test]
    fn test_allocator_monotonic() {
        let alloc = TsAllocator::new();
        let mut prev = alloc.alloc();
        for _ in 0..1000 {
            let next = alloc.alloc();
            assert!(next > prev, "timestamps must be strictly increasing");
            prev = next;
        }
    }

    #[test]
    fn test_allocator_advance_to() {
        let alloc = TsAllocator::new();
        let far = Timestamp::new(i64::MAX - 1, 0);
        alloc.advance_to(far);
        assert!(alloc.alloc() > far);
    }

    #[test]
    fn test_allocator_concurrent_unique() {
        use std::sync::Arc;
        use std::thread;

        let alloc = Arc::new(TsAllocator::new());
        let mut handles = vec![];
        for _ in 0..8 {
            let alloc = Arc::clone(&alloc);
            handles.push(thread::spawn(move || {
                (0..200).map(|_| alloc.alloc()).collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<Timestamp> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let len = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), len, "all timestamps should be unique");
    }
}
