//! Background tasks.
//!
//! Flush tasks turn appendable blocks into persisted ones; merge tasks
//! fold persisted blocks together. Both run under their own transactions
//! and install row transfer tables at commit. Long-lived maintenance runs
//! on a [`worker::Worker`] loop with a stop signal and heartbeat.

pub mod flush;
pub mod merge;
pub mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use strata_common::{StrataError, StrataResult};

pub use flush::{flush_block, flush_block_deletes};
pub use merge::merge_blocks;
pub use worker::Worker;

/// Cooperative cancellation handle checked by long-running operations
/// between units of work.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Fails with `Cancelled` once cancelled.
    pub fn checked(&self) -> StrataResult<()> {
        if self.is_cancelled() {
            Err(StrataError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(token.checked().is_ok());
        token.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.checked(), Err(StrataError::Cancelled)));

        // Clones share the flag.
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
