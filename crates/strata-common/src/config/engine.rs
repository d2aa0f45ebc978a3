//! Engine configuration structures.

use std::time::Duration;

use crate::error::{StrataError, StrataResult};

/// Checkpoint scheduling configuration.
#[derive(Debug, Clone)]
pub struct CheckpointConfig {
    /// Interval between incremental checkpoint attempts.
    pub interval: Duration,
    /// Minimum number of dirty blocks that forces an incremental
    /// checkpoint before the interval elapses.
    pub dirty_threshold: usize,
    /// Number of incremental checkpoints folded into a global one.
    pub global_every: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            dirty_threshold: 64,
            global_every: 10,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Checkpoint scheduling.
    pub checkpoint: CheckpointConfig,
    /// Target false-positive rate for persisted primary-key bloom filters.
    pub bloom_fpp: f64,
    /// Budget for a bounded-wait flush before `FlushTimeout` is returned.
    pub flush_timeout: Duration,
    /// Transient I/O failures inside flush/merge/checkpoint tasks are
    /// retried this many times before being promoted to `Internal`.
    pub io_retry_limit: u32,
    /// Background worker tick.
    pub worker_tick: Duration,
    /// Capacity of the decoded-column LRU cache, in entries.
    pub column_cache_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint: CheckpointConfig::default(),
            bloom_fpp: 0.01,
            flush_timeout: Duration::from_secs(10),
            io_retry_limit: 3,
            worker_tick: Duration::from_millis(100),
            column_cache_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> StrataResult<()> {
        if !(self.bloom_fpp > 0.0 && self.bloom_fpp < 1.0) {
            return Err(StrataError::invalid_argument(format!(
                "bloom_fpp must be in (0, 1), got {}",
                self.bloom_fpp
            )));
        }
        if self.checkpoint.global_every == 0 {
            return Err(StrataError::invalid_argument(
                "checkpoint.global_every must be at least 1",
            ));
        }
        if self.column_cache_capacity == 0 {
            return Err(StrataError::invalid_argument(
                "column_cache_capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_bad_bloom_fpp() {
        let cfg = EngineConfig {
            bloom_fpp: 1.5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_bad_global_every() {
        let mut cfg = EngineConfig::default();
        cfg.checkpoint.global_every = 0;
        assert!(cfg.validate().is_err());
    }
}
