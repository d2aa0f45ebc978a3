//! WAL configuration.

use std::path::PathBuf;

use crate::error::{WalError, WalResult};

/// Write-ahead log configuration.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory holding segment files.
    pub dir: PathBuf,
    /// Segment rotation threshold in bytes.
    pub segment_size: u64,
    /// Whether appends fsync before returning. Only tests turn this off.
    pub sync_on_append: bool,
}

impl WalConfig {
    /// Creates a configuration with defaults for the given directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            segment_size: 64 * 1024 * 1024,
            sync_on_append: true,
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> WalResult<()> {
        if self.dir.as_os_str().is_empty() {
            return Err(WalError::config("dir must not be empty"));
        }
        if self.segment_size < 4096 {
            return Err(WalError::config(format!(
                "segment_size must be at least 4096, got {}",
                self.segment_size
            )));
        }
        Ok(())
    }
}
