//! WAL errors.

use thiserror::Error;

use strata_common::types::Lsn;
use strata_common::StrataError;

/// Errors from the write-ahead log.
#[derive(Debug, Error)]
pub enum WalError {
    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// A frame failed validation.
    #[error("WAL corrupted near LSN {lsn}: {reason}")]
    Corrupted {
        /// LSN near the corruption.
        lsn: Lsn,
        /// Description of the failure.
        reason: String,
    },

    /// Invalid configuration.
    #[error("invalid WAL configuration: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// Operation on a closed WAL.
    #[error("WAL is closed")]
    Closed,
}

impl WalError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corrupted(lsn: Lsn, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            lsn,
            reason: reason.into(),
        }
    }
}

impl From<WalError> for StrataError {
    fn from(err: WalError) -> Self {
        match err {
            WalError::Io { source } => StrataError::Io { source },
            WalError::Corrupted { lsn, reason } => {
                StrataError::corruption(format!("WAL near LSN {lsn}: {reason}"))
            }
            WalError::Config { message } => StrataError::invalid_argument(message),
            WalError::Closed => StrataError::internal("WAL is closed"),
        }
    }
}

/// Result type for WAL operations.
pub type WalResult<T> = Result<T, WalError>;
