//! Engine error types.
//!
//! All engine-surface failures flow through [`StrataError`]. Each variant
//! carries typed context; [`ErrorCode`] gives a stable numeric discriminant
//! for programmatic handling.

use std::fmt;
use thiserror::Error;

use crate::types::{BlockId, TxnId};

/// Error codes for categorizing errors.
///
/// These codes are stable across versions and can be used for
/// programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Internal error (bug or precondition violation).
    Internal = 0x0001,
    /// Invalid argument provided.
    InvalidArgument = 0x0002,
    /// Operation was cancelled.
    Cancelled = 0x0003,

    // I/O errors (0x0100 - 0x01FF)
    /// General I/O error.
    Io = 0x0100,
    /// Data corruption detected.
    Corruption = 0x0101,

    // Catalog errors (0x0200 - 0x02FF)
    /// Entry or row absent at the snapshot.
    NotFound = 0x0200,
    /// Duplicate catalog name or primary key.
    DuplicateEntry = 0x0201,
    /// No appendable location exists for the relation.
    AppendableSegmentNotFound = 0x0202,

    // Transaction errors (0x0300 - 0x03FF)
    /// Two transactions raced on the same entry or row.
    WwConflict = 0x0300,
    /// Operation on a terminated transaction.
    TxnNotFound = 0x0301,

    // Probe / task errors (0x0400 - 0x04FF)
    /// Probe inconclusive; caller must perform the exact check.
    ExpectedPossibleDup = 0x0400,
    /// Bounded-wait flush exceeded its budget.
    FlushTimeout = 0x0401,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "I/O",
            0x02 => "Catalog",
            0x03 => "Transaction",
            0x04 => "Task",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for StrataDB.
#[derive(Debug, Error)]
pub enum StrataError {
    /// Entry or row absent at the snapshot.
    #[error("not found: {what}")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// Duplicate catalog name or primary-key dedup failure on append.
    #[error("duplicate entry: {key}")]
    DuplicateEntry {
        /// The duplicated name or key.
        key: String,
    },

    /// Two transactions raced on the same catalog entry or row.
    #[error("write-write conflict on {entity}")]
    WwConflict {
        /// The contended entity.
        entity: String,
    },

    /// Operation on a terminated transaction.
    #[error("transaction {txn_id} not found or already terminated")]
    TxnNotFound {
        /// The transaction.
        txn_id: TxnId,
    },

    /// Append attempted on a relation with no appendable location.
    #[error("no appendable segment")]
    AppendableSegmentNotFound,

    /// Probe inconclusive; the caller must perform the exact check.
    #[error("possible duplicate, exact check required")]
    ExpectedPossibleDup,

    /// Bounded-wait flush exceeded its budget; safe to retry.
    #[error("flush of block {block} timed out after {waited_ms}ms")]
    FlushTimeout {
        /// The block being flushed.
        block: BlockId,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// Internal error - precondition violation, fatal for the txn.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// Operation was cancelled.
    #[error("operation was cancelled")]
    Cancelled,

    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Data corruption detected.
    #[error("data corruption detected: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },
}

impl StrataError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::DuplicateEntry { .. } => ErrorCode::DuplicateEntry,
            Self::WwConflict { .. } => ErrorCode::WwConflict,
            Self::TxnNotFound { .. } => ErrorCode::TxnNotFound,
            Self::AppendableSegmentNotFound => ErrorCode::AppendableSegmentNotFound,
            Self::ExpectedPossibleDup => ErrorCode::ExpectedPossibleDup,
            Self::FlushTimeout { .. } => ErrorCode::FlushTimeout,
            Self::Internal { .. } => ErrorCode::Internal,
            Self::InvalidArgument { .. } => ErrorCode::InvalidArgument,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Io { .. } => ErrorCode::Io,
            Self::Corruption { .. } => ErrorCode::Corruption,
        }
    }

    /// Returns true if this error is safe to retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::FlushTimeout { .. } | Self::Io { .. })
    }

    /// Returns true if this error represents a transaction conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::WwConflict { .. } | Self::DuplicateEntry { .. })
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates a duplicate-entry error.
    #[must_use]
    pub fn duplicate(key: impl Into<String>) -> Self {
        Self::DuplicateEntry { key: key.into() }
    }

    /// Creates a write-write conflict error.
    #[must_use]
    pub fn ww_conflict(entity: impl Into<String>) -> Self {
        Self::WwConflict {
            entity: entity.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates an invalid-argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }
}

/// Result type for engine operations.
pub type StrataResult<T> = Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = StrataError::not_found("table t1");
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.code().category(), "Catalog");

        let err = StrataError::ww_conflict("block 1/0");
        assert_eq!(err.code().category(), "Transaction");
    }

    #[test]
    fn test_error_display() {
        let err = StrataError::TxnNotFound {
            txn_id: TxnId::new(7),
        };
        assert_eq!(err.to_string(), "transaction 7 not found or already terminated");
    }

    #[test]
    fn test_conflict_predicates() {
        assert!(StrataError::ww_conflict("x").is_conflict());
        assert!(StrataError::duplicate("pk=1").is_conflict());
        assert!(!StrataError::not_found("x").is_conflict());
    }

    #[test]
    fn test_retryable() {
        let err = StrataError::FlushTimeout {
            block: BlockId::INVALID,
            waited_ms: 100,
        };
        assert!(err.is_retryable());
        assert!(!StrataError::Cancelled.is_retryable());
    }

    #[test]
    fn test_io_error_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: StrataError = io.into();
        assert_eq!(err.code(), ErrorCode::Io);
    }
}
