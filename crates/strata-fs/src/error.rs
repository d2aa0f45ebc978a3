//! File service errors.

use thiserror::Error;

use strata_common::StrataError;

/// Errors from the object storage service.
#[derive(Debug, Error)]
pub enum FsError {
    /// Object does not exist.
    #[error("object '{name}' not found")]
    NotFound {
        /// The missing object name.
        name: String,
    },

    /// I/O error from the underlying system.
    #[error("I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Object bytes failed validation.
    #[error("object corruption: {message}")]
    Corruption {
        /// Description of the failure.
        message: String,
    },

    /// A packed location could not be decoded.
    #[error("invalid location: {message}")]
    InvalidLocation {
        /// Description of the failure.
        message: String,
    },
}

impl FsError {
    /// Creates a corruption error.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption {
            message: message.into(),
        }
    }

    /// Creates an invalid-location error.
    #[must_use]
    pub fn invalid_location(message: impl Into<String>) -> Self {
        Self::InvalidLocation {
            message: message.into(),
        }
    }
}

impl From<FsError> for StrataError {
    fn from(err: FsError) -> Self {
        match err {
            FsError::NotFound { name } => StrataError::not_found(format!("object {name}")),
            FsError::Io { source } => StrataError::Io { source },
            FsError::Corruption { message } => StrataError::corruption(message),
            FsError::InvalidLocation { message } => StrataError::corruption(message),
        }
    }
}

/// Result type for file service operations.
pub type FsResult<T> = Result<T, FsError>;
