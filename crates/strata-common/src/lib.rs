//! Shared foundation for StrataDB.
//!
//! This crate provides the types used across every other StrataDB crate:
//!
//! - Typed identifiers ([`types::DatabaseId`], [`types::TableId`],
//!   [`types::SegmentId`], [`types::BlockId`], ...)
//! - The hybrid-logical [`types::Timestamp`] and its allocator
//! - The [`Sequence`] id service
//! - The [`error::StrataError`] error type
//! - Engine configuration

pub mod config;
pub mod constants;
pub mod error;
pub mod sequence;
pub mod types;

pub use error::{StrataError, StrataResult};
pub use sequence::Sequence;
