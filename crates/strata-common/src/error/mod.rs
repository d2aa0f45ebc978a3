//! Error types.

mod engine;

pub use engine::{ErrorCode, StrataError, StrataResult};
