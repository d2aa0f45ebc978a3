//! Write-ahead log for StrataDB.
//!
//! The WAL is a sequential log of `(lsn, payload)` frames across rotating
//! segment files. Records are fsynced before an append returns, so a
//! prepared transaction survives a crash. After a checkpoint covers a
//! prefix of the log, [`Wal::truncate_to`] durably drops the covered
//! segments. [`Wal::replay`] feeds surviving records to a callback in LSN
//! order, ignoring a partially-written tail.

mod config;
mod error;
mod record;
mod wal;

pub use config::WalConfig;
pub use error::{WalError, WalResult};
pub use record::{RecordFlags, RecordKind, WalRecord};
pub use wal::{Wal, WalStats};
