//! The two concrete states of a block's payload.
//!
//! A block starts appendable and becomes persisted when a flush task
//! commits; the variant value is replaced atomically under the block's
//! write lock.

use strata_common::types::{Timestamp, TxnId};
use strata_common::{StrataError, StrataResult};

use crate::data::appendable::AppendableData;
use crate::data::deletes::DeleteChain;
use crate::data::persisted::PersistedData;

/// A block's payload: in-memory appendable columns or an immutable
/// persisted location.
#[derive(Debug)]
pub enum BlockData {
    /// Still accepting inserts.
    Appendable(AppendableData),
    /// Column bytes immutable in object storage.
    Persisted(PersistedData),
}

impl BlockData {
    /// Returns true while the block accepts appends.
    #[must_use]
    pub fn is_appendable(&self) -> bool {
        matches!(self, Self::Appendable(_))
    }

    /// Returns the appendable state.
    pub fn as_appendable(&self) -> StrataResult<&AppendableData> {
        match self {
            Self::Appendable(data) => Ok(data),
            Self::Persisted(_) => Err(StrataError::internal(
                "block is persisted, appendable state expected",
            )),
        }
    }

    /// Returns the appendable state mutably.
    pub fn as_appendable_mut(&mut self) -> StrataResult<&mut AppendableData> {
        match self {
            Self::Appendable(data) => Ok(data),
            Self::Persisted(_) => Err(StrataError::internal(
                "block is persisted, appendable state expected",
            )),
        }
    }

    /// Returns the persisted state.
    pub fn as_persisted(&self) -> StrataResult<&PersistedData> {
        match self {
            Self::Persisted(data) => Ok(data),
            Self::Appendable(_) => Err(StrataError::internal(
                "block is appendable, persisted state expected",
            )),
        }
    }

    /// Returns the persisted state mutably.
    pub fn as_persisted_mut(&mut self) -> StrataResult<&mut PersistedData> {
        match self {
            Self::Persisted(data) => Ok(data),
            Self::Appendable(_) => Err(StrataError::internal(
                "block is appendable, persisted state expected",
            )),
        }
    }

    /// Total physical rows.
    #[must_use]
    pub fn rows_total(&self) -> u32 {
        match self {
            Self::Appendable(data) => data.rows_total(),
            Self::Persisted(data) => data.rows(),
        }
    }

    /// The block's delete chain, in either state.
    #[must_use]
    pub fn delete_chain(&self) -> &DeleteChain {
        match self {
            Self::Appendable(data) => &data.deletes,
            Self::Persisted(data) => &data.deletes,
        }
    }

    /// The block's delete chain, mutably.
    #[must_use]
    pub fn delete_chain_mut(&mut self) -> &mut DeleteChain {
        match self {
            Self::Appendable(data) => &mut data.deletes,
            Self::Persisted(data) => &mut data.deletes,
        }
    }

    /// Commits pending appends and deletes of `txn_id`.
    pub fn commit_txn(&mut self, txn_id: TxnId, commit_ts: Timestamp) {
        match self {
            Self::Appendable(data) => data.commit_txn(txn_id, commit_ts),
            Self::Persisted(data) => data.deletes.commit_txn(txn_id, commit_ts),
        }
    }

    /// Rolls back pending appends and deletes of `txn_id`.
    pub fn rollback_txn(&mut self, txn_id: TxnId) {
        match self {
            Self::Appendable(data) => data.rollback_txn(txn_id),
            Self::Persisted(data) => data.deletes.rollback_txn(txn_id),
        }
    }
}
