//! Transaction records.

use std::fmt;

use parking_lot::Mutex;
use strata_common::types::{TenantId, Timestamp, TxnId};

use crate::txn::workspace::Workspace;

/// Lifecycle states.
///
/// ```text
/// Active → Preparing → Prepared → Committed
///    │         │
///    └─────────┴────────────────→ Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting operations.
    Active,
    /// Running prepare validations.
    Preparing,
    /// WAL record durable, apply in progress.
    Prepared,
    /// Terminal: effects visible.
    Committed,
    /// Terminal: effects undone.
    Aborted,
}

impl TxnState {
    /// Returns true for terminal states.
    #[must_use]
    pub fn is_ended(self) -> bool {
        matches!(self, TxnState::Committed | TxnState::Aborted)
    }
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TxnState::Active => "Active",
            TxnState::Preparing => "Preparing",
            TxnState::Prepared => "Prepared",
            TxnState::Committed => "Committed",
            TxnState::Aborted => "Aborted",
        };
        write!(f, "{s}")
    }
}

/// Session identity bound to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessInfo {
    /// Tenant scoping catalog lookups and logtail reads.
    pub tenant: TenantId,
    /// User within the tenant.
    pub user_id: u32,
    /// Role within the tenant.
    pub role_id: u32,
}

impl Default for AccessInfo {
    fn default() -> Self {
        Self {
            tenant: TenantId::SYS,
            user_id: 0,
            role_id: 0,
        }
    }
}

/// How prepare-time dedup treats candidate rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupType {
    /// Full dedup against every visible row.
    #[default]
    Normal,
    /// Skip this transaction's own workspace, for pre-deduped bulk loads.
    FullSkipWorkspace,
    /// Only dedup against rows written after the snapshot, for
    /// replication with an explicit start timestamp.
    Incremental,
}

/// Mutable transaction state behind the txn lock.
#[derive(Debug)]
pub struct TxnCore {
    /// Lifecycle state.
    pub state: TxnState,
    /// Set when prepare starts.
    pub prepare_ts: Option<Timestamp>,
    /// Set in the commit critical section.
    pub commit_ts: Option<Timestamp>,
    /// The write-set.
    pub ws: Workspace,
}

/// A transaction.
#[derive(Debug)]
pub struct Txn {
    id: TxnId,
    start_ts: Timestamp,
    access: AccessInfo,
    dedup: DedupType,
    core: Mutex<TxnCore>,
}

/// Shared transaction handle.
pub type TxnRef = std::sync::Arc<Txn>;

impl Txn {
    /// Creates an active transaction.
    #[must_use]
    pub fn new(id: TxnId, start_ts: Timestamp, access: AccessInfo, dedup: DedupType) -> Self {
        Self {
            id,
            start_ts,
            access,
            dedup,
            core: Mutex::new(TxnCore {
                state: TxnState::Active,
                prepare_ts: None,
                commit_ts: None,
                ws: Workspace::default(),
            }),
        }
    }

    /// The transaction id.
    #[must_use]
    pub fn id(&self) -> TxnId {
        self.id
    }

    /// The snapshot timestamp.
    #[must_use]
    pub fn start_ts(&self) -> Timestamp {
        self.start_ts
    }

    /// The bound session identity.
    #[must_use]
    pub fn access(&self) -> AccessInfo {
        self.access
    }

    /// The dedup mode.
    #[must_use]
    pub fn dedup_type(&self) -> DedupType {
        self.dedup
    }

    /// The guarded mutable state.
    #[must_use]
    pub fn core(&self) -> &Mutex<TxnCore> {
        &self.core
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TxnState {
        self.core.lock().state
    }

    /// The commit timestamp, once committed.
    #[must_use]
    pub fn commit_ts(&self) -> Option<Timestamp> {
        self.core.lock().commit_ts
    }

    /// Runs `f` with the workspace, while the transaction is active.
    pub fn with_ws<T>(
        &self,
        f: impl FnOnce(&mut Workspace) -> T,
    ) -> strata_common::StrataResult<T> {
        let mut core = self.core.lock();
        if core.state != TxnState::Active {
            return Err(strata_common::StrataError::TxnNotFound { txn_id: self.id });
        }
        Ok(f(&mut core.ws))
    }

    /// Fails unless the transaction is still active.
    pub fn ensure_active(&self) -> strata_common::StrataResult<()> {
        if self.state() != TxnState::Active {
            return Err(strata_common::StrataError::TxnNotFound { txn_id: self.id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_basics() {
        let txn = Txn::new(
            TxnId::new(1),
            Timestamp::new(10, 0),
            AccessInfo::default(),
            DedupType::Normal,
        );
        assert_eq!(txn.state(), TxnState::Active);
        assert!(txn.ensure_active().is_ok());

        txn.core().lock().state = TxnState::Committed;
        assert!(txn.ensure_active().is_err());
        assert!(TxnState::Committed.is_ended());
        assert!(!TxnState::Preparing.is_ended());
    }

    #[test]
    fn test_with_ws_rejects_ended() {
        let txn = Txn::new(
            TxnId::new(1),
            Timestamp::ZERO,
            AccessInfo::default(),
            DedupType::Normal,
        );
        txn.core().lock().state = TxnState::Aborted;
        assert!(txn.with_ws(|_| ()).is_err());
    }
}
