//! Interfaces of the services the context manager depends on: the global
//! timestamp oracle and the replicated log.

use lstx_common::{MonotonicTs, Scn, TenantId};

use crate::error::TxResult;

/// Client of the global timestamp oracle.
pub trait TsMgr: Send + Sync {
    /// Fetch a global timestamp generated after the local instant `since`.
    ///
    /// Returns the timestamp and the local instant at which it was received,
    /// or [`TxError::GtsNotReady`](crate::TxError::GtsNotReady) when no such
    /// timestamp is available yet.
    fn get_gts(&self, tenant_id: TenantId, since: MonotonicTs) -> TxResult<(Scn, MonotonicTs)>;
}

/// Completion of a start-working log submission: the log position on success.
pub type StartWorkingLogCb = Box<dyn FnOnce(TxResult<Scn>) + Send + 'static>;

/// The slice of the replicated log the context manager talks to.
pub trait TxLogAdapter: Send + Sync {
    /// Submit the start-working log of a new leader epoch.
    ///
    /// Returns the position assigned to the record. `cb` is invoked exactly once
    /// when the record is durable or has been lost, from a thread other than the
    /// caller's and never before this call returns.
    fn submit_start_working_log(&self, epoch: i64, cb: StartWorkingLogCb) -> TxResult<Scn>;

    /// Current replica role: `(is_leader, epoch)`.
    fn get_role(&self) -> TxResult<(bool, i64)>;

    /// Largest position whose outcome is decided.
    fn get_max_decided_scn(&self) -> TxResult<Scn>;
}
