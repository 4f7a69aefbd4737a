//! Transaction context trait and related functionality
//!
//! A transaction context is the per-transaction, per-log-stream object that runs
//! the commit protocol. The context manager never looks inside it; it only
//! creates contexts, routes lookups to them and drives the hooks declared here
//! during role changes, checkpoints and bulk shutdown.

use std::fmt;
use std::io::Write;

use lstx_common::{LsId, Scn, TabletId, TenantId, TxId};
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::TxResult;

/// Arguments needed to create a transaction context.
#[derive(Debug, Clone)]
pub struct TxCreateArg {
    pub tenant_id: TenantId,
    /// Address of the node coordinating the transaction.
    pub scheduler: String,
    pub session_id: u32,
    pub tx_id: TxId,
    pub ls_id: LsId,
    /// Absolute expiry time of the transaction, in microseconds.
    pub trans_expired_time: i64,
    pub cluster_version: u64,
    pub cluster_id: i64,
    /// Set when the context is created while replaying the log as a follower.
    pub for_replay: bool,
}

impl TxCreateArg {
    pub fn new(tenant_id: TenantId, ls_id: LsId, tx_id: TxId, for_replay: bool) -> Self {
        Self {
            tenant_id,
            scheduler: String::from("127.0.0.1:2882"),
            session_id: 0,
            tx_id,
            ls_id,
            trans_expired_time: i64::MAX,
            cluster_version: 1,
            cluster_id: 1,
            for_replay,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.tx_id.is_valid() && self.ls_id.is_valid() && self.trans_expired_time > 0
    }
}

/// Arguments of a forced termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillTxArg {
    /// A graceful kill leaves transactions that are already committing alone.
    pub graceful: bool,
}

impl KillTxArg {
    pub fn new(graceful: bool) -> Self {
        Self { graceful }
    }
}

/// Why a finished context must stay in the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RetainCause {
    /// Nothing retains the context; it may be deleted once finished.
    #[default]
    Unknown,
    /// Kept until the redo of the transaction can no longer be replayed.
    Replay,
    /// Kept for diagnostics.
    Diagnostic,
}

/// Notification produced by a context that must run after every lock held by
/// the context manager has been released.
pub struct CommitCallback {
    tx_id: TxId,
    action: Box<dyn FnOnce() + Send>,
}

impl CommitCallback {
    pub fn new(tx_id: TxId, action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            tx_id,
            action: Box::new(action),
        }
    }

    pub fn tx_id(&self) -> TxId {
        self.tx_id
    }

    pub fn callback(self) {
        (self.action)()
    }
}

impl fmt::Debug for CommitCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitCallback")
            .field("tx_id", &self.tx_id)
            .finish_non_exhaustive()
    }
}

/// Which log a context is asked to flush during a traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SubmitLogKind {
    Redo,
    Next,
}

/// Coarse life phase of a transaction as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum TxPhase {
    Active,
    Prepared,
    Committed,
    Aborted,
}

/// Transaction status record handed to [`TxDataCheck`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxData {
    pub tx_id: TxId,
    pub phase: TxPhase,
    pub commit_version: Option<Scn>,
    pub start_scn: Option<Scn>,
    pub end_scn: Option<Scn>,
}

/// Visitor over the status record of a single transaction.
pub trait TxDataCheck {
    fn check(&mut self, data: &TxData) -> TxResult<()>;
}

/// Statistics snapshot of one context, used by diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxCtxStat {
    pub tx_id: TxId,
    pub ls_id: LsId,
    pub tenant_id: TenantId,
    pub phase: TxPhase,
    pub is_exiting: bool,
    pub for_replay: bool,
    pub retain_cause: RetainCause,
    pub rec_scn: Option<Scn>,
    pub min_undecided_scn: Option<Scn>,
    pub prepare_version: Option<Scn>,
    pub ref_count: i64,
}

/// One lock held by a transaction, used by diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLockStat {
    pub tx_id: TxId,
    pub ls_id: LsId,
    pub tablet_id: TabletId,
    pub schema_version: i64,
    pub modify_time: i64,
}

/// Trait implemented by per-transaction contexts.
///
/// Every hook except [`TxCtx::init`] may be called concurrently from several
/// threads; implementations synchronise internally. Hooks with a default
/// implementation are optional for contexts that have nothing to do there.
pub trait TxCtx: fmt::Debug + Send + Sync + 'static {
    /// Build and initialise a context. `epoch` is the leader epoch reported by
    /// the log layer, or 0 when the context is created for replay.
    fn init(arg: &TxCreateArg, epoch: i64) -> TxResult<Self>
    where
        Self: Sized;

    fn tx_id(&self) -> TxId;

    /// Start the transaction once the context is visible in the directory.
    fn start_trans(&self) -> TxResult<()>;

    /// Whether the transaction has finished and the context is on its way out.
    fn is_exiting(&self) -> bool;

    fn retain_cause(&self) -> RetainCause;

    /// Minimum log position this context still needs for recovery, if any.
    fn rec_scn(&self) -> Option<Scn>;

    /// Minimum log position whose outcome the context has not decided yet.
    fn min_undecided_scn(&self) -> Option<Scn>;

    /// Prepare version of a prepared but uncommitted transaction.
    fn min_prepare_version(&self) -> Option<Scn>;

    fn min_start_scn(&self) -> Option<Scn> {
        None
    }

    /// Terminate the transaction. Callbacks that must run outside the manager
    /// lock are pushed onto `cbs`.
    fn kill(&self, arg: &KillTxArg, cbs: &mut Vec<CommitCallback>) -> TxResult<()>;

    fn switch_to_leader(&self, _start_working_scn: Scn) -> TxResult<()> {
        Ok(())
    }

    fn resume_leader(&self, _start_working_scn: Scn) -> TxResult<()> {
        Ok(())
    }

    fn switch_to_follower_forcedly(&self, _cbs: &mut Vec<CommitCallback>) -> TxResult<()> {
        Ok(())
    }

    fn switch_to_follower_gracefully(&self, _cbs: &mut Vec<CommitCallback>) -> TxResult<()> {
        Ok(())
    }

    fn replay_start_working_log(&self, _start_working_scn: Scn) -> TxResult<()> {
        Ok(())
    }

    /// Called once the transaction context table has been checkpointed.
    fn on_tx_ctx_table_flushed(&self) -> TxResult<()> {
        Ok(())
    }

    fn submit_log(&self, _kind: SubmitLogKind) -> TxResult<()> {
        Ok(())
    }

    fn check_with_tx_data(&self, checker: &mut dyn TxDataCheck) -> TxResult<()>;

    fn dump(&self, out: &mut dyn Write) -> TxResult<()>;

    /// Whether the transaction wrote `tablet` under a schema older than
    /// `schema_version` and has not committed yet.
    fn check_modify_schema_elapsed(&self, _tablet: TabletId, _schema_version: i64) -> bool {
        false
    }

    /// Whether the transaction wrote `tablet` before `timestamp` and has not
    /// committed yet.
    fn check_modify_time_elapsed(&self, _tablet: TabletId, _timestamp: i64) -> bool {
        false
    }

    fn stat(&self) -> TxCtxStat;

    fn lock_stats(&self) -> Vec<TxLockStat> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[test]
    fn test_create_arg_validation() {
        let arg = TxCreateArg::new(1, LsId::new(1), TxId::new(9), false);
        assert!(arg.is_valid());
        let arg = TxCreateArg::new(1, LsId::INVALID, TxId::new(9), false);
        assert!(!arg.is_valid());
        let arg = TxCreateArg::new(1, LsId::new(1), TxId::INVALID, true);
        assert!(!arg.is_valid());
    }

    #[test]
    fn test_commit_callback_runs_once() {
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        let cb = CommitCallback::new(TxId::new(3), move || flag.store(true, Ordering::SeqCst));
        assert_eq!(cb.tx_id(), TxId::new(3));
        cb.callback();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_retain_cause_display() {
        assert_eq!(RetainCause::Unknown.to_string(), "UNKNOWN");
        assert_eq!(RetainCause::Diagnostic.to_string(), "DIAGNOSTIC");
    }
}
