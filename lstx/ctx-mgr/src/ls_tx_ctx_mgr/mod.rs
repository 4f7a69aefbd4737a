//! Transaction context manager of a single log stream.
//!
//! [`LsTxCtxMgr`] owns the context directory and the role state of one log
//! stream. The role state sits behind a reader-writer lock: role transitions
//! and bulk operations take it exclusively, context admission and lookups take
//! it shared. The directory has its own per-bucket locks, so traversals never
//! hold the role lock longer than the operation that started them.

mod bulk;
mod checkpoint;
mod diag;
mod role;

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use lstx_common::{LsId, MonotonicTs, Scn, TenantId, TxId};
use lstx_transaction::{
    CommitCallback, RetainCause, TsMgr, TxCreateArg, TxCtx, TxError, TxLogAdapter, TxResult,
    TxVersionMgr,
};
use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::{debug, error, info, warn};

use crate::aggre::RecScnAggregate;
use crate::config::LsTxCtxMgrConfig;
use crate::ctx_map::{CtxMap, CtxRef, Visit};
use crate::iter::LsTxCtxIter;
use crate::log_writer::LsLogWriter;
use crate::state::State;

pub use diag::SubmitLogFailure;

pub struct LsTxCtxMgr<C> {
    tenant_id: TenantId,
    ls_id: LsId,
    config: LsTxCtxMgrConfig,
    state: RwLock<State>,
    ctx_map: CtxMap<C>,
    aggre: RecScnAggregate,
    log_writer: LsLogWriter,
    ts_mgr: Arc<dyn TsMgr>,
    version_mgr: Arc<TxVersionMgr>,
    // ---- Leader takeover ----
    is_leader_serving: AtomicBool,
    leader_takeover_ts: AtomicU64,
    /// Largest commit version replayed as follower; 0 if none.
    max_replay_commit_version: AtomicU64,
    online_ts: AtomicI64,
    last_stat_log_ts: AtomicU64,
    self_ref: Weak<Self>,
}

impl<C: TxCtx> LsTxCtxMgr<C> {
    pub fn new(
        tenant_id: TenantId,
        ls_id: LsId,
        config: LsTxCtxMgrConfig,
        ts_mgr: Arc<dyn TsMgr>,
        log_adapter: Arc<dyn TxLogAdapter>,
        version_mgr: Arc<TxVersionMgr>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            tenant_id,
            ls_id,
            ctx_map: CtxMap::new(config.ctx_map_bucket_count),
            config,
            state: RwLock::new(State::Invalid),
            aggre: RecScnAggregate::new(),
            log_writer: LsLogWriter::new(ls_id, log_adapter),
            ts_mgr,
            version_mgr,
            is_leader_serving: AtomicBool::new(false),
            leader_takeover_ts: AtomicU64::new(0),
            max_replay_commit_version: AtomicU64::new(0),
            online_ts: AtomicI64::new(0),
            last_stat_log_ts: AtomicU64::new(0),
            self_ref: self_ref.clone(),
        })
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn ls_id(&self) -> LsId {
        self.ls_id
    }

    pub fn config(&self) -> &LsTxCtxMgrConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        *self.state.read()
    }

    pub fn is_master(&self) -> bool {
        self.state().is_master()
    }

    pub fn is_follower(&self) -> bool {
        self.state().is_follower()
    }

    pub fn is_blocked(&self) -> bool {
        self.state().is_blocked()
    }

    pub fn is_stopped(&self) -> bool {
        self.state().is_stopped()
    }

    pub fn is_leader_serving(&self) -> bool {
        self.is_leader_serving.load(Ordering::Acquire)
    }

    /// Number of contexts in the directory.
    pub fn get_tx_ctx_count(&self) -> usize {
        self.ctx_map.count()
    }

    /// Number of context objects still alive, including deleted ones that are
    /// still referenced.
    pub fn get_total_tx_ctx_count(&self) -> usize {
        self.ctx_map.total_count()
    }

    pub fn iter_tx_ctx(&self) -> LsTxCtxIter<'_, C> {
        LsTxCtxIter::new(&self.ctx_map)
    }

    /// Take the role lock exclusively, backing off between bounded attempts.
    fn wlock(&self) -> RwLockWriteGuard<'_, State> {
        let threshold = self.config.wlock_try_threshold();
        loop {
            if let Some(guard) = self.state.try_write_for(threshold) {
                return guard;
            }
            warn!(ls_id = %self.ls_id, ?threshold, "acquire role lock timed out, retrying");
            thread::sleep(self.config.wlock_retry_interval());
        }
    }

    /// Creates the context for `arg.tx_id`, or returns the existing one.
    ///
    /// The boolean is true when the context already existed. Outside replay the
    /// log stream must be an unblocked leader that has finished its timestamp
    /// synchronisation.
    pub fn create_tx_ctx(&self, arg: &TxCreateArg) -> TxResult<(CtxRef<C>, bool)> {
        if !arg.is_valid() || arg.ls_id != self.ls_id {
            return Err(TxError::InvalidArgument(format!("{arg:?}")));
        }
        let state = self.state.read();
        if !arg.for_replay && !state.is_master() {
            debug!(ls_id = %self.ls_id, tx_id = %arg.tx_id, state = %*state, "create tx ctx on non-master");
            return Err(TxError::NotMaster);
        }
        if !arg.for_replay && state.is_blocked() {
            return Err(TxError::Blocked(self.ls_id));
        }
        if state.is_stopped() {
            return Err(TxError::Stopped(self.ls_id));
        }
        if state.is_master() {
            self.try_wait_gts_and_inc_max_commit_ts()?;
        }
        let epoch = if arg.for_replay {
            0
        } else {
            let (is_leader, epoch) = self.log_writer.adapter().get_role()?;
            if !is_leader {
                return Err(TxError::NotMaster);
            }
            epoch
        };
        let (ctx, existed) = self.ctx_map.insert_and_get(
            arg.tx_id,
            || C::init(arg, epoch),
            |ctx| {
                if arg.for_replay {
                    return Ok(());
                }
                ctx.start_trans().inspect_err(|e| {
                    warn!(ls_id = %self.ls_id, tx_id = %arg.tx_id, error = %e, "start trans failed");
                })
            },
        )?;
        debug!(ls_id = %self.ls_id, tx_id = %arg.tx_id, existed, "create tx ctx");
        Ok((ctx, existed))
    }

    pub fn get_tx_ctx(&self, tx_id: TxId, for_replay: bool) -> TxResult<CtxRef<C>> {
        let state = self.state.read();
        if !for_replay && state.is_stopped() {
            return Err(TxError::Stopped(self.ls_id));
        }
        if !for_replay && !state.is_master() {
            return Err(TxError::NotMaster);
        }
        self.ctx_map
            .get(tx_id)
            .ok_or(TxError::CtxNotExist(tx_id))
    }

    /// Look a context up without taking the role lock, as replay does.
    pub fn get_tx_ctx_directly(&self, tx_id: TxId) -> TxResult<CtxRef<C>> {
        self.ctx_map
            .get(tx_id)
            .ok_or(TxError::CtxNotExist(tx_id))
    }

    pub fn revert_tx_ctx(&self, ctx: CtxRef<C>) {
        ctx.revert();
    }

    /// Delete a context from the directory unless something retains it.
    pub fn del_tx_ctx(&self, ctx: &CtxRef<C>) -> TxResult<()> {
        let cause = ctx.retain_cause();
        if cause != RetainCause::Unknown {
            info!(ls_id = %self.ls_id, tx_id = %ctx.tx_id(), %cause, "can not del a retained ctx");
            return Ok(());
        }
        self.fold_rec_scn(ctx);
        if !self.ctx_map.del(ctx) {
            error!(ls_id = %self.ls_id, tx_id = %ctx.tx_id(), "deleted ctx is not in the directory");
            return Err(TxError::Unexpected(format!(
                "tx ctx {} is not in the directory of log stream {}",
                ctx.tx_id(),
                self.ls_id
            )));
        }
        Ok(())
    }

    /// Account for the recycle position of a context leaving the directory.
    fn fold_rec_scn(&self, ctx: &C) {
        if let Some(scn) = ctx.rec_scn() {
            self.aggre.update(scn);
        }
    }

    /// Raise the largest commit version replayed as follower.
    pub fn update_max_replay_commit_version(&self, version: Scn) {
        if !version.is_max() {
            self.max_replay_commit_version
                .fetch_max(version.raw(), Ordering::AcqRel);
        }
    }

    pub fn max_replay_commit_version(&self) -> Option<Scn> {
        match self.max_replay_commit_version.load(Ordering::Acquire) {
            0 => None,
            v => Some(Scn::new(v)),
        }
    }

    pub fn leader_takeover_ts(&self) -> MonotonicTs {
        MonotonicTs::new(self.leader_takeover_ts.load(Ordering::Acquire))
    }

    /// Visit every context, returning the first failure once all were visited.
    fn for_each_ctx(&self, mut f: impl FnMut(&C) -> TxResult<()>) -> TxResult<()> {
        let mut first_err = None;
        self.ctx_map.for_each(|ctx| {
            if let Err(e) = f(ctx) {
                warn!(ls_id = %self.ls_id, tx_id = %ctx.tx_id(), error = %e, "visit tx ctx failed");
                first_err.get_or_insert(e);
            }
            Visit::Continue
        });
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn process_callbacks(&self, cbs: Vec<CommitCallback>) {
        if !cbs.is_empty() {
            debug!(ls_id = %self.ls_id, count = cbs.len(), "run commit callbacks");
        }
        for cb in cbs {
            cb.callback();
        }
    }
}
