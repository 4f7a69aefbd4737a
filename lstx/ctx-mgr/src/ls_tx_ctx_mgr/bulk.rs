use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use lstx_transaction::{CommitCallback, KillTxArg, TxCtx, TxError, TxResult};
use tracing::{info, warn};

use super::LsTxCtxMgr;
use crate::ctx_map::Visit;
use crate::state::{Op, StateHelper};
use crate::time_guard::TimeGuard;

impl<C: TxCtx> LsTxCtxMgr<C> {
    /// Move to the stopped state and kill every context.
    ///
    /// Contexts that exit are dropped from the directory even when retained.
    /// A graceful stop leaves committing transactions alone; [`Self::wait`]
    /// reports when they are gone.
    pub fn stop(&self, graceful: bool) -> TxResult<()> {
        let _tg = TimeGuard::new(self.ls_id, "stop", self.config.slow_op_warn_threshold());
        let mut cbs = Vec::new();
        let ret = {
            let mut guard = self.wlock();
            self.log_writer.stop();
            let mut helper = StateHelper::new(self.ls_id, &mut guard);
            helper.switch_state(Op::Stop).and_then(|()| {
                self.is_leader_serving.store(false, Ordering::Release);
                let ret = self.kill_all_ctx(KillTxArg::new(graceful), &mut cbs);
                if ret.is_err() {
                    helper.restore_state();
                }
                ret
            })
        };
        self.process_callbacks(cbs);
        info!(ls_id = %self.ls_id, graceful, remaining = self.get_tx_ctx_count(), ?ret, "stop done");
        ret
    }

    /// Kill every context without changing the role. Returns whether the
    /// directory is empty afterwards.
    pub fn kill_all_tx(&self, graceful: bool) -> TxResult<bool> {
        let _tg = TimeGuard::new(self.ls_id, "kill_all_tx", self.config.slow_op_warn_threshold());
        let mut cbs = Vec::new();
        let (ret, all_cleaned) = {
            let _guard = self.wlock();
            let ret = self.kill_all_ctx(KillTxArg::new(graceful), &mut cbs);
            (ret, self.get_tx_ctx_count() == 0)
        };
        self.process_callbacks(cbs);
        info!(ls_id = %self.ls_id, graceful, all_cleaned, ?ret, "kill all tx done");
        ret.map(|()| all_cleaned)
    }

    fn kill_all_ctx(&self, arg: KillTxArg, cbs: &mut Vec<CommitCallback>) -> TxResult<()> {
        let mut first_err = None;
        self.ctx_map.for_each(|ctx| {
            if let Err(e) = ctx.kill(&arg, cbs) {
                warn!(ls_id = %self.ls_id, tx_id = %ctx.tx_id(), error = %e, "kill tx ctx failed");
                first_err.get_or_insert(e);
                return Visit::Continue;
            }
            if ctx.is_exiting() {
                self.fold_rec_scn(ctx);
                Visit::Remove
            } else {
                Visit::Continue
            }
        });
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop admitting new transactions. Returns whether no context is left.
    pub fn block(&self) -> TxResult<bool> {
        let mut guard = self.wlock();
        let mut helper = StateHelper::new(self.ls_id, &mut guard);
        helper.switch_state(Op::Block)?;
        let all_cleaned = self.get_tx_ctx_count() == 0;
        info!(ls_id = %self.ls_id, state = %helper.state(), all_cleaned, "block");
        Ok(all_cleaned)
    }

    pub fn online(&self) -> TxResult<()> {
        let mut guard = self.wlock();
        let mut helper = StateHelper::new(self.ls_id, &mut guard);
        helper.switch_state(Op::Online)?;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default();
        self.online_ts.store(now, Ordering::Release);
        info!(ls_id = %self.ls_id, state = %helper.state(), "online");
        Ok(())
    }

    /// Forget the recycle positions of departed contexts, used when the log
    /// stream goes offline.
    pub fn offline(&self) {
        self.aggre.reset();
        info!(ls_id = %self.ls_id, "offline");
    }

    pub fn online_ts(&self) -> i64 {
        self.online_ts.load(Ordering::Acquire)
    }

    /// Check whether a stopped log stream has drained.
    pub fn wait(&self) -> TxResult<()> {
        if !self.is_stopped() {
            return Err(TxError::LsNotStopped(self.ls_id));
        }
        let count = self.get_tx_ctx_count();
        if count > 0 {
            return Err(TxError::Again(format!(
                "log stream {} still has {count} tx ctx",
                self.ls_id
            )));
        }
        self.log_writer.wait()
    }
}
