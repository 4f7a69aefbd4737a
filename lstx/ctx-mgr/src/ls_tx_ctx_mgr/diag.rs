//! Traversals serving schema changes, log submission and diagnostics.

use std::io::Write;
use std::sync::atomic::Ordering;

use itertools::Itertools;
use lstx_common::{MonotonicTs, TabletId, TxId};
use lstx_transaction::{SubmitLogKind, TxCtx, TxCtxStat, TxDataCheck, TxError, TxLockStat, TxResult};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::LsTxCtxMgr;
use crate::ctx_map::Visit;
use crate::stat::LsTxCtxMgrStat;
use crate::time_guard::TimeGuard;

/// A context refused to submit its log during a traversal.
#[derive(Error, Debug)]
#[error("tx {tx_id} failed to submit log")]
pub struct SubmitLogFailure {
    pub tx_id: TxId,
    #[source]
    pub source: TxError,
}

impl<C: TxCtx> LsTxCtxMgr<C> {
    /// Find an uncommitted transaction that wrote `tablet` under a schema
    /// version older than `schema_version`.
    pub fn check_modify_schema_elapsed(
        &self,
        tablet: TabletId,
        schema_version: i64,
    ) -> Option<TxId> {
        let _tg = TimeGuard::new(
            self.ls_id,
            "check_modify_schema_elapsed",
            self.config.slow_op_warn_threshold(),
        );
        let mut blocking = None;
        self.ctx_map.for_each(|ctx| {
            if ctx.check_modify_schema_elapsed(tablet, schema_version) {
                blocking = Some(ctx.tx_id());
                Visit::Stop
            } else {
                Visit::Continue
            }
        });
        debug!(ls_id = %self.ls_id, %tablet, schema_version, ?blocking, "check modify schema elapsed");
        blocking
    }

    /// Find an uncommitted transaction that wrote `tablet` before `timestamp`.
    pub fn check_modify_time_elapsed(&self, tablet: TabletId, timestamp: i64) -> Option<TxId> {
        let _tg = TimeGuard::new(
            self.ls_id,
            "check_modify_time_elapsed",
            self.config.slow_op_warn_threshold(),
        );
        let mut blocking = None;
        self.ctx_map.for_each(|ctx| {
            if ctx.check_modify_time_elapsed(tablet, timestamp) {
                blocking = Some(ctx.tx_id());
                Visit::Stop
            } else {
                Visit::Continue
            }
        });
        blocking
    }

    /// Ask every context to submit its pending redo. Stops at the first
    /// failure. Does nothing unless the log stream is leader.
    pub fn traverse_tx_to_submit_redo_log(&self) -> Result<(), SubmitLogFailure> {
        self.traverse_tx_to_submit_log(SubmitLogKind::Redo)
    }

    pub fn traverse_tx_to_submit_next_log(&self) -> Result<(), SubmitLogFailure> {
        self.traverse_tx_to_submit_log(SubmitLogKind::Next)
    }

    fn traverse_tx_to_submit_log(&self, kind: SubmitLogKind) -> Result<(), SubmitLogFailure> {
        let state = self.state.read();
        if !state.is_master() {
            return Ok(());
        }
        let mut failure = None;
        self.ctx_map.for_each(|ctx| match ctx.submit_log(kind) {
            Ok(()) => Visit::Continue,
            Err(source) => {
                failure = Some(SubmitLogFailure {
                    tx_id: ctx.tx_id(),
                    source,
                });
                Visit::Stop
            }
        });
        match failure {
            Some(failure) => {
                warn!(ls_id = %self.ls_id, %kind, tx_id = %failure.tx_id, error = %failure.source, "failed to submit log");
                Err(failure)
            }
            None => Ok(()),
        }
    }

    /// Run `checker` over the status of `tx_id`. Does not take the role lock.
    pub fn check_with_tx_data(&self, tx_id: TxId, checker: &mut dyn TxDataCheck) -> TxResult<()> {
        let ctx = self.get_tx_ctx_directly(tx_id)?;
        ctx.check_with_tx_data(checker)
    }

    /// Dump `tx_id` into `out`. Does not take the role lock.
    pub fn dump_single_tx_data(&self, tx_id: TxId, out: &mut dyn Write) -> TxResult<()> {
        let ctx = self.get_tx_ctx_directly(tx_id)?;
        ctx.dump(out)
    }

    pub fn iterate_tx_id(&self) -> Vec<TxId> {
        self.iter_tx_ctx().map(|ctx| ctx.tx_id()).sorted().collect()
    }

    pub fn iterate_tx_lock_stat(&self) -> Vec<TxLockStat> {
        self.iter_tx_ctx()
            .flat_map(|ctx| ctx.lock_stats())
            .sorted_by_key(|stat| (stat.tx_id, stat.tablet_id))
            .collect()
    }

    pub fn iterate_tx_ctx_stat(&self) -> Vec<TxCtxStat> {
        self.iter_tx_ctx()
            .map(|ctx| {
                let mut stat = ctx.stat();
                // Leave out the handle held by this iteration.
                stat.ref_count = ctx.ref_count() - 1;
                stat
            })
            .sorted_by_key(|stat| stat.tx_id)
            .collect()
    }

    /// Dump up to `max` contexts into `out`, returning how many were dumped.
    pub fn dump_all_tx_ctx(&self, max: usize, out: &mut dyn Write) -> TxResult<usize> {
        let mut dumped = 0;
        for ctx in self.iter_tx_ctx().take(max) {
            ctx.dump(out)?;
            dumped += 1;
        }
        Ok(dumped)
    }

    /// Log up to the configured number of contexts.
    pub fn print_all_tx_ctx(&self, verbose: bool) {
        let max = self.config.max_print_tx_ctx;
        info!(ls_id = %self.ls_id, stat = ?self.stat(), "print all tx ctx");
        for ctx in self.iter_tx_ctx().take(max) {
            if verbose {
                let mut buf = Vec::new();
                match ctx.dump(&mut buf) {
                    Ok(()) => info!(ls_id = %self.ls_id, "{}", String::from_utf8_lossy(&buf).trim_end()),
                    Err(e) => warn!(ls_id = %self.ls_id, tx_id = %ctx.tx_id(), error = %e, "dump tx ctx failed"),
                }
            } else {
                info!(ls_id = %self.ls_id, tx_id = %ctx.tx_id(), ref_count = ctx.ref_count() - 1, "tx ctx");
            }
        }
    }

    pub fn stat(&self) -> LsTxCtxMgrStat {
        let state = self.state();
        LsTxCtxMgrStat {
            tenant_id: self.tenant_id,
            ls_id: self.ls_id,
            state,
            is_master: state.is_master(),
            is_stopped: state.is_stopped(),
            is_leader_serving: self.is_leader_serving(),
            active_tx_count: self.get_tx_ctx_count(),
            total_tx_ctx_count: self.get_total_tx_ctx_count(),
            leader_takeover_ts: self.leader_takeover_ts(),
            max_replay_commit_version: self.max_replay_commit_version(),
            online_ts: self.online_ts(),
            aggre_rec_scn: self.aggre.aggre(),
            prev_aggre_rec_scn: self.aggre.prev_aggre(),
            pending_start_working_log: self.log_writer.pending_count(),
        }
    }

    /// Log the statistics at most once per configured interval.
    pub(super) fn maybe_log_stat(&self) {
        let now = MonotonicTs::current().raw();
        let interval = self.config.stat_log_interval().as_micros() as u64;
        let last = self.last_stat_log_ts.load(Ordering::Acquire);
        if now.saturating_sub(last) < interval && last != 0 {
            return;
        }
        if self
            .last_stat_log_ts
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!(stat = ?self.stat(), "ls tx ctx mgr stat");
        }
    }
}
