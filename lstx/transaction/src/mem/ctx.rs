use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use lstx_common::{LsId, Scn, TabletId, TenantId, TxId};
use parking_lot::Mutex;
use tracing::debug;

use crate::ctx::{
    CommitCallback, KillTxArg, RetainCause, TxCreateArg, TxCtx, TxCtxStat, TxData, TxDataCheck,
    TxLockStat, TxPhase,
};
use crate::error::{TxError, TxResult};

type FinishHook = Box<dyn FnOnce(TxId, TxPhase) + Send>;

#[derive(Debug, Clone, Copy)]
struct TabletWrite {
    schema_version: i64,
    modify_time: i64,
}

#[derive(Debug)]
struct MemTxState {
    phase: TxPhase,
    started: bool,
    is_leader: bool,
    retain_cause: RetainCause,
    // ---- Log positions ----
    start_scn: Option<Scn>,
    /// First position not yet captured by a tx-ctx-table checkpoint.
    rec_scn: Option<Scn>,
    min_undecided_scn: Option<Scn>,
    end_scn: Option<Scn>,
    // ---- Versions ----
    prepare_version: Option<Scn>,
    commit_version: Option<Scn>,
    writes: HashMap<TabletId, TabletWrite>,
}

impl MemTxState {
    fn is_finished(&self) -> bool {
        matches!(self.phase, TxPhase::Committed | TxPhase::Aborted)
    }
}

/// In-memory transaction context.
///
/// It keeps just enough transaction state to exercise every hook of [`TxCtx`]:
/// the log positions it wrote, the tablets it touched and its commit phase.
pub struct MemTxCtx {
    tx_id: TxId,
    ls_id: LsId,
    tenant_id: TenantId,
    epoch: i64,
    for_replay: bool,
    scheduler: String,
    exiting: AtomicBool,
    fail_role_switch: AtomicBool,
    fail_flush: AtomicBool,
    state: Mutex<MemTxState>,
    on_finish: Mutex<Option<FinishHook>>,
}

impl MemTxCtx {
    pub fn ls_id(&self) -> LsId {
        self.ls_id
    }

    pub fn epoch(&self) -> i64 {
        self.epoch
    }

    pub fn phase(&self) -> TxPhase {
        self.state.lock().phase
    }

    pub fn is_leader(&self) -> bool {
        self.state.lock().is_leader
    }

    pub fn commit_version(&self) -> Option<Scn> {
        self.state.lock().commit_version
    }

    /// Register a hook run once when the transaction commits or is killed.
    pub fn set_on_finish(&self, hook: impl FnOnce(TxId, TxPhase) + Send + 'static) {
        *self.on_finish.lock() = Some(Box::new(hook));
    }

    pub fn set_retain_cause(&self, cause: RetainCause) {
        self.state.lock().retain_cause = cause;
    }

    /// Make the per-context role switch hooks fail.
    pub fn set_fail_role_switch(&self, fail: bool) {
        self.fail_role_switch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_flush(&self, fail: bool) {
        self.fail_flush.store(fail, Ordering::SeqCst);
    }

    /// Record a write to `tablet` whose redo landed at `log_scn`.
    pub fn write(
        &self,
        tablet: TabletId,
        schema_version: i64,
        modify_time: i64,
        log_scn: Scn,
    ) -> TxResult<()> {
        let mut state = self.state.lock();
        if state.phase != TxPhase::Active {
            return Err(TxError::InvalidArgument(format!(
                "tx {} cannot write in phase {}",
                self.tx_id, state.phase
            )));
        }
        state.start_scn.get_or_insert(log_scn);
        state.rec_scn = Scn::min_opt(state.rec_scn, Some(log_scn));
        state.min_undecided_scn = Scn::min_opt(state.min_undecided_scn, Some(log_scn));
        let entry = state.writes.entry(tablet).or_insert(TabletWrite {
            schema_version,
            modify_time,
        });
        entry.schema_version = entry.schema_version.min(schema_version);
        entry.modify_time = entry.modify_time.min(modify_time);
        Ok(())
    }

    pub fn prepare(&self, prepare_version: Scn, log_scn: Scn) -> TxResult<()> {
        let mut state = self.state.lock();
        if state.phase != TxPhase::Active {
            return Err(TxError::InvalidArgument(format!(
                "tx {} cannot prepare in phase {}",
                self.tx_id, state.phase
            )));
        }
        state.phase = TxPhase::Prepared;
        state.prepare_version = Some(prepare_version);
        state.rec_scn = Scn::min_opt(state.rec_scn, Some(log_scn));
        state.min_undecided_scn = Scn::min_opt(state.min_undecided_scn, Some(log_scn));
        Ok(())
    }

    /// Commit with `commit_version`; the commit record landed at `log_scn`.
    pub fn commit(&self, commit_version: Scn, log_scn: Scn) -> TxResult<()> {
        {
            let mut state = self.state.lock();
            if state.is_finished() {
                return Err(TxError::InvalidArgument(format!(
                    "tx {} already finished as {}",
                    self.tx_id, state.phase
                )));
            }
            state.phase = TxPhase::Committed;
            state.commit_version = Some(commit_version);
            state.end_scn = Some(log_scn);
            state.rec_scn = Scn::min_opt(state.rec_scn, Some(log_scn));
            state.min_undecided_scn = None;
            state.prepare_version = None;
        }
        self.exiting.store(true, Ordering::SeqCst);
        self.notify_finish(TxPhase::Committed);
        Ok(())
    }

    pub fn abort(&self) -> TxResult<()> {
        {
            let mut state = self.state.lock();
            if state.is_finished() {
                return Err(TxError::InvalidArgument(format!(
                    "tx {} already finished as {}",
                    self.tx_id, state.phase
                )));
            }
            state.phase = TxPhase::Aborted;
            state.min_undecided_scn = None;
            state.prepare_version = None;
        }
        self.exiting.store(true, Ordering::SeqCst);
        self.notify_finish(TxPhase::Aborted);
        Ok(())
    }

    fn notify_finish(&self, phase: TxPhase) {
        if let Some(hook) = self.on_finish.lock().take() {
            hook(self.tx_id, phase);
        }
    }

    /// Abort in place and hand the finish notification to `cbs`.
    fn abort_deferred(&self, state: &mut MemTxState, cbs: &mut Vec<CommitCallback>) {
        state.phase = TxPhase::Aborted;
        state.min_undecided_scn = None;
        state.prepare_version = None;
        self.exiting.store(true, Ordering::SeqCst);
        let hook = self.on_finish.lock().take();
        let tx_id = self.tx_id;
        cbs.push(CommitCallback::new(tx_id, move || {
            if let Some(hook) = hook {
                hook(tx_id, TxPhase::Aborted);
            }
        }));
    }

    fn check_role_switch(&self) -> TxResult<()> {
        if self.fail_role_switch.load(Ordering::SeqCst) {
            return Err(TxError::Again(format!("tx {} refuses role switch", self.tx_id)));
        }
        Ok(())
    }
}

impl TxCtx for MemTxCtx {
    fn init(arg: &TxCreateArg, epoch: i64) -> TxResult<Self> {
        if !arg.is_valid() {
            return Err(TxError::InvalidArgument(format!("{arg:?}")));
        }
        Ok(Self {
            tx_id: arg.tx_id,
            ls_id: arg.ls_id,
            tenant_id: arg.tenant_id,
            epoch,
            for_replay: arg.for_replay,
            scheduler: arg.scheduler.clone(),
            exiting: AtomicBool::new(false),
            fail_role_switch: AtomicBool::new(false),
            fail_flush: AtomicBool::new(false),
            state: Mutex::new(MemTxState {
                phase: TxPhase::Active,
                started: false,
                is_leader: !arg.for_replay,
                retain_cause: RetainCause::Unknown,
                start_scn: None,
                rec_scn: None,
                min_undecided_scn: None,
                end_scn: None,
                prepare_version: None,
                commit_version: None,
                writes: HashMap::new(),
            }),
            on_finish: Mutex::new(None),
        })
    }

    fn tx_id(&self) -> TxId {
        self.tx_id
    }

    fn start_trans(&self) -> TxResult<()> {
        let mut state = self.state.lock();
        if state.started {
            return Err(TxError::Unexpected(format!("tx {} started twice", self.tx_id)));
        }
        state.started = true;
        Ok(())
    }

    fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }

    fn retain_cause(&self) -> RetainCause {
        self.state.lock().retain_cause
    }

    fn rec_scn(&self) -> Option<Scn> {
        self.state.lock().rec_scn
    }

    fn min_undecided_scn(&self) -> Option<Scn> {
        self.state.lock().min_undecided_scn
    }

    fn min_prepare_version(&self) -> Option<Scn> {
        self.state.lock().prepare_version
    }

    fn min_start_scn(&self) -> Option<Scn> {
        let state = self.state.lock();
        if state.is_finished() {
            None
        } else {
            state.start_scn
        }
    }

    fn kill(&self, arg: &KillTxArg, cbs: &mut Vec<CommitCallback>) -> TxResult<()> {
        let mut state = self.state.lock();
        if state.is_finished() {
            self.exiting.store(true, Ordering::SeqCst);
            return Ok(());
        }
        if arg.graceful && state.phase == TxPhase::Prepared {
            debug!(tx_id = %self.tx_id, "graceful kill skips prepared tx");
            return Ok(());
        }
        self.abort_deferred(&mut state, cbs);
        Ok(())
    }

    fn switch_to_leader(&self, _start_working_scn: Scn) -> TxResult<()> {
        self.check_role_switch()?;
        self.state.lock().is_leader = true;
        Ok(())
    }

    fn resume_leader(&self, _start_working_scn: Scn) -> TxResult<()> {
        self.check_role_switch()?;
        self.state.lock().is_leader = true;
        Ok(())
    }

    fn switch_to_follower_forcedly(&self, cbs: &mut Vec<CommitCallback>) -> TxResult<()> {
        let mut state = self.state.lock();
        state.is_leader = false;
        // Undecided active work cannot survive a forced revoke.
        if state.phase == TxPhase::Active && !self.for_replay {
            self.abort_deferred(&mut state, cbs);
        }
        Ok(())
    }

    fn switch_to_follower_gracefully(&self, _cbs: &mut Vec<CommitCallback>) -> TxResult<()> {
        self.check_role_switch()?;
        self.state.lock().is_leader = false;
        Ok(())
    }

    fn on_tx_ctx_table_flushed(&self) -> TxResult<()> {
        if self.fail_flush.load(Ordering::SeqCst) {
            return Err(TxError::Again(format!("tx {} missed the flush", self.tx_id)));
        }
        self.state.lock().rec_scn = None;
        Ok(())
    }

    fn check_with_tx_data(&self, checker: &mut dyn TxDataCheck) -> TxResult<()> {
        let data = {
            let state = self.state.lock();
            TxData {
                tx_id: self.tx_id,
                phase: state.phase,
                commit_version: state.commit_version,
                start_scn: state.start_scn,
                end_scn: state.end_scn,
            }
        };
        checker.check(&data)
    }

    fn dump(&self, out: &mut dyn Write) -> TxResult<()> {
        let stat = self.stat();
        writeln!(
            out,
            "tx_id={} ls_id={} tenant_id={} scheduler={} phase={} exiting={} rec_scn={:?} \
             min_undecided_scn={:?} prepare_version={:?}",
            stat.tx_id,
            stat.ls_id,
            stat.tenant_id,
            self.scheduler,
            stat.phase,
            stat.is_exiting,
            stat.rec_scn,
            stat.min_undecided_scn,
            stat.prepare_version,
        )
        .map_err(|e| TxError::Unexpected(format!("dump tx {} failed: {e}", self.tx_id)))
    }

    fn check_modify_schema_elapsed(&self, tablet: TabletId, schema_version: i64) -> bool {
        let state = self.state.lock();
        !state.is_finished()
            && state
                .writes
                .get(&tablet)
                .is_some_and(|w| w.schema_version < schema_version)
    }

    fn check_modify_time_elapsed(&self, tablet: TabletId, timestamp: i64) -> bool {
        let state = self.state.lock();
        !state.is_finished()
            && state
                .writes
                .get(&tablet)
                .is_some_and(|w| w.modify_time < timestamp)
    }

    fn stat(&self) -> TxCtxStat {
        let state = self.state.lock();
        TxCtxStat {
            tx_id: self.tx_id,
            ls_id: self.ls_id,
            tenant_id: self.tenant_id,
            phase: state.phase,
            is_exiting: self.is_exiting(),
            for_replay: self.for_replay,
            retain_cause: state.retain_cause,
            rec_scn: state.rec_scn,
            min_undecided_scn: state.min_undecided_scn,
            prepare_version: state.prepare_version,
            ref_count: 0,
        }
    }

    fn lock_stats(&self) -> Vec<TxLockStat> {
        let state = self.state.lock();
        if state.is_finished() {
            return Vec::new();
        }
        let mut stats: Vec<_> = state
            .writes
            .iter()
            .map(|(tablet, w)| TxLockStat {
                tx_id: self.tx_id,
                ls_id: self.ls_id,
                tablet_id: *tablet,
                schema_version: w.schema_version,
                modify_time: w.modify_time,
            })
            .collect();
        stats.sort_by_key(|s| s.tablet_id);
        stats
    }
}

impl fmt::Debug for MemTxCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemTxCtx")
            .field("tx_id", &self.tx_id)
            .field("ls_id", &self.ls_id)
            .field("epoch", &self.epoch)
            .field("for_replay", &self.for_replay)
            .field("exiting", &self.is_exiting())
            .field("state", &*self.state.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn new_ctx(tx_id: u64) -> MemTxCtx {
        let arg = TxCreateArg::new(1, LsId::new(1), TxId::new(tx_id), false);
        MemTxCtx::init(&arg, 1).unwrap()
    }

    #[test]
    fn test_write_tracks_positions() {
        let ctx = new_ctx(1);
        ctx.start_trans().unwrap();
        assert!(ctx.start_trans().is_err());
        ctx.write(TabletId::new(10), 3, 1000, Scn::new(20)).unwrap();
        ctx.write(TabletId::new(10), 4, 2000, Scn::new(25)).unwrap();
        assert_eq!(ctx.rec_scn(), Some(Scn::new(20)));
        assert_eq!(ctx.min_undecided_scn(), Some(Scn::new(20)));
        assert_eq!(ctx.min_start_scn(), Some(Scn::new(20)));

        ctx.on_tx_ctx_table_flushed().unwrap();
        assert_eq!(ctx.rec_scn(), None);
        assert_eq!(ctx.min_undecided_scn(), Some(Scn::new(20)));

        ctx.commit(Scn::new(30), Scn::new(31)).unwrap();
        assert!(ctx.is_exiting());
        assert_eq!(ctx.rec_scn(), Some(Scn::new(31)));
        assert_eq!(ctx.min_undecided_scn(), None);
        assert!(ctx.commit(Scn::new(32), Scn::new(33)).is_err());
    }

    #[test]
    fn test_schema_and_time_checks() {
        let ctx = new_ctx(2);
        let tablet = TabletId::new(7);
        ctx.write(tablet, 5, 100, Scn::new(1)).unwrap();
        assert!(ctx.check_modify_schema_elapsed(tablet, 6));
        assert!(!ctx.check_modify_schema_elapsed(tablet, 5));
        assert!(!ctx.check_modify_schema_elapsed(TabletId::new(8), 6));
        assert!(ctx.check_modify_time_elapsed(tablet, 101));
        assert!(!ctx.check_modify_time_elapsed(tablet, 100));
        assert_eq!(ctx.lock_stats().len(), 1);

        ctx.abort().unwrap();
        assert!(!ctx.check_modify_schema_elapsed(tablet, 6));
        assert!(ctx.lock_stats().is_empty());
    }

    #[test]
    fn test_graceful_kill_spares_prepared_tx() {
        let ctx = new_ctx(3);
        ctx.prepare(Scn::new(40), Scn::new(41)).unwrap();
        let mut cbs = Vec::new();
        ctx.kill(&KillTxArg::new(true), &mut cbs).unwrap();
        assert!(!ctx.is_exiting());
        assert!(cbs.is_empty());

        let finished = Arc::new(Mutex::new(None));
        let slot = finished.clone();
        ctx.set_on_finish(move |tx_id, phase| *slot.lock() = Some((tx_id, phase)));
        ctx.kill(&KillTxArg::new(false), &mut cbs).unwrap();
        assert!(ctx.is_exiting());
        assert_eq!(cbs.len(), 1);
        // The notification is deferred until the callback runs.
        assert!(finished.lock().is_none());
        cbs.pop().unwrap().callback();
        assert_eq!(*finished.lock(), Some((TxId::new(3), TxPhase::Aborted)));
    }

    #[test]
    fn test_check_with_tx_data_and_dump() {
        struct Expect(TxPhase);
        impl TxDataCheck for Expect {
            fn check(&mut self, data: &TxData) -> TxResult<()> {
                if data.phase == self.0 {
                    Ok(())
                } else {
                    Err(TxError::Unexpected(format!("phase {}", data.phase)))
                }
            }
        }

        let ctx = new_ctx(4);
        ctx.check_with_tx_data(&mut Expect(TxPhase::Active)).unwrap();
        assert!(ctx.check_with_tx_data(&mut Expect(TxPhase::Committed)).is_err());

        let mut out = Vec::new();
        ctx.dump(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("tx_id=4 ls_id=1"));
    }
}
