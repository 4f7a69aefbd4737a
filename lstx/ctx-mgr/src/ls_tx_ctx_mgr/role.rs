use std::sync::atomic::Ordering;
use std::thread;
use std::time::Instant;

use lstx_common::{MonotonicTs, Scn};
use lstx_transaction::{StartWorkingLogCb, TxCtx, TxError, TxResult};
use tracing::{debug, info, warn};

use super::LsTxCtxMgr;
use crate::state::{Op, StateHelper};
use crate::time_guard::TimeGuard;

impl<C: TxCtx> LsTxCtxMgr<C> {
    /// Start working as follower.
    pub fn start(&self) -> TxResult<()> {
        let mut guard = self.wlock();
        let mut helper = StateHelper::new(self.ls_id, &mut guard);
        helper.switch_state(Op::Start)?;
        info!(ls_id = %self.ls_id, tenant_id = self.tenant_id, "ls tx ctx mgr start");
        Ok(())
    }

    /// Begin a leader takeover: enter the takeover-pending state and submit the
    /// start-working log. The log layer completes the takeover through the
    /// submission callback.
    pub fn switch_to_leader(&self) -> TxResult<()> {
        let mut guard = self.wlock();
        let mut helper = StateHelper::new(self.ls_id, &mut guard);
        let ret = helper.switch_state(Op::LeaderTakeover).and_then(|()| {
            self.is_leader_serving.store(false, Ordering::Release);
            self.leader_takeover_ts
                .store(MonotonicTs::current().raw(), Ordering::Release);
            self.submit_start_working_log().map(|_| ())
        });
        if ret.is_err() {
            helper.restore_state();
        }
        info!(ls_id = %self.ls_id, state = %helper.state(), ?ret, "switch to leader");
        ret
    }

    /// Re-enter the leader role after a revoke was rolled back by the caller.
    pub fn resume_leader(&self) -> TxResult<()> {
        let mut guard = self.wlock();
        let mut helper = StateHelper::new(self.ls_id, &mut guard);
        let ret = helper
            .switch_state(Op::ResumeLeader)
            .and_then(|()| self.submit_start_working_log().map(|_| ()));
        match &ret {
            Ok(()) => self.is_leader_serving.store(true, Ordering::Release),
            Err(_) => helper.restore_state(),
        }
        info!(ls_id = %self.ls_id, state = %helper.state(), ?ret, "resume leader");
        ret
    }

    fn submit_start_working_log(&self) -> TxResult<Scn> {
        let (_, epoch) = self.log_writer.adapter().get_role()?;
        let self_ref = self.self_ref.clone();
        let cb: StartWorkingLogCb = Box::new(move |res| {
            let Some(mgr) = self_ref.upgrade() else {
                return;
            };
            let ret = match res {
                Ok(scn) => mgr.on_start_working_log_cb_succ(scn),
                Err(e) => {
                    warn!(ls_id = %mgr.ls_id, error = %e, "start working log failed");
                    mgr.on_start_working_log_cb_fail()
                }
            };
            if let Err(e) = ret {
                warn!(ls_id = %mgr.ls_id, error = %e, "start working log callback failed");
            }
        });
        self.log_writer.submit_start_working_log(epoch, cb)
    }

    /// The start-working log at `start_working_scn` is durable.
    ///
    /// Every context is moved to the leader role, then the log stream starts
    /// working as leader and tries to synchronise with the timestamp oracle.
    pub fn on_start_working_log_cb_succ(&self, start_working_scn: Scn) -> TxResult<()> {
        let mut guard = self.wlock();
        let mut helper = StateHelper::new(self.ls_id, &mut guard);
        let state = helper.state();
        let visit = if state.is_takeover_pending() {
            self.for_each_ctx(|ctx| ctx.switch_to_leader(start_working_scn))
        } else if state.is_resume_pending() {
            self.for_each_ctx(|ctx| ctx.resume_leader(start_working_scn))
        } else {
            warn!(ls_id = %self.ls_id, %state, "start working log callback without pending role change");
            return Err(TxError::StateNotMatch(format!(
                "log stream {} is {state}, not waiting for a start working log",
                self.ls_id
            )));
        };

        let ret = match visit {
            Ok(()) => helper.switch_state(Op::SwlCbSucc).inspect(|()| {
                if let Err(e) = self.try_wait_gts_and_inc_max_commit_ts() {
                    debug!(ls_id = %self.ls_id, error = %e, "gts not synced yet");
                }
            }),
            Err(e) => {
                // Stay pending; the log layer revokes the leader afterwards.
                let ignore = state.is_takeover_pending() && matches!(e, TxError::NotMaster);
                helper.switch_state(Op::SwlCbFail).and(if ignore { Ok(()) } else { Err(e) })
            }
        };
        info!(ls_id = %self.ls_id, %start_working_scn, state = %helper.state(), ?ret, "on start working log cb succ");
        ret
    }

    pub fn on_start_working_log_cb_fail(&self) -> TxResult<()> {
        let mut guard = self.wlock();
        let mut helper = StateHelper::new(self.ls_id, &mut guard);
        let ret = helper.switch_state(Op::SwlCbFail);
        info!(ls_id = %self.ls_id, state = %helper.state(), ?ret, "on start working log cb fail");
        ret
    }

    /// Synchronise with the timestamp oracle before serving as leader.
    ///
    /// The oracle must hand out a timestamp above every commit version replayed
    /// as follower; otherwise the leader could order new commits before them.
    pub(super) fn try_wait_gts_and_inc_max_commit_ts(&self) -> TxResult<()> {
        if self.is_leader_serving() {
            return Ok(());
        }
        let (gts, _) = match self.ts_mgr.get_gts(self.tenant_id, self.leader_takeover_ts()) {
            Ok(res) => res,
            Err(TxError::GtsNotReady | TxError::Again(_)) => return Err(TxError::NotMaster),
            Err(e) => {
                warn!(ls_id = %self.ls_id, error = %e, "wait gts failed");
                return Err(e);
            }
        };
        let max_replay = self.max_replay_commit_version();
        if max_replay.is_some_and(|v| v >= gts) {
            info!(ls_id = %self.ls_id, %gts, ?max_replay, "gts not above replayed commit version");
            return Err(TxError::NotMaster);
        }
        self.is_leader_serving.store(true, Ordering::Release);
        self.version_mgr.update_max_commit_ts(gts);
        info!(ls_id = %self.ls_id, %gts, ?max_replay, "leader starts serving");
        Ok(())
    }

    /// Whether the log stream is leader and done with the timestamp
    /// synchronisation.
    pub fn in_leader_serving_state(&self) -> bool {
        let state = self.state.read();
        if !state.is_master() {
            return false;
        }
        match self.try_wait_gts_and_inc_max_commit_ts() {
            Ok(()) => true,
            Err(e) => {
                debug!(ls_id = %self.ls_id, error = %e, "not in leader serving state");
                false
            }
        }
    }

    pub fn switch_to_follower_forcedly(&self) -> TxResult<()> {
        let _tg = TimeGuard::new(
            self.ls_id,
            "switch_to_follower_forcedly",
            self.config.slow_op_warn_threshold(),
        );
        let mut cbs = Vec::new();
        let ret = {
            let mut guard = self.wlock();
            let mut helper = StateHelper::new(self.ls_id, &mut guard);
            let ret = if helper.state().is_follower() {
                Ok(())
            } else {
                helper.switch_state(Op::LeaderRevoke).and_then(|()| {
                    let ret = self.for_each_ctx(|ctx| ctx.switch_to_follower_forcedly(&mut cbs));
                    match ret {
                        Ok(()) => self.is_leader_serving.store(false, Ordering::Release),
                        Err(_) => helper.restore_state(),
                    }
                    ret
                })
            };
            info!(ls_id = %self.ls_id, state = %helper.state(), ?ret, "switch to follower forcedly");
            ret
        };
        self.process_callbacks(cbs);
        ret
    }

    /// Revoke the leader role, letting every context hand over cleanly.
    ///
    /// A pending takeover or resume is waited for first. If a context refuses,
    /// the log stream resumes leadership and reports the failure; if even that
    /// fails the caller must revoke forcibly ([`TxError::NeedRevoke`]).
    pub fn switch_to_follower_gracefully(&self) -> TxResult<()> {
        let _tg = TimeGuard::new(
            self.ls_id,
            "switch_to_follower_gracefully",
            self.config.slow_op_warn_threshold(),
        );
        let start = Instant::now();
        while self.state().is_pending() {
            if start.elapsed() >= self.config.swl_cb_wait_timeout() {
                warn!(ls_id = %self.ls_id, state = %self.state(), "start working cb waiting timeout");
                return Err(TxError::Timeout(format!(
                    "log stream {} still waits for its start working log",
                    self.ls_id
                )));
            }
            thread::sleep(self.config.swl_cb_wait_interval());
        }

        let mut cbs = Vec::new();
        let mut process_count = 0usize;
        let ret = {
            let mut guard = self.wlock();
            let mut helper = StateHelper::new(self.ls_id, &mut guard);
            let ret = helper.switch_state(Op::LeaderRevoke).and_then(|()| {
                let visit = self.for_each_ctx(|ctx| {
                    process_count += 1;
                    ctx.switch_to_follower_gracefully(&mut cbs)
                });
                match visit {
                    Ok(()) => {
                        self.is_leader_serving.store(false, Ordering::Release);
                        Ok(())
                    }
                    Err(e) => {
                        let resume = helper
                            .switch_state(Op::ResumeLeader)
                            .and_then(|()| self.submit_start_working_log());
                        match resume {
                            Ok(_) => Err(e),
                            Err(resume_err) => {
                                warn!(ls_id = %self.ls_id, error = %e, %resume_err, "resume leader after failed revoke failed");
                                Err(TxError::NeedRevoke(self.ls_id))
                            }
                        }
                    }
                }
            });
            info!(ls_id = %self.ls_id, state = %helper.state(), process_count, ?ret, "switch to follower gracefully");
            ret
        };
        self.process_callbacks(cbs);
        ret
    }

    /// A start-working log was replayed as follower.
    pub fn replay_start_working_log(&self, start_working_scn: Scn) -> TxResult<()> {
        let _state = self.state.read();
        let ret = self.for_each_ctx(|ctx| ctx.replay_start_working_log(start_working_scn));
        debug!(ls_id = %self.ls_id, %start_working_scn, ?ret, "replay start working log");
        ret
    }
}
