//! Role state machine of a log stream.

use lstx_common::LsId;
use lstx_transaction::{TxError, TxResult};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter};
use tracing::{debug, warn};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumIter, Serialize, Deserialize,
)]
pub enum State {
    #[default]
    Invalid,
    FollowerWorking,
    LeaderWorking,
    TakeoverPending,
    ResumePending,
    LeaderBlocked,
    FollowerBlocked,
    TakeoverBlockedPending,
    ResumeBlockedPending,
    Stopped,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum Op {
    Start,
    LeaderRevoke,
    SwlCbSucc,
    SwlCbFail,
    LeaderTakeover,
    ResumeLeader,
    Block,
    Stop,
    Online,
}

impl State {
    /// The state reached by applying `op`, or `None` if `op` is not allowed here.
    pub fn next(self, op: Op) -> Option<State> {
        use Op::*;
        use State::*;
        let next = match (self, op) {
            (Invalid, Start) => FollowerWorking,

            (FollowerWorking, LeaderRevoke) => FollowerWorking,
            (FollowerWorking, LeaderTakeover) => TakeoverPending,
            (FollowerWorking, ResumeLeader) => ResumePending,
            (FollowerWorking, Block) => FollowerBlocked,

            (TakeoverPending, LeaderRevoke) => FollowerWorking,
            (TakeoverPending, SwlCbSucc) => LeaderWorking,
            (TakeoverPending, SwlCbFail) => TakeoverPending,
            (TakeoverPending, Block) => TakeoverBlockedPending,

            (ResumePending, LeaderRevoke) => FollowerWorking,
            (ResumePending, SwlCbSucc) => LeaderWorking,
            (ResumePending, SwlCbFail) => ResumePending,
            (ResumePending, Block) => ResumeBlockedPending,

            (LeaderWorking, LeaderRevoke) => FollowerWorking,
            (LeaderWorking, Block) => LeaderBlocked,

            (FollowerBlocked, LeaderRevoke) => FollowerBlocked,
            (FollowerBlocked, LeaderTakeover) => TakeoverBlockedPending,
            (FollowerBlocked, ResumeLeader) => ResumeBlockedPending,
            (FollowerBlocked, Block) => FollowerBlocked,
            (FollowerBlocked, Online) => FollowerWorking,

            (LeaderBlocked, LeaderRevoke) => FollowerBlocked,
            (LeaderBlocked, Block) => LeaderBlocked,

            (TakeoverBlockedPending, LeaderRevoke) => FollowerBlocked,
            (TakeoverBlockedPending, SwlCbSucc) => LeaderBlocked,
            (TakeoverBlockedPending, SwlCbFail) => TakeoverBlockedPending,
            (TakeoverBlockedPending, Block) => TakeoverBlockedPending,

            (ResumeBlockedPending, LeaderRevoke) => FollowerBlocked,
            (ResumeBlockedPending, SwlCbSucc) => LeaderBlocked,
            (ResumeBlockedPending, SwlCbFail) => ResumeBlockedPending,
            (ResumeBlockedPending, Block) => ResumeBlockedPending,

            (Stopped, LeaderRevoke) => Stopped,

            (
                FollowerWorking | TakeoverPending | ResumePending | LeaderWorking
                | FollowerBlocked | LeaderBlocked | TakeoverBlockedPending
                | ResumeBlockedPending | Stopped,
                Stop,
            ) => Stopped,

            _ => return None,
        };
        Some(next)
    }

    /// Leader that may admit new transactions (unless blocked).
    pub fn is_master(self) -> bool {
        matches!(self, State::LeaderWorking | State::LeaderBlocked)
    }

    pub fn is_follower(self) -> bool {
        matches!(self, State::FollowerWorking | State::FollowerBlocked)
    }

    pub fn is_blocked(self) -> bool {
        matches!(
            self,
            State::FollowerBlocked
                | State::LeaderBlocked
                | State::TakeoverBlockedPending
                | State::ResumeBlockedPending
        )
    }

    pub fn is_stopped(self) -> bool {
        self == State::Stopped
    }

    /// Waiting for the start-working log of a takeover or a resume.
    pub fn is_pending(self) -> bool {
        self.is_takeover_pending() || self.is_resume_pending()
    }

    pub fn is_takeover_pending(self) -> bool {
        matches!(
            self,
            State::TakeoverPending | State::TakeoverBlockedPending
        )
    }

    pub fn is_resume_pending(self) -> bool {
        matches!(self, State::ResumePending | State::ResumeBlockedPending)
    }
}

/// Applies transitions to a borrowed state and remembers the state before the
/// last one, so that a transition whose follow-up work failed can be undone.
pub struct StateHelper<'a> {
    ls_id: LsId,
    state: &'a mut State,
    last_state: State,
    is_switching: bool,
}

impl<'a> StateHelper<'a> {
    pub fn new(ls_id: LsId, state: &'a mut State) -> Self {
        let last_state = *state;
        Self {
            ls_id,
            state,
            last_state,
            is_switching: false,
        }
    }

    pub fn state(&self) -> State {
        *self.state
    }

    pub fn switch_state(&mut self, op: Op) -> TxResult<()> {
        let from = *self.state;
        match from.next(op) {
            Some(to) => {
                self.last_state = from;
                self.is_switching = true;
                *self.state = to;
                debug!(ls_id = %self.ls_id, %from, %to, %op, "switch state");
                Ok(())
            }
            None => {
                warn!(ls_id = %self.ls_id, state = %from, %op, "state not match");
                Err(TxError::StateNotMatch(format!(
                    "log stream {}: {op} is not allowed in {from}",
                    self.ls_id
                )))
            }
        }
    }

    /// Undo the last successful [`StateHelper::switch_state`].
    pub fn restore_state(&mut self) {
        if self.is_switching {
            debug!(ls_id = %self.ls_id, from = %self.state, to = %self.last_state, "restore state");
            *self.state = self.last_state;
            self.is_switching = false;
        }
    }
}
