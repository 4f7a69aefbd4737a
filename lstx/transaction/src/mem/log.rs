use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use lstx_common::Scn;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{TxError, TxResult};
use crate::oracle::{StartWorkingLogCb, TxLogAdapter};
use crate::timestamp::ScnGenerator;

struct PendingLog {
    scn: Scn,
    epoch: i64,
    cb: StartWorkingLogCb,
}

/// In-memory log layer.
///
/// Submitted start-working logs are queued and only resolved when the owner
/// calls [`MemLogAdapter::apply_next`] or [`MemLogAdapter::apply_all`], so
/// completion callbacks never run inside the submitting call.
pub struct MemLogAdapter {
    scn_gen: ScnGenerator,
    max_decided: AtomicU64,
    leader: AtomicBool,
    epoch: AtomicI64,
    pending: Mutex<VecDeque<PendingLog>>,
    fail_submit: AtomicBool,
}

impl MemLogAdapter {
    pub fn new() -> Self {
        Self {
            scn_gen: ScnGenerator::new(),
            max_decided: AtomicU64::new(0),
            leader: AtomicBool::new(false),
            epoch: AtomicI64::new(0),
            pending: Mutex::new(VecDeque::new()),
            fail_submit: AtomicBool::new(false),
        }
    }

    /// Change the replica role reported by [`TxLogAdapter::get_role`]. Becoming
    /// leader starts a new epoch.
    pub fn set_leader(&self, leader: bool) {
        let was_leader = self.leader.swap(leader, Ordering::SeqCst);
        if leader && !was_leader {
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Make the next submissions fail synchronously.
    pub fn set_fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    /// Append a regular record, returning its position. The record is decided
    /// immediately.
    pub fn append(&self) -> TxResult<Scn> {
        let scn = self.scn_gen.next()?;
        self.max_decided.fetch_max(scn.raw(), Ordering::SeqCst);
        Ok(scn)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Resolve the oldest queued start-working log. Returns false if nothing
    /// was queued.
    pub fn apply_next(&self, success: bool) -> bool {
        // The callback must run without holding the queue lock.
        let next = self.pending.lock().pop_front();
        let Some(log) = next else {
            return false;
        };
        debug!(scn = %log.scn, epoch = log.epoch, success, "resolve start working log");
        if success {
            self.max_decided.fetch_max(log.scn.raw(), Ordering::SeqCst);
            (log.cb)(Ok(log.scn))
        } else {
            (log.cb)(Err(TxError::NotMaster))
        }
        true
    }

    /// Resolve every queued start-working log, returning how many were resolved.
    pub fn apply_all(&self, success: bool) -> usize {
        let mut count = 0;
        while self.apply_next(success) {
            count += 1;
        }
        count
    }
}

impl Default for MemLogAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemLogAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemLogAdapter")
            .field("leader", &self.leader.load(Ordering::SeqCst))
            .field("epoch", &self.epoch.load(Ordering::SeqCst))
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl TxLogAdapter for MemLogAdapter {
    fn submit_start_working_log(&self, epoch: i64, cb: StartWorkingLogCb) -> TxResult<Scn> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(TxError::NotMaster);
        }
        let scn = self.scn_gen.next()?;
        self.pending.lock().push_back(PendingLog { scn, epoch, cb });
        Ok(scn)
    }

    fn get_role(&self) -> TxResult<(bool, i64)> {
        Ok((self.leader.load(Ordering::SeqCst), self.epoch.load(Ordering::SeqCst)))
    }

    fn get_max_decided_scn(&self) -> TxResult<Scn> {
        Ok(Scn::new(self.max_decided.load(Ordering::SeqCst)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_start_working_log_is_resolved_later() {
        let adapter = MemLogAdapter::new();
        let outcome = Arc::new(Mutex::new(None));
        let slot = outcome.clone();
        let scn = adapter
            .submit_start_working_log(
                1,
                Box::new(move |res| *slot.lock() = Some(res.is_ok())),
            )
            .unwrap();
        assert_eq!(adapter.pending_count(), 1);
        assert_eq!(*outcome.lock(), None);

        assert!(adapter.apply_next(true));
        assert_eq!(*outcome.lock(), Some(true));
        assert_eq!(adapter.get_max_decided_scn().unwrap(), scn);
        assert!(!adapter.apply_next(true));
    }

    #[test]
    fn test_role_and_failed_submission() {
        let adapter = MemLogAdapter::new();
        assert_eq!(adapter.get_role().unwrap(), (false, 0));
        adapter.set_leader(true);
        assert_eq!(adapter.get_role().unwrap(), (true, 1));
        adapter.set_leader(true);
        assert_eq!(adapter.get_role().unwrap(), (true, 1));
        adapter.set_leader(false);
        assert_eq!(adapter.get_role().unwrap(), (false, 1));
        adapter.set_leader(true);
        assert_eq!(adapter.get_role().unwrap(), (true, 2));

        adapter.set_fail_submit(true);
        let res = adapter.submit_start_working_log(1, Box::new(|_| {}));
        assert!(matches!(res, Err(TxError::NotMaster)));
        assert_eq!(adapter.pending_count(), 0);
    }
}
