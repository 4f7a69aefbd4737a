use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use lstx_common::{LsId, Scn};
use lstx_transaction::{StartWorkingLogCb, TxError, TxLogAdapter, TxResult};
use tracing::{debug, warn};

/// Releases one outstanding submission when dropped, whether or not the
/// callback it travels with was ever invoked.
struct PendingGuard(Arc<AtomicUsize>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Submits start-working logs for one log stream and keeps track of the
/// submissions whose callback has not come back yet.
pub struct LsLogWriter {
    ls_id: LsId,
    adapter: Arc<dyn TxLogAdapter>,
    stopped: AtomicBool,
    pending: Arc<AtomicUsize>,
}

impl LsLogWriter {
    pub fn new(ls_id: LsId, adapter: Arc<dyn TxLogAdapter>) -> Self {
        Self {
            ls_id,
            adapter,
            stopped: AtomicBool::new(false),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn adapter(&self) -> &Arc<dyn TxLogAdapter> {
        &self.adapter
    }

    pub fn submit_start_working_log(&self, epoch: i64, cb: StartWorkingLogCb) -> TxResult<Scn> {
        if self.stopped.load(Ordering::Acquire) {
            warn!(ls_id = %self.ls_id, "log writer is stopped");
            return Err(TxError::NotRunning);
        }
        self.pending.fetch_add(1, Ordering::AcqRel);
        let guard = PendingGuard(self.pending.clone());
        let wrapped: StartWorkingLogCb = Box::new(move |res| {
            let _guard = guard;
            cb(res);
        });
        let scn = self.adapter.submit_start_working_log(epoch, wrapped)?;
        debug!(ls_id = %self.ls_id, epoch, %scn, "submitted start working log");
        Ok(scn)
    }

    /// Reject every later submission.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// `Again` while submitted callbacks are outstanding.
    pub fn wait(&self) -> TxResult<()> {
        match self.pending_count() {
            0 => Ok(()),
            n => Err(TxError::Again(format!(
                "log stream {} has {n} start working log callbacks outstanding",
                self.ls_id
            ))),
        }
    }
}

impl fmt::Debug for LsLogWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LsLogWriter")
            .field("ls_id", &self.ls_id)
            .field("stopped", &self.is_stopped())
            .field("pending", &self.pending_count())
            .finish()
    }
}
