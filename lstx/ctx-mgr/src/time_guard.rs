use std::time::{Duration, Instant};

use lstx_common::LsId;
use tracing::warn;

/// Warns on drop if the guarded operation ran longer than `threshold`.
pub(crate) struct TimeGuard {
    ls_id: LsId,
    op: &'static str,
    start: Instant,
    threshold: Duration,
}

impl TimeGuard {
    pub(crate) fn new(ls_id: LsId, op: &'static str, threshold: Duration) -> Self {
        Self {
            ls_id,
            op,
            start: Instant::now(),
            threshold,
        }
    }
}

impl Drop for TimeGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        if elapsed > self.threshold {
            warn!(ls_id = %self.ls_id, op = self.op, ?elapsed, "use too much time");
        }
    }
}
