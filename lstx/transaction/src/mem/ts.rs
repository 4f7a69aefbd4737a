use std::sync::atomic::{AtomicBool, Ordering};

use lstx_common::{MonotonicTs, Scn, TenantId};

use crate::error::{TxError, TxResult};
use crate::oracle::TsMgr;
use crate::timestamp::ScnGenerator;

/// Timestamp oracle backed by a local generator.
///
/// Every call hands out a fresh timestamp. [`LocalTsMgr::set_ready`] simulates an
/// oracle that cannot serve yet.
pub struct LocalTsMgr {
    scn_gen: ScnGenerator,
    ready: AtomicBool,
}

impl LocalTsMgr {
    pub fn new() -> Self {
        Self::with_start(1)
    }

    pub fn with_start(start: u64) -> Self {
        Self {
            scn_gen: ScnGenerator::with_start(start),
            ready: AtomicBool::new(true),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Make every later timestamp strictly greater than `scn`.
    pub fn advance_to(&self, scn: Scn) -> TxResult<()> {
        self.scn_gen.update_if_greater(scn)?;
        Ok(())
    }

    /// Peek at the next timestamp without consuming it.
    pub fn current(&self) -> Scn {
        self.scn_gen.current()
    }
}

impl Default for LocalTsMgr {
    fn default() -> Self {
        Self::new()
    }
}

impl TsMgr for LocalTsMgr {
    fn get_gts(&self, _tenant_id: TenantId, _since: MonotonicTs) -> TxResult<(Scn, MonotonicTs)> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(TxError::GtsNotReady);
        }
        let gts = self.scn_gen.next()?;
        Ok((gts, MonotonicTs::current()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_ts_mgr() {
        let ts_mgr = LocalTsMgr::with_start(10);
        let since = MonotonicTs::current();
        let (gts, recv) = ts_mgr.get_gts(1, since).unwrap();
        assert_eq!(gts, Scn::new(10));
        assert!(recv >= since);

        ts_mgr.set_ready(false);
        assert!(matches!(ts_mgr.get_gts(1, since), Err(TxError::GtsNotReady)));

        ts_mgr.set_ready(true);
        ts_mgr.advance_to(Scn::new(100)).unwrap();
        assert_eq!(ts_mgr.get_gts(1, since).unwrap().0, Scn::new(101));
    }
}
