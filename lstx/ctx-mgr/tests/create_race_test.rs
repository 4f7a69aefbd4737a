mod common;

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use common::*;
use lstx_common::{Scn, TxId};
use lstx_ctx_mgr::LsTxCtxMgr;
use lstx_transaction::{
    CommitCallback, KillTxArg, LocalTsMgr, MemLogAdapter, RetainCause, TxCreateArg, TxCtx,
    TxCtxStat, TxDataCheck, TxError, TxPhase, TxResult, TxVersionMgr,
};

static START_ATTEMPTS: AtomicUsize = AtomicUsize::new(0);
static INSTANCES: AtomicUsize = AtomicUsize::new(0);

/// A context whose first start is slow and then fails.
#[derive(Debug)]
struct SlowFailingStartCtx {
    tx_id: TxId,
    started: AtomicBool,
}

impl TxCtx for SlowFailingStartCtx {
    fn init(arg: &TxCreateArg, _epoch: i64) -> TxResult<Self> {
        INSTANCES.fetch_add(1, Ordering::SeqCst);
        Ok(Self {
            tx_id: arg.tx_id,
            started: AtomicBool::new(false),
        })
    }

    fn tx_id(&self) -> TxId {
        self.tx_id
    }

    fn start_trans(&self) -> TxResult<()> {
        if START_ATTEMPTS.fetch_add(1, Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(200));
            return Err(TxError::Unexpected("start failed".into()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_exiting(&self) -> bool {
        false
    }

    fn retain_cause(&self) -> RetainCause {
        RetainCause::Unknown
    }

    fn rec_scn(&self) -> Option<Scn> {
        None
    }

    fn min_undecided_scn(&self) -> Option<Scn> {
        None
    }

    fn min_prepare_version(&self) -> Option<Scn> {
        None
    }

    fn kill(&self, _arg: &KillTxArg, _cbs: &mut Vec<CommitCallback>) -> TxResult<()> {
        Ok(())
    }

    fn check_with_tx_data(&self, _checker: &mut dyn TxDataCheck) -> TxResult<()> {
        Ok(())
    }

    fn dump(&self, _out: &mut dyn Write) -> TxResult<()> {
        Ok(())
    }

    fn stat(&self) -> TxCtxStat {
        TxCtxStat {
            tx_id: self.tx_id,
            ls_id: LS_ID,
            tenant_id: TENANT_ID,
            phase: TxPhase::Active,
            is_exiting: false,
            for_replay: false,
            retain_cause: RetainCause::Unknown,
            rec_scn: None,
            min_undecided_scn: None,
            prepare_version: None,
            ref_count: 0,
        }
    }
}

#[test]
fn test_failed_start_leaves_one_context_per_tx_id() {
    let log = Arc::new(MemLogAdapter::new());
    let mgr = LsTxCtxMgr::<SlowFailingStartCtx>::new(
        TENANT_ID,
        LS_ID,
        test_ls_config(),
        Arc::new(LocalTsMgr::new()),
        log.clone(),
        Arc::new(TxVersionMgr::new()),
    );
    mgr.start().unwrap();
    log.set_leader(true);
    mgr.switch_to_leader().unwrap();
    assert_eq!(log.apply_all(true), 1);

    let (first, second) = thread::scope(|s| {
        let first = s.spawn(|| mgr.create_tx_ctx(&tx_arg(7)));
        thread::sleep(Duration::from_millis(50));
        let second = s.spawn(|| mgr.create_tx_ctx(&tx_arg(7)));
        (first.join().unwrap(), second.join().unwrap())
    });

    assert!(matches!(first, Err(TxError::Unexpected(_))));
    let (second, existed) = second.unwrap();
    assert!(!existed);
    assert!(second.started.load(Ordering::SeqCst));
    assert_eq!(mgr.get_tx_ctx_count(), 1);

    let (third, existed) = mgr.create_tx_ctx(&tx_arg(7)).unwrap();
    assert!(existed);
    assert!(third.ptr_eq(&second));
    assert_eq!(INSTANCES.load(Ordering::SeqCst), 2);
    assert_eq!(mgr.get_total_tx_ctx_count(), 1);
}
