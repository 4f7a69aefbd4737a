#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use lstx_common::{LsId, MonotonicTs, Scn, TenantId, TxId};
use lstx_ctx_mgr::{CtxRef, LsTxCtxMgr, LsTxCtxMgrConfig, State, TxCtxMgrConfig};
use lstx_transaction::{
    LocalTsMgr, MemLogAdapter, MemTxCtx, TsMgr, TxCreateArg, TxResult, TxVersionMgr,
};
use parking_lot::Mutex;

pub const TENANT_ID: TenantId = 1001;
pub const LS_ID: LsId = LsId::new(1001);

/// Timestamp oracle answering from a script first, then from a local generator.
pub struct ScriptedTsMgr {
    script: Mutex<VecDeque<Scn>>,
    fallback: LocalTsMgr,
}

impl ScriptedTsMgr {
    pub fn new(script: impl IntoIterator<Item = u64>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().map(Scn::new).collect()),
            fallback: LocalTsMgr::with_start(1_000_000),
        }
    }
}

impl TsMgr for ScriptedTsMgr {
    fn get_gts(&self, tenant_id: TenantId, since: MonotonicTs) -> TxResult<(Scn, MonotonicTs)> {
        match self.script.lock().pop_front() {
            Some(gts) => Ok((gts, MonotonicTs::current())),
            None => self.fallback.get_gts(tenant_id, since),
        }
    }
}

pub fn test_ls_config() -> LsTxCtxMgrConfig {
    LsTxCtxMgrConfig {
        ctx_map_bucket_count: 8,
        swl_cb_wait_timeout_ms: 20,
        swl_cb_wait_interval_ms: 1,
        ..Default::default()
    }
}

pub fn test_tenant_config() -> TxCtxMgrConfig {
    TxCtxMgrConfig {
        ls: test_ls_config(),
        wait_sleep_ms: 1,
        wait_retry_count: 3,
        remove_ls_sleep_ms: 1,
        remove_ls_max_retry: 10,
        remove_ls_force_kill_retry: 3,
    }
}

pub struct TestLs {
    pub mgr: Arc<LsTxCtxMgr<MemTxCtx>>,
    pub log: Arc<MemLogAdapter>,
    pub version_mgr: Arc<TxVersionMgr>,
}

pub fn create_ls_with_ts(ts_mgr: Arc<dyn TsMgr>) -> TestLs {
    let log = Arc::new(MemLogAdapter::new());
    let version_mgr = Arc::new(TxVersionMgr::new());
    let mgr = LsTxCtxMgr::new(
        TENANT_ID,
        LS_ID,
        test_ls_config(),
        ts_mgr,
        log.clone(),
        version_mgr.clone(),
    );
    mgr.start().unwrap();
    TestLs {
        mgr,
        log,
        version_mgr,
    }
}

/// A follower log stream with a local timestamp oracle.
pub fn create_follower_ls() -> TestLs {
    create_ls_with_ts(Arc::new(LocalTsMgr::new()))
}

/// A leader log stream, serving and synchronised with the oracle.
pub fn create_leader_ls() -> TestLs {
    let ls = create_follower_ls();
    make_leader(&ls);
    ls
}

pub fn make_leader(ls: &TestLs) {
    ls.log.set_leader(true);
    ls.mgr.switch_to_leader().unwrap();
    assert_eq!(ls.log.apply_all(true), 1);
    assert!(ls.mgr.state().is_master());
}

pub fn tx_arg(tx_id: u64) -> TxCreateArg {
    TxCreateArg::new(TENANT_ID, LS_ID, TxId::new(tx_id), false)
}

pub fn replay_arg(tx_id: u64) -> TxCreateArg {
    TxCreateArg::new(TENANT_ID, LS_ID, TxId::new(tx_id), true)
}

pub fn create_tx(ls: &TestLs, tx_id: u64) -> CtxRef<MemTxCtx> {
    let (ctx, existed) = ls.mgr.create_tx_ctx(&tx_arg(tx_id)).unwrap();
    assert!(!existed);
    ctx
}

pub fn assert_state(ls: &TestLs, state: State) {
    assert_eq!(ls.mgr.state(), state);
}
