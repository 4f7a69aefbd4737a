mod common;

use std::sync::Arc;

use common::*;
use lstx_common::{LsId, Scn, TabletId, TxId};
use lstx_ctx_mgr::{State, TxCtxMgr};
use lstx_transaction::{
    LocalTsMgr, MemLogAdapter, MemTxCtx, TxCreateArg, TxError, TxPhase, TxVersionMgr,
};

fn new_registry() -> TxCtxMgr<MemTxCtx> {
    TxCtxMgr::with_version_mgr(
        TENANT_ID,
        test_tenant_config(),
        Arc::new(LocalTsMgr::new()),
        Arc::new(TxVersionMgr::new()),
    )
}

/// Register `ls_id` and make it a serving leader.
fn add_leader(registry: &TxCtxMgr<MemTxCtx>, ls_id: LsId) -> Arc<MemLogAdapter> {
    let log = Arc::new(MemLogAdapter::new());
    let mgr = registry.create_ls(ls_id, log.clone()).unwrap();
    log.set_leader(true);
    mgr.switch_to_leader().unwrap();
    assert_eq!(log.apply_all(true), 1);
    log
}

fn arg(ls_id: LsId, tx_id: u64) -> TxCreateArg {
    TxCreateArg::new(TENANT_ID, ls_id, TxId::new(tx_id), false)
}

#[test]
fn test_registry_lifecycle() {
    let registry = new_registry();
    let log = Arc::new(MemLogAdapter::new());
    assert!(matches!(
        registry.create_ls(LsId::new(1), log.clone()),
        Err(TxError::NotRunning)
    ));
    assert!(matches!(registry.stop(false), Err(TxError::NotRunning)));

    registry.start().unwrap();
    assert!(matches!(registry.start(), Err(TxError::AlreadyRunning)));
    assert!(matches!(
        registry.create_ls(LsId::INVALID, log.clone()),
        Err(TxError::InvalidArgument(_))
    ));

    registry.create_ls(LsId::new(2), log.clone()).unwrap();
    registry.create_ls(LsId::new(1), Arc::new(MemLogAdapter::new())).unwrap();
    assert!(matches!(
        registry.create_ls(LsId::new(1), log.clone()),
        Err(TxError::EntryExist(_))
    ));
    assert_eq!(registry.iterate_ls_id(), vec![LsId::new(1), LsId::new(2)]);
    assert_eq!(registry.ls_count(), 2);
    assert_eq!(registry.ls_alloc_count(), 2);
    assert!(matches!(
        registry.get_ls_tx_ctx_mgr(LsId::new(3)),
        Err(TxError::LsNotExist(_))
    ));
    assert!(matches!(
        registry.wait_ls(LsId::new(1)),
        Err(TxError::LsNotStopped(_))
    ));

    let stats = registry.iterate_ls_mgr_stat();
    assert_eq!(stats.len(), 2);
    assert!(stats.iter().all(|s| s.state == State::FollowerWorking));

    registry.stop(false).unwrap();
    assert!(!registry.is_running());
    registry.wait().unwrap();
    registry.remove_ls(LsId::new(1), false).unwrap();
    registry.remove_ls(LsId::new(2), false).unwrap();
    assert_eq!(registry.ls_count(), 0);
    assert_eq!(registry.ls_release_count(), 2);
}

#[test]
fn test_transactions_are_routed_by_log_stream() {
    let registry = new_registry();
    registry.start().unwrap();
    let log = add_leader(&registry, LsId::new(1));
    add_leader(&registry, LsId::new(2));

    let (ctx, existed) = registry.create_tx_ctx(&arg(LsId::new(1), 10)).unwrap();
    assert!(!existed);
    let scn = log.append().unwrap();
    ctx.write(TabletId::new(1), 1, 1, scn).unwrap();
    registry.create_tx_ctx(&arg(LsId::new(2), 20)).unwrap();
    assert!(matches!(
        registry.create_tx_ctx(&arg(LsId::new(3), 30)),
        Err(TxError::LsNotExist(_))
    ));

    let again = registry.get_tx_ctx(LsId::new(1), TxId::new(10), false).unwrap();
    assert!(again.ptr_eq(&ctx));
    registry.revert_tx_ctx(again);
    assert!(matches!(
        registry.get_tx_ctx(LsId::new(2), TxId::new(10), false),
        Err(TxError::CtxNotExist(_))
    ));

    assert_eq!(registry.get_rec_scn(LsId::new(1)).unwrap(), scn);
    assert!(registry.get_rec_scn(LsId::new(2)).unwrap().is_max());
    assert_eq!(registry.get_min_undecided_scn(LsId::new(1)).unwrap(), scn);
    assert!(
        registry
            .get_ls_min_uncommit_tx_prepare_version(LsId::new(1))
            .unwrap()
            .is_max()
    );

    let tx_ids: Vec<_> = registry
        .iterate_all_tx_stat()
        .into_iter()
        .map(|s| (s.ls_id, s.tx_id))
        .collect();
    assert_eq!(
        tx_ids,
        vec![
            (LsId::new(1), TxId::new(10)),
            (LsId::new(2), TxId::new(20)),
        ]
    );
    registry.print_all_tx_ctx(LsId::new(1), true).unwrap();

    assert!(!registry.block_ls(LsId::new(1)).unwrap());
    assert!(matches!(
        registry.online_ls(LsId::new(1)),
        Err(TxError::StateNotMatch(_))
    ));
    registry.clear_all_tx(LsId::new(1)).unwrap();
    assert_eq!(ctx.phase(), TxPhase::Aborted);
    assert!(registry.kill_all_tx(LsId::new(2), false).unwrap());
}

#[test]
fn test_remove_ls_kills_stuck_transactions() {
    let registry = new_registry();
    registry.start().unwrap();
    let log = add_leader(&registry, LsId::new(1));
    let (ctx, _) = registry.create_tx_ctx(&arg(LsId::new(1), 1)).unwrap();
    ctx.prepare(Scn::new(5), log.append().unwrap()).unwrap();

    // The graceful stop spares the prepared transaction until the retry
    // that kills everything.
    registry.remove_ls(LsId::new(1), true).unwrap();
    assert_eq!(ctx.phase(), TxPhase::Aborted);
    assert_eq!(registry.ls_count(), 0);
    assert_eq!(registry.ls_release_count(), 1);
    assert!(matches!(
        registry.remove_ls(LsId::new(1), true),
        Err(TxError::LsNotExist(_))
    ));
}

#[test]
fn test_remove_ls_waits_for_start_working_log() {
    let registry = new_registry();
    registry.start().unwrap();
    let log = Arc::new(MemLogAdapter::new());
    let mgr = registry.create_ls(LsId::new(1), log.clone()).unwrap();
    log.set_leader(true);
    mgr.switch_to_leader().unwrap();

    assert!(matches!(
        registry.remove_ls(LsId::new(1), false),
        Err(TxError::Again(_))
    ));
    assert_eq!(registry.ls_count(), 1);
    assert_eq!(mgr.state(), State::Stopped);
    assert!(matches!(registry.wait(), Err(TxError::Again(_))));

    assert!(log.apply_next(true));
    registry.wait().unwrap();
    registry.remove_ls(LsId::new(1), false).unwrap();
    assert_eq!(registry.ls_count(), 0);
}
