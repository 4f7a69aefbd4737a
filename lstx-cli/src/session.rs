use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use lstx_common::{LsId, Scn, TabletId, TenantId, TxId};
use lstx_ctx_mgr::{CtxRef, LsTxCtxMgr, LsTxCtxMgrStat, TxCtxMgr, TxCtxMgrConfig};
use lstx_transaction::{
    LocalTsMgr, MemLogAdapter, MemTxCtx, TxCreateArg, TxCtxStat, TxError, TxIdGenerator,
    TxLockStat,
};
use miette::Result;
use tracing::info;

pub const TENANT_ID: TenantId = 1;

/// An in-memory tenant, the log layer of each of its log streams and the
/// transaction handles opened by the operator.
pub struct AdminSession {
    registry: TxCtxMgr<MemTxCtx>,
    logs: HashMap<LsId, Arc<MemLogAdapter>>,
    handles: HashMap<(LsId, TxId), CtxRef<MemTxCtx>>,
    tx_ids: TxIdGenerator,
}

impl AdminSession {
    pub fn new(config: TxCtxMgrConfig) -> Result<Self> {
        config.validate()?;
        let registry = TxCtxMgr::new(TENANT_ID, config, Arc::new(LocalTsMgr::new()));
        registry.start()?;
        Ok(Self {
            registry,
            logs: HashMap::new(),
            handles: HashMap::new(),
            tx_ids: TxIdGenerator::new(),
        })
    }

    /// Open a session configured from a JSON file, or with the defaults.
    pub fn from_config_file(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => TxCtxMgrConfig::load(path)?,
            None => TxCtxMgrConfig::default(),
        };
        Self::new(config)
    }

    pub fn registry(&self) -> &TxCtxMgr<MemTxCtx> {
        &self.registry
    }

    fn ls_mgr(&self, ls_id: LsId) -> Result<Arc<LsTxCtxMgr<MemTxCtx>>> {
        Ok(self.registry.get_ls_tx_ctx_mgr(ls_id)?)
    }

    fn log(&self, ls_id: LsId) -> Result<&Arc<MemLogAdapter>> {
        Ok(self.logs.get(&ls_id).ok_or(TxError::LsNotExist(ls_id))?)
    }

    fn handle(&self, ls_id: LsId, tx_id: TxId) -> Result<&CtxRef<MemTxCtx>> {
        Ok(self
            .handles
            .get(&(ls_id, tx_id))
            .ok_or(TxError::CtxNotExist(tx_id))?)
    }

    pub fn create_ls(&mut self, ls_id: LsId) -> Result<()> {
        let log = Arc::new(MemLogAdapter::new());
        self.registry.create_ls(ls_id, log.clone())?;
        self.logs.insert(ls_id, log);
        Ok(())
    }

    pub fn remove_ls(&mut self, ls_id: LsId, graceful: bool) -> Result<()> {
        self.registry.remove_ls(ls_id, graceful)?;
        self.logs.remove(&ls_id);
        self.handles.retain(|(ls, _), _| *ls != ls_id);
        Ok(())
    }

    /// The log layer elects this replica and the takeover begins.
    pub fn takeover(&self, ls_id: LsId) -> Result<()> {
        let log = self.log(ls_id)?;
        log.set_leader(true);
        self.ls_mgr(ls_id)?.switch_to_leader()?;
        Ok(())
    }

    /// Resolve queued start-working logs, returning how many were resolved.
    pub fn apply_log(&self, ls_id: LsId, success: bool, all: bool) -> Result<usize> {
        let log = self.log(ls_id)?;
        let resolved = if all {
            log.apply_all(success)
        } else {
            usize::from(log.apply_next(success))
        };
        Ok(resolved)
    }

    pub fn revoke(&self, ls_id: LsId, graceful: bool) -> Result<()> {
        let mgr = self.ls_mgr(ls_id)?;
        if graceful {
            mgr.switch_to_follower_gracefully()?;
        } else {
            mgr.switch_to_follower_forcedly()?;
        }
        self.log(ls_id)?.set_leader(false);
        Ok(())
    }

    pub fn resume(&self, ls_id: LsId) -> Result<()> {
        self.log(ls_id)?.set_leader(true);
        self.ls_mgr(ls_id)?.resume_leader()?;
        Ok(())
    }

    pub fn block(&self, ls_id: LsId) -> Result<bool> {
        Ok(self.registry.block_ls(ls_id)?)
    }

    pub fn online(&self, ls_id: LsId) -> Result<()> {
        Ok(self.registry.online_ls(ls_id)?)
    }

    pub fn stop(&self, ls_id: LsId, graceful: bool) -> Result<()> {
        Ok(self.ls_mgr(ls_id)?.stop(graceful)?)
    }

    pub fn kill_all(&self, ls_id: LsId, graceful: bool) -> Result<bool> {
        Ok(self.registry.kill_all_tx(ls_id, graceful)?)
    }

    /// Create (or find) a transaction and keep a handle on it. Without an id
    /// the next free one is allocated. Returns the id and whether the
    /// transaction already existed.
    pub fn begin(
        &mut self,
        ls_id: LsId,
        tx_id: Option<TxId>,
        for_replay: bool,
    ) -> Result<(TxId, bool)> {
        let tx_id = match tx_id {
            Some(tx_id) => {
                self.tx_ids.update_if_greater(tx_id).map_err(TxError::from)?;
                tx_id
            }
            None => self.tx_ids.next().map_err(TxError::from)?,
        };
        let arg = TxCreateArg::new(TENANT_ID, ls_id, tx_id, for_replay);
        let (ctx, existed) = self.registry.create_tx_ctx(&arg)?;
        self.handles.insert((ls_id, tx_id), ctx);
        Ok((tx_id, existed))
    }

    /// Log a write to `tablet`, returning the position of its redo.
    pub fn write(
        &self,
        ls_id: LsId,
        tx_id: TxId,
        tablet: TabletId,
        schema_version: i64,
        modify_time: i64,
    ) -> Result<Scn> {
        let scn = self.log(ls_id)?.append()?;
        self.handle(ls_id, tx_id)?
            .write(tablet, schema_version, modify_time, scn)?;
        Ok(scn)
    }

    pub fn prepare(&self, ls_id: LsId, tx_id: TxId, version: Scn) -> Result<Scn> {
        let scn = self.log(ls_id)?.append()?;
        self.handle(ls_id, tx_id)?.prepare(version, scn)?;
        Ok(scn)
    }

    /// Commit and delete the transaction from the directory.
    pub fn commit(&mut self, ls_id: LsId, tx_id: TxId, version: Scn) -> Result<Scn> {
        let scn = self.log(ls_id)?.append()?;
        self.handle(ls_id, tx_id)?.commit(version, scn)?;
        self.finish(ls_id, tx_id)?;
        Ok(scn)
    }

    pub fn abort(&mut self, ls_id: LsId, tx_id: TxId) -> Result<()> {
        self.handle(ls_id, tx_id)?.abort()?;
        self.finish(ls_id, tx_id)
    }

    fn finish(&mut self, ls_id: LsId, tx_id: TxId) -> Result<()> {
        let mgr = self.ls_mgr(ls_id)?;
        if let Some(ctx) = self.handles.remove(&(ls_id, tx_id)) {
            mgr.del_tx_ctx(&ctx)?;
        }
        info!(%ls_id, %tx_id, "tx finished");
        Ok(())
    }

    /// Give the handle back without touching the transaction.
    pub fn release(&mut self, ls_id: LsId, tx_id: TxId) -> Result<()> {
        let ctx = self
            .handles
            .remove(&(ls_id, tx_id))
            .ok_or(TxError::CtxNotExist(tx_id))?;
        self.registry.revert_tx_ctx(ctx);
        Ok(())
    }

    pub fn rec_scn(&self, ls_id: LsId) -> Result<Scn> {
        Ok(self.registry.get_rec_scn(ls_id)?)
    }

    pub fn refresh_aggre(&self, ls_id: LsId) -> Result<()> {
        self.ls_mgr(ls_id)?.refresh_aggre_rec_scn();
        Ok(())
    }

    pub fn flushed(&self, ls_id: LsId) -> Result<()> {
        Ok(self.ls_mgr(ls_id)?.on_tx_ctx_table_flushed()?)
    }

    pub fn ls_stats(&self) -> Vec<LsTxCtxMgrStat> {
        self.registry.iterate_ls_mgr_stat()
    }

    pub fn tx_stats(&self, ls_id: Option<LsId>) -> Result<Vec<TxCtxStat>> {
        match ls_id {
            Some(ls_id) => Ok(self.ls_mgr(ls_id)?.iterate_tx_ctx_stat()),
            None => Ok(self.registry.iterate_all_tx_stat()),
        }
    }

    pub fn lock_stats(&self, ls_id: LsId) -> Result<Vec<TxLockStat>> {
        Ok(self.ls_mgr(ls_id)?.iterate_tx_lock_stat())
    }

    pub fn dump(&self, ls_id: LsId, tx_id: TxId) -> Result<String> {
        let mut buf = Vec::new();
        self.ls_mgr(ls_id)?.dump_single_tx_data(tx_id, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use lstx_ctx_mgr::State;
    use lstx_transaction::TxPhase;

    use super::*;

    const LS: LsId = LsId::new(1);

    fn leader_session() -> AdminSession {
        let mut session = AdminSession::new(TxCtxMgrConfig::default()).unwrap();
        session.create_ls(LS).unwrap();
        session.takeover(LS).unwrap();
        assert_eq!(session.apply_log(LS, true, true).unwrap(), 1);
        session
    }

    #[test]
    fn test_transaction_round() {
        let mut session = leader_session();
        assert_eq!(
            session.begin(LS, Some(TxId::new(1)), false).unwrap(),
            (TxId::new(1), false)
        );
        let scn = session
            .write(LS, TxId::new(1), TabletId::new(3), 1, 10)
            .unwrap();
        assert_eq!(session.rec_scn(LS).unwrap(), scn);
        assert_eq!(session.lock_stats(LS).unwrap().len(), 1);
        assert!(session.dump(LS, TxId::new(1)).unwrap().contains("phase=Active"));

        session.commit(LS, TxId::new(1), Scn::new(100)).unwrap();
        assert!(session.tx_stats(Some(LS)).unwrap().is_empty());
        // The departed transaction still pins its first redo.
        assert_eq!(session.rec_scn(LS).unwrap(), scn);
        session.refresh_aggre(LS).unwrap();
        session.flushed(LS).unwrap();
        assert!(session.rec_scn(LS).unwrap().is_max());
    }

    #[test]
    fn test_role_changes() {
        let mut session = leader_session();
        session.begin(LS, Some(TxId::new(2)), false).unwrap();
        session.revoke(LS, false).unwrap();
        let stats = session.ls_stats();
        assert_eq!(stats[0].state, State::FollowerWorking);
        let tx = &session.tx_stats(None).unwrap()[0];
        assert_eq!(tx.phase, TxPhase::Aborted);

        assert!(matches!(
            session.begin(LS, Some(TxId::new(3)), false).unwrap_err().downcast_ref::<TxError>(),
            Some(TxError::NotMaster)
        ));
        session.release(LS, TxId::new(2)).unwrap();
        assert!(session.release(LS, TxId::new(2)).is_err());
    }

    #[test]
    fn test_remove_ls_forgets_handles() {
        let mut session = leader_session();
        session.begin(LS, Some(TxId::new(1)), false).unwrap();
        session.remove_ls(LS, false).unwrap();
        assert!(session.ls_stats().is_empty());
        assert!(session.write(LS, TxId::new(1), TabletId::new(1), 1, 1).is_err());
        assert_eq!(session.registry().ls_release_count(), 1);
    }

    #[test]
    fn test_begin_allocates_ids_past_explicit_ones() {
        let mut session = leader_session();
        assert_eq!(session.begin(LS, None, false).unwrap(), (TxId::new(1), false));
        assert_eq!(
            session.begin(LS, Some(TxId::new(10)), false).unwrap(),
            (TxId::new(10), false)
        );
        assert_eq!(session.begin(LS, None, false).unwrap(), (TxId::new(11), false));
        assert_eq!(
            session.begin(LS, Some(TxId::new(10)), false).unwrap(),
            (TxId::new(10), true)
        );
        assert_eq!(session.tx_stats(Some(LS)).unwrap().len(), 3);
    }
}
