//! Tenant-wide registry of log stream transaction context managers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use itertools::Itertools;
use lstx_common::{LsId, Scn, TenantId, TxId};
use lstx_transaction::{
    TsMgr, TxCreateArg, TxCtx, TxCtxStat, TxError, TxLogAdapter, TxResult, TxVersionMgr,
    global_tx_version_mgr,
};
use tracing::{info, warn};

use crate::config::TxCtxMgrConfig;
use crate::ctx_map::CtxRef;
use crate::ls_tx_ctx_mgr::LsTxCtxMgr;
use crate::stat::LsTxCtxMgrStat;

pub struct TxCtxMgr<C> {
    tenant_id: TenantId,
    config: TxCtxMgrConfig,
    ts_mgr: Arc<dyn TsMgr>,
    version_mgr: Arc<TxVersionMgr>,
    ls_map: DashMap<LsId, Arc<LsTxCtxMgr<C>>>,
    is_running: AtomicBool,
    ls_alloc_count: AtomicU64,
    ls_release_count: AtomicU64,
}

impl<C: TxCtx> TxCtxMgr<C> {
    /// Create a registry sharing the process-wide commit version floor.
    pub fn new(tenant_id: TenantId, config: TxCtxMgrConfig, ts_mgr: Arc<dyn TsMgr>) -> Self {
        Self::with_version_mgr(tenant_id, config, ts_mgr, global_tx_version_mgr())
    }

    pub fn with_version_mgr(
        tenant_id: TenantId,
        config: TxCtxMgrConfig,
        ts_mgr: Arc<dyn TsMgr>,
        version_mgr: Arc<TxVersionMgr>,
    ) -> Self {
        Self {
            tenant_id,
            config,
            ts_mgr,
            version_mgr,
            ls_map: DashMap::new(),
            is_running: AtomicBool::new(false),
            ls_alloc_count: AtomicU64::new(0),
            ls_release_count: AtomicU64::new(0),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn config(&self) -> &TxCtxMgrConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    pub fn start(&self) -> TxResult<()> {
        if self.is_running.swap(true, Ordering::AcqRel) {
            return Err(TxError::AlreadyRunning);
        }
        info!(tenant_id = self.tenant_id, "tx ctx mgr start");
        Ok(())
    }

    /// Stop every log stream. Returns the first failure after trying them all.
    pub fn stop(&self, graceful: bool) -> TxResult<()> {
        if !self.is_running.swap(false, Ordering::AcqRel) {
            return Err(TxError::NotRunning);
        }
        let mut first_err = None;
        for ls_tx_ctx_mgr in self.ls_mgrs() {
            if let Err(e) = ls_tx_ctx_mgr.stop(graceful) {
                warn!(ls_id = %ls_tx_ctx_mgr.ls_id(), error = %e, "stop ls tx ctx mgr failed");
                first_err.get_or_insert(e);
            }
        }
        info!(tenant_id = self.tenant_id, graceful, ?first_err, "tx ctx mgr stop");
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Wait until every stopped log stream has drained.
    ///
    /// Gives up after the configured number of checks, printing the contexts
    /// that are left, and reports [`TxError::Again`].
    pub fn wait(&self) -> TxResult<()> {
        for retry in 0..self.config.wait_retry_count {
            let pending: Vec<LsId> = self
                .ls_mgrs()
                .into_iter()
                .filter(|mgr| mgr.wait().is_err())
                .map(|mgr| mgr.ls_id())
                .collect();
            if pending.is_empty() {
                info!(tenant_id = self.tenant_id, "tx ctx mgr wait done");
                return Ok(());
            }
            info!(tenant_id = self.tenant_id, retry, ?pending, "waiting for log streams to drain");
            thread::sleep(self.config.wait_sleep());
        }
        for ls_tx_ctx_mgr in self.ls_mgrs() {
            if ls_tx_ctx_mgr.wait().is_err() {
                ls_tx_ctx_mgr.print_all_tx_ctx(false);
            }
        }
        Err(TxError::Again(format!(
            "tenant {} has log streams that did not drain",
            self.tenant_id
        )))
    }

    pub fn create_ls(
        &self,
        ls_id: LsId,
        log_adapter: Arc<dyn TxLogAdapter>,
    ) -> TxResult<Arc<LsTxCtxMgr<C>>> {
        if !self.is_running() {
            return Err(TxError::NotRunning);
        }
        if !ls_id.is_valid() {
            return Err(TxError::InvalidArgument(format!("invalid log stream id {ls_id}")));
        }
        match self.ls_map.entry(ls_id) {
            Entry::Occupied(_) => Err(TxError::EntryExist(format!("log stream {ls_id}"))),
            Entry::Vacant(entry) => {
                let ls_tx_ctx_mgr = LsTxCtxMgr::new(
                    self.tenant_id,
                    ls_id,
                    self.config.ls.clone(),
                    self.ts_mgr.clone(),
                    log_adapter,
                    self.version_mgr.clone(),
                );
                ls_tx_ctx_mgr.start()?;
                entry.insert(ls_tx_ctx_mgr.clone());
                self.ls_alloc_count.fetch_add(1, Ordering::AcqRel);
                info!(tenant_id = self.tenant_id, %ls_id, "create ls tx ctx mgr");
                Ok(ls_tx_ctx_mgr)
            }
        }
    }

    /// Stop a log stream, wait for it to drain and drop it from the registry.
    ///
    /// Contexts still alive at the configured retry are killed. Reports
    /// [`TxError::Again`] if the log stream did not drain in time; it then stays
    /// registered, stopped.
    pub fn remove_ls(&self, ls_id: LsId, graceful: bool) -> TxResult<()> {
        let ls_tx_ctx_mgr = self.get_ls_tx_ctx_mgr(ls_id)?;
        ls_tx_ctx_mgr.stop(graceful)?;
        let mut drained = false;
        for retry in 0..self.config.remove_ls_max_retry {
            match ls_tx_ctx_mgr.wait() {
                Ok(()) => {
                    drained = true;
                    break;
                }
                Err(TxError::Again(reason)) => {
                    if retry == self.config.remove_ls_force_kill_retry {
                        warn!(%ls_id, retry, %reason, "log stream does not drain, kill all tx");
                        ls_tx_ctx_mgr.kill_all_tx(false)?;
                    }
                    thread::sleep(self.config.remove_ls_sleep());
                }
                Err(e) => return Err(e),
            }
        }
        if !drained {
            ls_tx_ctx_mgr.print_all_tx_ctx(false);
            return Err(TxError::Again(format!("log stream {ls_id} did not drain")));
        }
        if self.ls_map.remove(&ls_id).is_some() {
            self.ls_release_count.fetch_add(1, Ordering::AcqRel);
        }
        info!(tenant_id = self.tenant_id, %ls_id, "remove ls tx ctx mgr");
        Ok(())
    }

    /// Whether a stopped log stream has drained.
    pub fn wait_ls(&self, ls_id: LsId) -> TxResult<()> {
        self.get_ls_tx_ctx_mgr(ls_id)?.wait()
    }

    pub fn get_ls_tx_ctx_mgr(&self, ls_id: LsId) -> TxResult<Arc<LsTxCtxMgr<C>>> {
        self.ls_map
            .get(&ls_id)
            .map(|entry| entry.value().clone())
            .ok_or(TxError::LsNotExist(ls_id))
    }

    fn ls_mgrs(&self) -> Vec<Arc<LsTxCtxMgr<C>>> {
        self.ls_map
            .iter()
            .map(|entry| entry.value().clone())
            .sorted_by_key(|mgr| mgr.ls_id())
            .collect()
    }

    pub fn block_ls(&self, ls_id: LsId) -> TxResult<bool> {
        self.get_ls_tx_ctx_mgr(ls_id)?.block()
    }

    pub fn online_ls(&self, ls_id: LsId) -> TxResult<()> {
        self.get_ls_tx_ctx_mgr(ls_id)?.online()
    }

    pub fn kill_all_tx(&self, ls_id: LsId, graceful: bool) -> TxResult<bool> {
        self.get_ls_tx_ctx_mgr(ls_id)?.kill_all_tx(graceful)
    }

    /// Forcibly kill every transaction of `ls_id`, reporting
    /// [`TxError::Again`] while some are still alive.
    pub fn clear_all_tx(&self, ls_id: LsId) -> TxResult<()> {
        if self.kill_all_tx(ls_id, false)? {
            Ok(())
        } else {
            Err(TxError::Again(format!("log stream {ls_id} still has tx ctx")))
        }
    }

    pub fn create_tx_ctx(&self, arg: &TxCreateArg) -> TxResult<(CtxRef<C>, bool)> {
        self.get_ls_tx_ctx_mgr(arg.ls_id)?.create_tx_ctx(arg)
    }

    pub fn get_tx_ctx(&self, ls_id: LsId, tx_id: TxId, for_replay: bool) -> TxResult<CtxRef<C>> {
        self.get_ls_tx_ctx_mgr(ls_id)?.get_tx_ctx(tx_id, for_replay)
    }

    pub fn revert_tx_ctx(&self, ctx: CtxRef<C>) {
        ctx.revert();
    }

    pub fn get_rec_scn(&self, ls_id: LsId) -> TxResult<Scn> {
        self.get_ls_tx_ctx_mgr(ls_id)?.get_rec_scn()
    }

    pub fn get_min_undecided_scn(&self, ls_id: LsId) -> TxResult<Scn> {
        Ok(self.get_ls_tx_ctx_mgr(ls_id)?.get_min_undecided_scn())
    }

    pub fn get_ls_min_uncommit_tx_prepare_version(&self, ls_id: LsId) -> TxResult<Scn> {
        Ok(self
            .get_ls_tx_ctx_mgr(ls_id)?
            .get_ls_min_uncommit_tx_prepare_version())
    }

    pub fn iterate_ls_id(&self) -> Vec<LsId> {
        self.ls_map.iter().map(|entry| *entry.key()).sorted().collect()
    }

    pub fn iterate_all_tx_stat(&self) -> Vec<TxCtxStat> {
        self.ls_mgrs()
            .iter()
            .flat_map(|mgr| mgr.iterate_tx_ctx_stat())
            .collect()
    }

    pub fn iterate_ls_mgr_stat(&self) -> Vec<LsTxCtxMgrStat> {
        self.ls_mgrs().iter().map(|mgr| mgr.stat()).collect()
    }

    pub fn print_all_tx_ctx(&self, ls_id: LsId, verbose: bool) -> TxResult<()> {
        self.get_ls_tx_ctx_mgr(ls_id)?.print_all_tx_ctx(verbose);
        Ok(())
    }

    pub fn ls_count(&self) -> usize {
        self.ls_map.len()
    }

    pub fn ls_alloc_count(&self) -> u64 {
        self.ls_alloc_count.load(Ordering::Acquire)
    }

    pub fn ls_release_count(&self) -> u64 {
        self.ls_release_count.load(Ordering::Acquire)
    }
}
