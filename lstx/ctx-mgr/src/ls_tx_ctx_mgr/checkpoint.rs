//! Positions reported to checkpointing and recovery.

use lstx_common::Scn;
use lstx_transaction::{TxCtx, TxError, TxResult};
use tracing::{debug, info, warn};

use super::LsTxCtxMgr;
use crate::ctx_map::Visit;

impl<C: TxCtx> LsTxCtxMgr<C> {
    /// Smallest log position still needed to recover the contexts of this log
    /// stream, [`Scn::MAX`] if none.
    pub fn get_rec_scn(&self) -> TxResult<Scn> {
        let state = self.state.read();
        if state.is_stopped() {
            warn!(ls_id = %self.ls_id, "get rec scn on stopped log stream");
            return Err(TxError::StateNotMatch(format!(
                "log stream {} is stopped",
                self.ls_id
            )));
        }
        let mut scan = Scn::MAX;
        self.ctx_map.for_each(|ctx| {
            if let Some(scn) = ctx.rec_scn() {
                scan = scan.min(scn);
            }
            Visit::Continue
        });
        let aggre = self.aggre.get();
        let rec_scn = scan.min(aggre);
        debug!(ls_id = %self.ls_id, %scan, %aggre, %rec_scn, "get rec scn");
        drop(state);
        self.maybe_log_stat();
        Ok(rec_scn)
    }

    /// Prepare for a checkpoint of the transaction context table.
    pub fn refresh_aggre_rec_scn(&self) {
        if !self.aggre.refresh() {
            warn!(
                ls_id = %self.ls_id,
                prev_aggre = %self.aggre.prev_aggre(),
                "previous aggregate rec scn has not been flushed"
            );
        }
    }

    /// The transaction context table checkpoint is durable.
    ///
    /// The previous aggregate is released only once every context has taken
    /// the flush; otherwise it keeps pinning the recycle position.
    pub fn on_tx_ctx_table_flushed(&self) -> TxResult<()> {
        let state = self.state.read();
        if state.is_stopped() {
            warn!(ls_id = %self.ls_id, "tx ctx table flushed on stopped log stream");
            return Err(TxError::StateNotMatch(format!(
                "log stream {} is stopped",
                self.ls_id
            )));
        }
        let ret = self.for_each_ctx(|ctx| ctx.on_tx_ctx_table_flushed());
        drop(state);
        match &ret {
            Ok(()) => self.aggre.on_flushed(),
            Err(e) => warn!(
                ls_id = %self.ls_id,
                prev_aggre = %self.aggre.prev_aggre(),
                error = %e,
                "tx ctx flush hook failed, keep previous aggregate rec scn"
            ),
        }
        info!(ls_id = %self.ls_id, aggre = %self.aggre.aggre(), ?ret, "tx ctx table flushed");
        ret
    }

    pub fn get_aggre_rec_scn(&self) -> Scn {
        self.aggre.get()
    }

    /// Smallest log position whose outcome is still undecided.
    pub fn get_min_undecided_scn(&self) -> Scn {
        let mut min = Scn::MAX;
        self.ctx_map.for_each(|ctx| {
            if let Some(scn) = ctx.min_undecided_scn() {
                min = min.min(scn);
            }
            Visit::Continue
        });
        min
    }

    /// Smallest prepare version of a prepared, uncommitted transaction.
    pub fn get_ls_min_uncommit_tx_prepare_version(&self) -> Scn {
        if self.get_total_tx_ctx_count() == 0 {
            return Scn::MAX;
        }
        let mut min = Scn::MAX;
        self.ctx_map.for_each(|ctx| {
            if let Some(version) = ctx.min_prepare_version() {
                min = min.min(version);
            }
            Visit::Continue
        });
        min
    }

    pub fn get_min_start_scn(&self) -> Scn {
        let mut min = Scn::MAX;
        self.ctx_map.for_each(|ctx| {
            if let Some(scn) = ctx.min_start_scn() {
                min = min.min(scn);
            }
            Visit::Continue
        });
        min
    }

    /// Largest decided log position, asked from the log layer.
    pub fn get_max_decided_scn(&self) -> TxResult<Scn> {
        let state = self.state.read();
        if state.is_stopped() {
            return Err(TxError::StateNotMatch(format!(
                "log stream {} is stopped",
                self.ls_id
            )));
        }
        self.log_writer.adapter().get_max_decided_scn()
    }
}
