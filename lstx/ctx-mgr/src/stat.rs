use lstx_common::{LsId, MonotonicTs, Scn, TenantId};
use serde::{Deserialize, Serialize};

use crate::state::State;

/// Statistics snapshot of the transaction context manager of one log stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LsTxCtxMgrStat {
    pub tenant_id: TenantId,
    pub ls_id: LsId,
    pub state: State,
    pub is_master: bool,
    pub is_stopped: bool,
    pub is_leader_serving: bool,
    pub active_tx_count: usize,
    pub total_tx_ctx_count: usize,
    pub leader_takeover_ts: MonotonicTs,
    pub max_replay_commit_version: Option<Scn>,
    pub online_ts: i64,
    pub aggre_rec_scn: Scn,
    pub prev_aggre_rec_scn: Scn,
    pub pending_start_working_log: usize,
}
