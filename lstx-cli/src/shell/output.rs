use clap::ValueEnum;
use lstx_common::{LsId, Scn, TabletId, TxId};
use lstx_ctx_mgr::{LsTxCtxMgrStat, State};
use lstx_transaction::{RetainCause, TxCtxStat, TxLockStat, TxPhase};
use strum::Display;
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Debug, ValueEnum, Clone, Copy, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum OutputMode {
    Sharp,
    Modern,
    Psql,
    Markdown,
    Ascii,
    Blank,
}

impl OutputMode {
    pub fn render<T: Tabled>(self, rows: impl IntoIterator<Item = T>) -> String {
        let mut table = Table::new(rows);
        match self {
            OutputMode::Sharp => table.with(Style::sharp()),
            OutputMode::Modern => table.with(Style::modern()),
            OutputMode::Psql => table.with(Style::psql()),
            OutputMode::Markdown => table.with(Style::markdown()),
            OutputMode::Ascii => table.with(Style::ascii()),
            OutputMode::Blank => table.with(Style::blank()),
        };
        table.to_string()
    }
}

fn display_scn(scn: Option<Scn>) -> String {
    scn.map_or_else(|| "-".to_string(), |scn| scn.to_string())
}

#[derive(Tabled)]
pub struct LsRow {
    ls_id: LsId,
    state: State,
    serving: bool,
    active: usize,
    total: usize,
    max_replay_version: String,
    aggre_rec_scn: Scn,
    prev_aggre_rec_scn: Scn,
    pending_swl: usize,
}

impl From<LsTxCtxMgrStat> for LsRow {
    fn from(stat: LsTxCtxMgrStat) -> Self {
        Self {
            ls_id: stat.ls_id,
            state: stat.state,
            serving: stat.is_leader_serving,
            active: stat.active_tx_count,
            total: stat.total_tx_ctx_count,
            max_replay_version: display_scn(stat.max_replay_commit_version),
            aggre_rec_scn: stat.aggre_rec_scn,
            prev_aggre_rec_scn: stat.prev_aggre_rec_scn,
            pending_swl: stat.pending_start_working_log,
        }
    }
}

#[derive(Tabled)]
pub struct TxRow {
    ls_id: LsId,
    tx_id: TxId,
    phase: TxPhase,
    exiting: bool,
    replay: bool,
    retain: RetainCause,
    rec_scn: String,
    min_undecided_scn: String,
    prepare_version: String,
    refs: i64,
}

impl From<TxCtxStat> for TxRow {
    fn from(stat: TxCtxStat) -> Self {
        Self {
            ls_id: stat.ls_id,
            tx_id: stat.tx_id,
            phase: stat.phase,
            exiting: stat.is_exiting,
            replay: stat.for_replay,
            retain: stat.retain_cause,
            rec_scn: display_scn(stat.rec_scn),
            min_undecided_scn: display_scn(stat.min_undecided_scn),
            prepare_version: display_scn(stat.prepare_version),
            refs: stat.ref_count,
        }
    }
}

#[derive(Tabled)]
pub struct LockRow {
    tx_id: TxId,
    tablet_id: TabletId,
    schema_version: i64,
    modify_time: i64,
}

impl From<TxLockStat> for LockRow {
    fn from(stat: TxLockStat) -> Self {
        Self {
            tx_id: stat.tx_id,
            tablet_id: stat.tablet_id,
            schema_version: stat.schema_version,
            modify_time: stat.modify_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_lock_rows() {
        let rows = [LockRow {
            tx_id: TxId::new(7),
            tablet_id: TabletId::new(3),
            schema_version: 1,
            modify_time: 42,
        }];
        let table = OutputMode::Markdown.render(rows);
        let header = table.lines().next().unwrap();
        assert!(header.contains("tx_id"));
        assert!(header.contains("modify_time"));
        assert!(table.contains("| 7 "));
    }
}
