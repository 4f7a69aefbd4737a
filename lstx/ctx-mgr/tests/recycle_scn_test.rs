mod common;

use std::collections::BTreeMap;

use common::*;
use lstx_common::{Scn, TabletId};
use lstx_ctx_mgr::CtxRef;
use lstx_transaction::{MemTxCtx, TxError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Expected recycle position, tracked next to the real log stream.
#[derive(Default)]
struct Model {
    live: BTreeMap<u64, (CtxRef<MemTxCtx>, Option<Scn>)>,
    aggre: Option<Scn>,
    prev_aggre: Option<Scn>,
}

impl Model {
    fn rec_scn(&self) -> Scn {
        self.live
            .values()
            .filter_map(|(_, scn)| *scn)
            .chain(self.aggre)
            .chain(self.prev_aggre)
            .min()
            .unwrap_or(Scn::MAX)
    }
}

fn pick(rng: &mut StdRng, model: &Model) -> Option<u64> {
    if model.live.is_empty() {
        return None;
    }
    let idx = rng.random_range(0..model.live.len());
    model.live.keys().nth(idx).copied()
}

#[test]
fn test_rec_scn_follows_departures_and_checkpoints() {
    let ls = create_leader_ls();
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut model = Model::default();
    let mut next_tx = 1;
    let mut last = ls.mgr.get_rec_scn().unwrap();
    assert!(last.is_max());

    for _ in 0..500 {
        let mut flushed = false;
        match rng.random_range(0..10) {
            0..=2 => {
                let ctx = create_tx(&ls, next_tx);
                let scn = ls.log.append().unwrap();
                ctx.write(TabletId::new(1), 1, 1, scn).unwrap();
                model.live.insert(next_tx, (ctx, Some(scn)));
                next_tx += 1;
            }
            3..=4 => {
                if let Some(tx) = pick(&mut rng, &model) {
                    let scn = ls.log.append().unwrap();
                    let (ctx, rec) = model.live.get_mut(&tx).unwrap();
                    ctx.write(TabletId::new(2), 1, 1, scn).unwrap();
                    *rec = Scn::min_opt(*rec, Some(scn));
                }
            }
            5..=7 => {
                if let Some(tx) = pick(&mut rng, &model) {
                    let (ctx, rec) = model.live.remove(&tx).unwrap();
                    let scn = ls.log.append().unwrap();
                    ctx.commit(scn, scn).unwrap();
                    ls.mgr.del_tx_ctx(&ctx).unwrap();
                    model.aggre = Scn::min_opt(model.aggre, Scn::min_opt(rec, Some(scn)));
                }
            }
            8 => {
                ls.mgr.refresh_aggre_rec_scn();
                if model.prev_aggre.is_none() {
                    model.prev_aggre = model.aggre.take();
                }
            }
            _ => {
                ls.mgr.on_tx_ctx_table_flushed().unwrap();
                model.prev_aggre = None;
                for (_, rec) in model.live.values_mut() {
                    *rec = None;
                }
                flushed = true;
            }
        }

        let rec_scn = ls.mgr.get_rec_scn().unwrap();
        assert_eq!(rec_scn, model.rec_scn());
        if !flushed {
            assert!(rec_scn <= last, "rec scn moved up from {last} to {rec_scn}");
        }
        last = rec_scn;
    }
    assert_eq!(ls.mgr.get_tx_ctx_count(), model.live.len());
}

#[test]
fn test_offline_forgets_departed_positions() {
    let ls = create_leader_ls();
    let ctx = create_tx(&ls, 1);
    let scn = ls.log.append().unwrap();
    ctx.commit(Scn::new(10), scn).unwrap();
    ls.mgr.del_tx_ctx(&ctx).unwrap();
    assert_eq!(ls.mgr.get_aggre_rec_scn(), scn);
    assert_eq!(ls.mgr.get_rec_scn().unwrap(), scn);

    ls.mgr.refresh_aggre_rec_scn();
    // Not flushed yet: a second refresh keeps the previous hand-over.
    ls.mgr.refresh_aggre_rec_scn();
    assert_eq!(ls.mgr.stat().prev_aggre_rec_scn, scn);

    ls.mgr.offline();
    assert!(ls.mgr.get_aggre_rec_scn().is_max());
    assert!(ls.mgr.get_rec_scn().unwrap().is_max());
}

#[test]
fn test_failed_flush_keeps_previous_aggregate() {
    let ls = create_leader_ls();
    let done = create_tx(&ls, 1);
    let scn = ls.log.append().unwrap();
    done.commit(Scn::new(10), scn).unwrap();
    ls.mgr.del_tx_ctx(&done).unwrap();
    ls.mgr.refresh_aggre_rec_scn();
    assert_eq!(ls.mgr.stat().prev_aggre_rec_scn, scn);

    let stuck = create_tx(&ls, 2);
    stuck.set_fail_flush(true);
    assert!(matches!(
        ls.mgr.on_tx_ctx_table_flushed(),
        Err(TxError::Again(_))
    ));
    assert_eq!(ls.mgr.stat().prev_aggre_rec_scn, scn);
    assert_eq!(ls.mgr.get_rec_scn().unwrap(), scn);

    stuck.set_fail_flush(false);
    ls.mgr.on_tx_ctx_table_flushed().unwrap();
    assert!(ls.mgr.stat().prev_aggre_rec_scn.is_max());
    assert!(ls.mgr.get_rec_scn().unwrap().is_max());

    ls.mgr.stop(false).unwrap();
    assert!(matches!(
        ls.mgr.on_tx_ctx_table_flushed(),
        Err(TxError::StateNotMatch(_))
    ));
}
