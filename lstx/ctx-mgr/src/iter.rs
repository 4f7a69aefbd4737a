use std::vec;

use lstx_common::TxId;
use lstx_transaction::TxCtx;

use crate::ctx_map::{CtxMap, CtxRef};

/// Iterator over the contexts of one log stream, bucket by bucket.
///
/// Only the ids of a bucket are buffered; each context is looked up again when
/// reached, and ids whose context left the directory meanwhile are skipped.
pub struct LsTxCtxIter<'a, C> {
    map: &'a CtxMap<C>,
    next_bucket: usize,
    buffer: vec::IntoIter<TxId>,
}

impl<'a, C: TxCtx> LsTxCtxIter<'a, C> {
    pub(crate) fn new(map: &'a CtxMap<C>) -> Self {
        Self {
            map,
            next_bucket: 0,
            buffer: Vec::new().into_iter(),
        }
    }
}

impl<C: TxCtx> Iterator for LsTxCtxIter<'_, C> {
    type Item = CtxRef<C>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            for tx_id in self.buffer.by_ref() {
                if let Some(ctx) = self.map.get(tx_id) {
                    return Some(ctx);
                }
            }
            if self.next_bucket >= self.map.bucket_count() {
                return None;
            }
            self.buffer = self.map.bucket_tx_ids(self.next_bucket).into_iter();
            self.next_bucket += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use lstx_common::LsId;
    use lstx_transaction::{MemTxCtx, TxCreateArg};

    use super::*;

    #[test]
    fn test_iter_skips_vanished_contexts() {
        let map = CtxMap::new(2);
        let handles: Vec<_> = (1..=6)
            .map(|i| {
                let arg = TxCreateArg::new(1, LsId::new(1), TxId::new(i), false);
                map.insert_and_get(TxId::new(i), || MemTxCtx::init(&arg, 1), |_| Ok(()))
                    .unwrap()
                    .0
            })
            .collect();

        let mut iter = LsTxCtxIter::new(&map);
        let first = iter.next().unwrap();
        // Remove every other context while the iteration is in progress.
        for ctx in handles.iter().filter(|c| c.tx_id().id() % 2 == 0) {
            if !ctx.ptr_eq(&first) {
                map.del(ctx);
            }
        }
        let mut rest: Vec<_> = iter.map(|ctx| ctx.tx_id()).collect();
        rest.sort();
        let expected: Vec<_> = (1..=6)
            .filter(|i| i % 2 == 1)
            .map(TxId::new)
            .filter(|id| *id != first.tx_id())
            .collect();
        assert_eq!(rest, expected);

        let all: Vec<_> = LsTxCtxIter::new(&map).map(|ctx| ctx.tx_id()).collect();
        assert_eq!(all.len(), map.count());
    }
}
