use std::sync::atomic::{AtomicU64, Ordering};

use lstx_common::Scn;

/// Recycle position contributed by contexts that have already left the
/// directory.
///
/// `aggre` collects the positions of departed contexts. Before a checkpoint of
/// the transaction context table starts, [`RecScnAggregate::refresh`] hands
/// `aggre` over to `prev_aggre`, which is cleared once that checkpoint is
/// durable. Both cells only move down between those resets, and an empty cell
/// holds [`Scn::MAX`].
#[derive(Debug)]
pub struct RecScnAggregate {
    aggre: AtomicU64,
    prev_aggre: AtomicU64,
}

impl RecScnAggregate {
    pub fn new() -> Self {
        Self {
            aggre: AtomicU64::new(Scn::MAX.raw()),
            prev_aggre: AtomicU64::new(Scn::MAX.raw()),
        }
    }

    /// Fold the position of a departing context in.
    pub fn update(&self, scn: Scn) {
        self.aggre.fetch_min(scn.raw(), Ordering::AcqRel);
    }

    pub fn aggre(&self) -> Scn {
        Scn::new(self.aggre.load(Ordering::Acquire))
    }

    pub fn prev_aggre(&self) -> Scn {
        Scn::new(self.prev_aggre.load(Ordering::Acquire))
    }

    /// Minimum of both cells.
    pub fn get(&self) -> Scn {
        self.aggre().min(self.prev_aggre())
    }

    /// Move `aggre` into `prev_aggre`. Returns false, leaving both cells alone,
    /// while the previous hand-over has not been flushed yet.
    pub fn refresh(&self) -> bool {
        if !self.prev_aggre().is_max() {
            return false;
        }
        let cur = self.aggre.load(Ordering::Acquire);
        // Publish into prev_aggre first so that get() never observes both
        // cells empty in between.
        self.prev_aggre.fetch_min(cur, Ordering::AcqRel);
        // A concurrent update lowered aggre; keep it there.
        let _ = self.aggre.compare_exchange(
            cur,
            Scn::MAX.raw(),
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        true
    }

    pub fn on_flushed(&self) {
        self.prev_aggre.store(Scn::MAX.raw(), Ordering::Release);
    }

    pub fn reset(&self) {
        self.aggre.store(Scn::MAX.raw(), Ordering::Release);
        self.prev_aggre.store(Scn::MAX.raw(), Ordering::Release);
    }
}

impl Default for RecScnAggregate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_then_flush() {
        let aggre = RecScnAggregate::new();
        assert!(aggre.get().is_max());

        aggre.update(Scn::new(50));
        aggre.update(Scn::new(70));
        assert_eq!(aggre.get(), Scn::new(50));

        assert!(aggre.refresh());
        assert!(aggre.aggre().is_max());
        assert_eq!(aggre.prev_aggre(), Scn::new(50));
        assert_eq!(aggre.get(), Scn::new(50));

        // A second refresh before the flush keeps collecting into aggre.
        aggre.update(Scn::new(60));
        assert!(!aggre.refresh());
        assert_eq!(aggre.aggre(), Scn::new(60));
        assert_eq!(aggre.get(), Scn::new(50));

        aggre.on_flushed();
        assert_eq!(aggre.get(), Scn::new(60));
    }

    #[test]
    fn test_failed_checkpoint_keeps_watermark() {
        let aggre = RecScnAggregate::new();
        aggre.update(Scn::new(10));
        assert!(aggre.refresh());
        // The checkpoint failed, nothing gets flushed.
        aggre.update(Scn::new(30));
        assert_eq!(aggre.get(), Scn::new(10));
        aggre.reset();
        assert!(aggre.get().is_max());
    }
}
