//! Timestamp management for the transaction control plane
//!
//! This module provides log-position/timestamp generation, transaction ID
//! generation for callers that do not bring their own ids, and the
//! process-wide commit version floor that a newly promoted
//! leader advances before it serves writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use lstx_common::{Scn, TxId};

use crate::error::TimestampError;

/// Generator of monotonically increasing [`Scn`]s.
pub struct ScnGenerator {
    counter: AtomicU64,
}

impl ScnGenerator {
    /// Create a new generator starting at 1
    pub fn new() -> Self {
        Self::with_start(1)
    }

    /// Create a new generator with a starting value
    pub fn with_start(start: u64) -> Self {
        Self {
            counter: AtomicU64::new(start),
        }
    }

    /// Generate the next position
    pub fn next(&self) -> Result<Scn, TimestampError> {
        let mut cur = self.counter.load(Ordering::SeqCst);
        loop {
            if cur >= Scn::MAX.raw() {
                return Err(TimestampError::CommitVersionOverflow(cur));
            }
            match self.counter.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(Scn::new(cur)),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Get the next position without consuming it
    pub fn current(&self) -> Scn {
        Scn::new(self.counter.load(Ordering::SeqCst))
    }

    /// Make sure every later position is strictly greater than `scn`
    pub fn update_if_greater(&self, scn: Scn) -> Result<(), TimestampError> {
        if scn.raw() >= Scn::MAX.raw() - 1 {
            return Err(TimestampError::CommitVersionOverflow(scn.raw()));
        }
        self.counter.fetch_max(scn.raw() + 1, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for ScnGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Transaction ID generator
pub struct TxIdGenerator {
    counter: AtomicU64,
}

impl TxIdGenerator {
    /// Create a new transaction ID generator
    pub fn new() -> Self {
        Self::with_start(1)
    }

    /// Create a new transaction ID generator with a starting value
    pub fn with_start(start: u64) -> Self {
        Self {
            counter: AtomicU64::new(start.max(1)),
        }
    }

    /// Generate the next transaction ID
    pub fn next(&self) -> Result<TxId, TimestampError> {
        let mut cur = self.counter.load(Ordering::SeqCst);
        loop {
            if cur == u64::MAX {
                return Err(TimestampError::TxIdOverflow(cur));
            }
            match self.counter.compare_exchange_weak(
                cur,
                cur + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(TxId::new(cur)),
                Err(actual) => cur = actual,
            }
        }
    }

    /// Update the counter if the given transaction ID is greater than the current value
    pub fn update_if_greater(&self, tx_id: TxId) -> Result<(), TimestampError> {
        if tx_id.id() == u64::MAX {
            return Err(TimestampError::TxIdOverflow(tx_id.id()));
        }
        self.counter.fetch_max(tx_id.id() + 1, Ordering::SeqCst);
        Ok(())
    }
}

impl Default for TxIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks the largest commit version this process has observed or issued.
///
/// A leader must never hand out a commit version at or below this floor.
#[derive(Debug, Default)]
pub struct TxVersionMgr {
    max_commit_ts: AtomicU64,
}

impl TxVersionMgr {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the floor to `ts`; never lowers it.
    pub fn update_max_commit_ts(&self, ts: Scn) {
        if !ts.is_max() {
            self.max_commit_ts.fetch_max(ts.raw(), Ordering::AcqRel);
        }
    }

    pub fn max_commit_ts(&self) -> Scn {
        Scn::new(self.max_commit_ts.load(Ordering::Acquire))
    }

    /// Choose a commit version for a transaction whose oracle timestamp is
    /// `gts`: the result is at least `gts` and strictly above every version
    /// handed out before.
    pub fn next_commit_version(&self, gts: Scn) -> Result<Scn, TimestampError> {
        let mut cur = self.max_commit_ts.load(Ordering::Acquire);
        loop {
            if cur >= Scn::MAX.raw() - 1 {
                return Err(TimestampError::CommitVersionOverflow(cur));
            }
            let next = gts.raw().max(cur + 1);
            match self.max_commit_ts.compare_exchange_weak(
                cur,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(Scn::new(next)),
                Err(actual) => cur = actual,
            }
        }
    }
}

// Global singleton instance
static GLOBAL_TX_VERSION_MGR: OnceLock<Arc<TxVersionMgr>> = OnceLock::new();

/// Get the process-wide commit version floor
pub fn global_tx_version_mgr() -> Arc<TxVersionMgr> {
    GLOBAL_TX_VERSION_MGR
        .get_or_init(|| Arc::new(TxVersionMgr::new()))
        .clone()
}
