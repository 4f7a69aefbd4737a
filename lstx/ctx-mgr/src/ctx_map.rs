//! Lock-striped, reference-counted directory of transaction contexts.

use std::fmt;
use std::hash::BuildHasher;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use lstx_common::TxId;
use lstx_transaction::{TxCtx, TxResult};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotStatus {
    /// Inserted; the creator is still starting the transaction.
    Creating,
    Ready,
    /// Starting failed and the entry was withdrawn from the directory.
    Abandoned,
}

/// A context together with the number of handles currently held on it.
struct CtxSlot<C> {
    ctx: C,
    ref_count: AtomicI64,
    total: Arc<AtomicUsize>,
    status: Mutex<SlotStatus>,
    created: Condvar,
}

impl<C> CtxSlot<C> {
    fn new(ctx: C, total: Arc<AtomicUsize>) -> Self {
        total.fetch_add(1, Ordering::AcqRel);
        Self {
            ctx,
            ref_count: AtomicI64::new(0),
            total,
            status: Mutex::new(SlotStatus::Creating),
            created: Condvar::new(),
        }
    }

    fn is_ready(&self) -> bool {
        *self.status.lock() == SlotStatus::Ready
    }

    /// Block until the creator has either started or withdrawn the context.
    fn wait_created(&self) -> SlotStatus {
        let mut status = self.status.lock();
        while *status == SlotStatus::Creating {
            self.created.wait(&mut status);
        }
        *status
    }

    fn finish_creating(&self, status: SlotStatus) {
        *self.status.lock() = status;
        self.created.notify_all();
    }
}

impl<C> Drop for CtxSlot<C> {
    fn drop(&mut self) {
        self.total.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A counted handle on a context in the directory.
///
/// Dropping the handle (or passing it to [`CtxRef::revert`]) releases the
/// reference. The context object itself stays alive as long as any handle
/// does, even after it has been deleted from the directory.
pub struct CtxRef<C> {
    slot: Arc<CtxSlot<C>>,
}

impl<C> CtxRef<C> {
    fn acquire(slot: &Arc<CtxSlot<C>>) -> Self {
        slot.ref_count.fetch_add(1, Ordering::AcqRel);
        Self { slot: slot.clone() }
    }

    pub fn revert(self) {}

    /// Number of outstanding handles, this one included.
    pub fn ref_count(&self) -> i64 {
        self.slot.ref_count.load(Ordering::Acquire)
    }

    pub fn ptr_eq(&self, other: &CtxRef<C>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<C> Clone for CtxRef<C> {
    fn clone(&self) -> Self {
        Self::acquire(&self.slot)
    }
}

impl<C> Drop for CtxRef<C> {
    fn drop(&mut self) {
        let prev = self.slot.ref_count.fetch_sub(1, Ordering::AcqRel);
        if prev <= 0 {
            error!(ref_count = prev - 1, "context reference count underflow");
        }
    }
}

impl<C> Deref for CtxRef<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.slot.ctx
    }
}

impl<C: fmt::Debug> fmt::Debug for CtxRef<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CtxRef")
            .field("ctx", &self.slot.ctx)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

/// What a visitor wants done with the context it has just seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    /// Delete the context from the directory, then continue.
    Remove,
    /// End the traversal.
    Stop,
}

type Bucket<C> = RwLock<HashMap<TxId, Arc<CtxSlot<C>>>>;

/// Directory of transaction contexts keyed by transaction id.
///
/// Entries are spread over a fixed number of buckets, each behind its own lock,
/// so a traversal of one bucket never blocks lookups in another.
pub struct CtxMap<C> {
    buckets: Box<[Bucket<C>]>,
    hasher: hashbrown::DefaultHashBuilder,
    count: AtomicUsize,
    total: Arc<AtomicUsize>,
}

impl<C: TxCtx> CtxMap<C> {
    pub fn new(bucket_count: usize) -> Self {
        let buckets = (0..bucket_count.max(1))
            .map(|_| RwLock::new(HashMap::new()))
            .collect();
        Self {
            buckets,
            hasher: hashbrown::DefaultHashBuilder::default(),
            count: AtomicUsize::new(0),
            total: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn bucket_idx(&self, tx_id: TxId) -> usize {
        (self.hasher.hash_one(tx_id) % self.buckets.len() as u64) as usize
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Number of contexts in the directory.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Number of context objects still allocated, including deleted contexts
    /// that are still referenced.
    pub fn total_count(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    /// Insert the context built by `alloc` unless one already exists for
    /// `tx_id`, then run `start` on it. Returns a handle and whether the context
    /// already existed.
    ///
    /// A new entry is visible to other callers only once `start` has succeeded:
    /// colliding inserts and lookups wait for the creator. If `start` fails the
    /// entry is withdrawn, waiters look the id up again, and the error is
    /// returned to the creator.
    pub fn insert_and_get(
        &self,
        tx_id: TxId,
        alloc: impl FnOnce() -> TxResult<C>,
        start: impl FnOnce(&C) -> TxResult<()>,
    ) -> TxResult<(CtxRef<C>, bool)> {
        if let Some(existing) = self.get(tx_id) {
            return Ok((existing, true));
        }
        let ctx = alloc()?;
        let slot = loop {
            let mut bucket = self.buckets[self.bucket_idx(tx_id)].write();
            let other = match bucket.entry(tx_id) {
                Entry::Occupied(entry) => entry.get().clone(),
                Entry::Vacant(entry) => {
                    let slot = Arc::new(CtxSlot::new(ctx, self.total.clone()));
                    entry.insert(slot.clone());
                    self.count.fetch_add(1, Ordering::AcqRel);
                    break slot;
                }
            };
            drop(bucket);
            if other.wait_created() == SlotStatus::Ready {
                return Ok((CtxRef::acquire(&other), true));
            }
        };
        let handle = CtxRef::acquire(&slot);
        match start(&slot.ctx) {
            Ok(()) => {
                slot.finish_creating(SlotStatus::Ready);
                Ok((handle, false))
            }
            Err(e) => {
                self.del(&handle);
                slot.finish_creating(SlotStatus::Abandoned);
                Err(e)
            }
        }
    }

    /// Look `tx_id` up, waiting for a context that is still being created.
    pub fn get(&self, tx_id: TxId) -> Option<CtxRef<C>> {
        let slot = {
            let bucket = self.buckets[self.bucket_idx(tx_id)].read();
            bucket.get(&tx_id)?.clone()
        };
        (slot.wait_created() == SlotStatus::Ready).then(|| CtxRef::acquire(&slot))
    }

    /// Remove `ctx` from the directory. Returns false if the entry for its id
    /// is absent or belongs to another context object.
    pub fn del(&self, ctx: &CtxRef<C>) -> bool {
        let tx_id = ctx.tx_id();
        let mut bucket = self.buckets[self.bucket_idx(tx_id)].write();
        let owned = bucket
            .get(&tx_id)
            .is_some_and(|slot| Arc::ptr_eq(slot, &ctx.slot));
        if owned {
            bucket.remove(&tx_id);
            self.count.fetch_sub(1, Ordering::AcqRel);
        }
        owned
    }

    /// Ids of the contexts currently in bucket `idx`.
    pub fn bucket_tx_ids(&self, idx: usize) -> Vec<TxId> {
        self.buckets
            .get(idx)
            .map(|bucket| bucket.read().keys().copied().collect())
            .unwrap_or_default()
    }

    /// Visit every context. Returns false if the visitor stopped early.
    pub fn for_each(&self, mut visitor: impl FnMut(&C) -> Visit) -> bool {
        (0..self.buckets.len()).all(|idx| self.for_each_in_bucket(idx, &mut visitor))
    }

    /// Visit the contexts of bucket `idx`.
    ///
    /// The bucket is snapshotted under its read lock and visited without it, so
    /// visitors may call back into the directory.
    pub fn for_each_in_bucket(&self, idx: usize, visitor: &mut impl FnMut(&C) -> Visit) -> bool {
        let Some(bucket) = self.buckets.get(idx) else {
            return true;
        };
        let snapshot: Vec<_> = bucket
            .read()
            .values()
            .filter(|slot| slot.is_ready())
            .cloned()
            .collect();
        let mut removed = Vec::new();
        let mut completed = true;
        for slot in &snapshot {
            match visitor(&slot.ctx) {
                Visit::Continue => {}
                Visit::Remove => removed.push(slot),
                Visit::Stop => {
                    completed = false;
                    break;
                }
            }
        }
        if !removed.is_empty() {
            let mut bucket = bucket.write();
            for slot in removed {
                let tx_id = slot.ctx.tx_id();
                if bucket.get(&tx_id).is_some_and(|cur| Arc::ptr_eq(cur, slot)) {
                    bucket.remove(&tx_id);
                    self.count.fetch_sub(1, Ordering::AcqRel);
                }
            }
        }
        completed
    }
}
