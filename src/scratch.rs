//! Reusable per-worker search buffers.
//!
//! Every greedy search needs a visited set, a candidate frontier, and a
//! result pool. Allocating these per query dominates search cost at small
//! list sizes, so each worker thread keeps a [`ScratchSpace`] in thread-local
//! storage and clears it between uses instead of reallocating.

use std::cell::RefCell;
use std::collections::BinaryHeap;

use ordered_float::OrderedFloat;

use crate::Slot;

thread_local! {
    /// Per-thread scratch reused across queries. Grows to the largest
    /// capacity seen on this thread and never shrinks.
    static SEARCH_SCRATCH: RefCell<ScratchSpace> = RefCell::new(ScratchSpace::new(0, 0));
}

/// Run `f` with this thread's scratch, sized for at least `num_slots` slots
/// and `list_size` frontier entries.
pub fn with_scratch<T>(num_slots: usize, list_size: usize, f: impl FnOnce(&mut ScratchSpace) -> T) -> T {
    SEARCH_SCRATCH.with(|cell| {
        let mut scratch = cell.borrow_mut();
        scratch.reset(num_slots, list_size);
        f(&mut scratch)
    })
}

/// Epoch-stamped membership set over slot ids.
///
/// Each slot carries a stamp; a slot is a member when its stamp equals the
/// current epoch. Forgetting every mark is then one epoch bump instead of a
/// memset, and the stamp array is only rewritten when the u16 epoch wraps.
#[derive(Debug)]
pub struct VisitedSet {
    stamps: Vec<u16>,
    epoch: u16,
}

impl VisitedSet {
    pub fn with_capacity(num_slots: usize) -> Self {
        Self {
            stamps: vec![0u16; num_slots],
            epoch: 1,
        }
    }

    /// Forget all marks and grow to cover at least `num_slots` slots.
    pub fn reset(&mut self, num_slots: usize) {
        if num_slots > self.stamps.len() {
            self.stamps.resize(num_slots, 0);
        }
        if self.epoch == u16::MAX {
            // Wrap: stale stamps from 65534 resets ago would alias the new
            // epoch, so rewrite them all.
            self.stamps.fill(0);
            self.epoch = 1;
        } else {
            self.epoch += 1;
        }
    }

    /// Mark `slot`; returns whether it was unmarked before this call.
    #[inline]
    pub fn insert(&mut self, slot: Slot) -> bool {
        let stamp = &mut self.stamps[slot as usize];
        if *stamp == self.epoch {
            false
        } else {
            *stamp = self.epoch;
            true
        }
    }
}

/// Candidate frontier entry: `(distance, slot)`.
///
/// Ordered by distance so heaps of candidates compare correctly; ties break
/// on slot for determinism.
pub type Candidate = (OrderedFloat<f32>, Slot);

/// Working buffers for one greedy search.
#[derive(Debug)]
pub struct ScratchSpace {
    /// Slots already expanded or queued this query.
    pub visited: VisitedSet,
    /// Min-frontier of unexpanded candidates (stored as max-heap of negated
    /// ordering via `Reverse` at use sites; kept raw here).
    pub frontier: BinaryHeap<std::cmp::Reverse<Candidate>>,
    /// Best candidates seen, worst-first so the worst is cheap to evict.
    pub pool: BinaryHeap<Candidate>,
    /// Full visit order, for callers that need the candidate trail
    /// (insertion gathers prune candidates from it).
    pub trail: Vec<Candidate>,
    /// Neighbor snapshot buffer, reused to avoid holding adjacency locks
    /// while computing distances.
    pub neighbors: Vec<Slot>,
}

impl ScratchSpace {
    pub fn new(num_slots: usize, list_size: usize) -> Self {
        Self {
            visited: VisitedSet::with_capacity(num_slots),
            frontier: BinaryHeap::with_capacity(list_size.max(16)),
            pool: BinaryHeap::with_capacity(list_size.max(16)),
            trail: Vec::with_capacity(list_size * 4),
            neighbors: Vec::new(),
        }
    }

    /// Drain the result pool in ascending distance order.
    pub fn sorted_results(&mut self) -> Vec<(f32, Slot)> {
        let mut out: Vec<Candidate> = self.pool.drain().collect();
        out.sort_unstable();
        out.into_iter().map(|(d, s)| (d.0, s)).collect()
    }

    /// Clear all buffers and make sure the visited set covers `num_slots`.
    pub fn reset(&mut self, num_slots: usize, list_size: usize) {
        self.visited.reset(num_slots);
        self.frontier.clear();
        self.pool.clear();
        self.trail.clear();
        self.neighbors.clear();
        if self.trail.capacity() < list_size {
            self.trail.reserve(list_size - self.trail.capacity());
        }
    }
}
