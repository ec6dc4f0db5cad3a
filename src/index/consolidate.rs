//! Lazy deletion and graph consolidation.
//!
//! `lazy_delete` only unbinds the tag and tombstones the slot; the vector
//! and adjacency stay in place so the slot keeps navigating as a transit
//! node. `consolidate_deletes` later repairs every live slot whose
//! adjacency touches the delete set by splicing in live replacements found
//! through chains of deleted slots (chased to any depth, under a per-slot
//! expansion budget), re-pruning, and finally clearing and freeing the
//! deleted slots.
//!
//! The pass is idempotent with respect to the remaining delete set: deletes
//! that land while a pass runs are simply picked up by the next one.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use tracing::{error, info};

use crate::config::MAX_REPAIR_EXPANSIONS;
use crate::error::{IndexError, Result};
use crate::graph::{GraphStore, InMemGraphStore};
use crate::index::prune::{robust_prune, PruneParams};
use crate::index::VamanaIndex;
use crate::store::VectorStore;
use crate::{Slot, Tag};

use std::sync::atomic::Ordering;

/// Outcome of one consolidation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolidateReport {
    /// Live (tagged) points after the pass.
    pub active_points: usize,
    /// Caller-visible point capacity (frozen slots excluded).
    pub max_points: usize,
    /// Slots available to future inserts: the free list plus never-used
    /// slots.
    pub empty_slots: usize,
    /// Slots cleared and returned to the free list by this pass.
    pub slots_released: usize,
    /// Size of the delete batch this pass processed.
    pub delete_set_size: usize,
    /// Wall-clock duration of the pass.
    pub elapsed: Duration,
}

impl<S: VectorStore> VamanaIndex<S> {
    /// Unbind `tag` and tombstone its slot.
    ///
    /// The point stops appearing in results immediately but keeps serving
    /// as a transit node until the next consolidation.
    pub fn lazy_delete(&self, tag: Tag) -> Result<()> {
        let slot = self.tags.write().unbind(tag)?;
        self.deleted.write().insert(slot);
        Ok(())
    }

    /// Delete a batch of tags, skipping unknown ones.
    /// Returns `(deleted, failed)` counts.
    pub fn lazy_delete_batch(&self, tags: &[Tag]) -> (usize, usize) {
        let mut deleted = 0;
        let mut failed = 0;
        for &tag in tags {
            match self.lazy_delete(tag) {
                Ok(()) => deleted += 1,
                Err(_) => failed += 1,
            }
        }
        (deleted, failed)
    }

    /// Number of tombstoned slots awaiting consolidation.
    pub fn pending_deletes(&self) -> usize {
        self.deleted.read().len()
    }

    /// Repair the graph around the current delete set, then reclaim the
    /// deleted slots.
    ///
    /// Takes the insert gate exclusively unless `concurrent_consolidate` is
    /// configured. A consistency error aborts the pass; repairs already
    /// committed stand, and re-running the pass is safe.
    pub fn consolidate_deletes(&self) -> Result<ConsolidateReport> {
        let started = Instant::now();
        let mut _gate_shared = None;
        let mut _gate_exclusive = None;
        if self.config.concurrent_consolidate {
            _gate_shared = Some(self.insert_gate.read());
        } else {
            _gate_exclusive = Some(self.insert_gate.write());
        }

        let delete_set: HashSet<Slot> = self.deleted.read().clone();
        if delete_set.is_empty() {
            return Ok(self.report(0, 0, started.elapsed()));
        }

        let used = self.num_slots_used.load(Ordering::Acquire) as usize;
        let frozen = self.config.num_frozen_points as Slot;

        // Re-seat the entry point if it is being deleted.
        if delete_set.contains(&self.start.load(Ordering::Acquire)) {
            let tags = self.tags.read();
            let replacement =
                (0..used as Slot).find(|&s| s < frozen || tags.tag_of(s).is_some());
            if let Some(s) = replacement {
                self.start.store(s, Ordering::Release);
            }
        }

        let pp = PruneParams {
            alpha: self.write_params.alpha,
            max_degree: self.write_params.max_degree,
            max_occlusion_size: self.write_params.max_occlusion_size,
            saturate_graph: self.write_params.saturate_graph,
        };
        let capacity = self.capacity.load(Ordering::Acquire);

        {
            let store = self.store.read();
            let graph = self.graph.read();
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.write_params.num_threads)
                .build()
                .map_err(|e| IndexError::InvalidParameter(e.to_string()))?;
            pool.install(|| {
                (0..used as Slot).into_par_iter().try_for_each(|slot| {
                    if delete_set.contains(&slot) {
                        return Ok(());
                    }
                    repair_slot(&*store, &*graph, slot, &delete_set, capacity, pp)
                })
            })?;
        }

        // Reclaim: clear adjacency and vectors, free the slots, shrink the
        // delete set. Deletes that raced in stay for the next pass.
        {
            let graph = self.graph.read();
            for &d in &delete_set {
                graph.clear_slot(d);
            }
        }
        {
            let mut store = self.store.write();
            let zeros = vec![0.0f32; store.dim()];
            for &d in &delete_set {
                store.set_vector(d, &zeros)?;
            }
        }
        {
            let mut labels = self.labels.write();
            for &d in &delete_set {
                labels.clear_slot(d);
            }
        }
        {
            let mut tags = self.tags.write();
            for &d in &delete_set {
                tags.push_free(d);
            }
        }
        {
            let mut deleted = self.deleted.write();
            for d in &delete_set {
                deleted.remove(d);
            }
        }

        let report = self.report(delete_set.len(), delete_set.len(), started.elapsed());
        info!(
            released = report.slots_released,
            active = report.active_points,
            empty = report.empty_slots,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "consolidated deletes"
        );
        Ok(report)
    }

    fn report(&self, released: usize, batch: usize, elapsed: Duration) -> ConsolidateReport {
        let tags = self.tags.read();
        let capacity = self.capacity.load(Ordering::Acquire) as usize;
        let used = self.num_slots_used.load(Ordering::Acquire) as usize;
        ConsolidateReport {
            active_points: tags.len(),
            max_points: capacity - self.config.num_frozen_points,
            empty_slots: tags.num_free() + (capacity - used),
            slots_released: released,
            delete_set_size: batch,
            elapsed,
        }
    }
}

/// Rebuild one live slot's adjacency around the delete set.
///
/// Every deleted neighbor is replaced by live slots reached through it.
/// Chains of deleted slots are chased to arbitrary depth, so a slot whose
/// whole neighborhood died still finds live replacements on the far side;
/// [`MAX_REPAIR_EXPANSIONS`] bounds the walk, and it stops early once the
/// pool already saturates the occlusion cap.
fn repair_slot<S: VectorStore>(
    store: &S,
    graph: &InMemGraphStore,
    slot: Slot,
    delete_set: &HashSet<Slot>,
    capacity: u32,
    pp: PruneParams,
) -> Result<()> {
    let mut neighbors = Vec::new();
    graph.neighbors_into(slot, &mut neighbors);
    if !neighbors.iter().any(|n| delete_set.contains(n)) {
        return Ok(());
    }

    let mut pool: Vec<(f32, Slot)> = Vec::with_capacity(neighbors.len() * 2);
    let mut pooled: HashSet<Slot> = HashSet::with_capacity(neighbors.len() * 2);
    let mut chain: Vec<Slot> = Vec::new();
    let mut expanded: HashSet<Slot> = HashSet::new();

    for &n in &neighbors {
        if n >= capacity {
            error!(slot, neighbor = n, capacity, "adjacency references invalid slot");
            return Err(IndexError::Consistency(format!(
                "slot {} references neighbor {} beyond capacity {}",
                slot, n, capacity
            )));
        }
        if delete_set.contains(&n) {
            chain.push(n);
        } else if pooled.insert(n) {
            pool.push((store.distance_between(slot, n), n));
        }
    }

    let mut hop_neighbors = Vec::new();
    while let Some(d) = chain.pop() {
        if expanded.len() >= MAX_REPAIR_EXPANSIONS || pool.len() >= pp.max_occlusion_size {
            break;
        }
        if !expanded.insert(d) {
            continue;
        }
        graph.neighbors_into(d, &mut hop_neighbors);
        for &c in &hop_neighbors {
            if c >= capacity {
                error!(
                    slot = d,
                    neighbor = c,
                    capacity,
                    "adjacency references invalid slot"
                );
                return Err(IndexError::Consistency(format!(
                    "slot {} references neighbor {} beyond capacity {}",
                    d, c, capacity
                )));
            }
            if c == slot {
                continue;
            }
            if delete_set.contains(&c) {
                if !expanded.contains(&c) {
                    chain.push(c);
                }
            } else if pooled.insert(c) {
                pool.push((store.distance_between(slot, c), c));
            }
        }
    }

    let repaired = robust_prune(store, slot, &mut pool, pp);
    graph.set_neighbors(slot, repaired);
    Ok(())
}
