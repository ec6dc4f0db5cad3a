//! Greedy best-first graph traversal.
//!
//! One routine serves both queries and insertion: it walks the graph from
//! the entry points, keeping a bounded frontier of unexpanded candidates and
//! a bounded pool of the best admissible results. Queries read the pool;
//! insertion reads the full visit trail as its pruning candidate pool.
//!
//! Slots rejected by `accept` (deleted points, frozen entry points, label
//! mismatches) still navigate: their edges are followed, they just never
//! enter the result pool.

use std::cmp::Reverse;

use ordered_float::OrderedFloat;

use crate::graph::{GraphStore, InMemGraphStore};
use crate::scratch::ScratchSpace;
use crate::store::VectorStore;
use crate::Slot;

/// Walk the graph toward `query`, filling `scratch`.
///
/// On return `scratch.pool` holds the up-to-`list_size` best accepted slots
/// (worst on top) and `scratch.trail` every visited slot with its distance.
/// The caller must have reset `scratch` for the current slot count.
pub(crate) fn greedy_search<S, F>(
    store: &S,
    graph: &InMemGraphStore,
    query: &S::Query,
    entry_points: &[Slot],
    list_size: usize,
    scratch: &mut ScratchSpace,
    accept: F,
) where
    S: VectorStore,
    F: Fn(Slot) -> bool,
{
    let ScratchSpace {
        visited,
        frontier,
        pool,
        trail,
        neighbors,
    } = scratch;

    let num_slots = graph.num_slots();
    // Cached worst pool distance; avoids repeated heap peeks in the hot loop.
    let mut worst_dist = f32::MAX;

    for &ep in entry_points {
        if (ep as usize) < num_slots && visited.insert(ep) {
            let dist = store.distance(query, ep);
            frontier.push(Reverse((OrderedFloat(dist), ep)));
            trail.push((OrderedFloat(dist), ep));
            if accept(ep) {
                pool.push((OrderedFloat(dist), ep));
                if pool.len() >= list_size {
                    worst_dist = pool.peek().map_or(f32::MAX, |c| c.0 .0);
                }
            }
        }
    }

    while let Some(Reverse((dist, slot))) = frontier.pop() {
        // Closest unexpanded candidate is worse than the full pool: done.
        if pool.len() >= list_size && dist.0 > worst_dist {
            break;
        }

        graph.neighbors_into(slot, neighbors);
        for i in 0..neighbors.len() {
            let nbr = neighbors[i];
            if nbr as usize >= num_slots || !visited.insert(nbr) {
                continue;
            }
            let nbr_dist = store.distance(query, nbr);
            if pool.len() < list_size || nbr_dist < worst_dist {
                frontier.push(Reverse((OrderedFloat(nbr_dist), nbr)));
                trail.push((OrderedFloat(nbr_dist), nbr));
                if accept(nbr) {
                    pool.push((OrderedFloat(nbr_dist), nbr));
                    if pool.len() > list_size {
                        pool.pop();
                    }
                    if pool.len() >= list_size {
                        worst_dist = pool.peek().map_or(f32::MAX, |c| c.0 .0);
                    }
                }
            }
        }
    }
}
