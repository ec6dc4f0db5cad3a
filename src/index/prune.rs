//! Robust neighbor pruning with occlusion control.
//!
//! Given a distance-sorted candidate pool for a slot, admit candidates in
//! increasing distance, dropping any candidate occluded by an
//! already-admitted neighbor. The rule keeps neighbor sets diverse in
//! direction rather than clustered around the nearest few points, which is
//! what makes the graph navigable at bounded degree.

use crate::store::VectorStore;
use crate::Slot;

/// Pruning knobs, extracted from the write parameters.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PruneParams {
    pub alpha: f32,
    pub max_degree: usize,
    pub max_occlusion_size: usize,
    pub saturate_graph: bool,
}

/// Select at most `max_degree` neighbors for `slot` from `pool`.
///
/// `pool` holds `(distance_to_slot, candidate)` pairs in any order; it is
/// sorted and deduplicated in place. A candidate `c` is admitted only if for
/// every already-admitted neighbor `n`, `d(n, c) > alpha * d(slot, c)`. With
/// `saturate_graph`, the result is backfilled to `max_degree` with the
/// closest unadmitted candidates after the alpha pass.
///
/// Deterministic for a fixed pool, so re-pruning a stable pool reproduces
/// the same neighbor set.
pub(crate) fn robust_prune<S: VectorStore>(
    store: &S,
    slot: Slot,
    pool: &mut Vec<(f32, Slot)>,
    params: PruneParams,
) -> Vec<Slot> {
    pool.retain(|&(_, c)| c != slot);
    pool.sort_unstable_by(|a, b| {
        a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1))
    });
    // Same candidate always carries the same distance, so duplicates are
    // adjacent after the sort.
    pool.dedup_by_key(|&mut (_, c)| c);
    pool.truncate(params.max_occlusion_size);

    let mut admitted: Vec<Slot> = Vec::with_capacity(params.max_degree);
    let mut occluded = vec![false; pool.len()];

    for (i, &(dist, candidate)) in pool.iter().enumerate() {
        if admitted.len() >= params.max_degree {
            break;
        }
        let diverse = admitted
            .iter()
            .all(|&n| store.distance_between(n, candidate) > params.alpha * dist);
        if diverse {
            admitted.push(candidate);
        } else {
            occluded[i] = true;
        }
    }

    if params.saturate_graph && admitted.len() < params.max_degree {
        for (i, &(_, candidate)) in pool.iter().enumerate() {
            if admitted.len() >= params.max_degree {
                break;
            }
            if occluded[i] && !admitted.contains(&candidate) {
                admitted.push(candidate);
            }
        }
    }

    admitted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::Metric;
    use crate::store::dense::DenseStore;

    fn planar_store(points: &[[f32; 2]]) -> DenseStore {
        let mut s = DenseStore::new(Metric::L2, 2, points.len());
        for (i, p) in points.iter().enumerate() {
            s.set_vector(i as Slot, p).unwrap();
        }
        s
    }

    fn params(alpha: f32, r: usize) -> PruneParams {
        PruneParams {
            alpha,
            max_degree: r,
            max_occlusion_size: 750,
            saturate_graph: false,
        }
    }

    fn pool_for(store: &DenseStore, slot: Slot, candidates: &[Slot]) -> Vec<(f32, Slot)> {
        candidates
            .iter()
            .map(|&c| (store.distance_between(slot, c), c))
            .collect()
    }

    #[test]
    fn test_occluded_candidate_dropped() {
        // Slot 0 at origin; 1 and 2 near each other to the east, 3 north.
        let store = planar_store(&[[0.0, 0.0], [1.0, 0.0], [1.2, 0.1], [0.0, 1.5]]);
        let mut pool = pool_for(&store, 0, &[1, 2, 3]);
        let nbrs = robust_prune(&store, 0, &mut pool, params(1.2, 3));
        assert!(nbrs.contains(&1), "closest admitted first");
        assert!(nbrs.contains(&3), "different direction admitted");
        assert!(!nbrs.contains(&2), "occluded by 1");
    }

    #[test]
    fn test_degree_bound_respected() {
        let points: Vec<[f32; 2]> = (0..20)
            .map(|i| {
                let a = i as f32 * 0.314;
                [a.cos() * (1.0 + i as f32), a.sin() * (1.0 + i as f32)]
            })
            .collect();
        let store = planar_store(&points);
        let cands: Vec<Slot> = (1..20).collect();
        let mut pool = pool_for(&store, 0, &cands);
        let nbrs = robust_prune(&store, 0, &mut pool, params(1.0, 4));
        assert!(nbrs.len() <= 4);
    }

    #[test]
    fn test_idempotent_on_stable_pool() {
        let points: Vec<[f32; 2]> = (0..30)
            .map(|i| [(i % 6) as f32, (i / 6) as f32])
            .collect();
        let store = planar_store(&points);
        let cands: Vec<Slot> = (1..30).collect();

        let mut pool = pool_for(&store, 0, &cands);
        let first = robust_prune(&store, 0, &mut pool, params(1.2, 8));

        // Re-prune the already-pruned set with the same alpha.
        let mut pool2 = pool_for(&store, 0, &first);
        let second = robust_prune(&store, 0, &mut pool2, params(1.2, 8));
        assert_eq!(first, second);
    }

    #[test]
    fn test_saturate_backfills_to_degree() {
        // Colinear points: everything past the first is occluded at alpha 1.
        let points: Vec<[f32; 2]> = (0..6).map(|i| [i as f32, 0.0]).collect();
        let store = planar_store(&points);
        let cands: Vec<Slot> = (1..6).collect();

        let mut pool = pool_for(&store, 0, &cands);
        let sparse = robust_prune(&store, 0, &mut pool, params(1.0, 4));
        assert_eq!(sparse, vec![1], "alpha pass keeps only the closest");

        let mut pool = pool_for(&store, 0, &cands);
        let saturated = robust_prune(
            &store,
            0,
            &mut pool,
            PruneParams {
                saturate_graph: true,
                ..params(1.0, 4)
            },
        );
        assert_eq!(saturated, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_self_and_duplicates_removed() {
        let store = planar_store(&[[0.0, 0.0], [1.0, 0.0], [0.0, 2.0]]);
        let mut pool = pool_for(&store, 0, &[1, 0, 1, 2, 2]);
        let nbrs = robust_prune(&store, 0, &mut pool, params(1.2, 8));
        assert_eq!(nbrs, vec![1, 2]);
    }
}
