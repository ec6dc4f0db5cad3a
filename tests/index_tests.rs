//! End-to-end index scenarios: build, insert, delete, consolidate,
//! persistence, and the dense-vs-quantized agreement check.

use proxima::{
    DenseStore, IndexConfig, IndexError, IndexSearchParams, IndexWriteParams, Metric, PqStore,
    Tag, VamanaIndex,
};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

fn random_vectors(n: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n * dim).map(|_| rng.gen_range(-1.0..1.0f32)).collect()
}

fn write_params(l: usize, r: usize, alpha: f32) -> IndexWriteParams {
    IndexWriteParams::builder(l, r)
        .with_alpha(alpha)
        .with_num_threads(2)
        .build()
}

fn dense_index(dim: usize, max_points: usize, l: usize, r: usize) -> VamanaIndex<DenseStore> {
    VamanaIndex::new(
        IndexConfig::dense(Metric::L2, dim, max_points),
        write_params(l, r, 1.2),
        IndexSearchParams::new(l, 2),
    )
    .unwrap()
}

fn built_dense(
    n: usize,
    dim: usize,
    l: usize,
    r: usize,
    seed: u64,
) -> (VamanaIndex<DenseStore>, Vec<f32>) {
    let data = random_vectors(n, dim, seed);
    let index = dense_index(dim, n, l, r);
    let tags: Vec<Tag> = (1..=n as Tag).collect(); // tag = slot + 1
    index.build(&data, &tags).unwrap();
    (index, data)
}

// ── build + search ──

#[test]
fn test_build_self_recall() {
    let (index, data) = built_dense(300, 16, 64, 32, 1);
    for tag in (1..=300u64).step_by(13) {
        let row = (tag as usize - 1) * 16;
        let results = index.search(&data[row..row + 16], 5, 64).unwrap();
        assert!(
            results.iter().any(|&(t, _)| t == tag),
            "tag {tag} missing from self-query results {results:?}"
        );
        assert_eq!(results[0].0, tag, "exact self-match ranks first");
    }
}

#[test]
fn test_degree_bound_after_build() {
    let (index, _) = built_dense(300, 16, 64, 24, 2);
    assert!(index.max_out_degree() <= 24);
}

#[test]
fn test_search_k_and_ordering() {
    let (index, data) = built_dense(200, 16, 64, 32, 3);
    let results = index.search(&data[0..16], 10, 64).unwrap();
    assert_eq!(results.len(), 10);
    for w in results.windows(2) {
        assert!(w[0].1 <= w[1].1, "results sorted by distance");
    }
}

#[test]
fn test_search_rejects_bad_input() {
    let (index, data) = built_dense(50, 16, 32, 16, 4);
    assert!(matches!(
        index.search(&data[0..8], 5, 32).unwrap_err(),
        IndexError::DimensionMismatch { .. }
    ));
    assert!(matches!(
        index.search(&data[0..16], 0, 32).unwrap_err(),
        IndexError::InvalidParameter(_)
    ));
}

// ── incremental insert ──

#[test]
fn test_insert_then_search() {
    let index = dense_index(16, 100, 48, 24);
    let data = random_vectors(100, 16, 5);
    for i in 0..100 {
        index.insert(i as Tag + 1, &data[i * 16..(i + 1) * 16]).unwrap();
    }
    assert_eq!(index.num_active(), 100);
    assert!(index.max_out_degree() <= 24);

    for i in (0..100).step_by(11) {
        let results = index.search(&data[i * 16..(i + 1) * 16], 3, 48).unwrap();
        assert_eq!(results[0].0, i as Tag + 1);
    }
}

#[test]
fn test_duplicate_tag_rejected() {
    let index = dense_index(8, 10, 16, 8);
    let v = random_vectors(1, 8, 6);
    index.insert(7, &v).unwrap();
    assert!(matches!(
        index.insert(7, &v).unwrap_err(),
        IndexError::DuplicateTag(7)
    ));
    assert_eq!(index.num_active(), 1);
}

#[test]
fn test_static_index_capacity_error() {
    let mut config = IndexConfig::dense(Metric::L2, 8, 4);
    config.dynamic = false;
    let index: VamanaIndex<DenseStore> =
        VamanaIndex::new(config, write_params(16, 8, 1.2), IndexSearchParams::default()).unwrap();
    let data = random_vectors(5, 8, 7);
    for i in 0..4 {
        index.insert(i as Tag + 1, &data[i * 8..(i + 1) * 8]).unwrap();
    }
    assert!(matches!(
        index.insert(5, &data[32..40]).unwrap_err(),
        IndexError::Capacity(_)
    ));
}

#[test]
fn test_dynamic_index_grows() {
    let index = dense_index(8, 4, 16, 8);
    let data = random_vectors(12, 8, 8);
    for i in 0..12 {
        index.insert(i as Tag + 1, &data[i * 8..(i + 1) * 8]).unwrap();
    }
    assert_eq!(index.num_active(), 12);
    assert!(index.capacity() >= 12);
}

// ── delete + consolidate ──

#[test]
fn test_delete_is_permanent_after_consolidate() {
    let (index, data) = built_dense(200, 16, 64, 32, 9);

    index.lazy_delete(42).unwrap();
    assert!(matches!(
        index.lazy_delete(42).unwrap_err(),
        IndexError::UnknownTag(42)
    ));

    // Hidden from results immediately, even before consolidation.
    let row = 41 * 16;
    let before = index.search(&data[row..row + 16], 10, 64).unwrap();
    assert!(!before.iter().any(|&(t, _)| t == 42));

    let report = index.consolidate_deletes().unwrap();
    assert_eq!(report.slots_released, 1);
    assert_eq!(report.active_points, 199);

    let after = index.search(&data[row..row + 16], 10, 64).unwrap();
    assert!(!after.iter().any(|&(t, _)| t == 42));
    assert!(matches!(
        index.get_vector(42).unwrap_err(),
        IndexError::UnknownTag(42)
    ));
    assert!(index.max_out_degree() <= 32);
}

#[test]
fn test_slot_reuse_without_growth() {
    let (index, _) = built_dense(100, 16, 48, 24, 10);
    let capacity_before = index.capacity();

    for tag in 1..=50u64 {
        index.lazy_delete(tag).unwrap();
    }
    let report = index.consolidate_deletes().unwrap();
    assert_eq!(report.slots_released, 50);
    assert_eq!(report.empty_slots, 50);

    let fresh = random_vectors(50, 16, 11);
    for i in 0..50 {
        index
            .insert(1000 + i as Tag, &fresh[i * 16..(i + 1) * 16])
            .unwrap();
    }
    assert_eq!(index.num_active(), 100);
    assert_eq!(index.capacity(), capacity_before, "reclaimed slots reused");
}

#[test]
fn test_consolidate_empty_delete_set_is_noop() {
    let (index, _) = built_dense(50, 16, 32, 16, 12);
    let report = index.consolidate_deletes().unwrap();
    assert_eq!(report.slots_released, 0);
    assert_eq!(report.delete_set_size, 0);
    assert_eq!(report.active_points, 50);
}

#[test]
fn test_full_and_partial_delete_scenario() {
    // 1000 random 128-dim vectors, R=64, L=100, alpha=1.2, tag = slot + 1.
    let n = 1000;
    let dim = 128;
    let data = random_vectors(n, dim, 13);
    let index = VamanaIndex::<DenseStore>::new(
        IndexConfig::dense(Metric::L2, dim, n),
        IndexWriteParams::builder(100, 64).with_alpha(1.2).build(),
        IndexSearchParams::new(100, 0),
    )
    .unwrap();
    let tags: Vec<Tag> = (1..=n as Tag).collect();
    index.build(&data, &tags).unwrap();
    assert!(index.max_out_degree() <= 64);

    // Partial batch: delete tags 101..=1000.
    let batch: Vec<Tag> = (101..=1000).collect();
    let (deleted, failed) = index.lazy_delete_batch(&batch);
    assert_eq!((deleted, failed), (900, 0));

    let report = index.consolidate_deletes().unwrap();
    assert_eq!(report.slots_released, 900);
    assert_eq!(report.active_points, n - 900);
    assert!(index.max_out_degree() <= 64);

    // Remaining points are still reachable.
    for tag in (1..=100u64).step_by(7) {
        let row = (tag as usize - 1) * dim;
        let results = index.search(&data[row..row + dim], 5, 100).unwrap();
        assert_eq!(results[0].0, tag);
    }

    // Delete the rest; index drains completely.
    let rest: Vec<Tag> = (1..=100).collect();
    assert_eq!(index.lazy_delete_batch(&rest), (100, 0));
    let report = index.consolidate_deletes().unwrap();
    assert_eq!(report.slots_released, 100);
    assert_eq!(report.active_points, 0);
    assert!(index.search(&data[0..dim], 5, 100).unwrap().is_empty());
}

#[test]
fn test_reinsert_after_full_drain() {
    let (index, _) = built_dense(10, 16, 32, 8, 24);
    let capacity_before = index.capacity();
    let all: Vec<Tag> = (1..=10).collect();
    assert_eq!(index.lazy_delete_batch(&all), (10, 0));
    let report = index.consolidate_deletes().unwrap();
    assert_eq!(report.active_points, 0);
    assert_eq!(report.slots_released, 10);

    // Inserts into the drained index must re-anchor traversal; the old
    // entry point sits on the free list and may never become a neighbor.
    let fresh = random_vectors(10, 16, 25);
    for i in 0..10 {
        index
            .insert(100 + i as Tag, &fresh[i * 16..(i + 1) * 16])
            .unwrap();
    }
    assert_eq!(index.num_active(), 10);
    assert_eq!(index.capacity(), capacity_before, "freed slots reused");
    assert!(index.max_out_degree() <= 8);

    for i in 0..10 {
        let results = index.search(&fresh[i * 16..(i + 1) * 16], 3, 32).unwrap();
        assert_eq!(results[0].0, 100 + i as Tag);
    }
}

#[test]
fn test_insert_during_concurrent_consolidate() {
    let mut config = IndexConfig::dense(Metric::L2, 16, 400);
    config.concurrent_consolidate = true;
    let index = std::sync::Arc::new(
        VamanaIndex::<DenseStore>::new(
            config,
            write_params(48, 24, 1.2),
            IndexSearchParams::new(48, 2),
        )
        .unwrap(),
    );
    let data = random_vectors(200, 16, 26);
    let tags: Vec<Tag> = (1..=200).collect();
    index.build(&data, &tags).unwrap();

    let doomed: Vec<Tag> = (1..=100).collect();
    assert_eq!(index.lazy_delete_batch(&doomed), (100, 0));

    std::thread::scope(|s| {
        let inserter = index.clone();
        s.spawn(move || {
            let fresh = random_vectors(50, 16, 27);
            for i in 0..50 {
                inserter
                    .insert(500 + i as Tag, &fresh[i * 16..(i + 1) * 16])
                    .unwrap();
            }
        });
        let compactor = index.clone();
        s.spawn(move || {
            compactor.consolidate_deletes().unwrap();
        });
    });

    assert_eq!(index.num_active(), 150);
    assert_eq!(index.pending_deletes(), 0);
    assert!(index.max_out_degree() <= 24);
    for tag in [101u64, 200, 500, 549] {
        assert!(index.get_vector(tag).is_ok(), "tag {tag} lost");
    }
    assert!(matches!(
        index.get_vector(1).unwrap_err(),
        IndexError::UnknownTag(1)
    ));
}

// ── persistence ──

#[test]
fn test_save_load_round_trip() {
    let dir = tempdir().unwrap();
    let prefix = dir.path().join("snapshot");
    let (index, data) = built_dense(150, 16, 48, 24, 14);
    index.lazy_delete(3).unwrap(); // pending delete survives the round trip
    index.save(&prefix, false).unwrap();

    let loaded = VamanaIndex::<DenseStore>::load(&prefix, 0, 0).unwrap();
    assert_eq!(loaded.num_active(), 149);
    assert_eq!(loaded.pending_deletes(), 1);

    for i in (0..150).step_by(17) {
        let q = &data[i * 16..(i + 1) * 16];
        let a = index.search(q, 5, 48).unwrap();
        let b = loaded.search(q, 5, 48).unwrap();
        assert_eq!(a, b, "search results identical after reload");
    }
    for tag in [1u64, 80, 150] {
        assert_eq!(index.get_vector(tag).unwrap(), loaded.get_vector(tag).unwrap());
    }
}

#[test]
fn test_save_with_compaction() {
    let dir = tempdir().unwrap();
    let prefix = dir.path().join("compacted");
    let (index, _) = built_dense(80, 16, 32, 16, 15);
    for tag in 1..=20u64 {
        index.lazy_delete(tag).unwrap();
    }
    index.save(&prefix, true).unwrap();

    let loaded = VamanaIndex::<DenseStore>::load(&prefix, 0, 0).unwrap();
    assert_eq!(loaded.num_active(), 60);
    assert_eq!(loaded.pending_deletes(), 0);
}

#[test]
fn test_load_missing_file_fails() {
    let dir = tempdir().unwrap();
    let prefix = dir.path().join("nothing-here");
    assert!(VamanaIndex::<DenseStore>::load(&prefix, 0, 0).is_err());
}

// ── quantized store ──

#[test]
fn test_dense_and_pq_top5_agreement() {
    let n = 400;
    let dim = 32;
    let data = random_vectors(n, dim, 16);
    let tags: Vec<Tag> = (1..=n as Tag).collect();

    let dense = VamanaIndex::<DenseStore>::new(
        IndexConfig::dense(Metric::L2, dim, n),
        write_params(64, 32, 1.2),
        IndexSearchParams::new(64, 2),
    )
    .unwrap();
    dense.build(&data, &tags).unwrap();

    let quantized = VamanaIndex::<PqStore>::new(
        IndexConfig::quantized(Metric::L2, dim, n, 16),
        write_params(64, 32, 1.2),
        IndexSearchParams::new(64, 2),
    )
    .unwrap();
    quantized.build(&data, &tags).unwrap();

    // With 2-wide subvectors and 256 centroids the quantization error is
    // tiny, so the top-5 sets should almost always coincide.
    let queries = random_vectors(50, dim, 17);
    let mut overlap = 0;
    for q in queries.chunks_exact(dim) {
        let d: Vec<Tag> = dense.search(q, 5, 64).unwrap().iter().map(|&(t, _)| t).collect();
        overlap += quantized
            .search(q, 5, 64)
            .unwrap()
            .iter()
            .filter(|&&(t, _)| d.contains(&t))
            .count();
    }
    assert!(overlap >= 225, "top-5 overlap {overlap}/250 below 90%");
}

#[test]
fn test_pq_index_delete_and_reuse() {
    let n = 200;
    let dim = 16;
    let data = random_vectors(n, dim, 18);
    let tags: Vec<Tag> = (1..=n as Tag).collect();
    let index = VamanaIndex::<PqStore>::new(
        IndexConfig::quantized(Metric::L2, dim, n, 8),
        write_params(48, 24, 1.2),
        IndexSearchParams::new(48, 2),
    )
    .unwrap();
    index.build(&data, &tags).unwrap();

    for tag in 1..=40u64 {
        index.lazy_delete(tag).unwrap();
    }
    let report = index.consolidate_deletes().unwrap();
    assert_eq!(report.slots_released, 40);
    assert_eq!(report.active_points, 160);

    // Codebook is already trained, so inserts land in the freed slots.
    let fresh = random_vectors(10, dim, 19);
    for i in 0..10 {
        index
            .insert(500 + i as Tag, &fresh[i * dim..(i + 1) * dim])
            .unwrap();
    }
    assert_eq!(index.num_active(), 170);
    assert_eq!(index.capacity(), n);
}

// ── filtering ──

#[test]
fn test_filtered_search_respects_labels() {
    let n = 120;
    let dim = 16;
    let data = random_vectors(n, dim, 20);
    let tags: Vec<Tag> = (1..=n as Tag).collect();
    let labels: Vec<Vec<u32>> = (0..n).map(|i| vec![(i % 3) as u32]).collect();

    let mut config = IndexConfig::dense(Metric::L2, dim, n);
    config.filtering = true;
    config.num_frozen_points = 3;
    let index: VamanaIndex<DenseStore> = VamanaIndex::new(
        config,
        write_params(48, 24, 1.2),
        IndexSearchParams::new(48, 2),
    )
    .unwrap();
    index.build_filtered(&data, &tags, &labels).unwrap();

    for label in 0..3u32 {
        let results = index.search_filtered(&data[0..dim], 10, 48, label).unwrap();
        assert!(!results.is_empty());
        for &(tag, _) in &results {
            assert_eq!(
                (tag as usize - 1) % 3,
                label as usize,
                "tag {tag} does not carry label {label}"
            );
        }
    }
}

#[test]
fn test_filtered_build_checks_frozen_coverage() {
    let mut config = IndexConfig::dense(Metric::L2, 8, 30);
    config.filtering = true;
    config.num_frozen_points = 1;
    let index: VamanaIndex<DenseStore> = VamanaIndex::new(
        config,
        write_params(16, 8, 1.2),
        IndexSearchParams::default(),
    )
    .unwrap();
    let data = random_vectors(30, 8, 28);
    let tags: Vec<Tag> = (1..=30).collect();
    let labels: Vec<Vec<u32>> = (0..30).map(|i| vec![(i % 3) as u32]).collect();
    assert!(matches!(
        index.build_filtered(&data, &tags, &labels).unwrap_err(),
        IndexError::InvalidParameter(_)
    ));
}

// ── concurrency ──

#[test]
fn test_concurrent_inserts_and_searches() {
    let index = std::sync::Arc::new(dense_index(16, 400, 48, 24));
    let seed_data = random_vectors(40, 16, 21);
    let tags: Vec<Tag> = (1..=40).collect();
    index.build(&seed_data, &tags).unwrap();

    std::thread::scope(|s| {
        for t in 0..3u64 {
            let index = index.clone();
            s.spawn(move || {
                let data = random_vectors(40, 16, 22 + t);
                for i in 0..40 {
                    let tag = 100 + t * 100 + i as Tag;
                    index.insert(tag, &data[i * 16..(i + 1) * 16]).unwrap();
                }
            });
        }
        let searcher = index.clone();
        s.spawn(move || {
            let queries = random_vectors(40, 16, 30);
            for q in queries.chunks_exact(16) {
                let results = searcher.search(q, 3, 48).unwrap();
                assert!(results.len() <= 3);
            }
        });
    });

    assert_eq!(index.num_active(), 160);
    assert!(index.max_out_degree() <= 24);
}
