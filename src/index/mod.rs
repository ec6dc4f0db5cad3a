//! The Vamana index orchestrator.
//!
//! [`VamanaIndex`] composes a [`VectorStore`], an [`InMemGraphStore`], the
//! tag map, the delete set, and the label store into a mutable ANN index:
//! batch build, incremental insert, lazy delete with background
//! consolidation, and concurrent search.
//!
//! Locking discipline: the store and graph sit behind outer `RwLock`s taken
//! shared by every operation; exclusive acquisition happens only for
//! capacity changes and vector writes. Adjacency mutation synchronizes on
//! the graph's per-slot locks, so inserts touching disjoint slots run in
//! parallel. The tag map (with the free list) and the delete set each have
//! their own lock and are never held across a store or graph acquisition.
//! The insert gate is held shared by every insert and exclusively by
//! non-concurrent consolidation and by save.

mod consolidate;
mod prune;
mod search;

pub use consolidate::ConsolidateReport;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{GROWTH_FACTOR, MAX_K};
use crate::error::{IndexError, Result};
use crate::graph::{GraphStore, InMemGraphStore};
use crate::labels::{Label, LabelStore};
use crate::params::{IndexConfig, IndexSearchParams, IndexWriteParams};
use crate::scratch::with_scratch;
use crate::store::VectorStore;
use crate::tags::TagMap;
use crate::{Slot, Tag};

use prune::{robust_prune, PruneParams};
use search::greedy_search;

// Shuffle seed for the build link order; a fixed seed keeps builds
// reproducible.
const LINK_ORDER_SEED: u64 = 0x9e37_79b9;

/// Mutable Vamana index over a pluggable vector store.
pub struct VamanaIndex<S: VectorStore> {
    pub(crate) config: IndexConfig,
    pub(crate) write_params: IndexWriteParams,
    pub(crate) search_params: IndexSearchParams,
    pub(crate) store: RwLock<S>,
    pub(crate) graph: RwLock<InMemGraphStore>,
    pub(crate) tags: RwLock<TagMap>,
    pub(crate) deleted: RwLock<HashSet<Slot>>,
    pub(crate) labels: RwLock<LabelStore>,
    /// Traversal entry point: frozen slot 0 when frozen points exist,
    /// otherwise the medoid.
    pub(crate) start: AtomicU32,
    /// High-water mark of allocated slots, frozen points included.
    pub(crate) num_slots_used: AtomicU32,
    /// Cached store/graph capacity; changes only under exclusive store
    /// access.
    pub(crate) capacity: AtomicU32,
    /// Shared by inserts, exclusive for non-concurrent consolidation and
    /// save.
    pub(crate) insert_gate: RwLock<()>,
}

/// Serialized index state minus the vector data and adjacency, which live
/// in their own files.
#[derive(Serialize, Deserialize)]
struct MetaSnapshot {
    config: IndexConfig,
    write_params: IndexWriteParams,
    search_params: IndexSearchParams,
    capacity: u32,
    num_slots_used: u32,
    tags: TagMap,
    deleted: Vec<Slot>,
    labels: LabelStore,
}

fn suffixed(prefix: &Path, ext: &str) -> PathBuf {
    PathBuf::from(format!("{}.{}", prefix.display(), ext))
}

impl<S: VectorStore> VamanaIndex<S> {
    /// Create an empty index for `config`.
    pub fn new(
        config: IndexConfig,
        write_params: IndexWriteParams,
        search_params: IndexSearchParams,
    ) -> Result<Self> {
        config.validate()?;
        if write_params.alpha < 1.0 {
            return Err(IndexError::InvalidParameter(format!(
                "alpha {} must be >= 1.0",
                write_params.alpha
            )));
        }
        if write_params.max_degree == 0 || write_params.search_list_size == 0 {
            return Err(IndexError::InvalidParameter(
                "max_degree and search_list_size must be positive".into(),
            ));
        }

        let capacity = config.max_points + config.num_frozen_points;
        let store = S::create(&config, capacity)?;
        let graph = InMemGraphStore::new(capacity, write_params.max_degree);
        let labels = LabelStore::new(capacity, config.universal_label);
        let num_frozen = config.num_frozen_points as u32;

        Ok(Self {
            config,
            write_params,
            search_params,
            store: RwLock::new(store),
            graph: RwLock::new(graph),
            tags: RwLock::new(TagMap::new()),
            deleted: RwLock::new(HashSet::new()),
            labels: RwLock::new(labels),
            start: AtomicU32::new(0),
            num_slots_used: AtomicU32::new(num_frozen),
            capacity: AtomicU32::new(capacity as u32),
            insert_gate: RwLock::new(()),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn write_params(&self) -> &IndexWriteParams {
        &self.write_params
    }

    /// Number of live (tagged) points.
    pub fn num_active(&self) -> usize {
        self.tags.read().len()
    }

    /// Current slot capacity, frozen points included.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire) as usize
    }

    /// Largest out-degree over all allocated slots.
    pub fn max_out_degree(&self) -> usize {
        let graph = self.graph.read();
        let used = self.num_slots_used.load(Ordering::Acquire);
        (0..used).map(|s| graph.degree(s)).max().unwrap_or(0)
    }

    /// Stored (for quantized stores: reconstructed) vector for a live tag.
    pub fn get_vector(&self, tag: Tag) -> Result<Vec<f32>> {
        let slot = self
            .tags
            .read()
            .slot_of(tag)
            .ok_or(IndexError::UnknownTag(tag))?;
        let mut out = Vec::new();
        self.store.read().get_vector(slot, &mut out)?;
        Ok(out)
    }

    /// Batch-construct the graph over `data` (row-major, one row per tag).
    ///
    /// Two-pass: a connectivity pass at alpha 1.0, then a refinement pass at
    /// the configured alpha. Parallel over points.
    pub fn build(&self, data: &[f32], tags: &[Tag]) -> Result<()> {
        self.build_inner(data, tags, None)
    }

    /// Batch-construct with one label set per point; enables filtered search.
    pub fn build_filtered(
        &self,
        data: &[f32],
        tags: &[Tag],
        point_labels: &[Vec<Label>],
    ) -> Result<()> {
        if !self.config.filtering {
            return Err(IndexError::InvalidParameter(
                "filtering is not enabled for this index".into(),
            ));
        }
        if point_labels.len() != tags.len() {
            return Err(IndexError::InvalidParameter(format!(
                "{} label sets for {} points",
                point_labels.len(),
                tags.len()
            )));
        }
        // Frozen entry points must cover the label space when present.
        let distinct: HashSet<Label> = point_labels.iter().flatten().copied().collect();
        if self.config.num_frozen_points > 0 && distinct.len() > self.config.num_frozen_points {
            return Err(IndexError::InvalidParameter(format!(
                "{} distinct labels exceed {} frozen entry points",
                distinct.len(),
                self.config.num_frozen_points
            )));
        }
        self.build_inner(data, tags, Some(point_labels))
    }

    fn build_inner(
        &self,
        data: &[f32],
        tags_in: &[Tag],
        point_labels: Option<&[Vec<Label>]>,
    ) -> Result<()> {
        let _gate = self.insert_gate.write();

        let n = tags_in.len();
        let dim = self.config.dim;
        let frozen = self.config.num_frozen_points;
        if n == 0 {
            return Err(IndexError::InvalidParameter("empty build batch".into()));
        }
        if data.len() != n * dim {
            return Err(IndexError::DimensionMismatch {
                expected: n * dim,
                actual: data.len(),
            });
        }
        if n > self.config.max_points {
            return Err(IndexError::Capacity(format!(
                "{} build points exceed max_points {}",
                n, self.config.max_points
            )));
        }
        if !self.tags.read().is_empty() {
            return Err(IndexError::Consistency("index is already built".into()));
        }
        let mut seen = HashSet::with_capacity(n);
        for &t in tags_in {
            if !seen.insert(t) {
                return Err(IndexError::DuplicateTag(t));
            }
        }

        {
            let mut store = self.store.write();
            store.populate(data, frozen as Slot)?;
            if frozen > 0 {
                // Frozen slots hold the dataset centroid; they anchor
                // traversal and are never deleted.
                let mut centroid = vec![0.0f64; dim];
                for row in data.chunks_exact(dim) {
                    for (c, &v) in centroid.iter_mut().zip(row) {
                        *c += v as f64;
                    }
                }
                let centroid: Vec<f32> =
                    centroid.iter().map(|&c| (c / n as f64) as f32).collect();
                for f in 0..frozen as Slot {
                    store.set_vector(f, &centroid)?;
                }
            }
        }

        {
            let mut tag_map = self.tags.write();
            for (i, &t) in tags_in.iter().enumerate() {
                tag_map.bind(t, frozen as Slot + i as Slot)?;
            }
        }
        if let Some(per_point) = point_labels {
            let mut labels = self.labels.write();
            for (i, ls) in per_point.iter().enumerate() {
                labels.set_labels(frozen as Slot + i as Slot, ls.clone());
            }
        }

        let used = frozen + n;
        self.num_slots_used.store(used as u32, Ordering::Release);

        let start = if frozen > 0 {
            0
        } else {
            self.store.read().calculate_medoid(n)?
        };
        self.start.store(start, Ordering::Release);

        let mut order: Vec<Slot> = (0..used as Slot).collect();
        order.shuffle(&mut StdRng::seed_from_u64(LINK_ORDER_SEED));

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.write_params.num_threads)
            .build()
            .map_err(|e| IndexError::InvalidParameter(e.to_string()))?;

        let alphas = if self.write_params.alpha > 1.0 {
            vec![1.0, self.write_params.alpha]
        } else {
            vec![self.write_params.alpha]
        };
        for alpha in alphas {
            pool.install(|| {
                order
                    .par_iter()
                    .try_for_each(|&slot| self.link_slot(slot, alpha))
            })?;
        }

        if self.config.filtering {
            let mut labels = self.labels.write();
            for label in labels.distinct_labels() {
                if labels.entry_point(label).is_some() {
                    continue;
                }
                let entry = (frozen as Slot..used as Slot)
                    .find(|&s| labels.labels_of(s).binary_search(&label).is_ok());
                if let Some(e) = entry {
                    labels.set_entry_point(label, e);
                }
            }
        }

        info!(
            points = n,
            frozen,
            start,
            max_degree = self.write_params.max_degree,
            "built index"
        );
        Ok(())
    }

    /// Insert one point into a live index.
    ///
    /// Safe to run concurrently with searches, other inserts, and (when
    /// enabled) consolidation. The tag becomes visible to searches only
    /// after the point is fully linked.
    pub fn insert(&self, tag: Tag, vector: &[f32]) -> Result<()> {
        self.insert_inner(tag, vector, &[])
    }

    /// Insert one labeled point; requires filtering to be enabled.
    pub fn insert_labeled(&self, tag: Tag, vector: &[f32], labels: &[Label]) -> Result<()> {
        if !self.config.filtering {
            return Err(IndexError::InvalidParameter(
                "filtering is not enabled for this index".into(),
            ));
        }
        self.insert_inner(tag, vector, labels)
    }

    fn insert_inner(&self, tag: Tag, vector: &[f32], point_labels: &[Label]) -> Result<()> {
        let _gate = self.insert_gate.read();

        if vector.len() != self.config.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.config.dim,
                actual: vector.len(),
            });
        }

        let slot = loop {
            {
                let mut tags = self.tags.write();
                if tags.contains_tag(tag) {
                    return Err(IndexError::DuplicateTag(tag));
                }
                if let Some(s) = tags.pop_free() {
                    break s;
                }
                let used = self.num_slots_used.load(Ordering::Acquire);
                if used < self.capacity.load(Ordering::Acquire) {
                    self.num_slots_used.store(used + 1, Ordering::Release);
                    break used as Slot;
                }
            }
            // Out of slots; grow outside the tag lock, then retry.
            if !self.config.dynamic {
                return Err(IndexError::Capacity(format!(
                    "index is full ({} slots) and growth is disabled",
                    self.capacity.load(Ordering::Acquire)
                )));
            }
            self.grow()?;
        };

        self.store.write().set_vector(slot, vector)?;
        if !point_labels.is_empty() {
            self.labels.write().set_labels(slot, point_labels.to_vec());
        }

        self.link_slot(slot, self.write_params.alpha)?;

        // Bind last: the tag resolves only to a fully-written, fully-linked
        // slot.
        let mut tags = self.tags.write();
        if let Err(e) = tags.bind(tag, slot) {
            // Lost a duplicate race. Tombstone the slot; consolidation
            // detaches it and returns it to the free list.
            drop(tags);
            self.deleted.write().insert(slot);
            return Err(e);
        }
        // First live point after a full drain becomes the entry point;
        // the previous start may sit on the free list.
        if self.config.num_frozen_points == 0 && tags.len() == 1 {
            self.start.store(slot, Ordering::Release);
        }
        Ok(())
    }

    fn grow(&self) -> Result<()> {
        let cap = self.capacity.load(Ordering::Acquire) as usize;
        let new_cap = ((cap as f64 * GROWTH_FACTOR).ceil() as usize).max(cap + 1);
        self.store.write().expand(new_cap)?;
        self.graph.write().expand(new_cap);
        self.labels.write().expand(new_cap);
        self.capacity.fetch_max(new_cap as u32, Ordering::AcqRel);
        info!(from = cap, to = new_cap, "grew index capacity");
        Ok(())
    }

    /// Greedy-search for `slot`'s neighbors, prune, install, and update
    /// reverse edges. Shared by build and insert.
    fn link_slot(&self, slot: Slot, alpha: f32) -> Result<()> {
        let store = self.store.read();
        let graph = self.graph.read();

        let mut vec = Vec::new();
        store.get_vector(slot, &mut vec)?;
        let query = store.preprocess_query(&vec)?;

        // Scratch sized by capacity: racing inserts may already link slots
        // above the used watermark.
        let num_slots = graph.num_slots();
        let list_size = self.write_params.search_list_size;
        let start = self.start.load(Ordering::Acquire);

        let mut pool: Vec<(f32, Slot)> = {
            let deleted = self.deleted.read();
            let tags = self.tags.read();
            let frozen = self.config.num_frozen_points as Slot;
            // Only frozen or tagged slots may become neighbors; a freed slot
            // (a stale entry point after a full drain, or a mid-flight
            // insert) must never end up referenced by the graph.
            let linkable =
                |s: Slot| s != slot && !deleted.contains(&s) && (s < frozen || tags.tag_of(s).is_some());
            with_scratch(num_slots, list_size, |scratch| {
                greedy_search(&*store, &*graph, &query, &[start], list_size, scratch, |s| {
                    linkable(s)
                });
                // Prune over everything the search visited, not just the
                // final pool; deleted slots stay transit-only.
                scratch
                    .trail
                    .iter()
                    .filter(|&&(_, s)| linkable(s))
                    .map(|&(d, s)| (d.0, s))
                    .collect()
            })
        };

        let pp = PruneParams {
            alpha,
            max_degree: self.write_params.max_degree,
            max_occlusion_size: self.write_params.max_occlusion_size,
            saturate_graph: self.write_params.saturate_graph,
        };
        let neighbors = robust_prune(&*store, slot, &mut pool, pp);
        graph.set_neighbors(slot, neighbors.clone());

        // Reverse edges, re-pruning any neighbor pushed past the degree
        // bound. A concurrent re-prune of the same slot can drop a racing
        // edge; the graph stays degree-bounded either way.
        let mut snapshot = Vec::new();
        for &n in &neighbors {
            let degree = graph.append_neighbor(n, slot);
            if degree > self.write_params.max_degree {
                graph.neighbors_into(n, &mut snapshot);
                let mut reverse_pool: Vec<(f32, Slot)> = snapshot
                    .iter()
                    .map(|&c| (store.distance_between(n, c), c))
                    .collect();
                let pruned = robust_prune(&*store, n, &mut reverse_pool, pp);
                graph.set_neighbors(n, pruned);
            }
        }
        Ok(())
    }

    /// K nearest live tags to `query`. `list_size` 0 uses the configured
    /// default; it is clamped to at least `k`.
    pub fn search(&self, query: &[f32], k: usize, list_size: usize) -> Result<Vec<(Tag, f32)>> {
        self.search_internal(query, k, list_size, None)
    }

    /// Filtered variant: only slots carrying `filter` (or the universal
    /// label) are returned.
    pub fn search_filtered(
        &self,
        query: &[f32],
        k: usize,
        list_size: usize,
        filter: Label,
    ) -> Result<Vec<(Tag, f32)>> {
        if !self.config.filtering {
            return Err(IndexError::InvalidParameter(
                "filtering is not enabled for this index".into(),
            ));
        }
        self.search_internal(query, k, list_size, Some(filter))
    }

    /// Row-major batch of queries, answered on a pool of
    /// `num_search_threads` workers.
    pub fn search_batch(
        &self,
        queries: &[f32],
        k: usize,
        list_size: usize,
    ) -> Result<Vec<Vec<(Tag, f32)>>> {
        let dim = self.config.dim;
        if queries.is_empty() || queries.len() % dim != 0 {
            return Err(IndexError::DimensionMismatch {
                expected: dim,
                actual: queries.len(),
            });
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.search_params.num_search_threads)
            .build()
            .map_err(|e| IndexError::InvalidParameter(e.to_string()))?;
        pool.install(|| {
            queries
                .par_chunks(dim)
                .map(|q| self.search(q, k, list_size))
                .collect()
        })
    }

    fn search_internal(
        &self,
        query: &[f32],
        k: usize,
        list_size: usize,
        filter: Option<Label>,
    ) -> Result<Vec<(Tag, f32)>> {
        if k == 0 || k > MAX_K {
            return Err(IndexError::InvalidParameter(format!(
                "k {} out of range 1..={}",
                k, MAX_K
            )));
        }
        let default_l = match filter {
            Some(_) => self.write_params.filter_list_size,
            None => self.search_params.initial_search_list_size,
        };
        let l = if list_size == 0 { default_l } else { list_size }.max(k);

        let used = self.num_slots_used.load(Ordering::Acquire) as usize;
        if used == 0 || self.tags.read().is_empty() {
            return Ok(Vec::new());
        }

        let store = self.store.read();
        if query.len() != store.dim() {
            return Err(IndexError::DimensionMismatch {
                expected: store.dim(),
                actual: query.len(),
            });
        }
        let preprocessed = store.preprocess_query(query)?;
        let graph = self.graph.read();
        let deleted = self.deleted.read();
        let labels = self.labels.read();
        let frozen = self.config.num_frozen_points as Slot;

        let entry = filter
            .and_then(|f| labels.entry_point(f))
            .unwrap_or_else(|| self.start.load(Ordering::Acquire));

        let hits = with_scratch(graph.num_slots(), l, |scratch| {
            greedy_search(&*store, &*graph, &preprocessed, &[entry], l, scratch, |s| {
                s >= frozen
                    && !deleted.contains(&s)
                    && filter.map_or(true, |f| labels.matches(s, f))
            });
            scratch.sorted_results()
        });
        drop(labels);
        drop(deleted);
        drop(graph);
        drop(store);

        let tags = self.tags.read();
        Ok(hits
            .into_iter()
            .filter_map(|(d, s)| tags.tag_of(s).map(|t| (t, d)))
            .take(k)
            .collect())
    }

    /// Persist the index under `prefix` (`.meta`, `.data`, `.graph` files).
    pub fn save(&self, prefix: &Path, compact_before_save: bool) -> Result<()> {
        if compact_before_save {
            self.consolidate_deletes()?;
        }
        // Quiesce writers so the three files describe one state.
        let _gate = self.insert_gate.write();

        let store = self.store.read();
        store.save_data(&suffixed(prefix, "data"))?;
        self.graph.read().save(
            &suffixed(prefix, "graph"),
            self.start.load(Ordering::Acquire),
            self.config.num_frozen_points as u32,
        )?;

        let meta = MetaSnapshot {
            config: self.config.clone(),
            write_params: self.write_params.clone(),
            search_params: self.search_params.clone(),
            capacity: store.capacity() as u32,
            num_slots_used: self.num_slots_used.load(Ordering::Acquire),
            tags: self.tags.read().clone(),
            deleted: self.deleted.read().iter().copied().collect(),
            labels: self.labels.read().clone(),
        };
        let bytes =
            bincode::serialize(&meta).map_err(|e| IndexError::Serialization(e.to_string()))?;
        crate::io::write_checksummed(&suffixed(prefix, "meta"), &bytes)?;

        info!(
            prefix = %prefix.display(),
            active = meta.tags.len(),
            capacity = meta.capacity,
            "saved index"
        );
        Ok(())
    }

    /// Load an index saved by [`VamanaIndex::save`].
    ///
    /// `num_threads` 0 and `search_list_size` 0 keep the saved values.
    pub fn load(prefix: &Path, num_threads: usize, search_list_size: usize) -> Result<Self> {
        let bytes = crate::io::read_checksummed(&suffixed(prefix, "meta"))?;
        let meta: MetaSnapshot =
            bincode::deserialize(&bytes).map_err(|e| IndexError::Serialization(e.to_string()))?;
        meta.config.validate()?;

        let mut store = S::create(&meta.config, meta.capacity as usize)?;
        store.load_data(&suffixed(prefix, "data"))?;

        let (graph, start, frozen) = InMemGraphStore::load(&suffixed(prefix, "graph"))?;
        if frozen as usize != meta.config.num_frozen_points {
            return Err(IndexError::Format(format!(
                "graph file has {} frozen points, config expects {}",
                frozen, meta.config.num_frozen_points
            )));
        }
        if graph.num_slots() != meta.capacity as usize {
            return Err(IndexError::Format(format!(
                "graph covers {} slots, meta expects {}",
                graph.num_slots(),
                meta.capacity
            )));
        }

        let mut write_params = meta.write_params;
        if num_threads > 0 {
            write_params.num_threads = num_threads;
        }
        let mut search_params = meta.search_params;
        if search_list_size > 0 {
            search_params.initial_search_list_size = search_list_size;
        }

        info!(
            prefix = %prefix.display(),
            active = meta.tags.len(),
            capacity = meta.capacity,
            "loaded index"
        );
        Ok(Self {
            config: meta.config,
            write_params,
            search_params,
            store: RwLock::new(store),
            graph: RwLock::new(graph),
            tags: RwLock::new(meta.tags),
            deleted: RwLock::new(meta.deleted.into_iter().collect()),
            labels: RwLock::new(meta.labels),
            start: AtomicU32::new(start),
            num_slots_used: AtomicU32::new(meta.num_slots_used),
            capacity: AtomicU32::new(meta.capacity),
            insert_gate: RwLock::new(()),
        })
    }
}
