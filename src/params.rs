//! Immutable parameter bundles for index operations.
//!
//! [`IndexWriteParams`] configures build/insert/consolidate, [`IndexSearchParams`]
//! configures queries, and [`IndexConfig`] fixes the structural properties of an
//! index (metric, dimension, capacity, storage strategy) at construction time.
//! All three are built once and passed into index operations; none are mutated
//! by the index.

use crate::config;
use crate::distance::Metric;
use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};

/// Parameters governing graph mutation: build, insert, and consolidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexWriteParams {
    /// Search list size (L) used to gather pruning candidates.
    pub search_list_size: usize,
    /// Maximum out-degree (R) of any slot once pruning completes.
    pub max_degree: usize,
    /// Backfill neighbor lists up to R with the closest unadmitted candidates
    /// after the alpha-pass, to avoid under-connected nodes.
    pub saturate_graph: bool,
    /// Cap on the candidate pool fed to a single robust prune (C).
    pub max_occlusion_size: usize,
    /// Occlusion pruning parameter; `alpha >= 1.0`.
    pub alpha: f32,
    /// Worker threads for batch build and consolidation. 0 = all available.
    pub num_threads: usize,
    /// Search list size for filtered (label-gated) operations (Lf).
    pub filter_list_size: usize,
}

impl IndexWriteParams {
    /// Start a fluent builder from the two required knobs.
    pub fn builder(search_list_size: usize, max_degree: usize) -> IndexWriteParamsBuilder {
        IndexWriteParamsBuilder {
            search_list_size,
            max_degree,
            saturate_graph: config::DEFAULT_SATURATE_GRAPH,
            max_occlusion_size: config::DEFAULT_MAX_OCCLUSION_SIZE,
            alpha: config::DEFAULT_ALPHA,
            num_threads: 0,
            filter_list_size: 0,
        }
    }
}

impl Default for IndexWriteParams {
    fn default() -> Self {
        IndexWriteParams::builder(config::DEFAULT_SEARCH_LIST_SIZE, config::DEFAULT_MAX_DEGREE)
            .build()
    }
}

/// Fluent builder for [`IndexWriteParams`].
///
/// Tracks the non-default properties without a positional constructor.
#[derive(Debug)]
pub struct IndexWriteParamsBuilder {
    search_list_size: usize,
    max_degree: usize,
    saturate_graph: bool,
    max_occlusion_size: usize,
    alpha: f32,
    num_threads: usize,
    filter_list_size: usize,
}

impl IndexWriteParamsBuilder {
    pub fn with_saturate_graph(mut self, saturate_graph: bool) -> Self {
        self.saturate_graph = saturate_graph;
        self
    }

    pub fn with_max_occlusion_size(mut self, max_occlusion_size: usize) -> Self {
        self.max_occlusion_size = max_occlusion_size;
        self
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// 0 resolves to the number of available CPUs at build time.
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// 0 resolves to `search_list_size`.
    pub fn with_filter_list_size(mut self, filter_list_size: usize) -> Self {
        self.filter_list_size = filter_list_size;
        self
    }

    pub fn build(self) -> IndexWriteParams {
        let num_threads = if self.num_threads == 0 {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        } else {
            self.num_threads
        };
        let filter_list_size = if self.filter_list_size == 0 {
            self.search_list_size
        } else {
            self.filter_list_size
        };
        IndexWriteParams {
            search_list_size: self.search_list_size,
            max_degree: self.max_degree,
            saturate_graph: self.saturate_graph,
            max_occlusion_size: self.max_occlusion_size,
            alpha: self.alpha,
            num_threads,
            filter_list_size,
        }
    }
}

/// Parameters governing query execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSearchParams {
    /// Search list size (L) used when none is supplied per query.
    pub initial_search_list_size: usize,
    /// Worker threads for batch query helpers. 0 = all available.
    pub num_search_threads: usize,
}

impl IndexSearchParams {
    pub fn new(initial_search_list_size: usize, num_search_threads: usize) -> Self {
        Self {
            initial_search_list_size,
            num_search_threads,
        }
    }
}

impl Default for IndexSearchParams {
    fn default() -> Self {
        Self::new(config::DEFAULT_SEARCH_LIST_SIZE, 0)
    }
}

/// Storage backend for vector data, selected at index construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataStoreStrategy {
    /// Dense, alignment-padded f32 arena.
    Dense,
    /// Product-quantized codes; the payload is the number of PQ chunks.
    Quantized { num_chunks: usize },
}

/// Storage backend for adjacency, selected at index construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphStoreStrategy {
    /// All adjacency resident in memory.
    InMemory,
}

/// Structural configuration of an index, fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Distance function.
    pub metric: Metric,
    /// Logical vector dimension.
    pub dim: usize,
    /// Maximum number of caller points (excluding frozen points).
    pub max_points: usize,
    /// Whether storage may grow past `max_points` on insert.
    pub dynamic: bool,
    /// Vector storage backend.
    pub data_strategy: DataStoreStrategy,
    /// Adjacency storage backend.
    pub graph_strategy: GraphStoreStrategy,
    /// Whether per-slot labels and filtered operations are enabled.
    pub filtering: bool,
    /// Label value that matches any filter, when filtering is enabled.
    pub universal_label: Option<u32>,
    /// Number of synthetic frozen entry points. Must be ≥ the number of
    /// distinct labels when filtering is enabled and > 0.
    pub num_frozen_points: usize,
    /// Allow inserts to proceed while consolidation is running.
    pub concurrent_consolidate: bool,
}

impl IndexConfig {
    /// Configuration for a dense dynamic index with no filtering.
    pub fn dense(metric: Metric, dim: usize, max_points: usize) -> Self {
        Self {
            metric,
            dim,
            max_points,
            dynamic: true,
            data_strategy: DataStoreStrategy::Dense,
            graph_strategy: GraphStoreStrategy::InMemory,
            filtering: false,
            universal_label: None,
            num_frozen_points: 0,
            concurrent_consolidate: false,
        }
    }

    /// Configuration for a quantized dynamic index with no filtering.
    pub fn quantized(metric: Metric, dim: usize, max_points: usize, num_chunks: usize) -> Self {
        Self {
            data_strategy: DataStoreStrategy::Quantized { num_chunks },
            ..Self::dense(metric, dim, max_points)
        }
    }

    /// Validate the configuration before an index is constructed from it.
    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 || self.dim > config::MAX_DIMENSION {
            return Err(IndexError::InvalidParameter(format!(
                "dimension {} out of range 1..={}",
                self.dim,
                config::MAX_DIMENSION
            )));
        }
        if self.max_points == 0 {
            return Err(IndexError::InvalidParameter(
                "max_points must be positive".into(),
            ));
        }
        if let DataStoreStrategy::Quantized { num_chunks } = self.data_strategy {
            if num_chunks == 0 || self.dim % num_chunks != 0 {
                return Err(IndexError::InvalidParameter(format!(
                    "num_chunks {} must divide dimension {}",
                    num_chunks, self.dim
                )));
            }
        }
        if self.filtering && self.universal_label.is_none() && self.num_frozen_points == 0 {
            return Err(IndexError::InvalidParameter(
                "filtered index needs frozen entry points or a universal label".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let wp = IndexWriteParams::builder(100, 64).build();
        assert_eq!(wp.search_list_size, 100);
        assert_eq!(wp.max_degree, 64);
        assert_eq!(wp.alpha, config::DEFAULT_ALPHA);
        assert_eq!(wp.filter_list_size, 100, "Lf defaults to L");
        assert!(wp.num_threads >= 1, "0 resolves to available CPUs");
    }

    #[test]
    fn test_builder_overrides() {
        let wp = IndexWriteParams::builder(50, 32)
            .with_alpha(1.4)
            .with_saturate_graph(true)
            .with_max_occlusion_size(300)
            .with_num_threads(2)
            .with_filter_list_size(80)
            .build();
        assert_eq!(wp.alpha, 1.4);
        assert!(wp.saturate_graph);
        assert_eq!(wp.max_occlusion_size, 300);
        assert_eq!(wp.num_threads, 2);
        assert_eq!(wp.filter_list_size, 80);
    }

    #[test]
    fn test_config_validate_rejects_bad_chunks() {
        let cfg = IndexConfig::quantized(Metric::L2, 100, 10, 7);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_config_validate_ok() {
        assert!(IndexConfig::dense(Metric::L2, 128, 1000).validate().is_ok());
        assert!(IndexConfig::quantized(Metric::Cosine, 128, 1000, 16)
            .validate()
            .is_ok());
    }
}
