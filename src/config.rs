//! Global configuration constants for proxima.
//!
//! All tuning parameters and validation limits are defined here. These are
//! compile-time constants; per-index runtime configuration lives in
//! [`crate::params`].

/// Default maximum out-degree (R) of the proximity graph.
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 32–128.
pub const DEFAULT_MAX_DEGREE: usize = 64;

/// Default search list size (L) during construction and insertion.
///
/// Controls the breadth of the greedy-search frontier used to gather
/// pruning candidates. Must be ≥ the degree bound to be useful.
pub const DEFAULT_SEARCH_LIST_SIZE: usize = 100;

/// Default pruning parameter alpha.
///
/// `alpha ≥ 1.0` controls how aggressively near-duplicate edge directions
/// are pruned; higher alpha keeps sparser, more diverse neighbor sets.
pub const DEFAULT_ALPHA: f32 = 1.2;

/// Default cap on the candidate pool fed to robust pruning (C).
///
/// Bounds the cost of a single prune regardless of how many candidates the
/// search phase accumulated.
pub const DEFAULT_MAX_OCCLUSION_SIZE: usize = 750;

/// Whether to backfill neighbor lists up to the degree bound after the
/// alpha-pass by default.
pub const DEFAULT_SATURATE_GRAPH: bool = false;

/// SIMD alignment stride for the dense store, in f32 lanes.
///
/// Aligned dimension is always rounded up to a multiple of this and padding
/// is zero-filled.
pub const ALIGNMENT_FACTOR: usize = 8;

/// Growth factor applied when a dynamic index runs out of slots.
pub const GROWTH_FACTOR: f64 = 1.5;

/// Cap on the number of deleted slots expanded while repairing one slot's
/// adjacency during consolidation.
///
/// Chains of deleted neighbors are chased to any depth until live
/// replacements surface; this budget bounds the cost of a single repair when
/// the delete set is enormous. A repair that exhausts the budget keeps
/// whatever live candidates it found; the next pass picks up the rest.
pub const MAX_REPAIR_EXPANSIONS: usize = 4096;

/// Number of points sampled by the quantized store's approximate medoid
/// computation. Populations at or below this size are scanned exactly.
pub const MEDOID_SAMPLE_SIZE: usize = 10_000;

/// Number of centroids per PQ subspace. Fixed at 256 so each code fits in
/// one byte.
pub const PQ_NUM_CENTROIDS: usize = 256;

/// K-means iterations used when training a PQ codebook.
pub const PQ_KMEANS_ITERATIONS: usize = 12;

/// Maximum allowed vector dimension.
pub const MAX_DIMENSION: usize = 4096;

/// Maximum number of results (`k`) per search request.
pub const MAX_K: usize = 10_000;
