//! # proxima
//!
//! Mutable, graph-based approximate nearest neighbor (ANN) index built on the
//! Vamana algorithm. The index maintains a navigable, degree-bounded proximity
//! graph over a point set and supports batch construction, incremental
//! insertion, lazy (soft) deletion, and a consolidation pass that physically
//! removes deleted points, repairs the graph, and returns their slots for
//! reuse, all while serving concurrent similarity queries.
//!
//! Vector data lives behind the [`store::VectorStore`] trait with two
//! interchangeable backends: a dense, alignment-padded f32 arena and a
//! product-quantized store holding compressed codes. Adjacency lives behind
//! [`graph::GraphStore`] with per-slot locking so independent slots can be
//! mutated concurrently.

/// Compile-time defaults, limits, and tuning parameters.
pub mod config;
/// Distance metrics: squared euclidean, cosine, and inner product.
pub mod distance;
/// Error taxonomy for index, store, and persistence operations.
pub mod error;
/// Adjacency storage: the `GraphStore` trait and the in-memory implementation.
pub mod graph;
/// The Vamana index orchestrator: build, search, insert, delete, consolidate.
pub mod index;
/// Dense vector binary (fbin) file format: validated readers and writers.
pub mod io;
/// Per-slot label sets and label-compatibility gating for filtered indexes.
pub mod labels;
/// Immutable parameter bundles: write parameters, search parameters, index config.
pub mod params;
/// Per-worker reusable search buffers: visited set, candidate pool, distance buffer.
pub mod scratch;
/// Vector storage: the `VectorStore` trait, dense and quantized backends.
pub mod store;
/// Tag ↔ slot bijection and the free-slot list.
pub mod tags;

pub use distance::Metric;
pub use error::{IndexError, Result};
pub use index::{ConsolidateReport, VamanaIndex};
pub use params::{IndexConfig, IndexSearchParams, IndexWriteParams};
pub use store::{dense::DenseStore, pq::PqStore, VectorStore};

/// Internal storage index for a point. Dense, zero-based, reused after
/// consolidation frees it.
pub type Slot = u32;

/// Caller-visible stable identifier for a point, distinct from its slot.
pub type Tag = u64;
