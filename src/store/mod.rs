//! Vector storage behind a common trait.
//!
//! The index never touches vector bytes directly; all access goes through
//! [`VectorStore`], which has two backends: [`dense::DenseStore`] keeps
//! full-precision f32 rows in an alignment-padded arena, and [`pq::PqStore`]
//! keeps product-quantized one-byte-per-chunk codes plus a trained codebook.
//!
//! Queries are preprocessed once into a backend-specific representation
//! (padded copy plus cached norm for dense, a per-chunk distance table for
//! PQ) and every distance during a traversal is computed against that.

pub mod dense;
pub mod pq;

use std::path::Path;

use crate::error::Result;
use crate::params::IndexConfig;
use crate::{io, Slot};

/// Storage for the vectors of an index, addressed by slot.
///
/// Implementations are internally unsynchronized; the index serializes
/// writers and `expand`/`shrink` against readers with an outer lock.
pub trait VectorStore: Send + Sync {
    /// Backend-specific preprocessed query representation.
    type Query;

    /// Construct an empty store for `config` with room for `capacity` slots.
    ///
    /// Fails if `config.data_strategy` does not select this backend.
    fn create(config: &IndexConfig, capacity: usize) -> Result<Self>
    where
        Self: Sized;

    /// Logical (caller-visible) vector dimension.
    fn dim(&self) -> usize;

    /// Number of slots this store currently has room for.
    fn capacity(&self) -> usize;

    /// Store `vector` at `slot`. The slot must be within capacity.
    fn set_vector(&mut self, slot: Slot, vector: &[f32]) -> Result<()>;

    /// Reconstruct the vector at `slot` into `out`.
    ///
    /// Dense returns the stored values exactly; quantized returns the
    /// centroid reconstruction.
    fn get_vector(&self, slot: Slot, out: &mut Vec<f32>) -> Result<()>;

    /// Preprocess a full-precision query for repeated distance evaluation.
    fn preprocess_query(&self, query: &[f32]) -> Result<Self::Query>;

    /// Distance from a preprocessed query to the point at `slot`.
    fn distance(&self, query: &Self::Query, slot: Slot) -> f32;

    /// Distances from a preprocessed query to each of `slots`, appended to
    /// `out` in order.
    fn distances(&self, query: &Self::Query, slots: &[Slot], out: &mut Vec<f32>) {
        out.reserve(slots.len());
        for &s in slots {
            out.push(self.distance(query, s));
        }
    }

    /// Distance between two stored points.
    fn distance_between(&self, a: Slot, b: Slot) -> f32;

    /// Grow to hold at least `new_capacity` slots, preserving content.
    fn expand(&mut self, new_capacity: usize) -> Result<()>;

    /// Shrink to exactly `new_capacity` slots, discarding the tail.
    fn shrink(&mut self, new_capacity: usize) -> Result<()>;

    /// Copy the point at `from` into `to` (compaction support).
    fn copy_vector(&mut self, from: Slot, to: Slot) -> Result<()>;

    /// Relocate `count` consecutive points from `src` to `dst`.
    /// Overlapping ranges behave as if staged through a temporary buffer.
    fn move_vectors(&mut self, src: Slot, dst: Slot, count: usize) -> Result<()>;

    /// Bulk-ingest `dim`-float rows starting at `first_slot`.
    ///
    /// Quantized stores use this as their training hook: the codebook is
    /// fit on the batch before the rows are encoded.
    fn populate(&mut self, data: &[f32], first_slot: Slot) -> Result<()> {
        let dim = self.dim();
        for (i, row) in data.chunks_exact(dim).enumerate() {
            self.set_vector(first_slot + i as Slot, row)?;
        }
        Ok(())
    }

    /// Persist all stored rows to `path`.
    fn save_data(&self, path: &Path) -> Result<()>;

    /// Restore rows previously written by [`VectorStore::save_data`].
    fn load_data(&mut self, path: &Path) -> Result<()>;

    /// Export the first `num_points` rows (reconstructed, for quantized
    /// stores) to an fbin file.
    fn extract_to_fbin(&self, path: &Path, num_points: usize) -> Result<()> {
        let dim = self.dim();
        let mut flat = Vec::with_capacity(num_points * dim);
        let mut row = Vec::with_capacity(dim);
        for slot in 0..num_points as Slot {
            self.get_vector(slot, &mut row)?;
            flat.extend_from_slice(&row);
        }
        io::write_vectors(path, &flat, num_points, dim)
    }

    /// Slot of the point closest to the mean of slots `0..num_points`.
    ///
    /// Exact for dense stores; quantized stores may sample when the
    /// population is large.
    fn calculate_medoid(&self, num_points: usize) -> Result<Slot>;
}
