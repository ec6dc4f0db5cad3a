//! Dense full-precision vector storage.
//!
//! Vectors live in one contiguous `Vec<f32>` arena at a stride rounded up to
//! [`ALIGNMENT_FACTOR`] lanes. Padding lanes are zero-filled, which leaves
//! all three metrics unchanged, so distance kernels always run over whole
//! aligned rows without a tail loop.

use std::path::Path;

use tracing::debug;

use crate::config::ALIGNMENT_FACTOR;
use crate::distance::{dot, l2_sq, Metric};
use crate::error::{IndexError, Result};
use crate::params::{DataStoreStrategy, IndexConfig};
use crate::store::VectorStore;
use crate::{io, Slot};

/// Preprocessed dense query: a zero-padded copy plus its cached squared norm.
#[derive(Debug, Clone)]
pub struct DenseQuery {
    padded: Vec<f32>,
    norm_sq: f32,
}

/// Full-precision f32 vector store.
#[derive(Debug)]
pub struct DenseStore {
    metric: Metric,
    dim: usize,
    aligned_dim: usize,
    capacity: usize,
    data: Vec<f32>,
}

impl DenseStore {
    pub fn new(metric: Metric, dim: usize, capacity: usize) -> Self {
        let aligned_dim = dim.div_ceil(ALIGNMENT_FACTOR) * ALIGNMENT_FACTOR;
        Self {
            metric,
            dim,
            aligned_dim,
            capacity,
            data: vec![0.0; capacity * aligned_dim],
        }
    }

    /// Construct from row-major data of `num_points` vectors, with room for
    /// `capacity` slots.
    pub fn from_rows(
        metric: Metric,
        dim: usize,
        capacity: usize,
        rows: &[f32],
        num_points: usize,
    ) -> Result<Self> {
        if rows.len() != num_points * dim {
            return Err(IndexError::Format(format!(
                "row data length {} does not match {} points of dim {}",
                rows.len(),
                num_points,
                dim
            )));
        }
        if num_points > capacity {
            return Err(IndexError::Capacity(format!(
                "{} points exceed capacity {}",
                num_points, capacity
            )));
        }
        let mut store = Self::new(metric, dim, capacity);
        for (i, row) in rows.chunks_exact(dim).enumerate() {
            store.set_vector(i as Slot, row)?;
        }
        Ok(store)
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Stride of one stored row, in f32 lanes.
    pub fn aligned_dim(&self) -> usize {
        self.aligned_dim
    }

    /// Stored row at `slot`, including padding lanes.
    #[inline]
    pub fn row(&self, slot: Slot) -> &[f32] {
        let base = slot as usize * self.aligned_dim;
        &self.data[base..base + self.aligned_dim]
    }
}

impl VectorStore for DenseStore {
    type Query = DenseQuery;

    fn create(config: &IndexConfig, capacity: usize) -> Result<Self> {
        if config.data_strategy != DataStoreStrategy::Dense {
            return Err(IndexError::InvalidParameter(
                "config does not select the dense data store".into(),
            ));
        }
        Ok(Self::new(config.metric, config.dim, capacity))
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn set_vector(&mut self, slot: Slot, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        if slot as usize >= self.capacity {
            return Err(IndexError::Capacity(format!(
                "slot {} beyond capacity {}",
                slot, self.capacity
            )));
        }
        let base = slot as usize * self.aligned_dim;
        self.data[base..base + self.dim].copy_from_slice(vector);
        self.data[base + self.dim..base + self.aligned_dim].fill(0.0);
        Ok(())
    }

    fn get_vector(&self, slot: Slot, out: &mut Vec<f32>) -> Result<()> {
        if slot as usize >= self.capacity {
            return Err(IndexError::Capacity(format!(
                "slot {} beyond capacity {}",
                slot, self.capacity
            )));
        }
        out.clear();
        out.extend_from_slice(&self.row(slot)[..self.dim]);
        Ok(())
    }

    fn preprocess_query(&self, query: &[f32]) -> Result<DenseQuery> {
        if query.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        let mut padded = Vec::with_capacity(self.aligned_dim);
        padded.extend_from_slice(query);
        padded.resize(self.aligned_dim, 0.0);
        let norm_sq = dot(&padded, &padded);
        Ok(DenseQuery { padded, norm_sq })
    }

    #[inline]
    fn distance(&self, query: &DenseQuery, slot: Slot) -> f32 {
        self.metric
            .distance_prenorm(&query.padded, self.row(slot), query.norm_sq)
    }

    #[inline]
    fn distance_between(&self, a: Slot, b: Slot) -> f32 {
        self.metric.distance(self.row(a), self.row(b))
    }

    fn expand(&mut self, new_capacity: usize) -> Result<()> {
        // No-op when already large enough so racing growers are benign.
        if new_capacity <= self.capacity {
            return Ok(());
        }
        self.data.resize(new_capacity * self.aligned_dim, 0.0);
        debug!(from = self.capacity, to = new_capacity, "dense store expanded");
        self.capacity = new_capacity;
        Ok(())
    }

    fn shrink(&mut self, new_capacity: usize) -> Result<()> {
        if new_capacity > self.capacity {
            return Err(IndexError::InvalidParameter(format!(
                "shrink to {} above current capacity {}",
                new_capacity, self.capacity
            )));
        }
        self.data.truncate(new_capacity * self.aligned_dim);
        self.data.shrink_to_fit();
        self.capacity = new_capacity;
        Ok(())
    }

    fn copy_vector(&mut self, from: Slot, to: Slot) -> Result<()> {
        if from as usize >= self.capacity || to as usize >= self.capacity {
            return Err(IndexError::Capacity(format!(
                "copy {} -> {} beyond capacity {}",
                from, to, self.capacity
            )));
        }
        let src = from as usize * self.aligned_dim;
        let dst = to as usize * self.aligned_dim;
        self.data.copy_within(src..src + self.aligned_dim, dst);
        Ok(())
    }

    fn move_vectors(&mut self, src: Slot, dst: Slot, count: usize) -> Result<()> {
        if src as usize + count > self.capacity || dst as usize + count > self.capacity {
            return Err(IndexError::Capacity(format!(
                "move of {} rows {} -> {} beyond capacity {}",
                count, src, dst, self.capacity
            )));
        }
        let s = src as usize * self.aligned_dim;
        let d = dst as usize * self.aligned_dim;
        // copy_within has memmove semantics, so overlap is safe.
        self.data.copy_within(s..s + count * self.aligned_dim, d);
        Ok(())
    }

    fn save_data(&self, path: &Path) -> Result<()> {
        let mut flat = Vec::with_capacity(self.capacity * self.dim);
        for slot in 0..self.capacity {
            flat.extend_from_slice(&self.row(slot as Slot)[..self.dim]);
        }
        io::write_vectors(path, &flat, self.capacity, self.dim)
    }

    fn load_data(&mut self, path: &Path) -> Result<()> {
        let (rows, npts, dim) = io::read_vectors(path)?;
        if dim != self.dim {
            return Err(IndexError::Format(format!(
                "{}: dimension {} does not match store dimension {}",
                path.display(),
                dim,
                self.dim
            )));
        }
        if npts > self.capacity {
            return Err(IndexError::Format(format!(
                "{}: {} rows exceed store capacity {}",
                path.display(),
                npts,
                self.capacity
            )));
        }
        for (i, row) in rows.chunks_exact(dim).enumerate() {
            self.set_vector(i as Slot, row)?;
        }
        Ok(())
    }

    fn calculate_medoid(&self, num_points: usize) -> Result<Slot> {
        if num_points == 0 || num_points > self.capacity {
            return Err(IndexError::InvalidParameter(format!(
                "medoid over {} points with capacity {}",
                num_points, self.capacity
            )));
        }
        let mut mean = vec![0.0f64; self.aligned_dim];
        for slot in 0..num_points {
            for (m, &v) in mean.iter_mut().zip(self.row(slot as Slot)) {
                *m += v as f64;
            }
        }
        let mean: Vec<f32> = mean
            .iter()
            .map(|&m| (m / num_points as f64) as f32)
            .collect();

        // Medoid selection is always by euclidean distance to the mean,
        // independent of the search metric.
        let mut best = 0 as Slot;
        let mut best_dist = f32::MAX;
        for slot in 0..num_points as Slot {
            let d = l2_sq(&mean, self.row(slot));
            if d < best_dist {
                best_dist = d;
                best = slot;
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(points: &[&[f32]]) -> DenseStore {
        let dim = points[0].len();
        let mut s = DenseStore::new(Metric::L2, dim, points.len());
        for (i, p) in points.iter().enumerate() {
            s.set_vector(i as Slot, p).unwrap();
        }
        s
    }

    #[test]
    fn test_set_get_round_trip() {
        let s = store_with(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]]);
        let mut out = Vec::new();
        s.get_vector(1, &mut out).unwrap();
        assert_eq!(out, vec![4.0, 5.0, 6.0]);
        assert_eq!(s.aligned_dim(), 8);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut s = DenseStore::new(Metric::L2, 3, 2);
        assert!(matches!(
            s.set_vector(0, &[1.0, 2.0]).unwrap_err(),
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_batch_distances_match_single() {
        let s = store_with(&[
            &[0.0, 0.0, 0.0],
            &[1.0, 0.0, 0.0],
            &[0.0, 2.0, 0.0],
            &[3.0, 4.0, 0.0],
        ]);
        let q = s.preprocess_query(&[1.0, 1.0, 0.0]).unwrap();
        let slots = [3, 0, 2, 1];
        let mut batch = Vec::new();
        s.distances(&q, &slots, &mut batch);
        assert_eq!(batch.len(), slots.len());
        for (&slot, &d) in slots.iter().zip(&batch) {
            assert_eq!(d, s.distance(&q, slot));
        }
    }

    #[test]
    fn test_query_distance_matches_direct() {
        let s = store_with(&[&[0.0, 0.0, 0.0], &[3.0, 4.0, 0.0]]);
        let q = s.preprocess_query(&[0.0, 0.0, 0.0]).unwrap();
        assert!((s.distance(&q, 1) - 25.0).abs() < 1e-6);
        assert!((s.distance_between(0, 1) - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_expand_preserves_content() {
        let mut s = store_with(&[&[1.0, 2.0, 3.0]]);
        s.expand(10).unwrap();
        assert_eq!(s.capacity(), 10);
        let mut out = Vec::new();
        s.get_vector(0, &mut out).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0]);
        // New slots are writable.
        s.set_vector(9, &[7.0, 8.0, 9.0]).unwrap();
    }

    #[test]
    fn test_copy_vector() {
        let mut s = store_with(&[&[1.0, 2.0, 3.0], &[0.0, 0.0, 0.0]]);
        s.copy_vector(0, 1).unwrap();
        assert_eq!(s.distance_between(0, 1), 0.0);
    }

    #[test]
    fn test_move_vectors_overlapping() {
        let mut s = DenseStore::new(Metric::L2, 2, 4);
        for i in 0..4 {
            s.set_vector(i, &[i as f32, 0.0]).unwrap();
        }
        // Shift rows 1..4 down by one; overlap must behave like memmove.
        s.move_vectors(1, 0, 3).unwrap();
        let mut out = Vec::new();
        for (i, want) in [1.0, 2.0, 3.0].iter().enumerate() {
            s.get_vector(i as Slot, &mut out).unwrap();
            assert_eq!(out[0], *want);
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dense.data");
        let s = store_with(&[&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]]);
        s.save_data(&path).unwrap();

        let mut loaded = DenseStore::new(Metric::L2, 3, 2);
        loaded.load_data(&path).unwrap();
        assert_eq!(loaded.distance_between(0, 0), 0.0);
        let mut out = Vec::new();
        loaded.get_vector(1, &mut out).unwrap();
        assert_eq!(out, vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_medoid_of_cluster() {
        // Mean is x = 4.975; slot 2 at 5.0 is the nearest point.
        let s = store_with(&[&[0.0, 0.0], &[10.0, 0.0], &[5.0, 0.0], &[4.9, 0.0]]);
        let medoid = s.calculate_medoid(4).unwrap();
        assert_eq!(medoid, 2);
    }

    #[test]
    fn test_medoid_empty_rejected() {
        let s = DenseStore::new(Metric::L2, 2, 4);
        assert!(s.calculate_medoid(0).is_err());
    }
}
