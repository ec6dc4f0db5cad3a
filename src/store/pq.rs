//! Product-quantized vector storage.
//!
//! Splits vectors into M chunks and learns 256 centroids per chunk via
//! k-means, so each stored point is M bytes (one centroid ID per chunk).
//! Query distances use a precomputed lookup table: M table lookups plus M
//! additions instead of D multiply-adds. Inner-product and cosine share the
//! dot-product table; cosine ordering is a proxy that exact reranking by the
//! caller can correct.

use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{MEDOID_SAMPLE_SIZE, PQ_KMEANS_ITERATIONS, PQ_NUM_CENTROIDS};
use crate::distance::{l2_sq, Metric};
use crate::error::{IndexError, Result};
use crate::params::{DataStoreStrategy, IndexConfig};
use crate::store::VectorStore;
use crate::{io, Slot};

// Fixed training seed; deterministic codebooks simplify debugging and tests.
const TRAIN_SEED: u64 = 0x5eed_c0de;

/// PQ codebook: M chunks × 256 centroids × sub_dim floats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PqCodebook {
    pub num_chunks: usize,
    pub sub_dim: usize,
    /// Flat centroid array: `centroids[m * 256 * sub_dim + k * sub_dim ..]`.
    pub centroids: Vec<f32>,
}

impl PqCodebook {
    /// Train a codebook on a contiguous arena of `dim`-float vectors.
    pub fn train(vectors: &[f32], dim: usize, num_chunks: usize) -> Result<Self> {
        if num_chunks == 0 || dim % num_chunks != 0 {
            return Err(IndexError::InvalidParameter(format!(
                "num_chunks {} must divide dimension {}",
                num_chunks, dim
            )));
        }
        let sub_dim = dim / num_chunks;
        let n = vectors.len() / dim;
        if n == 0 {
            return Err(IndexError::InvalidParameter(
                "need at least one vector to train a codebook".into(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(TRAIN_SEED);
        let mut centroids = vec![0.0f32; num_chunks * PQ_NUM_CENTROIDS * sub_dim];

        for chunk in 0..num_chunks {
            let mut sub_vectors = vec![0.0f32; n * sub_dim];
            for i in 0..n {
                let src = i * dim + chunk * sub_dim;
                sub_vectors[i * sub_dim..(i + 1) * sub_dim]
                    .copy_from_slice(&vectors[src..src + sub_dim]);
            }

            let effective_k = PQ_NUM_CENTROIDS.min(n);
            let sub_centroids = kmeans(&sub_vectors, sub_dim, effective_k, &mut rng);

            let out = chunk * PQ_NUM_CENTROIDS * sub_dim;
            let copy_len = effective_k * sub_dim;
            centroids[out..out + copy_len].copy_from_slice(&sub_centroids[..copy_len]);
        }

        info!(num_chunks, sub_dim, trained_on = n, "trained PQ codebook");
        Ok(Self {
            num_chunks,
            sub_dim,
            centroids,
        })
    }

    /// Centroid `code` of chunk `chunk`.
    #[inline]
    fn centroid(&self, chunk: usize, code: u8) -> &[f32] {
        let start = chunk * PQ_NUM_CENTROIDS * self.sub_dim + code as usize * self.sub_dim;
        &self.centroids[start..start + self.sub_dim]
    }

    /// Encode a vector into `out` (M bytes, one per chunk).
    pub fn encode_into(&self, vector: &[f32], out: &mut [u8]) {
        for chunk in 0..self.num_chunks {
            let sub = &vector[chunk * self.sub_dim..(chunk + 1) * self.sub_dim];
            out[chunk] = self.nearest_centroid(chunk, sub);
        }
    }

    /// Reconstruct a vector from its codes by concatenating centroids.
    pub fn decode_into(&self, codes: &[u8], out: &mut Vec<f32>) {
        out.clear();
        for (chunk, &code) in codes.iter().enumerate() {
            out.extend_from_slice(self.centroid(chunk, code));
        }
    }

    /// Build the per-chunk distance lookup table for a query.
    ///
    /// Shape `[M][256]`: entry `[m][k]` is the partial distance from query
    /// chunk `m` to centroid `k`.
    pub fn build_distance_table(&self, query: &[f32], metric: Metric) -> Vec<f32> {
        let k = PQ_NUM_CENTROIDS;
        let mut table = vec![0.0f32; self.num_chunks * k];
        for chunk in 0..self.num_chunks {
            let q_sub = &query[chunk * self.sub_dim..(chunk + 1) * self.sub_dim];
            for ci in 0..k {
                let centroid = self.centroid(chunk, ci as u8);
                table[chunk * k + ci] = match metric {
                    Metric::L2 => l2_sq(q_sub, centroid),
                    // Dot product as an ordering proxy for cosine too;
                    // exact reranking fixes the final order.
                    Metric::InnerProduct | Metric::Cosine => {
                        -q_sub.iter().zip(centroid).map(|(a, b)| a * b).sum::<f32>()
                    }
                };
            }
        }
        table
    }

    #[inline]
    fn nearest_centroid(&self, chunk: usize, sub: &[f32]) -> u8 {
        let mut best = 0u8;
        let mut best_dist = f32::MAX;
        for ci in 0..PQ_NUM_CENTROIDS {
            let d = l2_sq(sub, self.centroid(chunk, ci as u8));
            if d < best_dist {
                best_dist = d;
                best = ci as u8;
            }
        }
        best
    }
}

/// Preprocessed PQ query: the chunk distance lookup table.
#[derive(Debug)]
pub struct PqQuery {
    table: Vec<f32>,
    num_chunks: usize,
}

impl PqQuery {
    /// Approximate distance for one code row via table lookups.
    #[inline]
    fn distance(&self, codes: &[u8]) -> f32 {
        let mut dist = 0.0f32;
        for m in 0..self.num_chunks {
            dist += self.table[m * PQ_NUM_CENTROIDS + codes[m] as usize];
        }
        dist
    }
}

/// Product-quantized vector store: a trained codebook plus a codes arena.
///
/// The codebook must be trained (or supplied) before any vector is stored;
/// typically [`PqCodebook::train`] runs on the build batch.
#[derive(Debug)]
pub struct PqStore {
    metric: Metric,
    dim: usize,
    num_chunks: usize,
    capacity: usize,
    codebook: Option<PqCodebook>,
    codes: Vec<u8>,
}

impl PqStore {
    pub fn new(metric: Metric, dim: usize, capacity: usize, num_chunks: usize) -> Self {
        Self {
            metric,
            dim,
            num_chunks,
            capacity,
            codebook: None,
            codes: vec![0u8; capacity * num_chunks],
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn num_chunks(&self) -> usize {
        self.num_chunks
    }

    /// Install an already-trained codebook (load path).
    pub fn set_codebook(&mut self, codebook: PqCodebook) -> Result<()> {
        if codebook.num_chunks != self.num_chunks || codebook.sub_dim * codebook.num_chunks != self.dim
        {
            return Err(IndexError::Format(format!(
                "codebook shape {}x{} does not match store dim {} chunks {}",
                codebook.num_chunks, codebook.sub_dim, self.dim, self.num_chunks
            )));
        }
        self.codebook = Some(codebook);
        Ok(())
    }

    /// Train the codebook on `vectors` (a contiguous `dim`-float arena).
    pub fn train(&mut self, vectors: &[f32]) -> Result<()> {
        self.codebook = Some(PqCodebook::train(vectors, self.dim, self.num_chunks)?);
        Ok(())
    }

    pub fn codebook(&self) -> Option<&PqCodebook> {
        self.codebook.as_ref()
    }

    fn codebook_ref(&self) -> Result<&PqCodebook> {
        self.codebook
            .as_ref()
            .ok_or_else(|| IndexError::Consistency("PQ codebook not trained".into()))
    }

    #[inline]
    fn code_row(&self, slot: Slot) -> &[u8] {
        let base = slot as usize * self.num_chunks;
        &self.codes[base..base + self.num_chunks]
    }

    /// Raw codes arena (save path).
    pub fn codes(&self) -> &[u8] {
        &self.codes
    }

    /// Overwrite the codes arena (load path).
    pub fn set_codes(&mut self, codes: Vec<u8>) -> Result<()> {
        if codes.len() != self.capacity * self.num_chunks {
            return Err(IndexError::Format(format!(
                "codes length {} does not match capacity {} x chunks {}",
                codes.len(),
                self.capacity,
                self.num_chunks
            )));
        }
        self.codes = codes;
        Ok(())
    }
}

/// Serialized form of a [`PqStore`].
#[derive(Serialize, Deserialize)]
struct PqSnapshot {
    dim: usize,
    num_chunks: usize,
    capacity: usize,
    codebook: Option<PqCodebook>,
    codes: Vec<u8>,
}

impl VectorStore for PqStore {
    type Query = PqQuery;

    fn create(config: &IndexConfig, capacity: usize) -> Result<Self> {
        match config.data_strategy {
            DataStoreStrategy::Quantized { num_chunks } => {
                Ok(Self::new(config.metric, config.dim, capacity, num_chunks))
            }
            _ => Err(IndexError::InvalidParameter(
                "config does not select the quantized data store".into(),
            )),
        }
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
        let mut row = vec![0u8; self.num_chunks];
        self.codebook_ref()?.encode_into(vector, &mut row);
        let base = slot as usize * self.num_chunks;
        self.codes[base..base + self.num_chunks].copy_from_slice(&row);
        Ok(())
    }

    fn get_vector(&self, slot: Slot, out: &mut Vec<f32>) -> Result<()> {
        if slot as usize >= self.capacity {
            return Err(IndexError::Capacity(format!(
                "slot {} beyond capacity {}",
                slot, self.capacity
            )));
        }
        let codebook = self.codebook_ref()?;
        codebook.decode_into(self.code_row(slot), out);
        Ok(())
    }

    fn preprocess_query(&self, query: &[f32]) -> Result<PqQuery> {
        if query.len() != self.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        let codebook = self.codebook_ref()?;
        Ok(PqQuery {
            table: codebook.build_distance_table(query, self.metric),
            num_chunks: self.num_chunks,
        })
    }

    #[inline]
    fn distance(&self, query: &PqQuery, slot: Slot) -> f32 {
        query.distance(self.code_row(slot))
    }

    fn distance_between(&self, a: Slot, b: Slot) -> f32 {
        // Symmetric chunk-wise centroid distance; no decode allocation.
        let codebook = match self.codebook.as_ref() {
            Some(cb) => cb,
            None => return f32::MAX,
        };
        let codes_a = self.code_row(a);
        let codes_b = self.code_row(b);
        let mut dist = 0.0f32;
        for chunk in 0..self.num_chunks {
            let ca = codebook.centroid(chunk, codes_a[chunk]);
            let cb = codebook.centroid(chunk, codes_b[chunk]);
            dist += match self.metric {
                Metric::L2 => l2_sq(ca, cb),
                Metric::InnerProduct | Metric::Cosine => {
                    -ca.iter().zip(cb).map(|(x, y)| x * y).sum::<f32>()
                }
            };
        }
        dist
    }

    fn expand(&mut self, new_capacity: usize) -> Result<()> {
        // No-op when already large enough so racing growers are benign.
        if new_capacity <= self.capacity {
            return Ok(());
        }
        self.codes.resize(new_capacity * self.num_chunks, 0);
        debug!(from = self.capacity, to = new_capacity, "pq store expanded");
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
        self.codes.truncate(new_capacity * self.num_chunks);
        self.codes.shrink_to_fit();
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
        let src = from as usize * self.num_chunks;
        let dst = to as usize * self.num_chunks;
        self.codes.copy_within(src..src + self.num_chunks, dst);
        Ok(())
    }

    fn move_vectors(&mut self, src: Slot, dst: Slot, count: usize) -> Result<()> {
        if src as usize + count > self.capacity || dst as usize + count > self.capacity {
            return Err(IndexError::Capacity(format!(
                "move of {} rows {} -> {} beyond capacity {}",
                count, src, dst, self.capacity
            )));
        }
        let s = src as usize * self.num_chunks;
        let d = dst as usize * self.num_chunks;
        // copy_within has memmove semantics, so overlap is safe.
        self.codes.copy_within(s..s + count * self.num_chunks, d);
        Ok(())
    }

    fn populate(&mut self, data: &[f32], first_slot: Slot) -> Result<()> {
        // Training hook: fit the codebook on the batch, then encode it.
        self.train(data)?;
        for (i, row) in data.chunks_exact(self.dim).enumerate() {
            self.set_vector(first_slot + i as Slot, row)?;
        }
        Ok(())
    }

    fn save_data(&self, path: &Path) -> Result<()> {
        let snapshot = PqSnapshot {
            dim: self.dim,
            num_chunks: self.num_chunks,
            capacity: self.capacity,
            codebook: self.codebook.clone(),
            codes: self.codes.clone(),
        };
        let bytes = bincode::serialize(&snapshot)
            .map_err(|e| IndexError::Serialization(e.to_string()))?;
        io::write_checksummed(path, &bytes)
    }

    fn load_data(&mut self, path: &Path) -> Result<()> {
        let bytes = io::read_checksummed(path)?;
        let snapshot: PqSnapshot = bincode::deserialize(&bytes)
            .map_err(|e| IndexError::Serialization(e.to_string()))?;
        if snapshot.dim != self.dim || snapshot.num_chunks != self.num_chunks {
            return Err(IndexError::Format(format!(
                "{}: snapshot shape dim {} chunks {} does not match store dim {} chunks {}",
                path.display(),
                snapshot.dim,
                snapshot.num_chunks,
                self.dim,
                self.num_chunks
            )));
        }
        if snapshot.capacity != self.capacity {
            return Err(IndexError::Format(format!(
                "{}: snapshot capacity {} does not match store capacity {}",
                path.display(),
                snapshot.capacity,
                self.capacity
            )));
        }
        if let Some(cb) = snapshot.codebook {
            self.set_codebook(cb)?;
        }
        self.set_codes(snapshot.codes)
    }

    fn calculate_medoid(&self, num_points: usize) -> Result<Slot> {
        if num_points == 0 || num_points > self.capacity {
            return Err(IndexError::InvalidParameter(format!(
                "medoid over {} points with capacity {}",
                num_points, self.capacity
            )));
        }
        let codebook = self.codebook_ref()?;

        // Sample when the population is large; reconstructions are
        // approximate anyway, so a sampled medoid is as good an entry
        // point as an exact one.
        let mut rng = StdRng::seed_from_u64(TRAIN_SEED);
        let sample: Vec<Slot> = if num_points <= MEDOID_SAMPLE_SIZE {
            (0..num_points as Slot).collect()
        } else {
            (0..MEDOID_SAMPLE_SIZE)
                .map(|_| rng.gen_range(0..num_points as Slot))
                .collect()
        };

        let mut mean = vec![0.0f64; self.dim];
        let mut decoded = Vec::with_capacity(self.dim);
        for &slot in &sample {
            codebook.decode_into(self.code_row(slot), &mut decoded);
            for (m, &v) in mean.iter_mut().zip(&decoded) {
                *m += v as f64;
            }
        }
        let mean: Vec<f32> = mean
            .iter()
            .map(|&m| (m / sample.len() as f64) as f32)
            .collect();

        let mut best = sample[0];
        let mut best_dist = f32::MAX;
        for &slot in &sample {
            codebook.decode_into(self.code_row(slot), &mut decoded);
            let d = l2_sq(&mean, &decoded);
            if d < best_dist {
                best_dist = d;
                best = slot;
            }
        }
        Ok(best)
    }
}

/// K-means clustering with k-means++ initialization.
/// Returns k × sub_dim centroids as a flat `Vec<f32>`.
fn kmeans(data: &[f32], sub_dim: usize, k: usize, rng: &mut StdRng) -> Vec<f32> {
    let n = data.len() / sub_dim;
    if n <= k {
        // Fewer points than centroids: each point is its own centroid
        let mut centroids = vec![0.0f32; k * sub_dim];
        centroids[..n * sub_dim].copy_from_slice(&data[..n * sub_dim]);
        return centroids;
    }

    // K-means++ initialization
    let mut centroids = vec![0.0f32; k * sub_dim];
    let first = rng.gen_range(0..n);
    centroids[..sub_dim].copy_from_slice(&data[first * sub_dim..(first + 1) * sub_dim]);

    let mut min_dists = vec![f32::MAX; n];
    for ci in 1..k {
        // Update min distances with the last added centroid
        let last = &centroids[(ci - 1) * sub_dim..ci * sub_dim];
        let mut total = 0.0f64;
        for i in 0..n {
            let point = &data[i * sub_dim..(i + 1) * sub_dim];
            let d = l2_sq(point, last);
            if d < min_dists[i] {
                min_dists[i] = d;
            }
            total += min_dists[i] as f64;
        }

        // Weighted random selection proportional to distance²
        if total < 1e-30 {
            // All points coincide with existing centroids
            let idx = rng.gen_range(0..n);
            centroids[ci * sub_dim..(ci + 1) * sub_dim]
                .copy_from_slice(&data[idx * sub_dim..(idx + 1) * sub_dim]);
            continue;
        }
        let threshold = rng.gen_range(0.0..1.0f64) * total;
        let mut cumulative = 0.0f64;
        let mut chosen = n - 1;
        for (i, &d) in min_dists.iter().enumerate() {
            cumulative += d as f64;
            if cumulative >= threshold {
                chosen = i;
                break;
            }
        }
        centroids[ci * sub_dim..(ci + 1) * sub_dim]
            .copy_from_slice(&data[chosen * sub_dim..(chosen + 1) * sub_dim]);
    }

    // Lloyd iterations
    let mut assignments = vec![0usize; n];
    for _ in 0..PQ_KMEANS_ITERATIONS {
        for i in 0..n {
            let point = &data[i * sub_dim..(i + 1) * sub_dim];
            let mut best = 0usize;
            let mut best_dist = f32::MAX;
            for ci in 0..k {
                let d = l2_sq(point, &centroids[ci * sub_dim..(ci + 1) * sub_dim]);
                if d < best_dist {
                    best_dist = d;
                    best = ci;
                }
            }
            assignments[i] = best;
        }

        let mut counts = vec![0u32; k];
        centroids.fill(0.0);
        for i in 0..n {
            let ci = assignments[i];
            counts[ci] += 1;
            let point = &data[i * sub_dim..(i + 1) * sub_dim];
            let c = &mut centroids[ci * sub_dim..(ci + 1) * sub_dim];
            for d in 0..sub_dim {
                c[d] += point[d];
            }
        }
        for ci in 0..k {
            if counts[ci] > 0 {
                let inv = 1.0 / counts[ci] as f32;
                for val in &mut centroids[ci * sub_dim..(ci + 1) * sub_dim] {
                    *val *= inv;
                }
            }
        }
    }

    centroids
}
