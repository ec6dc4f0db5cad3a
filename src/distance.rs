//! Distance metric implementations.
//!
//! All metrics return a value where **lower is better** (more similar):
//! squared euclidean, cosine distance (`1 - cosine_similarity`), and negated
//! inner product. Inner loops are written in 8-lane chunks so the compiler
//! can vectorize them; the dense store pads vectors to a multiple of the
//! chunk width with zeros, which is distance-neutral for all three metrics.

use serde::{Deserialize, Serialize};

/// Distance function used for vector similarity computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Squared Euclidean distance (L2²). Range: \[0, ∞).
    L2,
    /// Cosine distance: `1 - cosine_similarity`. Range: \[0, 2\].
    Cosine,
    /// Negated dot product: `-dot(a, b)`. Lower = higher similarity.
    InnerProduct,
}

impl Metric {
    /// Distance between two equal-length f32 slices.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => l2_sq(a, b),
            Metric::Cosine => cosine_distance(a, b),
            Metric::InnerProduct => -dot(a, b),
        }
    }

    /// Distance with a precomputed `sum(a[i]^2)` for the query side.
    ///
    /// Only cosine benefits; the other metrics delegate to [`Metric::distance`].
    #[inline]
    pub fn distance_prenorm(&self, query: &[f32], stored: &[f32], query_norm_sq: f32) -> f32 {
        match self {
            Metric::Cosine => cosine_distance_prenorm(query, stored, query_norm_sq),
            _ => self.distance(query, stored),
        }
    }
}

/// Squared euclidean distance, 8-lane chunked.
pub fn l2_sq(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut acc = [0.0f32; 8];
    let chunks = a.len() / 8;
    for c in 0..chunks {
        let base = c * 8;
        for lane in 0..8 {
            let d = a[base + lane] - b[base + lane];
            acc[lane] += d * d;
        }
    }
    let mut sum: f32 = acc.iter().sum();
    for i in chunks * 8..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum
}

/// Dot product, 8-lane chunked.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let mut acc = [0.0f32; 8];
    let chunks = a.len() / 8;
    for c in 0..chunks {
        let base = c * 8;
        for lane in 0..8 {
            acc[lane] += a[base + lane] * b[base + lane];
        }
    }
    let mut sum: f32 = acc.iter().sum();
    for i in chunks * 8..a.len() {
        sum += a[i] * b[i];
    }
    sum
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let norm_a_sq: f32 = dot(a, a);
    cosine_distance_prenorm(a, b, norm_a_sq)
}

fn cosine_distance_prenorm(a: &[f32], b: &[f32], norm_a_sq: f32) -> f32 {
    let d = dot(a, b);
    let norm_b_sq = dot(b, b);
    let denom = (norm_a_sq * norm_b_sq).sqrt();
    if denom <= f32::EPSILON {
        return 1.0;
    }
    1.0 - d / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_zero_for_identical() {
        let a = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        assert_eq!(Metric::L2.distance(&a, &a), 0.0);
    }

    #[test]
    fn test_l2_known_value() {
        let a = vec![0.0, 0.0, 0.0];
        let b = vec![3.0, 4.0, 0.0];
        assert!((Metric::L2.distance(&a, &b) - 25.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!((Metric::Cosine.distance(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_prenorm_matches() {
        let a = vec![0.5, -0.3, 0.8, 0.1, 0.9, -0.2, 0.6, 0.4, 0.7];
        let b = vec![0.7, 0.2, -0.5, 0.3, 0.1, 0.8, -0.4, 0.6, -0.1];
        let norm_sq = dot(&a, &a);
        let d1 = Metric::Cosine.distance(&a, &b);
        let d2 = Metric::Cosine.distance_prenorm(&a, &b, norm_sq);
        assert!((d1 - d2).abs() < 1e-6);
    }

    #[test]
    fn test_inner_product_negated() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![4.0, 5.0, 6.0];
        assert!((Metric::InnerProduct.distance(&a, &b) - (-32.0)).abs() < 1e-6);
    }

    #[test]
    fn test_zero_padding_is_distance_neutral() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![2.0, 4.0, 6.0];
        let mut ap = a.clone();
        let mut bp = b.clone();
        ap.resize(8, 0.0);
        bp.resize(8, 0.0);
        for metric in [Metric::L2, Metric::Cosine, Metric::InnerProduct] {
            let d = metric.distance(&a, &b);
            let dp = metric.distance(&ap, &bp);
            assert!((d - dp).abs() < 1e-6, "{metric:?}: {d} vs {dp}");
        }
    }
}
