//! Distance metrics for vector similarity calculation.
//!
//! All metrics are exposed with a uniform "smaller is closer" ordering:
//! cosine is reported as `1 - cosine_similarity` and inner product as the
//! negated dot product. The metric is fixed per index at creation time and
//! determines the index's internal ordering.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagittaError};
use crate::util::simd;

/// Distance metrics for vector similarity calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DistanceMetric {
    /// Cosine distance (1 - cosine similarity)
    #[default]
    Cosine,
    /// Euclidean (L2) distance
    L2,
    /// Inner product, negated so that smaller is closer
    InnerProduct,
}

impl DistanceMetric {
    /// Calculate the distance between two vectors using this metric.
    pub fn distance(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        if a.len() != b.len() {
            return Err(SagittaError::dimension_mismatch(a.len(), b.len()));
        }

        let result = match self {
            DistanceMetric::Cosine => {
                let dot_product = simd::dot_product(a, b);
                let norm_a = simd::magnitude(a);
                let norm_b = simd::magnitude(b);

                if norm_a == 0.0 || norm_b == 0.0 {
                    1.0 // Maximum distance for zero vectors
                } else {
                    1.0 - (dot_product / (norm_a * norm_b))
                }
            }
            DistanceMetric::L2 => simd::l2_distance_sq(a, b).sqrt(),
            DistanceMetric::InnerProduct => -simd::dot_product(a, b),
        };

        Ok(result)
    }

    /// Get the name of this distance metric.
    pub fn name(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::L2 => "l2",
            DistanceMetric::InnerProduct => "inner_product",
        }
    }

    /// Parse a distance metric from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "l2" | "euclidean" => Ok(DistanceMetric::L2),
            "inner_product" | "dot" | "ip" => Ok(DistanceMetric::InnerProduct),
            _ => Err(SagittaError::invalid_argument(format!(
                "Unknown distance metric: {s}"
            ))),
        }
    }

    /// Calculate distances between a query vector and multiple vectors in parallel.
    pub fn batch_distance(&self, query: &[f32], vectors: &[&[f32]]) -> Result<Vec<f32>> {
        if vectors.is_empty() {
            return Ok(Vec::new());
        }

        if vectors.len() < 100 {
            return vectors
                .iter()
                .map(|v| self.distance(query, v))
                .collect::<Result<Vec<_>>>();
        }

        vectors
            .par_iter()
            .map(|v| self.distance(query, v))
            .collect::<Result<Vec<_>>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_distance() {
        let a = [0.0, 0.0];
        let b = [3.0, 4.0];
        let distance = DistanceMetric::L2.distance(&a, &b).unwrap();
        assert!((distance - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_orthogonal() {
        let a = [1.0, 0.0];
        let b = [0.0, 1.0];
        let distance = DistanceMetric::Cosine.distance(&a, &b).unwrap();
        assert!((distance - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_identical() {
        let a = [0.5, 0.5, 0.5];
        let distance = DistanceMetric::Cosine.distance(&a, &a).unwrap();
        assert!(distance.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_distance_zero_vector() {
        let a = [0.0, 0.0];
        let b = [1.0, 0.0];
        let distance = DistanceMetric::Cosine.distance(&a, &b).unwrap();
        assert_eq!(distance, 1.0);
    }

    #[test]
    fn test_inner_product_negated() {
        // Larger dot product must yield a smaller distance.
        let query = [1.0, 1.0];
        let close = [2.0, 2.0];
        let far = [0.1, 0.1];

        let d_close = DistanceMetric::InnerProduct.distance(&query, &close).unwrap();
        let d_far = DistanceMetric::InnerProduct.distance(&query, &far).unwrap();
        assert!(d_close < d_far);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = [1.0, 2.0];
        let b = [1.0, 2.0, 3.0];
        assert!(DistanceMetric::L2.distance(&a, &b).is_err());
    }

    #[test]
    fn test_parse_str() {
        assert_eq!(
            DistanceMetric::parse_str("euclidean").unwrap(),
            DistanceMetric::L2
        );
        assert_eq!(
            DistanceMetric::parse_str("Cosine").unwrap(),
            DistanceMetric::Cosine
        );
        assert_eq!(
            DistanceMetric::parse_str("ip").unwrap(),
            DistanceMetric::InnerProduct
        );
        assert!(DistanceMetric::parse_str("manhattan").is_err());
    }
}
