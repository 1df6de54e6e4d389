//! Flat (exact) vector index.
//!
//! No structure at all: search is a full linear scan computing the exact
//! distance to every stored vector. This is the correctness baseline the
//! approximate structures are measured against, and the default for small
//! datasets.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::{AnnIndex, IndexKind, SearchCandidate, sort_candidates};
use crate::vector::{DistanceMetric, Vector};

/// Exact linear-scan index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dimension: usize,
    metric: DistanceMetric,
    /// Stored vectors keyed by document id. A BTreeMap keeps iteration in
    /// id order, which makes equal-distance results deterministic before
    /// the final sort even runs.
    entries: BTreeMap<u64, Vector>,
}

impl FlatIndex {
    /// Create an empty flat index.
    pub fn new(dimension: usize, metric: DistanceMetric) -> Self {
        Self {
            dimension,
            metric,
            entries: BTreeMap::new(),
        }
    }
}

impl AnnIndex for FlatIndex {
    fn insert(&mut self, doc_id: u64, embedding: Vector) -> Result<()> {
        embedding.validate_dimension(self.dimension)?;
        self.entries.insert(doc_id, embedding);
        Ok(())
    }

    fn remove(&mut self, doc_id: u64) {
        self.entries.remove(&doc_id);
    }

    fn search(&self, query: &Vector, k: usize) -> Result<Vec<SearchCandidate>> {
        query.validate_dimension(self.dimension)?;

        let ids: Vec<u64> = self.entries.keys().copied().collect();
        let vectors: Vec<&[f32]> = self.entries.values().map(|v| v.data.as_slice()).collect();
        let distances = self.metric.batch_distance(&query.data, &vectors)?;

        let mut candidates: Vec<SearchCandidate> = ids
            .into_iter()
            .zip(distances)
            .map(|(doc_id, distance)| SearchCandidate::new(doc_id, distance))
            .collect();

        sort_candidates(&mut candidates);
        candidates.truncate(k);
        Ok(candidates)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Flat
    }

    fn metric(&self) -> DistanceMetric {
        self.metric
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn clone_box(&self) -> Box<dyn AnnIndex> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}
