//! ANN index structures and their manager.
//!
//! This module contains all index construction, maintenance, and search:
//! - Flat exact scan, IVFFlat clustering, and HNSW graph structures behind
//!   the one [`AnnIndex`] contract
//! - Snapshot-based index management with copy-on-build rebuild
//! - Snapshot persistence
//!
//! Index internals (cluster lists, graph nodes) never leave this module;
//! callers see ordered [`SearchCandidate`]s only.

pub mod flat;
pub mod hnsw;
pub mod ivf;
pub mod manager;
pub mod persistence;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::vector::{DistanceMetric, Vector};

pub use flat::FlatIndex;
pub use hnsw::{HnswConfig, HnswIndex};
pub use ivf::{IvfConfig, IvfIndex};
pub use manager::{CancelToken, IndexManager, IndexOp, IndexSnapshot};

/// A single search candidate produced by an index structure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchCandidate {
    /// Document id.
    pub doc_id: u64,
    /// Distance to the query (smaller is closer, for every metric).
    pub distance: f32,
}

impl SearchCandidate {
    /// Create a new candidate.
    pub fn new(doc_id: u64, distance: f32) -> Self {
        Self { doc_id, distance }
    }
}

/// Sort candidates by increasing distance, breaking ties by ascending
/// document id so results are deterministic.
pub fn sort_candidates(candidates: &mut [SearchCandidate]) {
    candidates.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.doc_id.cmp(&b.doc_id))
    });
}

/// Types of ANN structures that can back an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IndexKind {
    /// Exact linear scan. Correctness baseline, and the best choice for
    /// small datasets where approximation gains nothing.
    #[default]
    Flat,
    /// Inverted-file index over k-means clusters.
    IvfFlat,
    /// Hierarchical navigable small world graph.
    Hnsw,
}

impl IndexKind {
    /// Get the name of this index kind.
    pub fn name(&self) -> &'static str {
        match self {
            IndexKind::Flat => "flat",
            IndexKind::IvfFlat => "ivf_flat",
            IndexKind::Hnsw => "hnsw",
        }
    }
}

/// Configuration for index construction and search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Vector dimension.
    pub dimension: usize,
    /// Distance metric, fixed for the lifetime of the index.
    pub metric: DistanceMetric,
    /// Requested structure kind.
    pub kind: IndexKind,
    /// Below this vector count, rebuilds use a Flat structure even when an
    /// approximate kind is requested.
    pub flat_threshold: usize,
    /// IVFFlat parameters.
    pub ivf: IvfConfig,
    /// HNSW parameters.
    pub hnsw: HnswConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dimension: 128,
            metric: DistanceMetric::Cosine,
            kind: IndexKind::Flat,
            flat_threshold: 10_000,
            ivf: IvfConfig::default(),
            hnsw: HnswConfig::default(),
        }
    }
}

impl IndexConfig {
    /// The structure kind a rebuild over `vector_count` vectors will use.
    ///
    /// Approximate structures only pay off above `flat_threshold`; below it
    /// the exact scan is both faster and simpler.
    pub fn effective_kind(&self, vector_count: usize) -> IndexKind {
        if vector_count < self.flat_threshold {
            IndexKind::Flat
        } else {
            self.kind
        }
    }
}

/// Contract shared by every ANN structure.
///
/// `search` returns candidates in increasing-distance order with ties broken
/// by ascending document id. `remove` may tombstone rather than repair the
/// structure, as long as tombstoned ids never appear in search results.
pub trait AnnIndex: Send + Sync + std::fmt::Debug {
    /// Insert a vector, replacing any existing vector under the same id.
    fn insert(&mut self, doc_id: u64, embedding: Vector) -> Result<()>;

    /// Remove a vector. Removing an absent id is a no-op.
    fn remove(&mut self, doc_id: u64);

    /// Find the `k` nearest candidates to the query.
    fn search(&self, query: &Vector, k: usize) -> Result<Vec<SearchCandidate>>;

    /// Number of live (non-tombstoned) vectors.
    fn len(&self) -> usize;

    /// Whether the index holds no live vectors.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The structure kind.
    fn kind(&self) -> IndexKind;

    /// The distance metric this structure was built with.
    fn metric(&self) -> DistanceMetric;

    /// The vector dimension this structure was built with.
    fn dimension(&self) -> usize;

    /// Clone into a new boxed structure, for copy-on-write snapshots.
    fn clone_box(&self) -> Box<dyn AnnIndex>;

    /// Downcast support for snapshot persistence.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Build an index structure of the configured kind from a vector set.
///
/// The effective kind falls back to Flat below the configured size
/// threshold. Vectors are validated against the configured dimension.
pub fn build_index(config: &IndexConfig, vectors: Vec<(u64, Vector)>) -> Result<Box<dyn AnnIndex>> {
    for (doc_id, vector) in &vectors {
        vector.validate_dimension(config.dimension).map_err(|_| {
            crate::error::SagittaError::index_build(format!(
                "vector {} has dimension {}, expected {}",
                doc_id,
                vector.dimension(),
                config.dimension
            ))
        })?;
    }

    match config.effective_kind(vectors.len()) {
        IndexKind::Flat => {
            let mut index = FlatIndex::new(config.dimension, config.metric);
            for (doc_id, vector) in vectors {
                index.insert(doc_id, vector)?;
            }
            Ok(Box::new(index))
        }
        IndexKind::IvfFlat => Ok(Box::new(IvfIndex::build(
            config.dimension,
            config.metric,
            config.ivf.clone(),
            vectors,
        )?)),
        IndexKind::Hnsw => {
            let mut index = HnswIndex::new(config.dimension, config.metric, config.hnsw.clone());
            for (doc_id, vector) in vectors {
                index.insert(doc_id, vector)?;
            }
            Ok(Box::new(index))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_candidates_tie_break() {
        let mut candidates = vec![
            SearchCandidate::new(9, 0.5),
            SearchCandidate::new(3, 0.5),
            SearchCandidate::new(1, 0.2),
        ];
        sort_candidates(&mut candidates);

        let ids: Vec<u64> = candidates.iter().map(|c| c.doc_id).collect();
        assert_eq!(ids, vec![1, 3, 9]);
    }

    #[test]
    fn test_effective_kind_threshold() {
        let config = IndexConfig {
            kind: IndexKind::Hnsw,
            flat_threshold: 100,
            ..Default::default()
        };
        assert_eq!(config.effective_kind(50), IndexKind::Flat);
        assert_eq!(config.effective_kind(100), IndexKind::Hnsw);
    }
}
