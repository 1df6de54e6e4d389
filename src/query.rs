//! Query execution against an index snapshot plus the document store.
//!
//! The engine validates arguments, runs KNN (optionally fanned out over
//! several query embeddings), applies the hybrid metadata filter with either
//! the pre- or post-filter strategy, applies the distance threshold, and
//! resolves content for the final hits.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SagittaError};
use crate::filter::Predicate;
use crate::index::{
    IndexKind, IndexManager, IndexSnapshot, IvfIndex, SearchCandidate, sort_candidates,
};
use crate::store::VectorStore;
use crate::vector::{DistanceMetric, Vector};

/// How a metadata filter combines with vector search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FilterStrategy {
    /// Evaluate the predicate first and run an exact search over the
    /// matching subset only. Always correct, but forfeits the ANN speedup
    /// when the subset is large.
    PreFilter,
    /// Run ANN search for `k * over_fetch` candidates, then discard
    /// non-matching ones. Fast, but may return fewer than `k` results when
    /// the matching fraction is below `1 / over_fetch`.
    #[default]
    PostFilter,
}

/// A search request.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Query embeddings. More than one fans out and merges by minimum
    /// distance per document.
    pub queries: Vec<Vector>,
    /// Number of results to return. Must be at least 1.
    pub k: usize,
    /// Optional metadata filter, evaluated by the shared predicate
    /// interpreter.
    pub filter: Option<Predicate>,
    /// Hybrid strategy used when `filter` is present.
    pub strategy: FilterStrategy,
    /// Discard results farther than this distance. Applied after search,
    /// before truncation to `k`.
    pub threshold: Option<f32>,
    /// Expected metric. The metric is fixed per index; a request carrying a
    /// different one is rejected rather than silently coerced.
    pub metric: Option<DistanceMetric>,
    /// Over-fetch factor for post-filtering.
    pub over_fetch: usize,
    /// Attach document content to each hit.
    pub include_content: bool,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            queries: Vec::new(),
            k: 10,
            filter: None,
            strategy: FilterStrategy::default(),
            threshold: None,
            metric: None,
            over_fetch: 3,
            include_content: false,
        }
    }
}

impl SearchRequest {
    /// Single-query request shorthand.
    pub fn knn(query: Vector, k: usize) -> Self {
        Self {
            queries: vec![query],
            k,
            ..Default::default()
        }
    }
}

/// A single search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Document id.
    pub doc_id: u64,
    /// Distance to the query (smaller is closer).
    pub distance: f32,
    /// Document content, when requested.
    pub content: Option<String>,
}

/// Floors below which approximate search parameters are reported as a
/// recall risk. This is an observability signal, never an error: the
/// warning is logged and the search proceeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallGuard {
    /// Minimum `ef_search / k` ratio for HNSW searches.
    pub min_ef_ratio: f32,
    /// Minimum `probes / lists` ratio for IVF searches.
    pub min_probe_ratio: f32,
}

impl Default for RecallGuard {
    fn default() -> Self {
        Self {
            min_ef_ratio: 1.0,
            min_probe_ratio: 0.05,
        }
    }
}

/// Executes KNN and hybrid queries against the live index snapshot.
#[derive(Debug)]
pub struct QueryEngine {
    store: Arc<VectorStore>,
    index: Arc<IndexManager>,
    recall_guard: RecallGuard,
}

impl QueryEngine {
    /// Create a query engine over a store and its index manager.
    pub fn new(store: Arc<VectorStore>, index: Arc<IndexManager>) -> Self {
        Self {
            store,
            index,
            recall_guard: RecallGuard::default(),
        }
    }

    /// Replace the recall floors.
    pub fn with_recall_guard(mut self, recall_guard: RecallGuard) -> Self {
        self.recall_guard = recall_guard;
        self
    }

    /// Execute a search request.
    ///
    /// Every query embedding is validated against the snapshot dimension.
    /// Per-query result sets are merged by document id keeping the minimum
    /// observed distance, the threshold is applied, and the merged set is
    /// truncated to `k`. With a post-filter whose matching fraction is below
    /// `1 / over_fetch`, fewer than `k` results is a legitimate outcome and
    /// is never padded.
    pub fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        if request.k == 0 {
            return Err(SagittaError::invalid_argument("k must be at least 1"));
        }
        if request.queries.is_empty() {
            return Err(SagittaError::invalid_argument(
                "at least one query embedding is required",
            ));
        }
        if request.over_fetch == 0 {
            return Err(SagittaError::invalid_argument(
                "over_fetch must be at least 1",
            ));
        }

        // Readers keep this snapshot for the whole request, even if a
        // rebuild publishes a newer one mid-flight.
        let snapshot = self.index.snapshot();
        if let Some(metric) = request.metric
            && metric != snapshot.metric()
        {
            return Err(SagittaError::invalid_argument(format!(
                "metric mismatch: index uses {}, request asked for {}",
                snapshot.metric().name(),
                metric.name()
            )));
        }
        for query in &request.queries {
            query.validate_dimension(snapshot.dimension())?;
            if !query.is_valid() {
                return Err(SagittaError::invalid_argument(
                    "query embedding contains NaN or infinite values",
                ));
            }
        }

        self.warn_on_degraded_recall(&snapshot, request.k);

        let mut merged: HashMap<u64, f32> = HashMap::new();
        for query in &request.queries {
            let candidates = match (&request.filter, request.strategy) {
                (Some(predicate), FilterStrategy::PreFilter) => {
                    self.pre_filtered(&snapshot, query, request.k, predicate)?
                }
                (Some(predicate), FilterStrategy::PostFilter) => self.post_filtered(
                    &snapshot,
                    query,
                    request.k,
                    request.over_fetch,
                    predicate,
                )?,
                (None, _) => snapshot.search(query, request.k)?,
            };

            for candidate in candidates {
                merged
                    .entry(candidate.doc_id)
                    .and_modify(|distance| *distance = distance.min(candidate.distance))
                    .or_insert(candidate.distance);
            }
        }

        let mut candidates: Vec<SearchCandidate> = merged
            .into_iter()
            .map(|(doc_id, distance)| SearchCandidate::new(doc_id, distance))
            .collect();
        sort_candidates(&mut candidates);

        if let Some(threshold) = request.threshold {
            candidates.retain(|c| c.distance <= threshold);
        }
        candidates.truncate(request.k);

        Ok(candidates
            .into_iter()
            .map(|c| SearchHit {
                doc_id: c.doc_id,
                distance: c.distance,
                content: if request.include_content {
                    self.store.get(c.doc_id).map(|doc| doc.content)
                } else {
                    None
                },
            })
            .collect())
    }

    /// Pre-filter: restrict to the matching subset, then search it exactly.
    fn pre_filtered(
        &self,
        snapshot: &IndexSnapshot,
        query: &Vector,
        k: usize,
        predicate: &Predicate,
    ) -> Result<Vec<SearchCandidate>> {
        let metric = snapshot.metric();
        let mut candidates = Vec::new();
        for doc in self.store.scan(predicate.clone()) {
            let distance = metric.distance(&query.data, &doc.embedding.data)?;
            candidates.push(SearchCandidate::new(doc.id, distance));
        }
        sort_candidates(&mut candidates);
        candidates.truncate(k);
        Ok(candidates)
    }

    /// Post-filter: over-fetch from the ANN structure, keep matches only.
    fn post_filtered(
        &self,
        snapshot: &IndexSnapshot,
        query: &Vector,
        k: usize,
        over_fetch: usize,
        predicate: &Predicate,
    ) -> Result<Vec<SearchCandidate>> {
        let fetch = k.saturating_mul(over_fetch);
        let mut candidates = snapshot.search(query, fetch)?;
        candidates.retain(|c| {
            self.store
                .get(c.doc_id)
                .map(|doc| predicate.matches(&doc.metadata))
                .unwrap_or(false)
        });
        candidates.truncate(k);
        Ok(candidates)
    }

    /// Log the recall-degraded signal when search width parameters sit
    /// below the configured floors.
    fn warn_on_degraded_recall(&self, snapshot: &IndexSnapshot, k: usize) {
        match snapshot.kind() {
            IndexKind::Hnsw => {
                let ef_search = self.index.config().hnsw.ef_search;
                if (ef_search as f32) < self.recall_guard.min_ef_ratio * k as f32 {
                    log::warn!(
                        "recall degraded: ef_search {} below floor for k {}",
                        ef_search,
                        k
                    );
                }
            }
            IndexKind::IvfFlat => {
                if let Some(ivf) = snapshot.structure().as_any().downcast_ref::<IvfIndex>() {
                    let ratio = ivf.probes() as f32 / ivf.lists().max(1) as f32;
                    if ratio < self.recall_guard.min_probe_ratio {
                        log::warn!(
                            "recall degraded: probing {}/{} lists is below the configured floor",
                            ivf.probes(),
                            ivf.lists()
                        );
                    }
                }
            }
            IndexKind::Flat => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::index::{CancelToken, IndexConfig};
    use crate::vector::DistanceMetric;

    fn engine_with_docs() -> (Arc<VectorStore>, Arc<IndexManager>, QueryEngine) {
        let store = Arc::new(VectorStore::new(2).unwrap());
        let manager = Arc::new(IndexManager::new(IndexConfig {
            dimension: 2,
            metric: DistanceMetric::L2,
            ..Default::default()
        }));

        for i in 0..10u64 {
            let lang = if i % 2 == 0 { "en" } else { "ja" };
            let doc = Document::new(i, format!("doc {i}"), Vector::new(vec![i as f32, 0.0]))
                .with_metadata("lang", lang)
                .with_metadata("rank", i as f64);
            store.insert(doc).unwrap();
        }
        manager
            .rebuild(store.export_embeddings(), &CancelToken::new())
            .unwrap();

        let engine = QueryEngine::new(store.clone(), manager.clone());
        (store, manager, engine)
    }

    #[test]
    fn test_knn_basics() {
        let (_, _, engine) = engine_with_docs();
        let hits = engine
            .search(&SearchRequest::knn(Vector::new(vec![0.0, 0.0]), 3))
            .unwrap();

        let ids: Vec<u64> = hits.iter().map(|h| h.doc_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_invalid_arguments() {
        let (_, _, engine) = engine_with_docs();

        let mut request = SearchRequest::knn(Vector::new(vec![0.0, 0.0]), 0);
        assert!(matches!(
            engine.search(&request).unwrap_err(),
            SagittaError::InvalidArgument(_)
        ));

        request = SearchRequest::knn(Vector::new(vec![0.0]), 3);
        assert!(matches!(
            engine.search(&request).unwrap_err(),
            SagittaError::DimensionMismatch { .. }
        ));

        request = SearchRequest::default();
        assert!(engine.search(&request).is_err());
    }

    #[test]
    fn test_metric_override_must_match_index() {
        let (_, _, engine) = engine_with_docs();

        let mut request = SearchRequest::knn(Vector::new(vec![0.0, 0.0]), 3);
        request.metric = Some(DistanceMetric::L2);
        assert_eq!(engine.search(&request).unwrap().len(), 3);

        request.metric = Some(DistanceMetric::Cosine);
        assert!(matches!(
            engine.search(&request).unwrap_err(),
            SagittaError::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_threshold_discards_far_results() {
        let (_, _, engine) = engine_with_docs();
        let mut request = SearchRequest::knn(Vector::new(vec![0.0, 0.0]), 10);
        request.threshold = Some(2.5);

        let hits = engine.search(&request).unwrap();
        let ids: Vec<u64> = hits.iter().map(|h| h.doc_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_post_filter_may_under_fill() {
        let (_, _, engine) = engine_with_docs();
        // Only one document matches; over-fetching cannot conjure more.
        let mut request = SearchRequest::knn(Vector::new(vec![0.0, 0.0]), 5);
        request.filter = Some(Predicate::equals("rank", 4.0));
        request.over_fetch = 2;

        let hits = engine.search(&request).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, 4);
    }

    #[test]
    fn test_pre_filter_is_exact_over_subset() {
        let (_, _, engine) = engine_with_docs();
        let mut request = SearchRequest::knn(Vector::new(vec![9.0, 0.0]), 3);
        request.filter = Some(Predicate::equals("lang", "en"));
        request.strategy = FilterStrategy::PreFilter;

        let hits = engine.search(&request).unwrap();
        let ids: Vec<u64> = hits.iter().map(|h| h.doc_id).collect();
        assert_eq!(ids, vec![8, 6, 4]);
    }

    #[test]
    fn test_multi_query_merges_on_min_distance() {
        let (_, _, engine) = engine_with_docs();
        let request = SearchRequest {
            queries: vec![Vector::new(vec![0.0, 0.0]), Vector::new(vec![9.0, 0.0])],
            k: 4,
            ..Default::default()
        };

        let hits = engine.search(&request).unwrap();
        assert_eq!(hits.len(), 4);
        // Both fan-out extremes surface with their local minimum distance.
        let ids: Vec<u64> = hits.iter().map(|h| h.doc_id).collect();
        assert!(ids.contains(&0));
        assert!(ids.contains(&9));
        for hit in &hits {
            assert!(hit.distance <= 1.0);
        }
    }

    #[test]
    fn test_include_content() {
        let (_, _, engine) = engine_with_docs();
        let mut request = SearchRequest::knn(Vector::new(vec![0.0, 0.0]), 1);
        request.include_content = true;

        let hits = engine.search(&request).unwrap();
        assert_eq!(hits[0].content.as_deref(), Some("doc 0"));
    }
}
