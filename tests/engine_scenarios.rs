//! End-to-end engine scenarios: hybrid search, snapshot isolation during
//! rebuild, and reranking over query output.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use sagitta::document::Document;
use sagitta::engine::{EngineConfig, RebuildStatus, SearchEngine};
use sagitta::error::Result;
use sagitta::filter::Predicate;
use sagitta::index::IndexConfig;
use sagitta::ingest::{HashEmbedder, IngestionConfig};
use sagitta::query::{FilterStrategy, SearchRequest};
use sagitta::rerank::{PairwiseScorer, Reranker};
use sagitta::vector::{DistanceMetric, Vector};

const DIMENSION: usize = 4;

fn build_engine() -> SearchEngine {
    let config = EngineConfig {
        index: IndexConfig {
            dimension: DIMENSION,
            metric: DistanceMetric::L2,
            ..Default::default()
        },
        ingestion: IngestionConfig::default(),
    };
    SearchEngine::new(config, Arc::new(HashEmbedder::new(DIMENSION).unwrap())).unwrap()
}

fn axis_doc(id: u64, x: f32, lang: &str) -> Document {
    Document::new(id, format!("doc {id}"), Vector::new(vec![x, 0.0, 0.0, 0.0]))
        .with_metadata("lang", lang)
        .with_metadata("rank", id as f64)
}

fn populate(engine: &SearchEngine, count: u64) {
    for i in 0..count {
        let lang = if i % 4 == 0 { "ja" } else { "en" };
        engine.insert_document(axis_doc(i, i as f32, lang)).unwrap();
    }
}

#[test]
fn hybrid_post_filter_may_return_fewer_than_k() {
    let engine = build_engine();
    populate(&engine, 20);

    // 5 of 20 documents match; k=8 with over_fetch=2 fetches 16 candidates
    // around the origin, of which only the matching quarter survives.
    let mut request = SearchRequest::knn(Vector::new(vec![0.0, 0.0, 0.0, 0.0]), 8);
    request.filter = Some(Predicate::equals("lang", "ja"));
    request.over_fetch = 2;

    let hits = engine.search(&request).unwrap();
    assert!(hits.len() < 8, "under-fill must be observable, got {}", hits.len());
    assert!(hits.iter().all(|h| h.doc_id % 4 == 0));
}

#[test]
fn hybrid_pre_filter_searches_the_whole_subset() {
    let engine = build_engine();
    populate(&engine, 20);

    let mut request = SearchRequest::knn(Vector::new(vec![0.0, 0.0, 0.0, 0.0]), 8);
    request.filter = Some(Predicate::equals("lang", "ja"));
    request.strategy = FilterStrategy::PreFilter;

    let hits = engine.search(&request).unwrap();
    // Pre-filtering scans all matching documents, so every one of the five
    // "ja" documents is reachable.
    assert_eq!(hits.len(), 5);
    let ids: Vec<u64> = hits.iter().map(|h| h.doc_id).collect();
    assert_eq!(ids, vec![0, 4, 8, 12, 16]);
}

#[test]
fn range_and_tag_predicates_compose_in_hybrid_search() {
    let engine = build_engine();
    for i in 0..10u64 {
        let doc = Document::new(i, format!("doc {i}"), Vector::new(vec![i as f32, 0.0, 0.0, 0.0]))
            .with_metadata("year", 2000.0 + i as f64)
            .with_metadata(
                "topics",
                sagitta::document::MetadataValue::tags(if i % 2 == 0 {
                    vec!["search"]
                } else {
                    vec!["storage"]
                }),
            );
        engine.insert_document(doc).unwrap();
    }

    let mut request = SearchRequest::knn(Vector::new(vec![0.0, 0.0, 0.0, 0.0]), 10);
    request.filter = Some(Predicate::And(vec![
        Predicate::range("year", Some(2003.0), Some(2008.0)),
        Predicate::has_tag("topics", "search"),
    ]));
    request.strategy = FilterStrategy::PreFilter;

    let hits = engine.search(&request).unwrap();
    let ids: Vec<u64> = hits.iter().map(|h| h.doc_id).collect();
    assert_eq!(ids, vec![4, 6, 8]);
}

#[test]
fn queries_see_exactly_one_snapshot_during_rebuild() {
    let engine = Arc::new(build_engine());
    populate(&engine, 50);
    engine.rebuild().unwrap();

    // Grow the store without touching the index, so the pre- and
    // post-rebuild snapshots have different sizes.
    for i in 50..60u64 {
        engine.store().insert(axis_doc(i, i as f32, "en")).unwrap();
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for _ in 0..4 {
        let engine = engine.clone();
        let stop = stop.clone();
        readers.push(std::thread::spawn(move || {
            let request = SearchRequest::knn(Vector::new(vec![0.0, 0.0, 0.0, 0.0]), 100);
            while !stop.load(Ordering::Relaxed) {
                let hits = engine.search(&request).unwrap();
                // Either the 50-vector snapshot or the 60-vector snapshot,
                // never anything in between.
                assert!(
                    hits.len() == 50 || hits.len() == 60,
                    "observed a mixed snapshot of {} vectors",
                    hits.len()
                );
            }
        }));
    }

    for _ in 0..5 {
        engine.rebuild().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }

    let hits = engine
        .search(&SearchRequest::knn(Vector::new(vec![0.0, 0.0, 0.0, 0.0]), 100))
        .unwrap();
    assert_eq!(hits.len(), 60);
}

#[test]
fn old_snapshot_stays_searchable_after_rebuild() {
    let engine = build_engine();
    populate(&engine, 10);
    engine.rebuild().unwrap();

    let before = engine.index().snapshot();
    engine.store().insert(axis_doc(99, 99.0, "en")).unwrap();
    engine.rebuild().unwrap();

    assert_eq!(before.len(), 10);
    assert_eq!(engine.index().snapshot().len(), 11);
    let old_hits = before
        .search(&Vector::new(vec![99.0, 0.0, 0.0, 0.0]), 1)
        .unwrap();
    assert_ne!(old_hits[0].doc_id, 99);
}

#[test]
fn cancelled_background_rebuild_keeps_previous_snapshot() {
    let engine = build_engine();
    populate(&engine, 30);
    engine.rebuild().unwrap();
    let version = engine.index().snapshot().version();

    let handle = engine.spawn_rebuild();
    handle.cancel();
    let status = handle.wait();

    // The worker may have finished before the cancellation landed; either
    // way no partial structure is ever published.
    match status {
        RebuildStatus::Cancelled => {
            assert_eq!(engine.index().snapshot().version(), version);
        }
        RebuildStatus::Completed(v) => assert!(v > version),
        other => panic!("unexpected status {other:?}"),
    }
    assert_eq!(engine.index().snapshot().len(), 30);
}

/// Prefers content mentioning the marker token; a stand-in for an
/// expensive cross-encoder.
struct MarkerScorer;

#[async_trait]
impl PairwiseScorer for MarkerScorer {
    async fn score(&self, query: &str, candidate: &str) -> Result<f32> {
        Ok(if candidate.contains(query) { 1.0 } else { 0.0 })
    }
}

#[tokio::test]
async fn rerank_over_query_engine_output() {
    let engine = build_engine();
    for i in 0..10u64 {
        let marker = if i == 7 { "needle" } else { "hay" };
        let doc = Document::new(
            i,
            format!("document {i} contains {marker}"),
            Vector::new(vec![i as f32, 0.0, 0.0, 0.0]),
        );
        engine.insert_document(doc).unwrap();
    }

    // Over-fetch 10 candidates for a final top-1.
    let mut request = SearchRequest::knn(Vector::new(vec![0.0, 0.0, 0.0, 0.0]), 10);
    request.include_content = true;
    let candidates = engine.search(&request).unwrap();
    assert_eq!(candidates.len(), 10);

    let reranker = Reranker::new(Arc::new(MarkerScorer));
    let reranked = reranker.rerank("needle", candidates, 1).await.unwrap();

    assert_eq!(reranked.len(), 1);
    assert_eq!(reranked[0].doc_id, 7);
    assert_eq!(reranked[0].score, 1.0);
}
