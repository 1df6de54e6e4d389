//! Second-stage candidate reranking.
//!
//! The query engine over-fetches a candidate pool (say 50 for a final
//! k=10); the reranker rescores that pool with a more expensive pairwise
//! scorer behind the [`PairwiseScorer`] collaborator trait and returns the
//! top `top_n`. Candidate identity is preserved: nothing is fabricated and
//! no candidate appears twice.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagittaError};
use crate::query::SearchHit;

/// External pairwise scoring collaborator. Higher scores mean more
/// relevant, unlike distances.
#[async_trait]
pub trait PairwiseScorer: Send + Sync {
    /// Score one (query, candidate content) pair.
    async fn score(&self, query: &str, candidate: &str) -> Result<f32>;
}

/// A candidate after reranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankedHit {
    /// Document id, unchanged from the input candidate.
    pub doc_id: u64,
    /// First-stage distance, carried through for observability.
    pub distance: f32,
    /// Second-stage relevance score (higher is better).
    pub score: f32,
    /// Document content, when the input candidate carried it.
    pub content: Option<String>,
}

/// Reorders a candidate set with an injected pairwise scorer.
pub struct Reranker {
    scorer: Arc<dyn PairwiseScorer>,
}

impl Reranker {
    /// Create a reranker over a scoring collaborator.
    pub fn new(scorer: Arc<dyn PairwiseScorer>) -> Self {
        Self { scorer }
    }

    /// Rescore `candidates` against `query` and keep the best `top_n`.
    ///
    /// Candidates must carry content (the pairwise scorer needs text) and
    /// must not repeat a document id; both are `InvalidArgument`s.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<SearchHit>,
        top_n: usize,
    ) -> Result<Vec<RerankedHit>> {
        if top_n == 0 {
            return Err(SagittaError::invalid_argument("top_n must be at least 1"));
        }

        let mut seen = HashSet::new();
        for candidate in &candidates {
            if !seen.insert(candidate.doc_id) {
                return Err(SagittaError::invalid_argument(format!(
                    "duplicate candidate id {}",
                    candidate.doc_id
                )));
            }
        }

        let scores = try_join_all(candidates.iter().map(|candidate| async move {
            let content = candidate.content.as_deref().ok_or_else(|| {
                SagittaError::invalid_argument(format!(
                    "candidate {} has no content to rerank",
                    candidate.doc_id
                ))
            })?;
            self.scorer.score(query, content).await
        }))
        .await?;

        let mut reranked: Vec<RerankedHit> = candidates
            .into_iter()
            .zip(scores)
            .map(|(hit, score)| RerankedHit {
                doc_id: hit.doc_id,
                distance: hit.distance,
                score,
                content: hit.content,
            })
            .collect();

        reranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        reranked.truncate(top_n);
        Ok(reranked)
    }
}
