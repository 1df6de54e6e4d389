//! Embedding provider boundary.
//!
//! Embedding generation is an external collaborator behind the
//! [`EmbeddingProvider`] trait: an opaque `embed(text) -> vector` function
//! with a fixed output dimension. Providers must be deterministic for
//! identical input so that ingestion retries stay idempotent.
//!
//! [`HashEmbedder`] is the local default: a feature-hashing embedder good
//! enough for tests, examples, and the CLI, with no model dependency.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{Result, SagittaError};
use crate::vector::Vector;

/// External embedding collaborator.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// The fixed dimension of produced embeddings.
    fn dimension(&self) -> usize;

    /// Embed a text into a fixed-length vector. Must be deterministic for
    /// identical input.
    async fn embed(&self, text: &str) -> Result<Vector>;
}

/// Deterministic local embedding provider based on feature hashing.
///
/// Tokens are folded into a fixed-dimension accumulator by their crc32
/// hash, with a second hash bit deciding the sign, and the result is
/// L2-normalized. Identical input always produces the identical vector.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Create an embedder producing vectors of the given dimension.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(SagittaError::invalid_argument(
                "embedding dimension must be at least 1",
            ));
        }
        Ok(Self { dimension })
    }

    /// Tokenize text into lowercase terms.
    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split_whitespace()
            .map(|s| s.trim_matches(|c: char| !c.is_alphanumeric()))
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    fn embed_sync(&self, text: &str) -> Vector {
        let tokens = Self::tokenize(text);

        // Term frequencies first so repeated tokens weigh linearly.
        let mut term_counts: HashMap<String, usize> = HashMap::new();
        for token in tokens {
            *term_counts.entry(token).or_insert(0) += 1;
        }

        let mut data = vec![0.0f32; self.dimension];
        for (term, count) in term_counts {
            let hash = crc32fast::hash(term.as_bytes());
            let bucket = (hash as usize) % self.dimension;
            let sign = if hash & 0x8000_0000 == 0 { 1.0 } else { -1.0 };
            data[bucket] += sign * count as f32;
        }

        let mut vector = Vector::new(data);
        vector.normalize();
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vector> {
        Ok(self.embed_sync(text))
    }
}
