//! Ingestion pipeline: chunk, embed, store.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::document::{Document, DocumentPatch};
use crate::error::{Result, SagittaError};
use crate::ingest::chunker::TextChunker;
use crate::ingest::embedder::EmbeddingProvider;
use crate::store::VectorStore;
use crate::vector::Vector;

/// Bits of the chunk document id reserved for the chunk index.
const CHUNK_INDEX_BITS: u32 = 24;
const CHUNK_INDEX_MASK: u64 = (1 << CHUNK_INDEX_BITS) - 1;
const MAX_SOURCE_ID: u64 = (1 << (64 - CHUNK_INDEX_BITS)) - 1;

/// Pack a `(source_document_id, chunk_index)` pair into one document id.
///
/// The source id occupies the high 40 bits and the chunk index the low 24,
/// so chunk documents stay traceable to their source.
pub fn chunk_doc_id(source_id: u64, chunk_index: usize) -> Result<u64> {
    if source_id > MAX_SOURCE_ID {
        return Err(SagittaError::invalid_argument(format!(
            "source id {source_id} exceeds the 40-bit limit"
        )));
    }
    if chunk_index as u64 > CHUNK_INDEX_MASK {
        return Err(SagittaError::invalid_argument(format!(
            "chunk index {chunk_index} exceeds the 24-bit limit"
        )));
    }
    Ok((source_id << CHUNK_INDEX_BITS) | chunk_index as u64)
}

/// Recover the `(source_document_id, chunk_index)` pair from a chunk id.
pub fn split_chunk_doc_id(doc_id: u64) -> (u64, usize) {
    (
        doc_id >> CHUNK_INDEX_BITS,
        (doc_id & CHUNK_INDEX_MASK) as usize,
    )
}

/// Configuration for the ingestion pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Chunk window length in characters.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks. Must stay below `chunk_size`.
    pub overlap: usize,
    /// Embedding attempts per chunk before giving up.
    pub max_attempts: usize,
    /// Base backoff between embedding retries; doubles per attempt.
    pub retry_backoff_ms: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap: 50,
            max_attempts: 3,
            retry_backoff_ms: 100,
        }
    }
}

/// Chunks raw documents, embeds each chunk, and writes the results into
/// the store.
pub struct IngestionPipeline {
    store: Arc<VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
    chunker: TextChunker,
    config: IngestionConfig,
}

impl std::fmt::Debug for IngestionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionPipeline")
            .field("chunker", &self.chunker)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IngestionPipeline {
    /// Create a pipeline over a store and an embedding collaborator.
    ///
    /// Fails with `InvalidArgument` when the chunk window is degenerate or
    /// the provider dimension disagrees with the store.
    pub fn new(
        store: Arc<VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: IngestionConfig,
    ) -> Result<Self> {
        let chunker = TextChunker::new(config.chunk_size, config.overlap)?;
        if provider.dimension() != store.dimension() {
            return Err(SagittaError::dimension_mismatch(
                store.dimension(),
                provider.dimension(),
            ));
        }
        Ok(Self {
            store,
            provider,
            chunker,
            config,
        })
    }

    /// Ingest one source document: chunk it, embed every chunk, and store
    /// each chunk as its own document. Returns the chunk document ids in
    /// order.
    ///
    /// Re-ingesting the same source id overwrites its previous chunks, so
    /// a retried ingestion converges to the same state (the provider is
    /// deterministic per input).
    pub async fn ingest(&self, source_id: u64, content: &str) -> Result<Vec<u64>> {
        let chunks = self.chunker.chunk(content);
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = try_join_all(
            chunks
                .iter()
                .map(|chunk| self.embed_with_retry(chunk.as_str())),
        )
        .await?;

        let mut doc_ids = Vec::with_capacity(chunks.len());
        for (index, (chunk, embedding)) in chunks.into_iter().zip(embeddings).enumerate() {
            let doc_id = chunk_doc_id(source_id, index)?;

            let doc = Document::new(doc_id, chunk, embedding)
                .with_metadata("source_id", source_id as i64)
                .with_metadata("chunk_index", index as i64);

            // Upsert: a retried or repeated ingestion replaces its own
            // earlier chunks instead of failing on DuplicateId.
            if self.store.contains(doc_id) {
                self.store.update(
                    doc_id,
                    DocumentPatch {
                        content: Some(doc.content),
                        embedding: Some(doc.embedding),
                        metadata: Some(doc.metadata),
                    },
                )?;
            } else {
                self.store.insert(doc)?;
            }
            doc_ids.push(doc_id);
        }

        log::debug!(
            "ingested source {}: {} chunks of up to {} chars",
            source_id,
            doc_ids.len(),
            self.config.chunk_size
        );
        Ok(doc_ids)
    }

    /// Embed arbitrary text through the provider, with the same retry
    /// policy as chunk ingestion. Nothing is stored.
    pub async fn embed_text(&self, text: &str) -> Result<Vector> {
        self.embed_with_retry(text).await
    }

    /// Embed one chunk, retrying transient provider failures with
    /// exponential backoff.
    async fn embed_with_retry(&self, text: &str) -> Result<Vector> {
        let mut backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let mut attempt = 1;

        loop {
            match self.provider.embed(text).await {
                Ok(embedding) => return Ok(embedding),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    log::warn!(
                        "embedding attempt {attempt}/{} failed, retrying in {:?}: {e}",
                        self.config.max_attempts,
                        backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
