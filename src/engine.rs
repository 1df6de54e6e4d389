//! High-level engine facade.
//!
//! [`SearchEngine`] wires the store, index manager, query engine, and
//! ingestion pipeline together and exposes the operations an API layer
//! would call: insert, ingest, search, delete, rebuild, persist. Rebuild is
//! available both blocking and as a background worker with a pollable
//! [`RebuildHandle`], since rebuilds over large collections are
//! long-running.

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::document::{Document, DocumentPatch, Metadata};
use crate::error::{Result, SagittaError};
use crate::index::persistence::{SNAPSHOT_FILE, load_snapshot, save_snapshot};
use crate::index::{CancelToken, IndexConfig, IndexManager, IndexOp};
use crate::ingest::{EmbeddingProvider, IngestionConfig, IngestionPipeline};
use crate::query::{QueryEngine, SearchHit, SearchRequest};
use crate::storage::Storage;
use crate::store::VectorStore;
use crate::vector::Vector;

/// Configuration for a [`SearchEngine`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Index structure and metric configuration. Also fixes the store
    /// dimension.
    pub index: IndexConfig,
    /// Chunking and retry configuration for ingestion.
    pub ingestion: IngestionConfig,
}

/// Status of a background rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildStatus {
    /// The rebuild is still running.
    Running,
    /// The rebuild completed and published the given snapshot version.
    Completed(u64),
    /// The rebuild failed; the previous snapshot remains authoritative.
    Failed(String),
    /// The rebuild was cancelled; the previous snapshot remains
    /// authoritative.
    Cancelled,
}

/// Handle to a background rebuild, pollable for completion.
pub struct RebuildHandle {
    receiver: crossbeam_channel::Receiver<RebuildStatus>,
    cancel: CancelToken,
    outcome: Mutex<Option<RebuildStatus>>,
}

impl RebuildHandle {
    /// Current status without blocking.
    pub fn poll(&self) -> RebuildStatus {
        let mut outcome = self.outcome.lock();
        if let Some(status) = outcome.as_ref() {
            return status.clone();
        }
        match self.receiver.try_recv() {
            Ok(status) => {
                *outcome = Some(status.clone());
                status
            }
            Err(crossbeam_channel::TryRecvError::Empty) => RebuildStatus::Running,
            Err(crossbeam_channel::TryRecvError::Disconnected) => {
                let status = RebuildStatus::Failed("rebuild worker disappeared".to_string());
                *outcome = Some(status.clone());
                status
            }
        }
    }

    /// Block until the rebuild finishes and return its final status.
    pub fn wait(&self) -> RebuildStatus {
        let mut outcome = self.outcome.lock();
        if let Some(status) = outcome.as_ref() {
            return status.clone();
        }
        let status = match self.receiver.recv() {
            Ok(status) => status,
            Err(_) => RebuildStatus::Failed("rebuild worker disappeared".to_string()),
        };
        *outcome = Some(status.clone());
        status
    }

    /// Request cancellation. The worker checks between batches; the
    /// previous snapshot stays authoritative.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// The assembled vector similarity search engine.
pub struct SearchEngine {
    store: Arc<VectorStore>,
    index: Arc<IndexManager>,
    query: QueryEngine,
    pipeline: IngestionPipeline,
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl SearchEngine {
    /// Create an empty engine with the given embedding collaborator.
    pub fn new(config: EngineConfig, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let store = Arc::new(VectorStore::new(config.index.dimension)?);
        let index = Arc::new(IndexManager::new(config.index));
        Self::assemble(store, index, provider, config.ingestion)
    }

    /// Open an engine from persisted state.
    ///
    /// The store is always loaded; the index snapshot is loaded when
    /// present and rebuilt from the store otherwise.
    pub fn open(
        config: EngineConfig,
        provider: Arc<dyn EmbeddingProvider>,
        storage: &dyn Storage,
    ) -> Result<Self> {
        let store = Arc::new(VectorStore::load(storage)?);
        if store.dimension() != config.index.dimension {
            return Err(SagittaError::dimension_mismatch(
                config.index.dimension,
                store.dimension(),
            ));
        }

        let index = if storage.file_exists(SNAPSHOT_FILE) {
            let snapshot = load_snapshot(storage, &config.index)?;
            Arc::new(IndexManager::from_snapshot(config.index, snapshot))
        } else {
            let manager = IndexManager::new(config.index);
            manager.rebuild(store.export_embeddings(), &CancelToken::new())?;
            Arc::new(manager)
        };

        Self::assemble(store, index, provider, config.ingestion)
    }

    fn assemble(
        store: Arc<VectorStore>,
        index: Arc<IndexManager>,
        provider: Arc<dyn EmbeddingProvider>,
        ingestion: IngestionConfig,
    ) -> Result<Self> {
        let query = QueryEngine::new(store.clone(), index.clone());
        let pipeline = IngestionPipeline::new(store.clone(), provider, ingestion)?;
        Ok(Self {
            store,
            index,
            query,
            pipeline,
        })
    }

    /// The underlying document store.
    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// The underlying index manager.
    pub fn index(&self) -> &Arc<IndexManager> {
        &self.index
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the engine holds no documents.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Insert a document with a precomputed embedding, making it
    /// immediately searchable.
    pub fn insert_document(&self, doc: Document) -> Result<()> {
        let doc_id = doc.id;
        let embedding = doc.embedding.clone();
        self.store.insert(doc)?;
        self.index.insert(doc_id, embedding)?;
        Ok(())
    }

    /// Insert a document from raw text, routing through the embedding
    /// collaborator.
    pub async fn insert_text(&self, doc_id: u64, content: &str, metadata: Metadata) -> Result<()> {
        let embedding = self.pipeline.embed_text(content).await?;
        let mut doc = Document::new(doc_id, content, embedding);
        doc.metadata = metadata;
        self.insert_document(doc)
    }

    /// Chunk and ingest one source document. Returns the chunk document
    /// ids, all immediately searchable.
    pub async fn ingest_text(&self, source_id: u64, content: &str) -> Result<Vec<u64>> {
        let doc_ids = self.pipeline.ingest(source_id, content).await?;

        let ops: Vec<IndexOp> = doc_ids
            .iter()
            .filter_map(|doc_id| {
                self.store
                    .get(*doc_id)
                    .map(|doc| IndexOp::Insert(*doc_id, doc.embedding))
            })
            .collect();
        if !ops.is_empty() {
            self.index.apply(ops)?;
        }
        Ok(doc_ids)
    }

    /// Apply a partial update; an embedding change re-indexes the document.
    pub fn update(&self, doc_id: u64, patch: DocumentPatch) -> Result<()> {
        let new_embedding = patch.embedding.clone();
        self.store.update(doc_id, patch)?;
        if let Some(embedding) = new_embedding {
            self.index.insert(doc_id, embedding)?;
        }
        Ok(())
    }

    /// Delete a document. Idempotent: deleting an absent id is a no-op.
    pub fn delete(&self, doc_id: u64) -> Result<()> {
        self.store.delete(doc_id)?;
        self.index.remove(doc_id)?;
        Ok(())
    }

    /// Get a document by id.
    pub fn get(&self, doc_id: u64) -> Option<Document> {
        self.store.get(doc_id)
    }

    /// Execute a search request.
    pub fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        self.query.search(request)
    }

    /// Embed a query text with the engine's provider.
    pub async fn embed_query(&self, text: &str) -> Result<Vector> {
        self.pipeline.embed_text(text).await
    }

    /// Rebuild the index from the current store contents, blocking until
    /// the new snapshot is published.
    pub fn rebuild(&self) -> Result<u64> {
        self.index
            .rebuild(self.store.export_embeddings(), &CancelToken::new())
    }

    /// Rebuild on a background worker. Queries keep hitting the previous
    /// snapshot until the worker publishes the new one.
    pub fn spawn_rebuild(&self) -> RebuildHandle {
        let store = self.store.clone();
        let index = self.index.clone();
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let (sender, receiver) = crossbeam_channel::bounded(1);

        thread::spawn(move || {
            let vectors = store.export_embeddings();
            let status = match index.rebuild(vectors, &worker_cancel) {
                Ok(version) => RebuildStatus::Completed(version),
                Err(SagittaError::OperationCancelled(_)) => RebuildStatus::Cancelled,
                Err(e) => RebuildStatus::Failed(e.to_string()),
            };
            let _ = sender.send(status);
        });

        RebuildHandle {
            receiver,
            cancel,
            outcome: Mutex::new(None),
        }
    }

    /// Persist the store and the current index snapshot.
    pub fn persist(&self, storage: &dyn Storage) -> Result<()> {
        self.store.save(storage)?;
        save_snapshot(storage, &self.index.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::HashEmbedder;
    use crate::storage::MemoryStorage;
    use crate::vector::DistanceMetric;

    fn engine() -> SearchEngine {
        let config = EngineConfig {
            index: IndexConfig {
                dimension: 32,
                metric: DistanceMetric::Cosine,
                ..Default::default()
            },
            ingestion: IngestionConfig {
                chunk_size: 40,
                overlap: 10,
                ..Default::default()
            },
        };
        SearchEngine::new(config, Arc::new(HashEmbedder::new(32).unwrap())).unwrap()
    }

    #[tokio::test]
    async fn test_ingest_then_search_round_trip() {
        let engine = engine();
        engine
            .ingest_text(1, "rust is a systems programming language focused on safety")
            .await
            .unwrap();
        engine
            .ingest_text(2, "a recipe for sourdough bread with a crispy crust")
            .await
            .unwrap();

        let query = engine.embed_query("systems programming in rust").await.unwrap();
        let mut request = SearchRequest::knn(query, 3);
        request.include_content = true;

        let hits = engine.search(&request).unwrap();
        assert!(!hits.is_empty());
        let (source, _) = crate::ingest::split_chunk_doc_id(hits[0].doc_id);
        assert_eq!(source, 1);
    }

    #[tokio::test]
    async fn test_insert_text_embeds_and_indexes() {
        let engine = engine();
        let mut metadata = Metadata::new();
        metadata.insert("lang".into(), "en".into());
        engine
            .insert_text(42, "embedded on the way in", metadata)
            .await
            .unwrap();

        let stored = engine.get(42).unwrap();
        assert_eq!(stored.metadata["lang"].as_text(), Some("en"));

        let query = engine.embed_query("embedded on the way in").await.unwrap();
        let hits = engine.search(&SearchRequest::knn(query, 1)).unwrap();
        assert_eq!(hits[0].doc_id, 42);
    }

    #[tokio::test]
    async fn test_delete_then_search_excludes_document() {
        let engine = engine();
        let ids = engine
            .ingest_text(5, "documents about vector similarity search engines")
            .await
            .unwrap();
        for id in &ids {
            engine.delete(*id).unwrap();
        }

        let query = engine.embed_query("vector similarity").await.unwrap();
        let hits = engine.search(&SearchRequest::knn(query, 5)).unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_background_rebuild_completes() {
        let engine = engine();
        engine
            .ingest_text(1, "some content that spans at least one chunk window")
            .await
            .unwrap();

        let handle = engine.spawn_rebuild();
        let status = handle.wait();
        assert!(matches!(status, RebuildStatus::Completed(_)));
        // Poll after completion keeps returning the cached outcome.
        assert_eq!(handle.poll(), status);
    }

    #[tokio::test]
    async fn test_persist_and_open_round_trip() {
        let storage = MemoryStorage::new();
        let config = EngineConfig {
            index: IndexConfig {
                dimension: 32,
                metric: DistanceMetric::Cosine,
                ..Default::default()
            },
            ingestion: IngestionConfig::default(),
        };

        {
            let engine =
                SearchEngine::new(config.clone(), Arc::new(HashEmbedder::new(32).unwrap()))
                    .unwrap();
            engine
                .ingest_text(1, "persistent vector search state")
                .await
                .unwrap();
            engine.rebuild().unwrap();
            engine.persist(&storage).unwrap();
        }

        let reopened =
            SearchEngine::open(config, Arc::new(HashEmbedder::new(32).unwrap()), &storage)
                .unwrap();
        assert_eq!(reopened.len(), 1);

        let query = reopened.embed_query("vector search").await.unwrap();
        let hits = reopened.search(&SearchRequest::knn(query, 1)).unwrap();
        assert_eq!(hits.len(), 1);
    }
}
