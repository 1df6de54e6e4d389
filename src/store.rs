//! Durable document store mapping ids to (embedding, metadata, content).
//!
//! [`VectorStore`] owns every [`Document`]: mutation happens only through
//! its operations, and the ANN index structures read embeddings from it but
//! never reach into its representation. The store enforces the dimension
//! invariant at the write boundary so indexes can assume uniform vectors.

use std::collections::HashMap;
use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{TimeZone, Utc};
use parking_lot::RwLock;

use crate::document::{Document, DocumentPatch, Metadata};
use crate::error::{Result, SagittaError};
use crate::filter::Predicate;
use crate::storage::Storage;
use crate::vector::Vector;

/// Live store file name.
pub const STORE_FILE: &str = "documents.bin";
/// Temporary file used for atomic snapshot publication.
pub const STORE_TEMP_FILE: &str = "documents.tmp";

/// Durable mapping from document id to (embedding, metadata, content).
///
/// Readers may call `get`/`scan`/`export` concurrently; writers are
/// serialized by the interior lock. Within one writer, operations against a
/// single document id apply in submission order.
#[derive(Debug)]
pub struct VectorStore {
    dimension: usize,
    documents: RwLock<HashMap<u64, Document>>,
}

impl VectorStore {
    /// Create an empty store for embeddings of the given dimension.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(SagittaError::invalid_argument(
                "store dimension must be at least 1",
            ));
        }
        Ok(Self {
            dimension,
            documents: RwLock::new(HashMap::new()),
        })
    }

    /// The fixed embedding dimension of this store.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    fn validate_embedding(&self, embedding: &Vector) -> Result<()> {
        embedding.validate_dimension(self.dimension)?;
        if !embedding.is_valid() {
            return Err(SagittaError::invalid_argument(
                "embedding contains NaN or infinite values",
            ));
        }
        Ok(())
    }

    /// Insert a new document.
    ///
    /// Fails with `DimensionMismatch` if the embedding length disagrees with
    /// the store dimension and with `DuplicateId` if the id already exists.
    /// Callers wanting upsert semantics must use [`VectorStore::update`].
    pub fn insert(&self, doc: Document) -> Result<()> {
        self.validate_embedding(&doc.embedding)?;

        let mut documents = self.documents.write();
        if documents.contains_key(&doc.id) {
            return Err(SagittaError::duplicate_id(doc.id));
        }
        documents.insert(doc.id, doc);
        Ok(())
    }

    /// Apply a partial update to an existing document.
    ///
    /// Each present part of the patch re-validates the invariants it
    /// touches. Fails with `NotFound` if the id is absent.
    pub fn update(&self, id: u64, patch: DocumentPatch) -> Result<()> {
        if let Some(embedding) = &patch.embedding {
            self.validate_embedding(embedding)?;
        }

        let mut documents = self.documents.write();
        let doc = documents
            .get_mut(&id)
            .ok_or_else(|| SagittaError::not_found(id))?;

        if let Some(content) = patch.content {
            doc.content = content;
        }
        if let Some(embedding) = patch.embedding {
            doc.embedding = embedding;
        }
        if let Some(metadata) = patch.metadata {
            doc.metadata = metadata;
        }
        Ok(())
    }

    /// Delete a document. Deleting an absent id is a no-op so that
    /// compaction retries stay simple.
    pub fn delete(&self, id: u64) -> Result<()> {
        self.documents.write().remove(&id);
        Ok(())
    }

    /// Get a document by id.
    pub fn get(&self, id: u64) -> Option<Document> {
        self.documents.read().get(&id).cloned()
    }

    /// Whether a document id is present.
    pub fn contains(&self, id: u64) -> bool {
        self.documents.read().contains_key(&id)
    }

    /// Scan documents matching a predicate.
    ///
    /// The snapshot is taken once under the read lock; the predicate is then
    /// applied lazily as the iterator is consumed. The same evaluator backs
    /// the query engine's hybrid filter.
    pub fn scan(&self, predicate: Predicate) -> impl Iterator<Item = Document> {
        let snapshot: Vec<Document> = self.documents.read().values().cloned().collect();
        snapshot
            .into_iter()
            .filter(move |doc| predicate.matches(&doc.metadata))
    }

    /// All document ids, ascending.
    pub fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.documents.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Point-in-time copy of all (id, embedding) pairs, for index builds.
    pub fn export_embeddings(&self) -> Vec<(u64, Vector)> {
        let documents = self.documents.read();
        let mut pairs: Vec<(u64, Vector)> = documents
            .iter()
            .map(|(id, doc)| (*id, doc.embedding.clone()))
            .collect();
        pairs.sort_unstable_by_key(|(id, _)| *id);
        pairs
    }

    /// Persist all documents through the storage backend.
    ///
    /// The snapshot is written to a temporary file and renamed over the live
    /// file, so a crash mid-write never corrupts the previous snapshot.
    pub fn save(&self, storage: &dyn Storage) -> Result<()> {
        let snapshot: Vec<Document> = {
            let documents = self.documents.read();
            let mut docs: Vec<Document> = documents.values().cloned().collect();
            docs.sort_unstable_by_key(|doc| doc.id);
            docs
        };

        let mut body = Vec::new();
        body.write_u32::<LittleEndian>(self.dimension as u32)?;
        body.write_u32::<LittleEndian>(snapshot.len() as u32)?;

        for doc in &snapshot {
            body.write_u64::<LittleEndian>(doc.id)?;
            body.write_i64::<LittleEndian>(doc.created_at.timestamp_micros())?;
            for value in &doc.embedding.data {
                body.write_f32::<LittleEndian>(*value)?;
            }

            let content = doc.content.as_bytes();
            body.write_u32::<LittleEndian>(content.len() as u32)?;
            body.write_all(content)?;

            let metadata = serde_json::to_vec(&doc.metadata)?;
            body.write_u32::<LittleEndian>(metadata.len() as u32)?;
            body.write_all(&metadata)?;
        }

        let checksum = crc32fast::hash(&body);

        let mut output = storage.create_output(STORE_TEMP_FILE)?;
        output
            .write_all(&body)
            .map_err(|e| SagittaError::storage(format!("Failed to write store snapshot: {e}")))?;
        output
            .write_u32::<LittleEndian>(checksum)
            .map_err(|e| SagittaError::storage(format!("Failed to write store checksum: {e}")))?;
        output.close()?;

        storage.rename_file(STORE_TEMP_FILE, STORE_FILE)?;
        storage.sync()
    }

    /// Load a store previously written by [`VectorStore::save`].
    pub fn load(storage: &dyn Storage) -> Result<Self> {
        let mut input = storage.open_input(STORE_FILE)?;
        let mut raw = Vec::new();
        input
            .read_to_end(&mut raw)
            .map_err(|e| SagittaError::storage(format!("Failed to read store snapshot: {e}")))?;

        if raw.len() < 4 {
            return Err(SagittaError::storage("store snapshot truncated"));
        }
        let (body, trailer) = raw.split_at(raw.len() - 4);
        let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
        if crc32fast::hash(body) != expected {
            return Err(SagittaError::storage("store snapshot checksum mismatch"));
        }

        let mut cursor = std::io::Cursor::new(body);
        let dimension = cursor.read_u32::<LittleEndian>()? as usize;
        let count = cursor.read_u32::<LittleEndian>()? as usize;

        let store = Self::new(dimension)?;
        {
            let mut documents = store.documents.write();
            for _ in 0..count {
                let id = cursor.read_u64::<LittleEndian>()?;
                let micros = cursor.read_i64::<LittleEndian>()?;
                let created_at = Utc
                    .timestamp_micros(micros)
                    .single()
                    .ok_or_else(|| SagittaError::storage("invalid document timestamp"))?;

                let mut data = vec![0.0f32; dimension];
                for value in &mut data {
                    *value = cursor.read_f32::<LittleEndian>()?;
                }

                let content_len = cursor.read_u32::<LittleEndian>()? as usize;
                let mut content = vec![0u8; content_len];
                cursor.read_exact(&mut content)?;
                let content = String::from_utf8(content)
                    .map_err(|e| SagittaError::storage(format!("invalid document content: {e}")))?;

                let metadata_len = cursor.read_u32::<LittleEndian>()? as usize;
                let mut metadata_raw = vec![0u8; metadata_len];
                cursor.read_exact(&mut metadata_raw)?;
                let metadata: Metadata = serde_json::from_slice(&metadata_raw)?;

                documents.insert(
                    id,
                    Document {
                        id,
                        content,
                        embedding: Vector::new(data),
                        metadata,
                        created_at,
                    },
                );
            }
        }

        Ok(store)
    }
}
