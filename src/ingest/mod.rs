//! Document ingestion: chunking, embedding, and store writes.
//!
//! The pipeline splits raw documents into overlapping text chunks, obtains
//! an embedding for each chunk from the injected [`EmbeddingProvider`], and
//! writes the resulting chunk documents into the store. Embedding calls are
//! the pipeline's only suspension points; transient provider failures are
//! retried with exponential backoff.

pub mod chunker;
pub mod embedder;
pub mod pipeline;

pub use chunker::TextChunker;
pub use embedder::{EmbeddingProvider, HashEmbedder};
pub use pipeline::{IngestionConfig, IngestionPipeline, chunk_doc_id, split_chunk_doc_id};
