//! Error types for the Sagitta library.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`SagittaError`] enum. Caller mistakes (dimension mismatches, duplicate
//! ids, invalid arguments) are distinct variants so that callers can match
//! on them instead of parsing messages.
//!
//! # Examples
//!
//! ```
//! use sagitta::error::{Result, SagittaError};
//!
//! fn example_operation() -> Result<()> {
//!     Err(SagittaError::invalid_argument("k must be at least 1"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use anyhow;
use thiserror::Error;

/// The main error type for Sagitta operations.
#[derive(Error, Debug)]
pub enum SagittaError {
    /// An embedding's length disagrees with the index or store dimension.
    /// Always a caller error; never retried or coerced.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A document id was not present.
    #[error("Document not found: {0}")]
    NotFound(u64),

    /// An insert collided with an existing document id.
    #[error("Duplicate document id: {0}")]
    DuplicateId(u64),

    /// Invalid argument (k < 1, overlap >= chunk_size, etc.).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Index construction or rebuild aborted mid-way. The previously
    /// published snapshot remains valid.
    #[error("Index build error: {0}")]
    IndexBuild(String),

    /// Operation cancelled
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Embedding provider errors
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// I/O errors (file operations, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with SagittaError.
pub type Result<T> = std::result::Result<T, SagittaError>;

impl SagittaError {
    /// Create a new dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        SagittaError::DimensionMismatch { expected, actual }
    }

    /// Create a new not found error.
    pub fn not_found(doc_id: u64) -> Self {
        SagittaError::NotFound(doc_id)
    }

    /// Create a new duplicate id error.
    pub fn duplicate_id(doc_id: u64) -> Self {
        SagittaError::DuplicateId(doc_id)
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        SagittaError::InvalidArgument(msg.into())
    }

    /// Create a new index build error.
    pub fn index_build<S: Into<String>>(msg: S) -> Self {
        SagittaError::IndexBuild(msg.into())
    }

    /// Create a new cancelled error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        SagittaError::OperationCancelled(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        SagittaError::Storage(msg.into())
    }

    /// Create a new embedding error.
    pub fn embedding<S: Into<String>>(msg: S) -> Self {
        SagittaError::Embedding(msg.into())
    }

    /// Whether this error is worth retrying at an ingestion boundary.
    ///
    /// Only embedding-provider and I/O failures are considered transient;
    /// caller errors and id conflicts are terminal.
    pub fn is_transient(&self) -> bool {
        matches!(self, SagittaError::Embedding(_) | SagittaError::Io(_))
    }
}
