//! Document types stored and returned by the engine.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::vector::Vector;

/// A typed metadata value attached to a document.
///
/// The closed set of variants mirrors what the filter algebra can evaluate:
/// equality on text, numeric ranges on numbers, membership and intersection
/// on tag sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// Free-form text value.
    Text(String),
    /// Numeric value.
    Number(f64),
    /// A set of tags.
    Tags(BTreeSet<String>),
}

impl MetadataValue {
    /// Construct a tag set value from anything iterable as strings.
    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MetadataValue::Tags(tags.into_iter().map(Into::into).collect())
    }

    /// The numeric value, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetadataValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The text value, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The tag set, if this is one.
    pub fn as_tags(&self) -> Option<&BTreeSet<String>> {
        match self {
            MetadataValue::Tags(tags) => Some(tags),
            _ => None,
        }
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Number(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Number(value as f64)
    }
}

/// Metadata mapping attached to each document.
pub type Metadata = HashMap<String, MetadataValue>;

/// A document stored in the vector store.
///
/// Documents are owned exclusively by [`crate::store::VectorStore`]: they are
/// mutated only through its update operation and deleted only through its
/// delete operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique document id.
    pub id: u64,
    /// Raw text content.
    pub content: String,
    /// The embedding for this document.
    pub embedding: Vector,
    /// Structured metadata.
    #[serde(default)]
    pub metadata: Metadata,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Document {
    /// Create a new document with the current timestamp.
    pub fn new(id: u64, content: impl Into<String>, embedding: Vector) -> Self {
        Self {
            id,
            content: content.into(),
            embedding,
            metadata: Metadata::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach a metadata entry, builder-style.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A partial update applied through `VectorStore::update`.
///
/// Absent parts are left untouched; each present part re-validates the
/// invariants it affects.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    /// Replacement content.
    pub content: Option<String>,
    /// Replacement embedding; must match the store dimension.
    pub embedding: Option<Vector>,
    /// Replacement metadata mapping.
    pub metadata: Option<Metadata>,
}

impl DocumentPatch {
    /// A patch that only replaces the embedding.
    pub fn embedding(embedding: Vector) -> Self {
        Self {
            embedding: Some(embedding),
            ..Default::default()
        }
    }

    /// A patch that only replaces the metadata.
    pub fn metadata(metadata: Metadata) -> Self {
        Self {
            metadata: Some(metadata),
            ..Default::default()
        }
    }

    /// Whether this patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.content.is_none() && self.embedding.is_none() && self.metadata.is_none()
    }
}
