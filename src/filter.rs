//! Metadata predicate algebra shared by store scans and hybrid search.
//!
//! Filters are a small closed algebra instead of ad hoc per-call matching:
//! equality, numeric range, tag membership/intersection, and boolean
//! combinators, all evaluated by the single [`Predicate::matches`]
//! interpreter. `VectorStore::scan` and the query engine's hybrid filter
//! consult the same evaluator.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::document::{Metadata, MetadataValue};

/// A metadata predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Field equals the given value exactly.
    Equals { field: String, value: MetadataValue },
    /// Numeric field falls within the inclusive range. Either bound may be
    /// open.
    NumberRange {
        field: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    /// Tag-set field contains the given tag.
    HasTag { field: String, tag: String },
    /// Tag-set field shares at least one tag with the given set.
    TagsIntersect { field: String, tags: BTreeSet<String> },
    /// All sub-predicates match.
    And(Vec<Predicate>),
    /// At least one sub-predicate matches.
    Or(Vec<Predicate>),
    /// The sub-predicate does not match.
    Not(Box<Predicate>),
}

impl Predicate {
    /// Field equality shorthand.
    pub fn equals(field: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        Predicate::Equals {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Inclusive numeric range shorthand.
    pub fn range(field: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        Predicate::NumberRange {
            field: field.into(),
            min,
            max,
        }
    }

    /// Tag membership shorthand.
    pub fn has_tag(field: impl Into<String>, tag: impl Into<String>) -> Self {
        Predicate::HasTag {
            field: field.into(),
            tag: tag.into(),
        }
    }

    /// Tag intersection shorthand.
    pub fn tags_intersect<I, S>(field: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Predicate::TagsIntersect {
            field: field.into(),
            tags: tags.into_iter().map(Into::into).collect(),
        }
    }

    /// Evaluate this predicate against a document's metadata.
    ///
    /// Missing fields never match (except through `Not`).
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Predicate::Equals { field, value } => {
                metadata.get(field).map(|v| v == value).unwrap_or(false)
            }
            Predicate::NumberRange { field, min, max } => metadata
                .get(field)
                .and_then(MetadataValue::as_number)
                .map(|n| min.map(|m| n >= m).unwrap_or(true) && max.map(|m| n <= m).unwrap_or(true))
                .unwrap_or(false),
            Predicate::HasTag { field, tag } => metadata
                .get(field)
                .and_then(MetadataValue::as_tags)
                .map(|tags| tags.contains(tag))
                .unwrap_or(false),
            Predicate::TagsIntersect { field, tags } => metadata
                .get(field)
                .and_then(MetadataValue::as_tags)
                .map(|doc_tags| doc_tags.intersection(tags).next().is_some())
                .unwrap_or(false),
            Predicate::And(predicates) => predicates.iter().all(|p| p.matches(metadata)),
            Predicate::Or(predicates) => predicates.iter().any(|p| p.matches(metadata)),
            Predicate::Not(predicate) => !predicate.matches(metadata),
        }
    }
}
