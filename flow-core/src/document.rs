//! Document payloads as this layer sees them.
//!
//! Cached documents are opaque JSON: the cache never interprets the
//! payload beyond the `updatedAt`-style timestamp used for conflict
//! detection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::category::Category;

/// A server document paired with its identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Server-assigned document identifier.
    pub id: String,
    /// Opaque structured payload.
    pub data: Value,
}

impl Document {
    /// Create a document from an id and payload.
    #[must_use]
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    /// The composite cache key for this document under `category`.
    #[must_use]
    pub fn cache_key(&self, category: Category) -> String {
        composite_key(category, &self.id)
    }

    /// The document's modification timestamp, if the payload carries one.
    #[must_use]
    pub fn updated_at_ms(&self) -> Option<u64> {
        updated_at_ms(&self.data)
    }
}

/// Build the composite `category:docId` cache key.
#[must_use]
pub fn composite_key(category: Category, doc_id: &str) -> String {
    format!("{category}:{doc_id}")
}

/// Split a composite key back into its category and document id.
///
/// Keys without a separator resolve to [`Category::Generic`] with the
/// whole key as the id, matching the unknown-category fallback.
#[must_use]
pub fn split_key(key: &str) -> (Category, &str) {
    match key.split_once(':') {
        Some((category, id)) => (Category::from_name(category), id),
        None => (Category::Generic, key),
    }
}

/// Extract an `updatedAt`-like epoch-millisecond timestamp from a payload.
///
/// Portal documents write `updatedAt` as epoch milliseconds; older
/// records use `updated_at` or `lastModified`. Non-numeric values are
/// ignored; a document without a usable timestamp simply cannot
/// conflict.
#[must_use]
pub fn updated_at_ms(data: &Value) -> Option<u64> {
    const FIELDS: [&str; 3] = ["updatedAt", "updated_at", "lastModified"];
    let obj = data.as_object()?;
    FIELDS
        .iter()
        .find_map(|field| obj.get(*field))
        .and_then(Value::as_u64)
}
