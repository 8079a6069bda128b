use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata attached to a `Chunk`. `source` and `chunk_index` are the two
/// fields the spec names explicitly; `id` is merged in by
/// `DocumentStore::add` so a stored chunk's metadata always carries its own
/// id (used by `delete_by_metadata_id`); anything else ingestion wants to
/// attach rides along in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkMetadata {
    pub source: String,
    pub chunk_index: i64,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten, default)]
    pub extra: BTreeMap<String, Value>,
}

impl ChunkMetadata {
    pub fn new(source: impl Into<String>, chunk_index: i64) -> Self {
        Self {
            source: source.into(),
            chunk_index,
            id: None,
            extra: BTreeMap::new(),
        }
    }

    /// True iff every key/value pair in `criteria` is present and equal in
    /// this metadata (used by the `filter` retrieval strategy).
    pub fn matches(&self, criteria: &BTreeMap<String, Value>) -> bool {
        criteria.iter().all(|(key, value)| match key.as_str() {
            "source" => Value::String(self.source.clone()) == *value,
            "chunk_index" => Value::from(self.chunk_index) == *value,
            "id" => self.id.as_deref().map(Value::from) == Some(value.clone()),
            other => self.extra.get(other) == Some(value),
        })
    }
}

/// A chunk of ingested text plus its embedding, as stored in a
/// `DocumentStore` collection. `id` is stable and caller-assigned
/// (`<kind>_<n>`); chunks are created at ingestion and never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    pub fn new(id: impl Into<String>, text: impl Into<String>, metadata: ChunkMetadata) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata,
            embedding: None,
            created_at: Utc::now(),
        }
    }
}
