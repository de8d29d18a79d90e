//! Retrieved document type shared by retrieval, rerank, filter and metrics

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::metrics::normalize_doc_id;

/// A document returned by retrieval (and carried through rerank/filter)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    /// Document identifier, when the source exposes one directly
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    /// Text content
    pub content: String,
    /// Similarity (or rerank) score, higher is better
    pub similarity_score: f32,
    /// Source payload; may carry the identifier as `doc_id` or `id`
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl RetrievedDocument {
    pub fn new(doc_id: impl Into<String>, content: impl Into<String>, similarity_score: f32) -> Self {
        Self {
            doc_id: Some(doc_id.into()),
            content: content.into(),
            similarity_score,
            metadata: Value::Null,
        }
    }

    /// Document without a direct identifier
    pub fn anonymous(content: impl Into<String>, similarity_score: f32) -> Self {
        Self {
            doc_id: None,
            content: content.into(),
            similarity_score,
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Resolve the identifier used for metric comparison
    ///
    /// Resolution order:
    /// 1. Direct `doc_id` field
    /// 2. `metadata.doc_id`, then `metadata.id`
    pub fn resolved_id(&self) -> Option<String> {
        if let Some(id) = self.doc_id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            return Some(id.to_string());
        }
        ["doc_id", "id"]
            .iter()
            .filter_map(|key| self.metadata.get(key))
            .find_map(normalize_doc_id)
    }
}
