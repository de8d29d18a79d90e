//! Benchmark dataset: test inputs with ground truth
//!
//! ## Dataset File Format (JSON)
//!
//! ```json
//! {
//!   "metadata": {
//!     "name": "product-faq",
//!     "description": "Support questions with answer and relevance labels",
//!     "version": "1.0"
//!   },
//!   "rows": [
//!     {
//!       "user_prompt": "How do I reset my password?",
//!       "ground_truth": "Use the 'Forgot password' link on the sign-in page.",
//!       "additional_args": { "k": 5, "true_qrel_list": ["faq-12", "faq-40"] }
//!     }
//!   ]
//! }
//! ```
//!
//! `true_qrel_list` may hold strings or numbers, or a string encoding a list
//! (`"['faq-12', 'faq-40']"` or `"faq-12, faq-40"`); ids are normalized to strings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;

use crate::config::DatasetConfig;
use crate::error::ConfigurationError;
use crate::metrics::normalize_doc_id;

/// One benchmark case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestInput {
    /// Query text
    pub user_prompt: String,

    /// Reference answer for generation scoring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<String>,

    /// Provided context, used when retrieval is disabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<String>>,

    /// Extra per-row arguments (`k`, `true_qrel_list`, ...)
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub additional_args: Map<String, Value>,
}

impl TestInput {
    pub fn new(user_prompt: impl Into<String>) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            ground_truth: None,
            documents: None,
            additional_args: Map::new(),
        }
    }

    pub fn with_ground_truth(mut self, ground_truth: impl Into<String>) -> Self {
        self.ground_truth = Some(ground_truth.into());
        self
    }

    pub fn with_documents(mut self, documents: Vec<String>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.additional_args.insert(key.into(), value.into());
        self
    }

    /// Per-row retrieval depth override
    pub fn k(&self) -> Option<usize> {
        let k = match self.additional_args.get("k")? {
            Value::Number(n) => n.as_u64().map(|k| k as usize),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        k.filter(|k| *k > 0)
    }

    /// Ground-truth relevant document ids, normalized to strings
    ///
    /// Returns `None` when the row carries no `true_qrel_list`.
    pub fn relevant_ids(&self) -> Option<HashSet<String>> {
        let raw = self.additional_args.get("true_qrel_list")?;
        let ids = match raw {
            Value::Array(items) => items.iter().filter_map(normalize_doc_id).collect(),
            Value::String(s) => parse_id_list(s),
            Value::Null => return None,
            other => normalize_doc_id(other).into_iter().collect(),
        };
        Some(ids)
    }

    /// Whether the row can be scored as a generation case
    pub fn has_ground_truth(&self) -> bool {
        self.ground_truth
            .as_deref()
            .is_some_and(|g| !g.trim().is_empty())
    }
}

/// Parse a list of ids encoded in a string cell
fn parse_id_list(s: &str) -> HashSet<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return HashSet::new();
    }
    if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
        return items.iter().filter_map(normalize_doc_id).collect();
    }
    trimmed
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|part| part.trim().trim_matches(|c| c == '\'' || c == '"').trim())
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Metadata about a dataset file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    /// Name of the dataset
    pub name: String,
    /// Optional description
    #[serde(default)]
    pub description: String,
    /// Optional version
    #[serde(default)]
    pub version: String,
}

/// A complete dataset file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetFile {
    pub metadata: DatasetMetadata,
    pub rows: Vec<TestInput>,
}

impl DatasetFile {
    /// Parse and validate a dataset from JSON text
    pub fn from_json(content: &str, origin: &str) -> Result<Self, ConfigurationError> {
        let dataset: DatasetFile =
            serde_json::from_str(content).map_err(|e| ConfigurationError::Load {
                what: format!("dataset {}", origin),
                reason: e.to_string(),
            })?;

        for (i, row) in dataset.rows.iter().enumerate() {
            if row.user_prompt.trim().is_empty() {
                return Err(ConfigurationError::Load {
                    what: format!("dataset {}", origin),
                    reason: format!("row {} has empty user_prompt", i),
                });
            }
        }

        let mut seen = HashSet::new();
        for row in &dataset.rows {
            if !seen.insert(row.user_prompt.as_str()) {
                tracing::warn!(prompt = %row.user_prompt, "duplicate user_prompt in dataset");
            }
        }

        Ok(dataset)
    }

    /// Save the dataset to a JSON file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        let content = serde_json::to_string_pretty(self).context("Failed to serialize dataset")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write dataset: {}", path.display()))?;
        Ok(())
    }
}

/// Rows ready for a sweep
#[derive(Debug, Clone)]
pub struct PreparedDataset {
    pub rows: Vec<TestInput>,
    pub count: usize,
    pub metadata: DatasetMetadata,
}

impl PreparedDataset {
    pub fn new(rows: Vec<TestInput>, metadata: DatasetMetadata) -> Self {
        Self {
            count: rows.len(),
            rows,
            metadata,
        }
    }
}

/// Source of benchmark rows
#[async_trait]
pub trait DatasetService: Send + Sync {
    async fn prepare_dataset(&self, config: &DatasetConfig) -> Result<PreparedDataset, ConfigurationError>;
}

/// Dataset service reading the JSON format above from disk
#[derive(Debug, Clone, Copy, Default)]
pub struct FileDatasetService;

#[async_trait]
impl DatasetService for FileDatasetService {
    async fn prepare_dataset(&self, config: &DatasetConfig) -> Result<PreparedDataset, ConfigurationError> {
        let origin = config.path.display().to_string();
        let content = tokio::fs::read_to_string(&config.path)
            .await
            .map_err(|e| ConfigurationError::Load {
                what: format!("dataset {}", origin),
                reason: e.to_string(),
            })?;

        let mut dataset = DatasetFile::from_json(&content, &origin)?;
        if let Some(limit) = config.limit {
            dataset.rows.truncate(limit);
        }

        tracing::info!(
            dataset = %dataset.metadata.name,
            rows = dataset.rows.len(),
            "dataset loaded"
        );
        Ok(PreparedDataset::new(dataset.rows, dataset.metadata))
    }
}
