//! Configuration for RAG benchmark sweeps
//!
//! Defines the pipeline configuration tree (one sub-config per stage category)
//! and the sweep.toml schema that fans a base pipeline out across embedding models.
//!
//! A `PipelineConfig` is immutable once built. Derived configurations are produced
//! with [`PipelineConfigBuilder`], starting from a base value and applying named
//! overrides; the base is never touched.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::ConfigurationError;

/// Pipeline stage category
///
/// Variants are declared in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageCategory {
    Retrieval,
    Rerank,
    Filter,
    Prompt,
    Generation,
}

impl StageCategory {
    /// All categories, in the fixed execution order
    pub const ALL: [StageCategory; 5] = [
        Self::Retrieval,
        Self::Rerank,
        Self::Filter,
        Self::Prompt,
        Self::Generation,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval",
            Self::Rerank => "rerank",
            Self::Filter => "filter",
            Self::Prompt => "prompt",
            Self::Generation => "generation",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "retrieval" | "retriever" => Some(Self::Retrieval),
            "rerank" | "reranker" | "reranking" => Some(Self::Rerank),
            "filter" | "filtering" => Some(Self::Filter),
            "prompt" | "prompt_construction" | "prompt-construction" => Some(Self::Prompt),
            "generation" | "generator" => Some(Self::Generation),
            _ => None,
        }
    }

    /// Whether the category accepts a chain of techniques (applied in order)
    pub fn allows_chaining(&self) -> bool {
        matches!(self, Self::Rerank | Self::Filter)
    }
}

impl fmt::Display for StageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration of one stage category
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Disabled stages are never invoked, whatever `techniques` holds
    #[serde(default)]
    pub enabled: bool,

    /// Selected technique names, applied in order
    #[serde(default)]
    pub techniques: Vec<String>,

    /// Technique-specific parameters
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl StageConfig {
    /// An enabled stage running a single technique
    pub fn enabled(technique: impl Into<String>) -> Self {
        Self {
            enabled: true,
            techniques: vec![technique.into()],
            params: Map::new(),
        }
    }

    /// A disabled stage
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_technique(mut self, technique: impl Into<String>) -> Self {
        self.techniques.push(technique.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn has_param(&self, key: &str) -> bool {
        self.params.get(key).is_some_and(|v| !v.is_null())
    }

    /// String parameter; empty strings count as absent
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(Value::as_f64)
    }

    /// Unsigned integer parameter (also accepts integral floats such as `5.0`)
    pub fn param_usize(&self, key: &str) -> Option<usize> {
        match self.params.get(key)? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
                .map(|n| n as usize),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Immutable pipeline configuration tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    retrieval: StageConfig,
    #[serde(default)]
    rerank: StageConfig,
    #[serde(default)]
    filter: StageConfig,
    #[serde(default)]
    prompt: StageConfig,
    #[serde(default)]
    generation: StageConfig,
}

impl PipelineConfig {
    /// Start building a configuration from an all-disabled base
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Start building a derived configuration from this one
    pub fn derive(&self) -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: self.clone(),
        }
    }

    /// Retrieval-only pipeline: vectorstore search, top 10
    pub fn retrieval_only() -> Self {
        Self::builder()
            .stage(
                StageCategory::Retrieval,
                StageConfig::enabled("vectorstore").with_param("k", 10),
            )
            .build()
    }

    pub fn stage(&self, category: StageCategory) -> &StageConfig {
        match category {
            StageCategory::Retrieval => &self.retrieval,
            StageCategory::Rerank => &self.rerank,
            StageCategory::Filter => &self.filter,
            StageCategory::Prompt => &self.prompt,
            StageCategory::Generation => &self.generation,
        }
    }

    pub fn is_enabled(&self, category: StageCategory) -> bool {
        self.stage(category).enabled
    }

    /// Enabled categories in execution order
    pub fn enabled_stages(&self) -> impl Iterator<Item = StageCategory> + '_ {
        StageCategory::ALL
            .into_iter()
            .filter(|c| self.is_enabled(*c))
    }

    /// Whether a run of this configuration produces a generated answer
    pub fn produces_answer(&self) -> bool {
        self.is_enabled(StageCategory::Generation)
    }

    /// Short deterministic identity of this configuration (sha256 of its JSON form)
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&bytes);
        format!("{:x}", digest)[..12].to_string()
    }
}

/// Builder producing a new immutable [`PipelineConfig`]
#[derive(Debug, Clone)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    fn slot(&mut self, category: StageCategory) -> &mut StageConfig {
        match category {
            StageCategory::Retrieval => &mut self.config.retrieval,
            StageCategory::Rerank => &mut self.config.rerank,
            StageCategory::Filter => &mut self.config.filter,
            StageCategory::Prompt => &mut self.config.prompt,
            StageCategory::Generation => &mut self.config.generation,
        }
    }

    /// Replace a whole stage sub-config
    pub fn stage(mut self, category: StageCategory, stage: StageConfig) -> Self {
        *self.slot(category) = stage;
        self
    }

    /// Enable a stage with a single technique, keeping its parameters
    pub fn enable(mut self, category: StageCategory, technique: impl Into<String>) -> Self {
        let slot = self.slot(category);
        slot.enabled = true;
        slot.techniques = vec![technique.into()];
        self
    }

    /// Disable a stage; its techniques and params are left in place but never used
    pub fn disable(mut self, category: StageCategory) -> Self {
        self.slot(category).enabled = false;
        self
    }

    /// Set one parameter on a stage
    pub fn param(
        mut self,
        category: StageCategory,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.slot(category).params.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> PipelineConfig {
        self.config
    }
}

/// Sweep configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Name used in reports
    #[serde(default = "default_sweep_name")]
    pub name: String,

    /// Dataset source
    pub dataset: DatasetConfig,

    /// Base pipeline shared by every model target
    #[serde(default = "PipelineConfig::retrieval_only")]
    pub pipeline: PipelineConfig,

    /// Embedding models / collections to sweep over
    #[serde(default)]
    pub models: Vec<ModelTarget>,

    #[serde(default)]
    pub evaluation: EvaluationConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub services: ServicesConfig,
}

/// Dataset file location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// JSON dataset file
    pub path: PathBuf,

    /// Only use the first N rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// One embedding model / collection pair in the sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTarget {
    /// Name used in reports
    pub name: String,

    /// Embedding model used to embed queries (defaults to `name`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,

    /// Vectorstore collection holding documents embedded with this model
    pub collection: String,

    /// Override of the base pipeline's retrieval `k`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_k: Option<usize>,
}

impl ModelTarget {
    pub fn new(name: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            embedding_model: None,
            collection: collection.into(),
            retrieval_k: None,
        }
    }

    pub fn embedding_model(&self) -> &str {
        self.embedding_model.as_deref().unwrap_or(&self.name)
    }
}

/// Evaluation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// LLM that rates generated answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub judge_model: Option<String>,

    /// Embedding model used for answer/ground-truth similarity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_model: Option<String>,

    /// k values for ranking metrics
    #[serde(default = "default_k_values")]
    pub k_values: Vec<usize>,

    /// Weight of the judge score in the combined generation score
    #[serde(default = "default_judge_weight")]
    pub judge_weight: f64,

    /// Records scored concurrently
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            judge_model: None,
            similarity_model: None,
            k_values: default_k_values(),
            judge_weight: default_judge_weight(),
            concurrency: default_concurrency(),
        }
    }
}

/// Execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Overall deadline for the sweep
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Rows in flight per configuration (results keep row order)
    #[serde(default = "default_concurrency")]
    pub row_concurrency: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: None,
            row_concurrency: default_concurrency(),
        }
    }
}

/// Endpoints of the external collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    /// Ollama-compatible LLM / embedding endpoint
    #[serde(default = "default_llm_url")]
    pub llm_url: String,

    /// Qdrant REST endpoint
    #[serde(default = "default_vectorstore_url")]
    pub vectorstore_url: String,

    /// Environment variable holding the vectorstore API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vectorstore_api_key_env: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            llm_url: default_llm_url(),
            vectorstore_url: default_vectorstore_url(),
            vectorstore_api_key_env: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_sweep_name() -> String { "rag-sweep".to_string() }
fn default_k_values() -> Vec<usize> { crate::metrics::DEFAULT_K_VALUES.to_vec() }
fn default_judge_weight() -> f64 { crate::metrics::DEFAULT_JUDGE_WEIGHT }
fn default_concurrency() -> usize { 4 }
fn default_llm_url() -> String { "http://localhost:11434".to_string() }
fn default_vectorstore_url() -> String { "http://localhost:6333".to_string() }
fn default_request_timeout() -> u64 { 120 }

/// A model target paired with its derived pipeline
#[derive(Debug, Clone)]
pub struct ResolvedConfiguration {
    pub target: ModelTarget,
    pub pipeline: Arc<PipelineConfig>,
    pub fingerprint: String,
}

impl SweepConfig {
    /// Load config from TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read sweep config: {:?}", path))?;
        let mut config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse sweep config: {:?}", path))?;

        // Relative dataset paths are resolved against the config file's directory
        if config.dataset.path.is_relative() {
            if let Some(parent) = path.parent() {
                config.dataset.path = parent.join(&config.dataset.path);
            }
        }
        config.evaluation.k_values.sort_unstable();
        config.evaluation.k_values.dedup();
        Ok(config)
    }

    /// Load from default location (./sweep.toml)
    pub fn load_default() -> Result<Self> {
        Self::load(Path::new("sweep.toml"))
    }

    /// Save config to TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Derive one pipeline per model target from the base pipeline
    ///
    /// The retrieval stage receives the target's embedding model, collection and
    /// optional `k` override. An empty model list is a configuration error.
    pub fn resolve_configurations(&self) -> Result<Vec<ResolvedConfiguration>, ConfigurationError> {
        if self.models.is_empty() {
            return Err(ConfigurationError::EmptyConfigurationSet);
        }

        Ok(self
            .models
            .iter()
            .map(|target| {
                let mut builder = self
                    .pipeline
                    .derive()
                    .param(StageCategory::Retrieval, "embedding_model", target.embedding_model())
                    .param(StageCategory::Retrieval, "collection", target.collection.as_str());
                if let Some(k) = target.retrieval_k {
                    builder = builder.param(StageCategory::Retrieval, "k", k);
                }
                let pipeline = builder.build();
                let fingerprint = pipeline.fingerprint();
                ResolvedConfiguration {
                    target: target.clone(),
                    pipeline: Arc::new(pipeline),
                    fingerprint,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWEEP_TOML: &str = r#"
name = "faq-sweep"

[dataset]
path = "data/faq.json"

[pipeline.retrieval]
enabled = true
techniques = ["vectorstore"]
params = { k = 5 }

[pipeline.rerank]
enabled = false
techniques = ["cross_encoder"]
params = { model = "BAAI/bge-reranker-base" }

[pipeline.generation]
enabled = true
techniques = ["llm"]
params = { model = "llama3.1:8b", temperature = 0.2 }

[[models]]
name = "bge-small"
embedding_model = "bge-small-en"
collection = "faq_bge_small"

[[models]]
name = "nomic-embed-text"
collection = "faq_nomic"
retrieval_k = 10

[evaluation]
judge_model = "llama3.1:70b"
k_values = [10, 1, 5, 3, 5]

[execution]
timeout_secs = 600
"#;

    #[test]
    fn test_stage_category_from_str() {
        assert_eq!(StageCategory::from_str("rerank"), Some(StageCategory::Rerank));
        assert_eq!(StageCategory::from_str("Prompt_Construction"), Some(StageCategory::Prompt));
        assert_eq!(StageCategory::from_str("indexing"), None);
    }

    #[test]
    fn test_sweep_config_toml() {
        let config: SweepConfig = toml::from_str(SWEEP_TOML).unwrap();
        assert_eq!(config.name, "faq-sweep");
        assert_eq!(config.models.len(), 2);
        assert!(config.pipeline.is_enabled(StageCategory::Generation));
        assert!(!config.pipeline.is_enabled(StageCategory::Rerank));
        assert_eq!(
            config.pipeline.stage(StageCategory::Generation).param_str("model"),
            Some("llama3.1:8b")
        );
        assert_eq!(config.execution.timeout_secs, Some(600));
        assert_eq!(config.services.llm_url, "http://localhost:11434");
    }

    #[test]
    fn test_load_sorts_k_values_and_resolves_dataset_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.toml");
        std::fs::write(&path, SWEEP_TOML).unwrap();

        let config = SweepConfig::load(&path).unwrap();
        assert_eq!(config.evaluation.k_values, vec![1, 3, 5, 10]);
        assert_eq!(config.dataset.path, dir.path().join("data/faq.json"));
    }

    #[test]
    fn test_resolve_configurations_derives_without_touching_base() {
        let config: SweepConfig = toml::from_str(SWEEP_TOML).unwrap();
        let base_before = config.pipeline.clone();

        let resolved = config.resolve_configurations().unwrap();
        assert_eq!(resolved.len(), 2);

        let first = resolved[0].pipeline.stage(StageCategory::Retrieval);
        assert_eq!(first.param_str("embedding_model"), Some("bge-small-en"));
        assert_eq!(first.param_str("collection"), Some("faq_bge_small"));
        assert_eq!(first.param_usize("k"), Some(5));

        let second = resolved[1].pipeline.stage(StageCategory::Retrieval);
        assert_eq!(second.param_str("embedding_model"), Some("nomic-embed-text"));
        assert_eq!(second.param_usize("k"), Some(10));

        // Base is unchanged and derived configs are distinct
        assert_eq!(config.pipeline, base_before);
        assert!(!config.pipeline.stage(StageCategory::Retrieval).has_param("collection"));
        assert_ne!(resolved[0].fingerprint, resolved[1].fingerprint);
    }

    #[test]
    fn test_resolve_empty_model_set_is_an_error() {
        let mut config: SweepConfig = toml::from_str(SWEEP_TOML).unwrap();
        config.models.clear();
        assert_eq!(
            config.resolve_configurations().unwrap_err(),
            ConfigurationError::EmptyConfigurationSet
        );
    }

    #[test]
    fn test_builder_produces_new_value() {
        let base = PipelineConfig::retrieval_only();
        let derived = base
            .derive()
            .enable(StageCategory::Filter, "similarity_threshold")
            .param(StageCategory::Filter, "threshold", 0.5)
            .build();

        assert!(!base.is_enabled(StageCategory::Filter));
        assert!(derived.is_enabled(StageCategory::Filter));
        assert_eq!(
            derived.enabled_stages().collect::<Vec<_>>(),
            vec![StageCategory::Retrieval, StageCategory::Filter]
        );
        assert_eq!(base.fingerprint(), PipelineConfig::retrieval_only().fingerprint());
    }

    #[test]
    fn test_param_usize_accepts_integral_floats_and_strings() {
        let stage = StageConfig::enabled("vectorstore")
            .with_param("a", 5.0)
            .with_param("b", "7")
            .with_param("c", 2.5)
            .with_param("d", -1);
        assert_eq!(stage.param_usize("a"), Some(5));
        assert_eq!(stage.param_usize("b"), Some(7));
        assert_eq!(stage.param_usize("c"), None);
        assert_eq!(stage.param_usize("d"), None);
    }
}
