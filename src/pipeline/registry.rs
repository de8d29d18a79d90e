//! Technique registry
//!
//! Every technique is a variant of the closed [`Technique`] enum. Names from
//! configuration are resolved against the category they appear under, so `llm`
//! means LLM reranking under `rerank` and LLM generation under `generation`.

use serde::Serialize;
use std::sync::Arc;

use super::cross_encoder::RerankerModels;
use super::executor::Stages;
use super::stages::{
    ConcatenatePrompt, CrossEncoderReranker, IdentityReranker, LlmGenerator, LlmReranker,
    SimilarityThresholdFilter, SimpleListingPrompt, VectorstoreRetriever,
};
use crate::clients::{GenerationOptions, LlmClient, Vectorstore};
use crate::config::{PipelineConfig, StageCategory, StageConfig};
use crate::error::ConfigurationError;

/// Retrieval depth when neither the config nor the row sets `k`
pub const DEFAULT_RETRIEVAL_K: usize = 5;

/// Maturity of a technique
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
    Stable,
    Experimental,
    Deprecated,
}

impl Stability {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Experimental => "experimental",
            Self::Deprecated => "deprecated",
        }
    }
}

/// Registered techniques
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Technique {
    Vectorstore,
    CrossEncoder,
    LlmRerank,
    Identity,
    SimilarityThreshold,
    SimpleListing,
    Concatenate,
    LlmGeneration,
}

impl Technique {
    pub const ALL: [Technique; 8] = [
        Self::Vectorstore,
        Self::CrossEncoder,
        Self::LlmRerank,
        Self::Identity,
        Self::SimilarityThreshold,
        Self::SimpleListing,
        Self::Concatenate,
        Self::LlmGeneration,
    ];

    pub fn category(&self) -> StageCategory {
        match self {
            Self::Vectorstore => StageCategory::Retrieval,
            Self::CrossEncoder | Self::LlmRerank | Self::Identity => StageCategory::Rerank,
            Self::SimilarityThreshold => StageCategory::Filter,
            Self::SimpleListing | Self::Concatenate => StageCategory::Prompt,
            Self::LlmGeneration => StageCategory::Generation,
        }
    }

    /// Canonical name as written in configuration
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vectorstore => "vectorstore",
            Self::CrossEncoder => "cross_encoder",
            Self::LlmRerank | Self::LlmGeneration => "llm",
            Self::Identity => "identity",
            Self::SimilarityThreshold => "similarity_threshold",
            Self::SimpleListing => "simple_listing",
            Self::Concatenate => "concatenate",
        }
    }

    fn aliases(&self) -> &'static [&'static str] {
        match self {
            Self::Vectorstore => &["vector_store", "similarity_search"],
            Self::CrossEncoder => &["cross-encoder", "crossencoder"],
            Self::LlmRerank => &["llm_rerank"],
            Self::Identity => &["none", "passthrough"],
            Self::SimilarityThreshold => &["threshold"],
            Self::SimpleListing => &["simple"],
            Self::Concatenate => &["concat"],
            Self::LlmGeneration => &["llm_generation"],
        }
    }

    pub fn stability(&self) -> Stability {
        match self {
            Self::LlmRerank => Stability::Experimental,
            Self::Concatenate => Stability::Deprecated,
            _ => Stability::Stable,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Vectorstore => "similarity search against the model's collection",
            Self::CrossEncoder => "fastembed cross-encoder scores each (query, document) pair",
            Self::LlmRerank => "LLM rates each document's relevance 1-10",
            Self::Identity => "keeps the retrieved order",
            Self::SimilarityThreshold => "keeps documents with similarity_score >= threshold",
            Self::SimpleListing => "numbered context blocks followed by the question",
            Self::Concatenate => "raw document texts followed by the question (use simple_listing)",
            Self::LlmGeneration => "completion from an LLM",
        }
    }

    /// Parameter keys naming the model, most specific first
    pub fn model_keys(&self) -> &'static [&'static str] {
        match self {
            Self::CrossEncoder => &["cross_encoder_model", "model"],
            Self::LlmRerank => &["llm_model", "model"],
            Self::LlmGeneration => &["model"],
            _ => &[],
        }
    }

    /// Parameters that must be present (besides the model)
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            Self::SimilarityThreshold => &["threshold"],
            _ => &[],
        }
    }

    /// Model named for this technique in `stage`, if any
    pub fn model<'a>(&self, stage: &'a StageConfig) -> Option<&'a str> {
        self.model_keys().iter().find_map(|key| stage.param_str(key))
    }

    fn matches(&self, name: &str) -> bool {
        self.name() == name || self.aliases().contains(&name)
    }
}

/// Technique lookup and stage construction
pub struct StageRegistry;

impl StageRegistry {
    /// Resolve a technique name within a category
    pub fn lookup(category: StageCategory, name: &str) -> Result<Technique, ConfigurationError> {
        let normalized = name.trim().to_lowercase();
        Technique::ALL
            .into_iter()
            .find(|t| t.category() == category && t.matches(&normalized))
            .ok_or_else(|| ConfigurationError::UnknownTechnique {
                category,
                name: name.to_string(),
            })
    }

    /// Techniques registered for a category
    pub fn techniques(category: StageCategory) -> Vec<Technique> {
        Technique::ALL
            .into_iter()
            .filter(|t| t.category() == category)
            .collect()
    }

    /// Instantiate the enabled stages of `config`
    ///
    /// Disabled stages are skipped entirely. Cross-encoder models are fetched
    /// through the shared [`RerankerModels`] cache.
    pub async fn build(config: &PipelineConfig, services: &StageServices) -> Result<Stages, ConfigurationError> {
        let mut stages = Stages::default();

        for category in config.enabled_stages() {
            let stage = config.stage(category);
            for name in &stage.techniques {
                let technique = Self::lookup(category, name)?;
                tracing::debug!(stage = %category, technique = technique.name(), "building stage");
                Self::add(&mut stages, technique, stage, services).await?;
            }
        }
        Ok(stages)
    }

    async fn add(
        stages: &mut Stages,
        technique: Technique,
        stage: &StageConfig,
        services: &StageServices,
    ) -> Result<(), ConfigurationError> {
        let category = technique.category();
        let model = || {
            technique.model(stage).ok_or_else(|| ConfigurationError::MissingParameter {
                category,
                param: technique.model_keys().last().copied().unwrap_or("model").to_string(),
            })
        };
        let top_n = stage.param_usize("top_n");

        match technique {
            Technique::Vectorstore => {
                let store = services.vectorstore(category)?;
                stages.default_k = stage.param_usize("k").filter(|k| *k > 0).unwrap_or(DEFAULT_RETRIEVAL_K);
                stages.retriever = Some(Box::new(VectorstoreRetriever::new(store)));
            }
            Technique::CrossEncoder => {
                let model = model()?;
                let rerankers = services.rerankers.as_ref().ok_or_else(|| ConfigurationError::MissingService {
                    category,
                    service: "cross-encoder model cache".to_string(),
                })?;
                let encoder = rerankers.get(model).await?;
                stages.rerankers.push(Box::new(CrossEncoderReranker::new(encoder, top_n)));
            }
            Technique::LlmRerank => {
                let model = model()?;
                let llm = services.llm(category)?;
                stages.rerankers.push(Box::new(LlmReranker::new(llm, model, top_n)));
            }
            Technique::Identity => stages.rerankers.push(Box::new(IdentityReranker)),
            Technique::SimilarityThreshold => {
                let threshold = stage.param_f64("threshold").ok_or_else(|| ConfigurationError::MissingParameter {
                    category,
                    param: "threshold".to_string(),
                })?;
                stages.filters.push(Box::new(SimilarityThresholdFilter::new(threshold as f32)));
            }
            Technique::SimpleListing => {
                let template = match (stage.param_str("template"), stage.param_str("template_path")) {
                    (Some(inline), _) => Some(inline.to_string()),
                    (None, Some(path)) => Some(tokio::fs::read_to_string(path).await.map_err(|e| {
                        ConfigurationError::Load {
                            what: format!("prompt template {}", path),
                            reason: e.to_string(),
                        }
                    })?),
                    (None, None) => None,
                };
                stages.prompt = Some(Box::new(SimpleListingPrompt::new(template)));
            }
            Technique::Concatenate => stages.prompt = Some(Box::new(ConcatenatePrompt)),
            Technique::LlmGeneration => {
                let model = model()?;
                let llm = services.llm(category)?;
                let options = GenerationOptions {
                    temperature: stage.param_f64("temperature"),
                    max_tokens: stage.param_usize("max_tokens"),
                };
                stages.generator = Some(Box::new(LlmGenerator::new(llm, model, options)));
            }
        }
        Ok(())
    }
}

/// Services injected into stages at construction
#[derive(Clone, Default)]
pub struct StageServices {
    pub vectorstore: Option<Arc<dyn Vectorstore>>,
    pub llm: Option<Arc<dyn LlmClient>>,
    pub rerankers: Option<Arc<RerankerModels>>,
}

impl StageServices {
    pub fn with_vectorstore(mut self, store: Arc<dyn Vectorstore>) -> Self {
        self.vectorstore = Some(store);
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_rerankers(mut self, rerankers: Arc<RerankerModels>) -> Self {
        self.rerankers = Some(rerankers);
        self
    }

    fn vectorstore(&self, category: StageCategory) -> Result<Arc<dyn Vectorstore>, ConfigurationError> {
        self.vectorstore.clone().ok_or_else(|| ConfigurationError::MissingService {
            category,
            service: "vectorstore".to_string(),
        })
    }

    fn llm(&self, category: StageCategory) -> Result<Arc<dyn LlmClient>, ConfigurationError> {
        self.llm.clone().ok_or_else(|| ConfigurationError::MissingService {
            category,
            service: "LLM client".to_string(),
        })
    }
}
