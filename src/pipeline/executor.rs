//! Pipeline executor
//!
//! Runs one [`TestInput`] through the enabled stages in the fixed order
//! retrieval -> rerank -> filter -> prompt -> generation. Every stage call is
//! timed. A failing stage ends the run early: its output stays empty and the
//! error is attached to the [`PipelineResult`] instead of being returned.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use super::registry::{StageRegistry, StageServices, DEFAULT_RETRIEVAL_K};
use super::stages::{DocumentFilter, Generator, PromptBuilder, Reranker, Retriever};
use super::validator::ConfigValidator;
use crate::clients::{measure_async, measure_sync};
use crate::config::{PipelineConfig, StageCategory};
use crate::dataset::TestInput;
use crate::document::RetrievedDocument;
use crate::error::{ConfigurationError, StageExecutionError};

/// Elapsed seconds per stage (0.0 for stages that did not run)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    pub retrieval_secs: f64,
    pub rerank_secs: f64,
    pub filter_secs: f64,
    pub prompt_secs: f64,
    pub generation_secs: f64,
}

/// Outcome of running one input through a pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    /// Candidates as produced by retrieval (or the provided context)
    pub retrieved_documents: Vec<RetrievedDocument>,
    /// Documents after rerank and filter
    pub final_documents: Vec<RetrievedDocument>,
    /// Generated answer; empty when generation is disabled or failed
    pub final_answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
    pub timings: StageTimings,
    /// Technique(s) used per enabled category; chains are joined with `+`
    pub components_used: BTreeMap<StageCategory, String>,
    pub total_time_secs: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StageExecutionError>,
}

impl PipelineResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    /// Copy with every timing zeroed, for comparing runs
    pub fn without_timings(&self) -> Self {
        Self {
            timings: StageTimings::default(),
            total_time_secs: 0.0,
            tokens_per_second: None,
            ..self.clone()
        }
    }
}

/// Instantiated stages of one pipeline
pub struct Stages {
    pub(crate) retriever: Option<Box<dyn Retriever>>,
    pub(crate) rerankers: Vec<Box<dyn Reranker>>,
    pub(crate) filters: Vec<Box<dyn DocumentFilter>>,
    pub(crate) prompt: Option<Box<dyn PromptBuilder>>,
    pub(crate) generator: Option<Box<dyn Generator>>,
    pub(crate) default_k: usize,
}

impl Default for Stages {
    fn default() -> Self {
        Self {
            retriever: None,
            rerankers: Vec::new(),
            filters: Vec::new(),
            prompt: None,
            generator: None,
            default_k: DEFAULT_RETRIEVAL_K,
        }
    }
}

impl Stages {
    pub fn with_retriever(mut self, retriever: impl Retriever + 'static, default_k: usize) -> Self {
        self.retriever = Some(Box::new(retriever));
        self.default_k = default_k;
        self
    }

    pub fn with_reranker(mut self, reranker: impl Reranker + 'static) -> Self {
        self.rerankers.push(Box::new(reranker));
        self
    }

    pub fn with_filter(mut self, filter: impl DocumentFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn with_prompt(mut self, prompt: impl PromptBuilder + 'static) -> Self {
        self.prompt = Some(Box::new(prompt));
        self
    }

    pub fn with_generator(mut self, generator: impl Generator + 'static) -> Self {
        self.generator = Some(Box::new(generator));
        self
    }
}

/// Executes inputs against one immutable configuration
pub struct PipelineExecutor {
    config: Arc<PipelineConfig>,
    stages: Stages,
}

impl PipelineExecutor {
    /// Validate `config` and build its stages
    pub async fn build(config: Arc<PipelineConfig>, services: &StageServices) -> Result<Self, ConfigurationError> {
        let validation = ConfigValidator::validate(&config);
        for warning in &validation.warnings {
            tracing::warn!("{}", warning);
        }
        if !validation.valid {
            return Err(ConfigurationError::Invalid(validation.errors));
        }
        let stages = StageRegistry::build(&config, services).await?;
        Ok(Self { config, stages })
    }

    /// Executor over pre-built stages
    ///
    /// Stages whose category is disabled in `config` are never invoked.
    pub fn from_stages(config: Arc<PipelineConfig>, stages: Stages) -> Self {
        Self { config, stages }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn enabled(&self, category: StageCategory) -> bool {
        self.config.is_enabled(category)
    }

    fn components(&self) -> BTreeMap<StageCategory, String> {
        let mut components = BTreeMap::new();
        let mut record = |category: StageCategory, names: Vec<&'static str>| {
            if self.enabled(category) && !names.is_empty() {
                components.insert(category, names.join("+"));
            }
        };
        record(StageCategory::Retrieval, self.stages.retriever.iter().map(|s| s.technique()).collect());
        record(StageCategory::Rerank, self.stages.rerankers.iter().map(|s| s.technique()).collect());
        record(StageCategory::Filter, self.stages.filters.iter().map(|s| s.technique()).collect());
        record(StageCategory::Prompt, self.stages.prompt.iter().map(|s| s.technique()).collect());
        record(StageCategory::Generation, self.stages.generator.iter().map(|s| s.technique()).collect());
        components
    }

    /// Run one input; stage failures are reported in the result
    pub async fn execute(&self, input: &TestInput) -> PipelineResult {
        let start = Instant::now();
        let mut result = PipelineResult {
            components_used: self.components(),
            ..PipelineResult::default()
        };

        if let Err(err) = self.run_stages(input, &mut result).await {
            tracing::warn!(stage = %err.stage, error = %err.message, "stage failed");
            result.error = Some(err);
        }
        result.total_time_secs = start.elapsed().as_secs_f64();
        result
    }

    async fn run_stages(&self, input: &TestInput, result: &mut PipelineResult) -> Result<(), StageExecutionError> {
        let query = input.user_prompt.as_str();

        let retriever = self
            .stages
            .retriever
            .as_deref()
            .filter(|_| self.enabled(StageCategory::Retrieval));
        let mut documents = match retriever {
            Some(retriever) => {
                let k = input.k().unwrap_or(self.stages.default_k);
                let (documents, elapsed) = measure_async(retriever.retrieve(query, k)).await;
                result.timings.retrieval_secs = elapsed.as_secs_f64();
                documents?
            }
            None => provided_documents(input),
        };
        result.retrieved_documents = documents.clone();

        if self.enabled(StageCategory::Rerank) && !self.stages.rerankers.is_empty() {
            let (reranked, elapsed) = measure_async(self.rerank_chain(query, documents)).await;
            result.timings.rerank_secs = elapsed.as_secs_f64();
            documents = reranked?;
        }

        if self.enabled(StageCategory::Filter) && !self.stages.filters.is_empty() {
            let (filtered, elapsed) = measure_sync(|| {
                self.stages
                    .filters
                    .iter()
                    .fold(documents, |docs, filter| filter.filter(docs))
            });
            result.timings.filter_secs = elapsed.as_secs_f64();
            documents = filtered;
        }
        result.final_documents = documents;

        let prompt_builder = self
            .stages
            .prompt
            .as_deref()
            .filter(|_| self.enabled(StageCategory::Prompt));
        let prompt = match prompt_builder {
            Some(builder) => {
                let (prompt, elapsed) = measure_sync(|| builder.build(query, &result.final_documents));
                result.timings.prompt_secs = elapsed.as_secs_f64();
                Some(prompt)
            }
            None => None,
        };

        let generator = self
            .stages
            .generator
            .as_deref()
            .filter(|_| self.enabled(StageCategory::Generation));
        if let Some(generator) = generator {
            let prompt = prompt.clone().unwrap_or_else(|| query.to_string());
            let (generation, elapsed) = measure_async(generator.generate(&prompt)).await;
            result.timings.generation_secs = elapsed.as_secs_f64();
            result.prompt = Some(prompt);
            let generation = generation?;
            result.final_answer = generation.answer;
            result.tokens_per_second = Some(generation.tokens_per_second);
        } else {
            result.prompt = prompt;
        }
        Ok(())
    }

    async fn rerank_chain(
        &self,
        query: &str,
        mut documents: Vec<RetrievedDocument>,
    ) -> Result<Vec<RetrievedDocument>, StageExecutionError> {
        for reranker in &self.stages.rerankers {
            documents = reranker.rerank(query, documents).await?;
        }
        Ok(documents)
    }
}

/// Provided context as candidates, used when retrieval is disabled
fn provided_documents(input: &TestInput) -> Vec<RetrievedDocument> {
    input
        .documents
        .iter()
        .flatten()
        .enumerate()
        .map(|(i, text)| RetrievedDocument::new(format!("context-{}", i + 1), text.clone(), 1.0))
        .collect()
}

/// Validate, build and run a single input
pub async fn execute(
    config: &PipelineConfig,
    input: &TestInput,
    services: &StageServices,
) -> Result<PipelineResult, ConfigurationError> {
    let executor = PipelineExecutor::build(Arc::new(config.clone()), services).await?;
    Ok(executor.execute(input).await)
}
