//! Benchmark orchestration
//!
//! Three phases:
//! 1. Preparation: validate the sweep, load the dataset, resolve one
//!    configuration per model target.
//! 2. Prediction: every configuration runs every row. Configurations run
//!    concurrently; rows within a configuration run with bounded concurrency and
//!    keep dataset order.
//! 3. Evaluation: every record, failed ones included, is scored.
//!
//! Failures are isolated: a configuration that cannot start (vectorstore
//! unavailable, model load failure) yields error records for all of its rows
//! and is listed in `failed_configurations`; the others proceed. An optional
//! deadline turns every unfinished row into a timeout record.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::evaluation::{EvaluationResult, Evaluator};
use super::record::{FailureKind, PredictionRecord, RecordError};
use crate::clients::{LlmClient, SimilarityService, VectorstoreProvider};
use crate::config::{ResolvedConfiguration, StageCategory, SweepConfig};
use crate::dataset::{DatasetMetadata, DatasetService, PreparedDataset};
use crate::error::ConfigurationError;
use crate::metrics::GenerationScorer;
use crate::pipeline::{ConfigValidator, PipelineExecutor, RerankerModels, StageServices};

/// Wall-clock time per phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub preparation_secs: f64,
    pub prediction_secs: f64,
    pub evaluation_secs: f64,
    pub total_secs: f64,
}

/// A configuration that produced no predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationFailure {
    pub model_name: String,
    pub configuration_id: String,
    pub reason: RecordError,
}

/// Everything a sweep produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub phase_timings: PhaseTimings,
    pub dataset: DatasetMetadata,
    pub row_count: usize,
    pub configuration_count: usize,
    pub results: Vec<EvaluationResult>,
    pub failed_configurations: Vec<ConfigurationFailure>,
}

/// Result of the prediction phase for one configuration
struct ConfigurationRun {
    records: Vec<PredictionRecord>,
    failure: Option<ConfigurationFailure>,
}

/// Run `future` unless `deadline` passes first
async fn before_deadline<F: Future>(deadline: Option<tokio::time::Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}

/// Drives sweeps against injected collaborators
pub struct BenchmarkOrchestrator {
    datasets: Arc<dyn DatasetService>,
    vectorstores: Arc<dyn VectorstoreProvider>,
    llm: Arc<dyn LlmClient>,
    similarity: Arc<dyn SimilarityService>,
    rerankers: Arc<RerankerModels>,
}

impl BenchmarkOrchestrator {
    pub fn new(
        datasets: Arc<dyn DatasetService>,
        vectorstores: Arc<dyn VectorstoreProvider>,
        llm: Arc<dyn LlmClient>,
        similarity: Arc<dyn SimilarityService>,
        rerankers: Arc<RerankerModels>,
    ) -> Self {
        Self {
            datasets,
            vectorstores,
            llm,
            similarity,
            rerankers,
        }
    }

    /// Run a sweep; `execution.timeout_secs` sets the overall deadline
    pub async fn run_benchmark(&self, sweep: &SweepConfig) -> Result<BenchmarkRun, ConfigurationError> {
        let timeout = sweep.execution.timeout_secs.map(Duration::from_secs);
        self.run_with_timeout(sweep, timeout).await
    }

    /// Run a sweep with an explicit overall deadline
    pub async fn run_with_timeout(
        &self,
        sweep: &SweepConfig,
        timeout: Option<Duration>,
    ) -> Result<BenchmarkRun, ConfigurationError> {
        let start = Instant::now();
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        let mut timings = PhaseTimings::default();

        // Phase 1: preparation
        let validation = ConfigValidator::validate_sweep(sweep);
        for warning in &validation.warnings {
            tracing::warn!("{}", warning);
        }
        if !validation.valid {
            return Err(ConfigurationError::Invalid(validation.errors));
        }
        let dataset = self.datasets.prepare_dataset(&sweep.dataset).await?;
        let configurations = sweep.resolve_configurations()?;
        timings.preparation_secs = start.elapsed().as_secs_f64();
        tracing::info!(
            rows = dataset.count,
            configurations = configurations.len(),
            "preparation complete"
        );

        // Phase 2: prediction
        let phase = Instant::now();
        let row_concurrency = sweep.execution.row_concurrency.max(1);
        let runs = futures::future::join_all(
            configurations
                .iter()
                .map(|configuration| self.run_configuration(configuration, &dataset, row_concurrency, deadline)),
        )
        .await;
        timings.prediction_secs = phase.elapsed().as_secs_f64();

        let mut records = Vec::with_capacity(configurations.len() * dataset.count);
        let mut failed_configurations = Vec::new();
        for run in runs {
            records.extend(run.records);
            failed_configurations.extend(run.failure);
        }

        // Phase 3: evaluation
        let phase = Instant::now();
        let evaluator = self.evaluator(sweep);
        let results: Vec<EvaluationResult> = stream::iter(records.iter())
            .map(|record| {
                let evaluator = &evaluator;
                async move {
                    match before_deadline(deadline, evaluator.evaluate(record)).await {
                        Some(result) => result,
                        None => {
                            evaluator
                                .evaluate(&record.clone().with_error(RecordError::timeout()))
                                .await
                        }
                    }
                }
            })
            .buffered(sweep.evaluation.concurrency.max(1))
            .collect()
            .await;
        timings.evaluation_secs = phase.elapsed().as_secs_f64();
        timings.total_secs = start.elapsed().as_secs_f64();

        tracing::info!(
            results = results.len(),
            failed = results.iter().filter(|r| r.is_error()).count(),
            total_secs = timings.total_secs,
            "benchmark complete"
        );

        Ok(BenchmarkRun {
            phase_timings: timings,
            dataset: dataset.metadata.clone(),
            row_count: dataset.count,
            configuration_count: configurations.len(),
            results,
            failed_configurations,
        })
    }

    fn evaluator(&self, sweep: &SweepConfig) -> Evaluator {
        let evaluator = Evaluator::new(sweep.evaluation.k_values.clone());
        match &sweep.evaluation.judge_model {
            Some(judge_model) if sweep.pipeline.produces_answer() => evaluator.with_generation(
                GenerationScorer::new(Arc::clone(&self.llm), Arc::clone(&self.similarity), judge_model.as_str())
                    .with_judge_weight(sweep.evaluation.judge_weight),
            ),
            _ => evaluator,
        }
    }

    /// Services for one configuration; opens the vectorstore only when retrieval is enabled
    async fn services(&self, configuration: &ResolvedConfiguration) -> Result<StageServices, RecordError> {
        let mut services = StageServices::default()
            .with_llm(Arc::clone(&self.llm))
            .with_rerankers(Arc::clone(&self.rerankers));
        if configuration.pipeline.is_enabled(StageCategory::Retrieval) {
            let store = self.vectorstores.open(&configuration.target).await?;
            services = services.with_vectorstore(store);
        }
        Ok(services)
    }

    async fn run_configuration(
        &self,
        configuration: &ResolvedConfiguration,
        dataset: &PreparedDataset,
        row_concurrency: usize,
        deadline: Option<tokio::time::Instant>,
    ) -> ConfigurationRun {
        let model = configuration.target.name.as_str();
        tracing::info!(model, configuration = %configuration.fingerprint, "starting configuration");

        let task_data = |row_index: usize| {
            json!({
                "dataset": dataset.metadata.name,
                "collection": configuration.target.collection,
                "embedding_model": configuration.target.embedding_model(),
                "row_index": row_index,
            })
        };

        let setup = async {
            let services = self.services(configuration).await?;
            let executor = PipelineExecutor::build(Arc::clone(&configuration.pipeline), &services).await?;
            Ok::<_, RecordError>(executor)
        };
        let executor = match before_deadline(deadline, setup).await {
            Some(Ok(executor)) => executor,
            Some(Err(reason)) => return Self::failed_configuration(configuration, dataset, reason, task_data),
            None => return Self::failed_configuration(configuration, dataset, RecordError::timeout(), task_data),
        };

        let executor = &executor;
        let records: Vec<PredictionRecord> = stream::iter(dataset.rows.iter().enumerate())
            .map(|(row_index, input)| {
                let record = PredictionRecord::new(configuration, row_index, input, task_data(row_index));
                async move {
                    match before_deadline(deadline, executor.execute(input)).await {
                        Some(result) => {
                            if let Some(err) = &result.error {
                                tracing::warn!(model, row = row_index, error = %err, "row failed");
                            }
                            record.with_result(result)
                        }
                        None => record.with_error(RecordError::timeout()),
                    }
                }
            })
            .buffered(row_concurrency)
            .collect()
            .await;

        let failed = records.iter().filter(|r| r.is_error()).count();
        tracing::info!(model, rows = records.len(), failed, "configuration complete");
        ConfigurationRun {
            records,
            failure: None,
        }
    }

    fn failed_configuration(
        configuration: &ResolvedConfiguration,
        dataset: &PreparedDataset,
        reason: RecordError,
        task_data: impl Fn(usize) -> Value,
    ) -> ConfigurationRun {
        tracing::error!(model = %configuration.target.name, error = %reason, "configuration failed");
        let records = dataset
            .rows
            .iter()
            .enumerate()
            .map(|(row_index, input)| {
                PredictionRecord::new(configuration, row_index, input, task_data(row_index)).with_error(reason.clone())
            })
            .collect();
        ConfigurationRun {
            records,
            failure: Some(ConfigurationFailure {
                model_name: configuration.target.name.clone(),
                configuration_id: configuration.fingerprint.clone(),
                reason,
            }),
        }
    }
}

/// Whether a failure kind is expected to clear on a rerun
pub fn is_transient(kind: FailureKind) -> bool {
    matches!(kind, FailureKind::Timeout | FailureKind::ExternalService)
}
