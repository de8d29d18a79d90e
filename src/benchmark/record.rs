//! Prediction records: one per (configuration, dataset row)
//!
//! Records are kept whether the row succeeded or not. A failed record carries a
//! [`RecordError`] naming the failure kind so reports can count it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::config::{PipelineConfig, ResolvedConfiguration, StageCategory};
use crate::dataset::TestInput;
use crate::document::RetrievedDocument;
use crate::error::{ConfigurationError, ExternalServiceError, MetricsError};
use crate::pipeline::PipelineResult;

/// What a configuration is evaluated on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    /// Ranked documents scored against relevance labels
    Retrieval,
    /// Generated answer scored against ground truth (provided context)
    Generation,
    /// Retrieval followed by generation; both are scored
    Rag,
}

impl TaskType {
    pub fn for_pipeline(config: &PipelineConfig) -> Self {
        match (config.is_enabled(StageCategory::Retrieval), config.produces_answer()) {
            (_, false) => Self::Retrieval,
            (true, true) => Self::Rag,
            (false, true) => Self::Generation,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval",
            Self::Generation => "generation",
            Self::Rag => "rag",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure category used in reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Stage,
    ExternalService,
    Timeout,
    MetricsParse,
    Metrics,
}

impl FailureKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Stage => "stage",
            Self::ExternalService => "external_service",
            Self::Timeout => "timeout",
            Self::MetricsParse => "metrics_parse",
            Self::Metrics => "metrics",
        }
    }
}

/// Why a record has no score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    pub kind: FailureKind,
    pub message: String,
}

impl RecordError {
    pub fn new(kind: FailureKind, message: impl ToString) -> Self {
        Self {
            kind,
            message: message.to_string(),
        }
    }

    pub fn timeout() -> Self {
        Self::new(FailureKind::Timeout, "deadline exceeded before the row completed")
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.name(), self.message)
    }
}

impl From<MetricsError> for RecordError {
    fn from(err: MetricsError) -> Self {
        let kind = match &err {
            MetricsError::Parse(_) => FailureKind::MetricsParse,
            MetricsError::Service(ExternalServiceError::Timeout { .. }) => FailureKind::Timeout,
            MetricsError::Service(_) => FailureKind::ExternalService,
            MetricsError::OutOfRange { .. } | MetricsError::MissingGroundTruth(_) => FailureKind::Metrics,
        };
        Self::new(kind, err)
    }
}

impl From<ExternalServiceError> for RecordError {
    fn from(err: ExternalServiceError) -> Self {
        let kind = match err {
            ExternalServiceError::Timeout { .. } => FailureKind::Timeout,
            _ => FailureKind::ExternalService,
        };
        Self::new(kind, err)
    }
}

impl From<ConfigurationError> for RecordError {
    fn from(err: ConfigurationError) -> Self {
        Self::new(FailureKind::Configuration, err)
    }
}

/// Raw output of a configuration for one row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Prediction {
    Documents(Vec<RetrievedDocument>),
    Answer(String),
}

/// One (configuration, row) outcome
#[derive(Debug, Clone)]
pub struct PredictionRecord {
    pub model_name: String,
    /// Fingerprint of the configuration used
    pub configuration_id: String,
    pub task_type: TaskType,
    pub task_data: Value,
    pub row_index: usize,
    pub input: TestInput,
    pub config: Arc<PipelineConfig>,
    pub prediction: Option<Prediction>,
    /// Full pipeline output, when the pipeline ran
    pub pipeline: Option<PipelineResult>,
    pub error: Option<RecordError>,
}

impl PredictionRecord {
    /// Record for `input` with no prediction yet
    pub fn new(configuration: &ResolvedConfiguration, row_index: usize, input: &TestInput, task_data: Value) -> Self {
        Self {
            model_name: configuration.target.name.clone(),
            configuration_id: configuration.fingerprint.clone(),
            task_type: TaskType::for_pipeline(&configuration.pipeline),
            task_data,
            row_index,
            input: input.clone(),
            config: Arc::clone(&configuration.pipeline),
            prediction: None,
            pipeline: None,
            error: None,
        }
    }

    /// Attach a pipeline result; a stage failure makes this an error record
    ///
    /// A stage that failed on a collaborator keeps the collaborator's kind
    /// (`timeout`, `external_service`).
    pub fn with_result(mut self, result: PipelineResult) -> Self {
        match &result.error {
            Some(err) => {
                let kind = match &err.cause {
                    Some(cause) => RecordError::from(cause.clone()).kind,
                    None => FailureKind::Stage,
                };
                self.error = Some(RecordError::new(kind, err));
            }
            None => {
                self.prediction = Some(match self.task_type {
                    TaskType::Retrieval => Prediction::Documents(result.final_documents.clone()),
                    TaskType::Generation | TaskType::Rag => Prediction::Answer(result.final_answer.clone()),
                });
            }
        }
        self.pipeline = Some(result);
        self
    }

    pub fn with_error(mut self, error: RecordError) -> Self {
        self.error = Some(error);
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Documents after rerank and filter
    pub fn final_documents(&self) -> &[RetrievedDocument] {
        self.pipeline
            .as_ref()
            .map(|p| p.final_documents.as_slice())
            .unwrap_or_default()
    }

    pub fn answer(&self) -> Option<&str> {
        match &self.prediction {
            Some(Prediction::Answer(answer)) => Some(answer.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelTarget, StageConfig};
    use crate::error::StageExecutionError;
    use serde_json::json;

    fn resolved(pipeline: PipelineConfig) -> ResolvedConfiguration {
        ResolvedConfiguration {
            target: ModelTarget::new("bge-small", "faq"),
            fingerprint: pipeline.fingerprint(),
            pipeline: Arc::new(pipeline),
        }
    }

    fn rag() -> PipelineConfig {
        PipelineConfig::retrieval_only()
            .derive()
            .stage(StageCategory::Generation, StageConfig::enabled("llm").with_param("model", "m"))
            .build()
    }

    #[test]
    fn test_task_type_for_pipeline() {
        assert_eq!(TaskType::for_pipeline(&PipelineConfig::retrieval_only()), TaskType::Retrieval);
        assert_eq!(TaskType::for_pipeline(&rag()), TaskType::Rag);
        let generation_only = rag().derive().disable(StageCategory::Retrieval).build();
        assert_eq!(TaskType::for_pipeline(&generation_only), TaskType::Generation);
    }

    #[test]
    fn test_with_result_sets_prediction() {
        let config = resolved(PipelineConfig::retrieval_only());
        let result = PipelineResult {
            final_documents: vec![RetrievedDocument::new("d1", "x", 0.9)],
            ..PipelineResult::default()
        };
        let record = PredictionRecord::new(&config, 3, &TestInput::new("q"), json!({})).with_result(result);
        assert!(!record.is_error());
        assert_eq!(record.row_index, 3);
        assert_eq!(record.model_name, "bge-small");
        assert!(matches!(record.prediction, Some(Prediction::Documents(ref docs)) if docs.len() == 1));
        assert_eq!(record.final_documents().len(), 1);
    }

    #[test]
    fn test_stage_failure_becomes_error_record() {
        let config = resolved(rag());
        let result = PipelineResult {
            error: Some(StageExecutionError::new(StageCategory::Generation, "HTTP 500")),
            ..PipelineResult::default()
        };
        let record = PredictionRecord::new(&config, 0, &TestInput::new("q"), json!({})).with_result(result);
        let error = record.error.as_ref().unwrap();
        assert_eq!(error.kind, FailureKind::Stage);
        assert!(error.message.contains("generation stage failed"));
        assert!(record.prediction.is_none());
        assert!(record.pipeline.is_some());
    }

    #[test]
    fn test_service_failure_in_stage_keeps_its_kind() {
        let config = resolved(rag());
        let timeout = ExternalServiceError::Timeout { service: "qdrant".into() };
        let result = PipelineResult {
            error: Some(StageExecutionError::from_service(StageCategory::Retrieval, timeout)),
            ..PipelineResult::default()
        };
        let record = PredictionRecord::new(&config, 0, &TestInput::new("q"), json!({})).with_result(result);
        let error = record.error.as_ref().unwrap();
        assert_eq!(error.kind, FailureKind::Timeout);
        assert!(error.message.contains("retrieval stage failed"));

        let status = ExternalServiceError::Status {
            service: "ollama".into(),
            status: 500,
            body: String::new(),
        };
        let result = PipelineResult {
            error: Some(StageExecutionError::from_service(StageCategory::Generation, status)),
            ..PipelineResult::default()
        };
        let record = PredictionRecord::new(&config, 1, &TestInput::new("q"), json!({})).with_result(result);
        assert_eq!(record.error.map(|e| e.kind), Some(FailureKind::ExternalService));
    }

    #[test]
    fn test_metrics_error_kinds() {
        assert_eq!(RecordError::from(MetricsError::Parse("x".into())).kind, FailureKind::MetricsParse);
        let timeout = MetricsError::Service(ExternalServiceError::Timeout { service: "ollama".into() });
        assert_eq!(RecordError::from(timeout).kind, FailureKind::Timeout);
        assert_eq!(
            RecordError::from(MetricsError::MissingGroundTruth("row 1".into())).kind,
            FailureKind::Metrics
        );
    }
}
