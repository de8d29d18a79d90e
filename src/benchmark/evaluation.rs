//! Record evaluation
//!
//! Turns each [`PredictionRecord`] into an [`EvaluationResult`]:
//! - retrieval: ranking metrics per k plus `map`; score = recall@5
//! - generation: `llm_score`, `semantic_score`, combined `score`
//! - rag: both sets; `overall_score` averages the generation score with
//!   recall@5 when the row has relevance labels
//!
//! Error records short-circuit: the error is copied and no score is produced.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::record::{FailureKind, PredictionRecord, RecordError, TaskType};
use crate::document::RetrievedDocument;
use crate::error::MetricsError;
use crate::metrics::{
    canonical_retrieval_score, extract_doc_ids, mean, retrieval_metrics, GenerationScorer, DEFAULT_K_VALUES,
};

/// Scores for one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub model_name: String,
    pub configuration_id: String,
    pub task_type: TaskType,
    pub row_index: usize,
    pub user_prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<f64>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordError>,
}

impl EvaluationResult {
    fn for_record(record: &PredictionRecord) -> Self {
        Self {
            model_name: record.model_name.clone(),
            configuration_id: record.configuration_id.clone(),
            task_type: record.task_type,
            row_index: record.row_index,
            user_prompt: record.input.user_prompt.clone(),
            score: None,
            overall_score: None,
            metrics: BTreeMap::new(),
            error: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Metrics engine applied to prediction records
pub struct Evaluator {
    k_values: Vec<usize>,
    generation: Option<GenerationScorer>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new(DEFAULT_K_VALUES.to_vec())
    }
}

impl Evaluator {
    pub fn new(k_values: Vec<usize>) -> Self {
        Self {
            k_values,
            generation: None,
        }
    }

    /// Enable generation scoring
    pub fn with_generation(mut self, scorer: GenerationScorer) -> Self {
        self.generation = Some(scorer);
        self
    }

    pub async fn evaluate(&self, record: &PredictionRecord) -> EvaluationResult {
        let mut result = EvaluationResult::for_record(record);
        if let Some(error) = &record.error {
            result.error = Some(error.clone());
            return result;
        }

        match self.score(record, &mut result.metrics).await {
            Ok((score, overall_score)) => {
                result.score = Some(score);
                result.overall_score = Some(overall_score);
            }
            Err(error) => {
                tracing::debug!(
                    model = %record.model_name,
                    row = record.row_index,
                    error = %error,
                    "evaluation failed"
                );
                result.error = Some(error);
            }
        }
        result
    }

    /// (score, overall_score)
    async fn score(
        &self,
        record: &PredictionRecord,
        metrics: &mut BTreeMap<String, f64>,
    ) -> Result<(f64, f64), RecordError> {
        let documents = record.final_documents();
        match record.task_type {
            TaskType::Retrieval => {
                let relevant = record.input.relevant_ids().ok_or_else(|| {
                    MetricsError::MissingGroundTruth(format!("row {} has no true_qrel_list", record.row_index))
                })?;
                let score = self.retrieval_into(documents, &relevant, metrics);
                Ok((score, score))
            }
            TaskType::Generation => {
                let score = self.generation_into(record, metrics).await?;
                Ok((score, score))
            }
            TaskType::Rag => {
                let score = self.generation_into(record, metrics).await?;
                let overall = match record.input.relevant_ids() {
                    Some(relevant) => mean(&[score, self.retrieval_into(documents, &relevant, metrics)]),
                    None => score,
                };
                Ok((score, overall))
            }
        }
    }

    fn retrieval_into(
        &self,
        documents: &[RetrievedDocument],
        relevant: &HashSet<String>,
        metrics: &mut BTreeMap<String, f64>,
    ) -> f64 {
        let ids = extract_doc_ids(documents);
        metrics.extend(retrieval_metrics(&ids, relevant, &self.k_values));
        canonical_retrieval_score(&ids, relevant)
    }

    async fn generation_into(
        &self,
        record: &PredictionRecord,
        metrics: &mut BTreeMap<String, f64>,
    ) -> Result<f64, RecordError> {
        let scorer = self
            .generation
            .as_ref()
            .ok_or_else(|| RecordError::new(FailureKind::Configuration, "no judge model configured"))?;
        if !record.input.has_ground_truth() {
            return Err(MetricsError::MissingGroundTruth(format!("row {} has no ground_truth", record.row_index)).into());
        }
        let ground_truth = record.input.ground_truth.as_deref().unwrap_or_default();
        let answer = record.answer().unwrap_or_default();

        let scores = scorer
            .score(&record.input.user_prompt, answer, ground_truth)
            .await?;
        metrics.insert("llm_score".to_string(), scores.llm_score);
        metrics.insert("semantic_score".to_string(), scores.semantic_score);
        metrics.insert("score".to_string(), scores.score);
        Ok(scores.score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{LlmClient, LlmResponse, SimilarityService};
    use crate::config::{ModelTarget, PipelineConfig, ResolvedConfiguration, StageCategory, StageConfig};
    use crate::dataset::TestInput;
    use crate::error::ExternalServiceError;
    use crate::pipeline::PipelineResult;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct Judge(&'static str);

    #[async_trait]
    impl LlmClient for Judge {
        async fn respond(&self, _model: &str, _prompt: &str) -> Result<LlmResponse, ExternalServiceError> {
            Ok(LlmResponse {
                response: self.0.to_string(),
                tokens_per_second: 0.0,
            })
        }
    }

    struct Similarity(f64);

    #[async_trait]
    impl SimilarityService for Similarity {
        async fn similarity(&self, _a: &str, _b: &str) -> Result<f64, ExternalServiceError> {
            Ok(self.0)
        }
    }

    fn evaluator(judge_reply: &'static str) -> Evaluator {
        Evaluator::default().with_generation(GenerationScorer::new(
            Arc::new(Judge(judge_reply)),
            Arc::new(Similarity(0.6)),
            "judge",
        ))
    }

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

    fn ranked(ids: &[&str]) -> Vec<RetrievedDocument> {
        ids.iter().map(|id| RetrievedDocument::new(*id, "", 0.5)).collect()
    }

    fn record(pipeline: PipelineConfig, input: TestInput, result: PipelineResult) -> PredictionRecord {
        PredictionRecord::new(&resolved(pipeline), 0, &input, json!({})).with_result(result)
    }

    #[tokio::test]
    async fn test_retrieval_record() {
        let input = TestInput::new("q").with_arg("true_qrel_list", json!(["d1", "d2", "d3"]));
        let result = PipelineResult {
            final_documents: ranked(&["d1", "d3", "d5", "d9", "d2"]),
            ..PipelineResult::default()
        };
        let evaluation = Evaluator::default()
            .evaluate(&record(PipelineConfig::retrieval_only(), input, result))
            .await;

        assert!(!evaluation.is_error());
        assert_eq!(evaluation.score, Some(1.0));
        assert_eq!(evaluation.overall_score, Some(1.0));
        assert!((evaluation.metrics["precision@5"] - 0.6).abs() < 1e-9);
        assert!((evaluation.metrics["recall@1"] - 1.0 / 3.0).abs() < 1e-9);
        assert!(evaluation.metrics.contains_key("map"));
        assert!(evaluation.metrics.contains_key("ndcg@10"));
    }

    #[tokio::test]
    async fn test_retrieval_without_labels_is_an_error() {
        let result = PipelineResult {
            final_documents: ranked(&["d1"]),
            ..PipelineResult::default()
        };
        let evaluation = Evaluator::default()
            .evaluate(&record(PipelineConfig::retrieval_only(), TestInput::new("q"), result))
            .await;
        assert_eq!(evaluation.error.map(|e| e.kind), Some(FailureKind::Metrics));
        assert_eq!(evaluation.score, None);
    }

    #[tokio::test]
    async fn test_rag_record_combines_scores() {
        let input = TestInput::new("capital of France?")
            .with_ground_truth("Paris")
            .with_arg("true_qrel_list", json!(["d1"]));
        let result = PipelineResult {
            final_documents: ranked(&["d1", "d2"]),
            final_answer: "Paris.".to_string(),
            ..PipelineResult::default()
        };
        let evaluation = evaluator("```json\n{\"score\": 8}\n```")
            .evaluate(&record(rag(), input, result))
            .await;

        // llm 0.8, semantic 0.6 -> 0.7; recall@5 = 1.0 -> overall 0.85
        assert!((evaluation.metrics["llm_score"] - 0.8).abs() < 1e-9);
        assert!((evaluation.metrics["semantic_score"] - 0.6).abs() < 1e-9);
        assert!((evaluation.score.unwrap() - 0.7).abs() < 1e-9);
        assert!((evaluation.overall_score.unwrap() - 0.85).abs() < 1e-9);
        assert_eq!(evaluation.metrics["recall@5"], 1.0);
    }

    #[tokio::test]
    async fn test_unparseable_judge_is_surfaced() {
        let input = TestInput::new("q").with_ground_truth("Paris");
        let result = PipelineResult {
            final_answer: "Paris.".to_string(),
            ..PipelineResult::default()
        };
        let evaluation = evaluator("I'd give it an 8")
            .evaluate(&record(rag(), input, result))
            .await;
        assert_eq!(evaluation.error.as_ref().map(|e| e.kind), Some(FailureKind::MetricsParse));
        assert_eq!(evaluation.score, None);
        assert!(!evaluation.metrics.contains_key("llm_score"));
    }

    #[tokio::test]
    async fn test_error_record_short_circuits() {
        let config = resolved(rag());
        let failed = PredictionRecord::new(&config, 4, &TestInput::new("q"), json!({}))
            .with_error(RecordError::timeout());
        let evaluation = evaluator("```json\n{\"score\": 8}\n```").evaluate(&failed).await;
        assert_eq!(evaluation.row_index, 4);
        assert_eq!(evaluation.error.map(|e| e.kind), Some(FailureKind::Timeout));
        assert!(evaluation.metrics.is_empty());
        assert_eq!(evaluation.overall_score, None);
    }

    #[tokio::test]
    async fn test_blank_ground_truth_is_missing() {
        let input = TestInput::new("q").with_ground_truth("   ");
        let result = PipelineResult {
            final_answer: "Paris.".to_string(),
            ..PipelineResult::default()
        };
        let evaluation = evaluator("```json\n{\"score\": 8}\n```")
            .evaluate(&record(rag(), input, result))
            .await;
        let error = evaluation.error.unwrap();
        assert_eq!(error.kind, FailureKind::Metrics);
        assert!(error.message.contains("no ground_truth"));
    }

    #[tokio::test]
    async fn test_generation_without_scorer() {
        let input = TestInput::new("q").with_ground_truth("Paris");
        let evaluation = Evaluator::default()
            .evaluate(&record(rag(), input, PipelineResult::default()))
            .await;
        assert_eq!(evaluation.error.map(|e| e.kind), Some(FailureKind::Configuration));
    }
}
