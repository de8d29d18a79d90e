//! Generation quality: LLM judge score, semantic similarity, combined score
//!
//! The judge is asked to rate an answer 1-10 against the ground truth and to
//! reply with a JSON object inside a fenced block:
//!
//! ````text
//! ```json
//! {"score": 8, "reasoning": "..."}
//! ```
//! ````
//!
//! A reply without the fenced block, with malformed JSON, or without a numeric
//! `score` in 1..=10 is a [`MetricsError::Parse`]. It is never defaulted.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::clients::{LlmClient, SimilarityService};
use crate::error::MetricsError;

/// Default weight of the judge score in the combined score (unweighted mean)
pub const DEFAULT_JUDGE_WEIGHT: f64 = 0.5;

const FENCE_OPEN: &str = "```json";
const FENCE_CLOSE: &str = "```";

/// Tolerance for floating point noise at the [0, 1] boundary
const UNIT_RANGE_EPSILON: f64 = 1e-6;

/// Build the judge prompt
pub fn judge_prompt(question: &str, answer: &str, ground_truth: &str) -> String {
    format!(
        "You are grading an answer produced by a retrieval-augmented assistant.\n\
         Compare the ANSWER with the GROUND TRUTH for the QUESTION and rate how \
         correct and complete the answer is on a scale from 1 (wrong) to 10 \
         (fully correct).\n\n\
         QUESTION:\n{question}\n\n\
         GROUND TRUTH:\n{ground_truth}\n\n\
         ANSWER:\n{answer}\n\n\
         Reply with a JSON object inside a ```json fenced block, for example:\n\
         ```json\n{{\"score\": 7, \"reasoning\": \"one sentence\"}}\n```"
    )
}

/// Parse the judge's 1-10 score from its reply
pub fn parse_judge_score(response: &str) -> Result<f64, MetricsError> {
    let start = response
        .find(FENCE_OPEN)
        .ok_or_else(|| MetricsError::Parse("missing ```json block".to_string()))?
        + FENCE_OPEN.len();
    let body_len = response[start..]
        .find(FENCE_CLOSE)
        .ok_or_else(|| MetricsError::Parse("unterminated ```json block".to_string()))?;
    let body = response[start..start + body_len].trim();

    let payload: serde_json::Value =
        serde_json::from_str(body).map_err(|e| MetricsError::Parse(format!("invalid JSON: {}", e)))?;
    let score = payload
        .get("score")
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| MetricsError::Parse("payload has no numeric 'score' field".to_string()))?;

    if !(1.0..=10.0).contains(&score) {
        return Err(MetricsError::Parse(format!("score {} outside 1-10", score)));
    }
    Ok(score)
}

/// Check that a score lies in [0, 1]
///
/// Values within floating point noise of the boundary are snapped; anything
/// further out is reported as an error.
pub fn check_unit_range(metric: &str, value: f64) -> Result<f64, MetricsError> {
    if value.is_nan() || value < -UNIT_RANGE_EPSILON || value > 1.0 + UNIT_RANGE_EPSILON {
        return Err(MetricsError::OutOfRange {
            metric: metric.to_string(),
            value,
        });
    }
    Ok(value.clamp(0.0, 1.0))
}

/// Weighted combination of judge and semantic scores
///
/// With the default weight of 0.5 this is the arithmetic mean.
pub fn combined_score(llm_score: f64, semantic_score: f64, judge_weight: f64) -> f64 {
    judge_weight * llm_score + (1.0 - judge_weight) * semantic_score
}

/// Generation sub-scores; both are always reported alongside the combination
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationScores {
    /// Judge rating normalized to [0, 1]
    pub llm_score: f64,
    /// Embedding cosine similarity in [0, 1]
    pub semantic_score: f64,
    /// Combined score
    pub score: f64,
}

/// Scores generated answers with a judge model and a similarity service
#[derive(Clone)]
pub struct GenerationScorer {
    llm: Arc<dyn LlmClient>,
    similarity: Arc<dyn SimilarityService>,
    judge_model: String,
    judge_weight: f64,
}

impl GenerationScorer {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        similarity: Arc<dyn SimilarityService>,
        judge_model: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            similarity,
            judge_model: judge_model.into(),
            judge_weight: DEFAULT_JUDGE_WEIGHT,
        }
    }

    pub fn with_judge_weight(mut self, judge_weight: f64) -> Self {
        self.judge_weight = judge_weight;
        self
    }

    /// Ask the judge for a 1-10 rating, normalized to [0, 1]
    pub async fn llm_score(&self, question: &str, answer: &str, ground_truth: &str) -> Result<f64, MetricsError> {
        let prompt = judge_prompt(question, answer, ground_truth);
        let reply = self.llm.respond(&self.judge_model, &prompt).await?;
        let raw = parse_judge_score(&reply.response)?;
        Ok(raw / 10.0)
    }

    /// Embedding similarity between answer and ground truth
    pub async fn semantic_score(&self, answer: &str, ground_truth: &str) -> Result<f64, MetricsError> {
        let value = self.similarity.similarity(answer, ground_truth).await?;
        check_unit_range("semantic_score", value)
    }

    /// Score one answer; the judge and similarity calls run concurrently
    pub async fn score(&self, question: &str, answer: &str, ground_truth: &str) -> Result<GenerationScores, MetricsError> {
        let (llm_score, semantic_score) = tokio::join!(
            self.llm_score(question, answer, ground_truth),
            self.semantic_score(answer, ground_truth),
        );
        let (llm_score, semantic_score) = (llm_score?, semantic_score?);
        Ok(GenerationScores {
            llm_score,
            semantic_score,
            score: combined_score(llm_score, semantic_score, self.judge_weight),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::LlmResponse;
    use crate::error::ExternalServiceError;
    use async_trait::async_trait;

    struct ScriptedJudge(String);

    #[async_trait]
    impl LlmClient for ScriptedJudge {
        async fn respond(&self, _model: &str, _prompt: &str) -> Result<LlmResponse, ExternalServiceError> {
            Ok(LlmResponse {
                response: self.0.clone(),
                tokens_per_second: 0.0,
            })
        }
    }

    struct FixedSimilarity(f64);

    #[async_trait]
    impl SimilarityService for FixedSimilarity {
        async fn similarity(&self, _a: &str, _b: &str) -> Result<f64, ExternalServiceError> {
            Ok(self.0)
        }
    }

    fn scorer(reply: &str, similarity: f64) -> GenerationScorer {
        GenerationScorer::new(
            Arc::new(ScriptedJudge(reply.to_string())),
            Arc::new(FixedSimilarity(similarity)),
            "judge",
        )
    }

    #[test]
    fn test_parse_judge_score() {
        let reply = "Sure.\n```json\n{\"score\": 8, \"reasoning\": \"close\"}\n```\nDone.";
        assert_eq!(parse_judge_score(reply).unwrap(), 8.0);

        let float = "```json {\"score\": 6.5} ```";
        assert_eq!(parse_judge_score(float).unwrap(), 6.5);
    }

    #[test]
    fn test_parse_judge_score_errors() {
        let cases = [
            "{\"score\": 8}",                     // no fence
            "```json\n{\"score\": 8}",            // unterminated
            "```json\n{score: 8}\n```",           // invalid JSON
            "```json\n{\"rating\": 8}\n```",      // no score field
            "```json\n{\"score\": \"8\"}\n```",   // non-numeric score
            "```json\n{\"score\": 11}\n```",      // out of range
            "```json\n{\"score\": 0}\n```",       // out of range
        ];
        for reply in cases {
            assert!(
                matches!(parse_judge_score(reply), Err(MetricsError::Parse(_))),
                "expected parse error for {:?}",
                reply
            );
        }
    }

    #[test]
    fn test_check_unit_range() {
        assert_eq!(check_unit_range("s", 0.42).unwrap(), 0.42);
        assert_eq!(check_unit_range("s", 1.0000001).unwrap(), 1.0);
        assert!(matches!(
            check_unit_range("s", 1.2),
            Err(MetricsError::OutOfRange { .. })
        ));
        assert!(check_unit_range("s", -0.3).is_err());
        assert!(check_unit_range("s", f64::NAN).is_err());
    }

    #[test]
    fn test_combined_score_default_is_mean() {
        assert!((combined_score(0.8, 0.6, DEFAULT_JUDGE_WEIGHT) - 0.7).abs() < 1e-9);
        assert!((combined_score(0.8, 0.6, 1.0) - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_score_reports_both_sub_scores() {
        let scores = scorer("```json\n{\"score\": 9}\n```", 0.7)
            .score("q", "answer", "truth")
            .await
            .unwrap();
        assert!((scores.llm_score - 0.9).abs() < 1e-9);
        assert!((scores.semantic_score - 0.7).abs() < 1e-9);
        assert!((scores.score - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_score_surfaces_parse_error() {
        let result = scorer("I'd give it an 8.", 0.7).score("q", "a", "t").await;
        assert!(matches!(result, Err(MetricsError::Parse(_))));
    }

    #[tokio::test]
    async fn test_score_flags_out_of_range_similarity() {
        let result = scorer("```json\n{\"score\": 9}\n```", -0.4).score("q", "a", "t").await;
        assert!(matches!(result, Err(MetricsError::OutOfRange { .. })));
    }
}
