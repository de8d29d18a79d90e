//! Configuration validation
//!
//! Validation is pure: no I/O, no service calls, and it always returns a
//! [`ValidationResult`]. Callers decide whether errors abort the run.

use serde::Serialize;
use std::collections::HashSet;

use super::registry::{Stability, StageRegistry};
use crate::config::{PipelineConfig, StageCategory, StageConfig, SweepConfig};

/// Retrieval depth above which a warning is raised
const MAX_RECOMMENDED_K: usize = 100;
/// Recommended generation temperature range
const TEMPERATURE_RANGE: (f64, f64) = (0.0, 2.0);

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    fn finish(mut self) -> Self {
        self.valid = self.errors.is_empty();
        self
    }
}

pub struct ConfigValidator;

impl ConfigValidator {
    /// Check a pipeline configuration
    pub fn validate(config: &PipelineConfig) -> ValidationResult {
        let mut result = ValidationResult::default();
        for category in StageCategory::ALL {
            Self::check_stage(category, config.stage(category), &mut result);
        }
        result.finish()
    }

    fn check_stage(category: StageCategory, stage: &StageConfig, result: &mut ValidationResult) {
        if !stage.enabled {
            if !stage.techniques.is_empty() {
                result.warn(format!(
                    "{category}: stage is disabled; techniques [{}] will be ignored",
                    stage.techniques.join(", ")
                ));
            }
            return;
        }

        if stage.techniques.is_empty() {
            result.error(format!("{category}: stage is enabled but names no technique"));
            return;
        }
        if !category.allows_chaining() && stage.techniques.len() > 1 {
            result.error(format!(
                "{category}: exactly one technique allowed, got {} ({})",
                stage.techniques.len(),
                stage.techniques.join(", ")
            ));
        }

        for name in &stage.techniques {
            let technique = match StageRegistry::lookup(category, name) {
                Ok(technique) => technique,
                Err(e) => {
                    result.error(e.to_string());
                    continue;
                }
            };
            match technique.stability() {
                Stability::Stable => {}
                Stability::Experimental => {
                    result.warn(format!("{category}: technique '{name}' is experimental"))
                }
                Stability::Deprecated => {
                    result.warn(format!("{category}: technique '{name}' is deprecated"))
                }
            }
            if !technique.model_keys().is_empty() && technique.model(stage).is_none() {
                result.error(format!(
                    "{category}: technique '{name}' requires a model name (param '{}')",
                    technique.model_keys().join("' or '")
                ));
            }
            for param in technique.required_params() {
                if !stage.has_param(param) {
                    result.error(format!("{category}: technique '{name}' requires parameter '{param}'"));
                }
            }
        }

        Self::check_bounds(category, stage, result);
    }

    fn check_bounds(category: StageCategory, stage: &StageConfig, result: &mut ValidationResult) {
        match category {
            StageCategory::Retrieval => {
                if stage.has_param("k") {
                    match stage.param_usize("k") {
                        Some(0) | None => result.error(format!("{category}: k must be a positive integer")),
                        Some(k) if k > MAX_RECOMMENDED_K => {
                            result.warn(format!("{category}: k = {k} is above {MAX_RECOMMENDED_K}"))
                        }
                        Some(_) => {}
                    }
                }
            }
            StageCategory::Rerank => {
                if stage.has_param("top_n") && stage.param_usize("top_n").unwrap_or(0) == 0 {
                    result.error(format!("{category}: top_n must be a positive integer"));
                }
            }
            StageCategory::Filter => {
                if stage.has_param("threshold") {
                    match stage.param_f64("threshold") {
                        None => result.error(format!("{category}: threshold must be a number")),
                        Some(t) if !(0.0..=1.0).contains(&t) => {
                            result.warn(format!("{category}: threshold {t} is outside [0, 1]"))
                        }
                        Some(_) => {}
                    }
                }
            }
            StageCategory::Prompt => {
                if stage.has_param("template") && stage.has_param("template_path") {
                    result.error(format!("{category}: 'template' and 'template_path' are mutually exclusive"));
                }
                if let Some(template) = stage.param_str("template") {
                    if !template.contains("{question}") {
                        result.warn(format!("{category}: template has no {{question}} placeholder"));
                    }
                }
            }
            StageCategory::Generation => {
                if stage.has_param("temperature") {
                    match stage.param_f64("temperature") {
                        None => result.error(format!("{category}: temperature must be a number")),
                        Some(t) if t < TEMPERATURE_RANGE.0 || t > TEMPERATURE_RANGE.1 => result.warn(format!(
                            "{category}: temperature {t} is outside [{}, {}]",
                            TEMPERATURE_RANGE.0, TEMPERATURE_RANGE.1
                        )),
                        Some(_) => {}
                    }
                }
                if stage.has_param("max_tokens") && stage.param_usize("max_tokens").unwrap_or(0) == 0 {
                    result.error(format!("{category}: max_tokens must be a positive integer"));
                }
            }
        }
    }

    /// Check a whole sweep: the base pipeline, model targets and evaluation settings
    pub fn validate_sweep(sweep: &SweepConfig) -> ValidationResult {
        let base = Self::validate(&sweep.pipeline);
        let mut result = ValidationResult {
            valid: false,
            errors: base.errors,
            warnings: base.warnings,
        };
        let pipeline = &sweep.pipeline;

        if !pipeline.is_enabled(StageCategory::Retrieval) && !pipeline.produces_answer() {
            result.error("pipeline enables neither retrieval nor generation; there is nothing to score");
        }

        if sweep.models.is_empty() {
            result.error("no [[models]] configured");
        }
        let mut seen = HashSet::new();
        for target in &sweep.models {
            if !seen.insert(target.name.as_str()) {
                result.error(format!("model '{}' is listed more than once", target.name));
            }
            if target.collection.trim().is_empty() {
                result.error(format!("model '{}': collection is empty", target.name));
            }
            match target.retrieval_k {
                Some(0) => result.error(format!("model '{}': retrieval_k must be positive", target.name)),
                Some(k) if k > MAX_RECOMMENDED_K => {
                    result.warn(format!("model '{}': retrieval_k = {k} is above {MAX_RECOMMENDED_K}", target.name))
                }
                _ => {}
            }
        }

        let evaluation = &sweep.evaluation;
        if pipeline.produces_answer() {
            if evaluation.judge_model.as_deref().map_or(true, |m| m.trim().is_empty()) {
                result.error("evaluation.judge_model is required when generation is enabled");
            }
            if evaluation.similarity_model.as_deref().map_or(true, |m| m.trim().is_empty()) {
                result.error("evaluation.similarity_model is required when generation is enabled");
            }
        }
        if !(0.0..=1.0).contains(&evaluation.judge_weight) {
            result.error(format!(
                "evaluation.judge_weight = {} must be within [0, 1]",
                evaluation.judge_weight
            ));
        }
        if evaluation.k_values.is_empty() {
            result.error("evaluation.k_values is empty");
        } else if evaluation.k_values.contains(&0) {
            result.error("evaluation.k_values must all be positive");
        }
        if evaluation.concurrency == 0 {
            result.error("evaluation.concurrency must be at least 1");
        }
        if sweep.execution.row_concurrency == 0 {
            result.error("execution.row_concurrency must be at least 1");
        }
        if sweep.execution.timeout_secs == Some(0) {
            result.error("execution.timeout_secs must be positive");
        }

        result.finish()
    }
}

/// Validate a pipeline configuration
pub fn validate(config: &PipelineConfig) -> ValidationResult {
    ConfigValidator::validate(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatasetConfig, EvaluationConfig, ExecutionConfig, ModelTarget, ServicesConfig};

    fn with(category: StageCategory, stage: StageConfig) -> PipelineConfig {
        PipelineConfig::retrieval_only().derive().stage(category, stage).build()
    }

    #[test]
    fn test_retrieval_only_is_valid() {
        let result = validate(&PipelineConfig::retrieval_only());
        assert!(result.valid, "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_generation_without_model_is_rejected() {
        let result = validate(&with(StageCategory::Generation, StageConfig::enabled("llm")));
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("generation"));
        assert!(result.errors[0].contains("model"));

        let empty_name = with(StageCategory::Generation, StageConfig::enabled("llm").with_param("model", " "));
        assert!(!validate(&empty_name).valid);
    }

    #[test]
    fn test_rerank_and_filter_required_params() {
        let rerank = validate(&with(StageCategory::Rerank, StageConfig::enabled("cross_encoder")));
        assert!(!rerank.valid);

        let filter = validate(&with(StageCategory::Filter, StageConfig::enabled("similarity_threshold")));
        assert!(filter.errors.iter().any(|e| e.contains("'threshold'")));
    }

    #[test]
    fn test_unknown_technique() {
        let result = validate(&with(StageCategory::Rerank, StageConfig::enabled("colbert")));
        assert!(!result.valid);
        assert!(result.errors[0].contains("colbert"));
    }

    #[test]
    fn test_technique_count_rules() {
        let chained = with(
            StageCategory::Rerank,
            StageConfig::enabled("cross_encoder")
                .with_technique("identity")
                .with_param("model", "BAAI/bge-reranker-base"),
        );
        assert!(validate(&chained).valid);

        let two_prompts = with(
            StageCategory::Prompt,
            StageConfig::enabled("simple_listing").with_technique("simple_listing"),
        );
        assert!(!validate(&two_prompts).valid);

        let none = with(StageCategory::Filter, StageConfig { enabled: true, ..StageConfig::default() });
        assert!(validate(&none).errors[0].contains("names no technique"));
    }

    #[test]
    fn test_template_options_are_exclusive() {
        let config = with(
            StageCategory::Prompt,
            StageConfig::enabled("simple_listing")
                .with_param("template", "{context}\n{question}")
                .with_param("template_path", "prompt.txt"),
        );
        let result = validate(&config);
        assert!(!result.valid);
        assert!(result.errors[0].contains("mutually exclusive"));
    }

    #[test]
    fn test_warnings_do_not_invalidate() {
        let config = PipelineConfig::builder()
            .stage(StageCategory::Retrieval, StageConfig::enabled("vectorstore").with_param("k", 150))
            .stage(StageCategory::Rerank, StageConfig::enabled("llm").with_param("model", "llama3.1"))
            .stage(StageCategory::Filter, StageConfig::enabled("threshold").with_param("threshold", 1.5))
            .stage(StageCategory::Prompt, StageConfig::enabled("concatenate"))
            .stage(
                StageCategory::Generation,
                StageConfig::enabled("llm").with_param("model", "llama3.1").with_param("temperature", 3.0),
            )
            .build();
        let result = validate(&config);
        assert!(result.valid, "{:?}", result.errors);
        assert_eq!(result.warnings.len(), 5, "{:?}", result.warnings);
        assert!(result.warnings.iter().any(|w| w.contains("experimental")));
        assert!(result.warnings.iter().any(|w| w.contains("deprecated")));
    }

    #[test]
    fn test_disabled_stage_is_not_checked() {
        // Missing model on a disabled stage only warns that techniques are ignored
        let config = with(StageCategory::Generation, StageConfig::disabled().with_technique("llm"));
        let result = validate(&config);
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("ignored"));
    }

    #[test]
    fn test_bad_k_is_an_error() {
        let config = with(StageCategory::Retrieval, StageConfig::enabled("vectorstore").with_param("k", 0));
        assert!(!validate(&config).valid);
    }

    fn sweep(pipeline: PipelineConfig) -> SweepConfig {
        SweepConfig {
            name: "test".to_string(),
            dataset: DatasetConfig {
                path: "faq.json".into(),
                limit: None,
            },
            pipeline,
            models: vec![ModelTarget::new("bge-small", "faq_bge")],
            evaluation: EvaluationConfig::default(),
            execution: ExecutionConfig::default(),
            services: ServicesConfig::default(),
        }
    }

    #[test]
    fn test_sweep_requires_judge_for_generation() {
        let pipeline = with(
            StageCategory::Generation,
            StageConfig::enabled("llm").with_param("model", "llama3.1"),
        );
        let result = ConfigValidator::validate_sweep(&sweep(pipeline.clone()));
        assert!(!result.valid);
        assert!(result.errors.iter().any(|e| e.contains("judge_model")));

        let mut complete = sweep(pipeline);
        complete.evaluation.judge_model = Some("llama3.1:70b".to_string());
        complete.evaluation.similarity_model = Some("nomic-embed-text".to_string());
        assert!(ConfigValidator::validate_sweep(&complete).valid);
    }

    #[test]
    fn test_sweep_settings() {
        let mut config = sweep(PipelineConfig::retrieval_only());
        assert!(ConfigValidator::validate_sweep(&config).valid);

        config.evaluation.judge_weight = 1.2;
        config.evaluation.k_values = vec![0, 5];
        config.models.push(ModelTarget::new("bge-small", "other"));
        let result = ConfigValidator::validate_sweep(&config);
        assert_eq!(result.errors.len(), 3, "{:?}", result.errors);

        config.models.clear();
        assert!(ConfigValidator::validate_sweep(&config)
            .errors
            .iter()
            .any(|e| e.contains("[[models]]")));
    }
}
