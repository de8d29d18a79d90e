//! Sweep report: per-configuration summaries, named failures, JSON output

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::evaluation::EvaluationResult;
use super::orchestrator::{is_transient, BenchmarkRun, ConfigurationFailure, PhaseTimings};
use super::record::{FailureKind, TaskType};
use crate::dataset::DatasetMetadata;
use crate::metrics::{mean, std_dev};

/// Aggregate over one configuration's results
///
/// `total` always counts every row, failed ones included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigurationSummary {
    pub model_name: String,
    pub configuration_id: String,
    pub task_type: TaskType,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures_by_kind: BTreeMap<FailureKind, usize>,
    /// Failures that may clear on a rerun (timeouts, service errors)
    pub transient_failures: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_overall_score: Option<f64>,
    /// Mean of every metric over the rows that report it
    pub mean_metrics: BTreeMap<String, f64>,
}

impl ConfigurationSummary {
    fn aggregate(results: &[&EvaluationResult]) -> Option<Self> {
        let first = results.first()?;
        let scores: Vec<f64> = results.iter().filter_map(|r| r.score).collect();
        let overall: Vec<f64> = results.iter().filter_map(|r| r.overall_score).collect();

        let mut failures_by_kind = BTreeMap::new();
        for error in results.iter().filter_map(|r| r.error.as_ref()) {
            *failures_by_kind.entry(error.kind).or_insert(0) += 1;
        }
        let failed: usize = failures_by_kind.values().sum();
        let transient_failures: usize = failures_by_kind
            .iter()
            .filter(|(kind, _)| is_transient(**kind))
            .map(|(_, count)| count)
            .sum();

        let mut metric_values: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        for result in results.iter().filter(|r| !r.is_error()) {
            for (name, value) in &result.metrics {
                metric_values.entry(name.as_str()).or_default().push(*value);
            }
        }
        let mean_metrics = metric_values
            .into_iter()
            .map(|(name, values)| (name.to_string(), mean(&values)))
            .collect();

        Some(Self {
            model_name: first.model_name.clone(),
            configuration_id: first.configuration_id.clone(),
            task_type: first.task_type,
            total: results.len(),
            succeeded: results.len() - failed,
            failed,
            failures_by_kind,
            transient_failures,
            mean_score: (!scores.is_empty()).then(|| mean(&scores)),
            std_score: (!scores.is_empty()).then(|| std_dev(&scores)),
            mean_overall_score: (!overall.is_empty()).then(|| mean(&overall)),
            mean_metrics,
        })
    }
}

/// Group results by configuration, in first-seen order
pub fn summarize(results: &[EvaluationResult]) -> Vec<ConfigurationSummary> {
    let mut order: Vec<(&str, &str)> = Vec::new();
    let mut groups: BTreeMap<(&str, &str), Vec<&EvaluationResult>> = BTreeMap::new();
    for result in results {
        let key = (result.model_name.as_str(), result.configuration_id.as_str());
        let group = groups.entry(key).or_default();
        if group.is_empty() {
            order.push(key);
        }
        group.push(result);
    }
    order
        .iter()
        .filter_map(|key| groups.get(key).and_then(|group| ConfigurationSummary::aggregate(group)))
        .collect()
}

/// One failed row, named
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedFailure {
    pub model_name: String,
    pub row_index: usize,
    pub user_prompt: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Complete sweep report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub name: String,
    pub timestamp: String,
    pub dataset: DatasetMetadata,
    pub row_count: usize,
    pub phase_timings: PhaseTimings,
    pub summaries: Vec<ConfigurationSummary>,
    pub failed_configurations: Vec<ConfigurationFailure>,
    pub failures: Vec<NamedFailure>,
    pub results: Vec<EvaluationResult>,
}

impl BenchmarkReport {
    pub fn new(name: impl Into<String>, run: BenchmarkRun) -> Self {
        let failures = run
            .results
            .iter()
            .filter_map(|r| {
                r.error.as_ref().map(|error| NamedFailure {
                    model_name: r.model_name.clone(),
                    row_index: r.row_index,
                    user_prompt: r.user_prompt.clone(),
                    kind: error.kind,
                    reason: error.message.clone(),
                })
            })
            .collect();

        Self {
            name: name.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            dataset: run.dataset,
            row_count: run.row_count,
            phase_timings: run.phase_timings,
            summaries: summarize(&run.results),
            failed_configurations: run.failed_configurations,
            failures,
            results: run.results,
        }
    }

    /// Write the report as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write report: {:?}", path))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read report: {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse report: {:?}", path))
    }

    /// Print summary tables to stdout
    pub fn print_summary(&self) {
        println!("\n╔══════════════════════════════════════════════════════════════════════════╗");
        println!("║                         RAG BENCHMARK SUMMARY                            ║");
        println!("╚══════════════════════════════════════════════════════════════════════════╝\n");

        println!(
            "Dataset '{}': {} rows, {} configurations",
            self.dataset.name,
            self.row_count,
            self.summaries.len()
        );

        println!("\n┌─ SCORES ─────────────────────────────────────────────────────────────────┐");
        println!(
            "{:30} {:>10} {:>8} {:>8} {:>10} {:>10}",
            "Model", "Task", "OK", "Failed", "Score", "Overall"
        );
        println!("{}", "─".repeat(81));
        for summary in &self.summaries {
            println!(
                "{:30} {:>10} {:>8} {:>8} {:>10} {:>10}",
                truncate(&summary.model_name, 30),
                summary.task_type.name(),
                summary.succeeded,
                summary.failed,
                format_score(summary.mean_score),
                format_score(summary.mean_overall_score),
            );
        }

        let retrieval: Vec<&ConfigurationSummary> = self
            .summaries
            .iter()
            .filter(|s| s.mean_metrics.contains_key("map"))
            .collect();
        if !retrieval.is_empty() {
            println!("\n┌─ RETRIEVAL ──────────────────────────────────────────────────────────────┐");
            println!(
                "{:30} {:>10} {:>10} {:>10} {:>10}",
                "Model", "R@5", "P@1", "nDCG@10", "MAP"
            );
            println!("{}", "─".repeat(74));
            for summary in retrieval {
                let metric = |name: &str| format_score(summary.mean_metrics.get(name).copied());
                println!(
                    "{:30} {:>10} {:>10} {:>10} {:>10}",
                    truncate(&summary.model_name, 30),
                    metric("recall@5"),
                    metric("precision@1"),
                    metric("ndcg@10"),
                    metric("map"),
                );
            }
        }

        let generation: Vec<&ConfigurationSummary> = self
            .summaries
            .iter()
            .filter(|s| s.mean_metrics.contains_key("llm_score"))
            .collect();
        if !generation.is_empty() {
            println!("\n┌─ GENERATION ─────────────────────────────────────────────────────────────┐");
            println!("{:30} {:>10} {:>10} {:>10}", "Model", "Judge", "Semantic", "Score");
            println!("{}", "─".repeat(63));
            for summary in generation {
                let metric = |name: &str| format_score(summary.mean_metrics.get(name).copied());
                println!(
                    "{:30} {:>10} {:>10} {:>10}",
                    truncate(&summary.model_name, 30),
                    metric("llm_score"),
                    metric("semantic_score"),
                    metric("score"),
                );
            }
        }

        if !self.failed_configurations.is_empty() {
            println!("\n  ⚠ {} configuration(s) failed to start:", self.failed_configurations.len());
            for failure in &self.failed_configurations {
                println!("    - {}: {}", failure.model_name, failure.reason);
            }
        }
        if !self.failures.is_empty() {
            println!("\n  ⚠ {} row(s) failed:", self.failures.len());
            let mut by_kind: BTreeMap<FailureKind, usize> = BTreeMap::new();
            for failure in &self.failures {
                *by_kind.entry(failure.kind).or_insert(0) += 1;
            }
            for (kind, count) in by_kind {
                println!("    - {}: {}", kind.name(), count);
            }
        }

        println!(
            "\nPhases: preparation {:.1}s, prediction {:.1}s, evaluation {:.1}s (total {:.1}s)",
            self.phase_timings.preparation_secs,
            self.phase_timings.prediction_secs,
            self.phase_timings.evaluation_secs,
            self.phase_timings.total_secs,
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

fn format_score(score: Option<f64>) -> String {
    score.map_or_else(|| "-".to_string(), |s| format!("{:.3}", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::record::RecordError;

    fn result(model: &str, row: usize, score: Option<f64>, error: Option<FailureKind>) -> EvaluationResult {
        let mut metrics = BTreeMap::new();
        if let Some(score) = score {
            metrics.insert("recall@5".to_string(), score);
            metrics.insert("map".to_string(), score / 2.0);
        }
        EvaluationResult {
            model_name: model.to_string(),
            configuration_id: format!("cfg-{model}"),
            task_type: TaskType::Retrieval,
            row_index: row,
            user_prompt: format!("q{row}"),
            score,
            overall_score: score,
            metrics,
            error: error.map(|kind| RecordError::new(kind, "boom")),
        }
    }

    fn results() -> Vec<EvaluationResult> {
        vec![
            result("b-model", 0, Some(1.0), None),
            result("a-model", 0, Some(0.5), None),
            result("b-model", 1, Some(0.0), None),
            result("b-model", 2, None, Some(FailureKind::Timeout)),
            result("a-model", 1, None, Some(FailureKind::MetricsParse)),
        ]
    }

    #[test]
    fn test_summaries_keep_failed_rows_in_counts() {
        let summaries = summarize(&results());
        assert_eq!(summaries.len(), 2);

        let b = &summaries[0];
        assert_eq!(b.model_name, "b-model");
        assert_eq!((b.total, b.succeeded, b.failed), (3, 2, 1));
        assert_eq!(b.failures_by_kind[&FailureKind::Timeout], 1);
        assert_eq!(b.transient_failures, 1);
        assert!((b.mean_score.unwrap() - 0.5).abs() < 1e-9);
        assert!((b.mean_metrics["map"] - 0.25).abs() < 1e-9);

        let a = &summaries[1];
        assert_eq!((a.total, a.succeeded, a.failed), (2, 1, 1));
        assert_eq!(a.transient_failures, 0);
    }

    #[test]
    fn test_all_failed_configuration_has_no_score() {
        let summaries = summarize(&[result("x", 0, None, Some(FailureKind::ExternalService))]);
        assert_eq!(summaries[0].mean_score, None);
        assert!(summaries[0].mean_metrics.is_empty());
    }

    #[test]
    fn test_report_names_failures_and_round_trips() {
        let run = BenchmarkRun {
            phase_timings: PhaseTimings::default(),
            dataset: DatasetMetadata {
                name: "faq".to_string(),
                ..DatasetMetadata::default()
            },
            row_count: 3,
            configuration_count: 2,
            results: results(),
            failed_configurations: vec![],
        };
        let report = BenchmarkReport::new("sweep", run);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].model_name, "b-model");
        assert_eq!(report.failures[0].kind, FailureKind::Timeout);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/report.json");
        report.save(&path).unwrap();
        let loaded = BenchmarkReport::load(&path).unwrap();
        assert_eq!(loaded.summaries, report.summaries);
        assert_eq!(loaded.results.len(), 5);
    }
}
