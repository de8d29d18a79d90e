//! Benchmark orchestration
//!
//! A sweep runs in three phases:
//!
//! 1. preparation - validate the sweep, load the dataset, resolve one pipeline per model
//! 2. prediction - run every configuration over every row (configurations concurrently)
//! 3. evaluation - score each prediction record
//!
//! ## Usage
//!
//! ```bash
//! rag-benchmark run --config sweep.toml --output results/benchmark_results.json
//! ```
//!
//! ## Modules
//!
//! - `record` - prediction records and failure kinds
//! - `evaluation` - record scoring (retrieval, generation, rag)
//! - `orchestrator` - the three-phase sweep runner
//! - `report` - per-configuration summaries and JSON output

pub mod evaluation;
pub mod orchestrator;
pub mod record;
pub mod report;

pub use evaluation::{EvaluationResult, Evaluator};
pub use orchestrator::{is_transient, BenchmarkOrchestrator, BenchmarkRun, ConfigurationFailure, PhaseTimings};
pub use record::{FailureKind, Prediction, PredictionRecord, RecordError, TaskType};
pub use report::{summarize, BenchmarkReport, ConfigurationSummary, NamedFailure};
