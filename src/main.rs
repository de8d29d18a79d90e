//! RAG Benchmark CLI
//!
//! Sweeps RAG pipeline configurations over a labelled dataset and scores
//! retrieval and generation quality.
//!
//! ## Quick Start
//!
//! ```bash
//! # Write an example sweep
//! ./rag-benchmark init --output sweep.toml
//!
//! # Check it without touching any service
//! ./rag-benchmark validate --config sweep.toml
//!
//! # Run it (Ollama and Qdrant must be reachable)
//! ./rag-benchmark run --config sweep.toml --timeout 1800
//! ```
//!
//! ## Sweep Configuration
//!
//! One base `[pipeline]` is shared by every `[[models]]` entry; each entry
//! supplies the embedding model and collection for the retrieval stage.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rag_benchmark::benchmark::{BenchmarkOrchestrator, BenchmarkReport};
use rag_benchmark::clients::{EmbeddingSimilarity, OllamaClient, QdrantProvider};
use rag_benchmark::config::{
    DatasetConfig, EvaluationConfig, ExecutionConfig, ModelTarget, PipelineConfig, ServicesConfig,
    StageCategory, StageConfig, SweepConfig,
};
use rag_benchmark::dataset::FileDatasetService;
use rag_benchmark::pipeline::cross_encoder::FastEmbedReranker;
use rag_benchmark::pipeline::{ConfigValidator, RerankerModels, StageRegistry};

/// Embedding model used for answer similarity when the sweep names none
const DEFAULT_SIMILARITY_MODEL: &str = "nomic-embed-text";

#[derive(Parser)]
#[command(name = "rag-benchmark")]
#[command(about = "Benchmark RAG pipeline configurations on a labelled dataset")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sweep
    ///
    /// Every model target is run over every dataset row, then scored.
    /// Results are saved to a JSON file.
    Run {
        /// Sweep config (TOML)
        #[arg(short, long, default_value = "sweep.toml")]
        config: PathBuf,

        /// Output file for results (JSON)
        #[arg(short, long, default_value = "results/benchmark_results.json")]
        output: PathBuf,

        /// Overall deadline in seconds (overrides execution.timeout_secs)
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Only use the first N dataset rows
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Validate a sweep config without contacting any service
    Validate {
        #[arg(short, long, default_value = "sweep.toml")]
        config: PathBuf,
    },

    /// List registered stage techniques and reranker models
    List,

    /// Write an example sweep config
    Init {
        #[arg(short, long, default_value = "sweep.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            output,
            timeout,
            limit,
        } => {
            run_sweep(&config, &output, timeout, limit).await?;
        }

        Commands::Validate { config } => {
            validate_sweep(&config)?;
        }

        Commands::List => {
            list_techniques();
        }

        Commands::Init { output } => {
            write_example(&output)?;
        }
    }

    Ok(())
}

/// Run the sweep and save the report
async fn run_sweep(config_path: &Path, output: &Path, timeout: Option<u64>, limit: Option<usize>) -> Result<()> {
    let mut sweep = SweepConfig::load(config_path)?;
    if limit.is_some() {
        sweep.dataset.limit = limit;
    }

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                      RAG BENCHMARK                           ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");
    println!("Sweep: {}", sweep.name);
    println!("Dataset: {:?}", sweep.dataset.path);
    println!("Models: {}", sweep.models.len());
    let stages: Vec<&str> = sweep.pipeline.enabled_stages().map(|c| c.name()).collect();
    println!("Stages: {}\n", stages.join(" → "));

    let orchestrator = build_orchestrator(&sweep.services, &sweep.evaluation)?;
    let timeout = timeout.or(sweep.execution.timeout_secs).map(Duration::from_secs);

    let run = orchestrator
        .run_with_timeout(&sweep, timeout)
        .await
        .context("Sweep aborted")?;

    let report = BenchmarkReport::new(sweep.name.clone(), run);
    report.print_summary();
    report.save(output)?;

    println!("\nResults saved to {:?}", output);
    Ok(())
}

/// Wire the HTTP collaborators named in `[services]`
fn build_orchestrator(services: &ServicesConfig, evaluation: &EvaluationConfig) -> Result<BenchmarkOrchestrator> {
    let request_timeout = Duration::from_secs(services.request_timeout_secs);
    let ollama = Arc::new(OllamaClient::new(services.llm_url.as_str(), request_timeout)?);

    let api_key = match &services.vectorstore_api_key_env {
        Some(var) => Some(
            std::env::var(var).with_context(|| format!("Vectorstore API key variable {} is not set", var))?,
        ),
        None => None,
    };
    let vectorstores = Arc::new(QdrantProvider::new(
        services.vectorstore_url.as_str(),
        api_key,
        ollama.clone(),
        request_timeout,
    )?);

    let similarity_model = evaluation
        .similarity_model
        .as_deref()
        .unwrap_or(DEFAULT_SIMILARITY_MODEL);
    let similarity = Arc::new(EmbeddingSimilarity::new(ollama.clone(), similarity_model));

    Ok(BenchmarkOrchestrator::new(
        Arc::new(FileDatasetService),
        vectorstores,
        ollama,
        similarity,
        Arc::new(RerankerModels::fastembed()),
    ))
}

/// Validate a sweep config
fn validate_sweep(path: &Path) -> Result<()> {
    println!("Validating {:?}...", path);

    let sweep = SweepConfig::load(path)?;
    let validation = ConfigValidator::validate_sweep(&sweep);

    for warning in &validation.warnings {
        println!("  ⚠ {}", warning);
    }
    if !validation.valid {
        for error in &validation.errors {
            println!("  ✗ {}", error);
        }
        bail!("{} error(s) in {:?}", validation.errors.len(), path);
    }

    println!("✓ Valid sweep config");
    println!("  Name: {}", sweep.name);
    println!("  Dataset: {:?}", sweep.dataset.path);
    for configuration in sweep.resolve_configurations()? {
        println!(
            "  {:30} {:20} {}",
            configuration.target.name,
            configuration.target.collection,
            &configuration.fingerprint[..12.min(configuration.fingerprint.len())]
        );
    }

    Ok(())
}

fn list_techniques() {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                  AVAILABLE STAGE TECHNIQUES                  ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    for category in StageCategory::ALL {
        println!("{}:", category.name().to_uppercase());
        println!("─────────────────────────────────────────────────────────────────");
        for technique in StageRegistry::techniques(category) {
            println!(
                "  {:22} {:13} {}",
                technique.name(),
                technique.stability().name(),
                technique.description()
            );
        }
        println!();
    }

    println!("CROSS-ENCODER MODELS (fastembed / CPU):");
    println!("─────────────────────────────────────────────────────────────────");
    for model in FastEmbedReranker::all() {
        println!("  {}", model.model_id());
    }

    println!("\nCONFIGURATION:");
    println!("─────────────────────────────────────────────────────────────────");
    println!("  Stages are configured under [pipeline]. Example:");
    println!();
    println!("  [pipeline.rerank]");
    println!("  enabled = true");
    println!("  techniques = [\"cross_encoder\"]");
    println!("  params = {{ cross_encoder_model = \"BAAI/bge-reranker-base\", top_n = 3 }}");
}

/// Write an example sweep config
fn write_example(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("{:?} already exists", path);
    }

    let pipeline = PipelineConfig::retrieval_only()
        .derive()
        .param(StageCategory::Retrieval, "k", 10)
        .stage(
            StageCategory::Rerank,
            StageConfig::enabled("cross_encoder")
                .with_param("cross_encoder_model", FastEmbedReranker::BgeRerankerBase.model_id())
                .with_param("top_n", 5),
        )
        .stage(StageCategory::Prompt, StageConfig::enabled("simple_listing"))
        .stage(
            StageCategory::Generation,
            StageConfig::enabled("llm").with_param("model", "llama3.2"),
        )
        .build();

    let sweep = SweepConfig {
        name: "example-sweep".to_string(),
        dataset: DatasetConfig {
            path: PathBuf::from("dataset.json"),
            limit: None,
        },
        pipeline,
        models: vec![
            ModelTarget::new("nomic-embed-text", "docs_nomic"),
            ModelTarget::new("mxbai-embed-large", "docs_mxbai"),
        ],
        evaluation: EvaluationConfig {
            judge_model: Some("llama3.2".to_string()),
            similarity_model: Some(DEFAULT_SIMILARITY_MODEL.to_string()),
            ..EvaluationConfig::default()
        },
        execution: ExecutionConfig::default(),
        services: ServicesConfig::default(),
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    sweep.save(path)?;
    println!("Example sweep written to {:?}", path);
    Ok(())
}
