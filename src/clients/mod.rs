//! External collaborator interfaces
//!
//! The benchmark engine talks to the outside world only through these traits:
//! - [`LlmClient`] - generation, judge scoring, LLM reranking
//! - [`Embedder`] - text embeddings (query vectors, similarity scoring)
//! - [`Vectorstore`] / [`VectorstoreProvider`] - similarity search per collection
//! - [`SimilarityService`] - answer vs. ground-truth similarity
//!
//! Default HTTP adapters:
//! - `ollama` - Ollama-compatible `/api/generate` and `/api/embed`
//! - `qdrant` - Qdrant REST collections and point search

pub mod ollama;
pub mod qdrant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ModelTarget;
use crate::document::RetrievedDocument;
use crate::error::ExternalServiceError;
use crate::metrics::cosine_similarity;

pub use ollama::OllamaClient;
pub use qdrant::{QdrantProvider, QdrantVectorstore};

/// Reply from an LLM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Generated text
    pub response: String,
    /// Decode throughput reported by the server (0.0 when unknown)
    pub tokens_per_second: f64,
}

/// Sampling options for a generation request
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

/// Chat/completion client
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a prompt to a model and return its reply
    async fn respond(&self, model: &str, prompt: &str) -> Result<LlmResponse, ExternalServiceError>;

    /// Same as [`respond`](Self::respond) with sampling options
    ///
    /// Clients without sampling controls ignore the options.
    async fn respond_with_options(
        &self,
        model: &str,
        prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<LlmResponse, ExternalServiceError> {
        self.respond(model, prompt).await
    }
}

/// Text embedding client
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, ExternalServiceError>;
}

/// Collection statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub points_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Similarity search over one collection
#[async_trait]
pub trait Vectorstore: Send + Sync {
    /// Top-k documents for a query, best first
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>, ExternalServiceError>;

    async fn collection_info(&self) -> Result<CollectionInfo, ExternalServiceError>;
}

/// Hands out a vectorstore handle per model target
#[async_trait]
pub trait VectorstoreProvider: Send + Sync {
    async fn open(&self, target: &ModelTarget) -> Result<Arc<dyn Vectorstore>, ExternalServiceError>;
}

/// Semantic similarity between two texts, in [0, 1]
#[async_trait]
pub trait SimilarityService: Send + Sync {
    async fn similarity(&self, text_a: &str, text_b: &str) -> Result<f64, ExternalServiceError>;
}

/// Similarity as the cosine of two embeddings
///
/// The raw cosine is returned; callers range-check it. Empty, zero-norm or
/// mismatched vectors are payload errors.
pub struct EmbeddingSimilarity {
    embedder: Arc<dyn Embedder>,
    model: String,
}

impl EmbeddingSimilarity {
    pub fn new(embedder: Arc<dyn Embedder>, model: impl Into<String>) -> Self {
        Self {
            embedder,
            model: model.into(),
        }
    }
}

#[async_trait]
impl SimilarityService for EmbeddingSimilarity {
    async fn similarity(&self, text_a: &str, text_b: &str) -> Result<f64, ExternalServiceError> {
        let vectors = self
            .embedder
            .embed(&self.model, &[text_a.to_string(), text_b.to_string()])
            .await?;
        match vectors.as_slice() {
            [a, b] if a.len() != b.len() => Err(ExternalServiceError::payload(
                "embedding",
                format!("dimension mismatch: {} vs {}", a.len(), b.len()),
            )),
            [a, b] if is_zero(a) || is_zero(b) => Err(ExternalServiceError::payload(
                "embedding",
                "zero-norm embedding has no direction",
            )),
            [a, b] => Ok(cosine_similarity(a, b) as f64),
            other => Err(ExternalServiceError::payload(
                "embedding",
                format!("expected 2 vectors, got {}", other.len()),
            )),
        }
    }
}

fn is_zero(vector: &[f32]) -> bool {
    vector.iter().all(|x| *x == 0.0)
}

/// Helper to measure duration of an async operation
pub async fn measure_async<F, T>(f: F) -> (T, Duration)
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let result = f.await;
    let duration = start.elapsed();
    (result, duration)
}

/// Helper to measure duration of a sync operation
pub fn measure_sync<F, T>(f: F) -> (T, Duration)
where
    F: FnOnce() -> T,
{
    let start = Instant::now();
    let result = f();
    let duration = start.elapsed();
    (result, duration)
}
