//! Cross-encoder reranking models
//!
//! Wraps fastembed's ONNX `TextRerank` models. Loading is expensive, so models are
//! held in a [`ModelCache`] owned by [`RerankerModels`] and shared by every stage
//! instance that asks for the same model name.

use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::sync::{Arc, Mutex};

use crate::clients::measure_sync;
use crate::error::ConfigurationError;
use crate::model_cache::ModelCache;

/// Scores (query, document) pairs; higher is more relevant
///
/// Implementations are synchronous and may be CPU heavy; callers run them on
/// the blocking pool.
pub trait CrossEncoder: Send + Sync {
    /// One score per document, in input order
    fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, String>;
}

/// Supported fastembed reranker models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastEmbedReranker {
    /// BAAI/bge-reranker-base
    BgeRerankerBase,
    /// BAAI/bge-reranker-v2-m3 (multilingual)
    BgeRerankerV2M3,
    /// jinaai/jina-reranker-v1-turbo-en
    JinaRerankerV1TurboEn,
}

impl FastEmbedReranker {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "baai/bge-reranker-base" | "bge-reranker-base" => Some(Self::BgeRerankerBase),
            "rozgo/bge-reranker-v2-m3" | "baai/bge-reranker-v2-m3" | "bge-reranker-v2-m3" => {
                Some(Self::BgeRerankerV2M3)
            }
            "jinaai/jina-reranker-v1-turbo-en" | "jina-reranker-v1-turbo-en" => {
                Some(Self::JinaRerankerV1TurboEn)
            }
            _ => None,
        }
    }

    fn to_fastembed_model(self) -> RerankerModel {
        match self {
            Self::BgeRerankerBase => RerankerModel::BGERerankerBase,
            Self::BgeRerankerV2M3 => RerankerModel::BGERerankerV2M3,
            Self::JinaRerankerV1TurboEn => RerankerModel::JINARerankerV1TurboEn,
        }
    }

    pub fn model_id(&self) -> &'static str {
        match self {
            Self::BgeRerankerBase => "BAAI/bge-reranker-base",
            Self::BgeRerankerV2M3 => "BAAI/bge-reranker-v2-m3",
            Self::JinaRerankerV1TurboEn => "jinaai/jina-reranker-v1-turbo-en",
        }
    }

    pub fn all() -> Vec<Self> {
        vec![
            Self::BgeRerankerBase,
            Self::BgeRerankerV2M3,
            Self::JinaRerankerV1TurboEn,
        ]
    }
}

/// fastembed cross-encoder
pub struct FastEmbedCrossEncoder {
    model: Mutex<TextRerank>,
}

impl FastEmbedCrossEncoder {
    /// Download (if needed) and initialize a reranker; blocking
    pub fn new(model_type: FastEmbedReranker) -> Result<Self, String> {
        tracing::info!("Initializing cross-encoder: {}", model_type.model_id());

        let (model, load_duration) = measure_sync(|| {
            let init_options = RerankInitOptions::new(model_type.to_fastembed_model())
                .with_show_download_progress(true);
            TextRerank::try_new(init_options)
        });
        let model = model.map_err(|e| e.to_string())?;

        tracing::info!(
            "Cross-encoder {} loaded in {:?}",
            model_type.model_id(),
            load_duration
        );
        Ok(Self {
            model: Mutex::new(model),
        })
    }
}

impl CrossEncoder for FastEmbedCrossEncoder {
    fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>, String> {
        if documents.is_empty() {
            return Ok(vec![]);
        }
        let mut guard = self
            .model
            .lock()
            .map_err(|_| "cross-encoder lock poisoned".to_string())?;
        let refs: Vec<&str> = documents.iter().map(String::as_str).collect();
        let results = guard
            .rerank(query, refs, false, None)
            .map_err(|e| e.to_string())?;

        // fastembed returns results sorted by score; put them back in input order
        let mut scores = vec![f32::NEG_INFINITY; documents.len()];
        for result in results {
            if let Some(slot) = scores.get_mut(result.index) {
                *slot = result.score;
            }
        }
        Ok(scores)
    }
}

/// Loads cross-encoders by model name
#[async_trait]
pub trait CrossEncoderLoader: Send + Sync {
    async fn load(&self, model: &str) -> Result<Arc<dyn CrossEncoder>, String>;
}

/// Loads fastembed rerankers on the blocking pool
pub struct FastEmbedLoader;

#[async_trait]
impl CrossEncoderLoader for FastEmbedLoader {
    async fn load(&self, model: &str) -> Result<Arc<dyn CrossEncoder>, String> {
        let model_type = FastEmbedReranker::from_name(model).ok_or_else(|| {
            let known: Vec<&str> = FastEmbedReranker::all().iter().map(|m| m.model_id()).collect();
            format!("unsupported cross-encoder model (known: {})", known.join(", "))
        })?;
        let encoder = tokio::task::spawn_blocking(move || FastEmbedCrossEncoder::new(model_type))
            .await
            .map_err(|e| e.to_string())??;
        Ok(Arc::new(encoder))
    }
}

/// Shared cross-encoder registry: one loaded instance per model name
pub struct RerankerModels {
    cache: ModelCache<dyn CrossEncoder>,
    loader: Arc<dyn CrossEncoderLoader>,
}

impl RerankerModels {
    pub fn new(loader: Arc<dyn CrossEncoderLoader>) -> Self {
        Self {
            cache: ModelCache::new(),
            loader,
        }
    }

    pub fn fastembed() -> Self {
        Self::new(Arc::new(FastEmbedLoader))
    }

    /// Get a model, loading it once for all concurrent callers
    pub async fn get(&self, model: &str) -> Result<Arc<dyn CrossEncoder>, ConfigurationError> {
        self.cache
            .get_or_load(model, || self.loader.load(model))
            .await
            .map_err(|reason| ConfigurationError::Load {
                what: format!("cross-encoder model '{}'", model),
                reason,
            })
    }

    pub fn loaded(&self) -> Vec<String> {
        self.cache.loaded_keys()
    }
}
