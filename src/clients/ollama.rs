//! Ollama-compatible HTTP client
//!
//! Uses `POST /api/generate` (non-streaming) for completions and
//! `POST /api/embed` for embeddings.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Embedder, GenerationOptions, LlmClient, LlmResponse};
use crate::error::ExternalServiceError;

const SERVICE: &str = "ollama";

/// HTTP client for an Ollama server
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    /// Generated token count
    #[serde(default)]
    eval_count: Option<u64>,
    /// Generation time in nanoseconds
    #[serde(default)]
    eval_duration: Option<u64>,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Decode throughput from Ollama's eval counters
fn tokens_per_second(eval_count: Option<u64>, eval_duration_ns: Option<u64>) -> f64 {
    match (eval_count, eval_duration_ns) {
        (Some(count), Some(ns)) if ns > 0 => count as f64 / (ns as f64 / 1e9),
        _ => 0.0,
    }
}

pub(crate) fn map_reqwest_error(service: &str, err: reqwest::Error) -> ExternalServiceError {
    if err.is_timeout() {
        ExternalServiceError::Timeout {
            service: service.to_string(),
        }
    } else {
        ExternalServiceError::request(service, err)
    }
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ExternalServiceError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExternalServiceError::request(SERVICE, e))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ExternalServiceError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| map_reqwest_error(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExternalServiceError::Status {
                service: SERVICE.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| ExternalServiceError::payload(SERVICE, e))
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn respond(&self, model: &str, prompt: &str) -> Result<LlmResponse, ExternalServiceError> {
        self.respond_with_options(model, prompt, &GenerationOptions::default())
            .await
    }

    async fn respond_with_options(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<LlmResponse, ExternalServiceError> {
        let options = (options.temperature.is_some() || options.max_tokens.is_some()).then(|| {
            GenerateOptions {
                temperature: options.temperature,
                num_predict: options.max_tokens,
            }
        });
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
            options,
        };

        let reply: GenerateResponse = self.post("/api/generate", &request).await?;
        tracing::debug!(model, eval_count = ?reply.eval_count, "ollama generate complete");

        Ok(LlmResponse {
            tokens_per_second: tokens_per_second(reply.eval_count, reply.eval_duration),
            response: reply.response,
        })
    }
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, model: &str, texts: &[String]) -> Result<Vec<Vec<f32>>, ExternalServiceError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let reply: EmbedResponse = self
            .post("/api/embed", &EmbedRequest { model, input: texts })
            .await?;
        if reply.embeddings.len() != texts.len() {
            return Err(ExternalServiceError::payload(
                SERVICE,
                format!(
                    "requested {} embeddings, received {}",
                    texts.len(),
                    reply.embeddings.len()
                ),
            ));
        }
        Ok(reply.embeddings)
    }
}
