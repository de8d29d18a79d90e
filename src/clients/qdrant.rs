//! Qdrant REST vectorstore
//!
//! Queries are embedded with the target's embedding model, then searched with
//! `POST /collections/{name}/points/search`. Documents are read from the point
//! payload:
//! - content: `page_content`, `content` or `text`
//! - id: `doc_id` (direct) or `metadata.doc_id` / `metadata.id` (nested)

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use super::ollama::map_reqwest_error;
use super::{CollectionInfo, Embedder, Vectorstore, VectorstoreProvider};
use crate::config::ModelTarget;
use crate::document::RetrievedDocument;
use crate::error::ExternalServiceError;
use crate::metrics::normalize_doc_id;

const SERVICE: &str = "qdrant";
const CONTENT_KEYS: [&str; 3] = ["page_content", "content", "text"];

/// Connection settings shared by every collection handle
#[derive(Clone)]
struct Connection {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl Connection {
    /// `{base_url}/collections/{collection}/{tail..}` with each segment percent-encoded
    fn collection_url(&self, collection: &str, tail: &[&str]) -> Result<Url, ExternalServiceError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| ExternalServiceError::request(SERVICE, e))?;
        url.path_segments_mut()
            .map_err(|_| ExternalServiceError::request(SERVICE, format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .push("collections")
            .push(collection)
            .extend(tail);
        Ok(url)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ExternalServiceError> {
        let request = match &self.api_key {
            Some(key) => request.header("api-key", key),
            None => request,
        };
        let response = request
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
            .json::<Value>()
            .await
            .map_err(|e| ExternalServiceError::payload(SERVICE, e))
    }
}

/// One Qdrant collection searched with one embedding model
pub struct QdrantVectorstore {
    connection: Connection,
    collection: String,
    embedder: Arc<dyn Embedder>,
    embedding_model: String,
}

/// Convert a Qdrant search response into ranked documents
pub fn parse_search_response(body: &Value) -> Result<Vec<RetrievedDocument>, ExternalServiceError> {
    let points = body
        .get("result")
        .and_then(Value::as_array)
        .ok_or_else(|| ExternalServiceError::payload(SERVICE, "search response has no result array"))?;

    Ok(points
        .iter()
        .map(|point| {
            let payload = point.get("payload").cloned().unwrap_or(Value::Null);
            let content = CONTENT_KEYS
                .iter()
                .find_map(|key| payload.get(key).and_then(Value::as_str))
                .unwrap_or_default()
                .to_string();
            let score = point.get("score").and_then(Value::as_f64).unwrap_or(0.0) as f32;

            RetrievedDocument {
                doc_id: payload.get("doc_id").and_then(normalize_doc_id),
                content,
                similarity_score: score,
                metadata: payload.get("metadata").cloned().unwrap_or(Value::Null),
            }
        })
        .collect())
}

/// Read collection statistics from `GET /collections/{name}`
pub fn parse_collection_info(body: &Value) -> Result<CollectionInfo, ExternalServiceError> {
    let result = body
        .get("result")
        .ok_or_else(|| ExternalServiceError::payload(SERVICE, "collection response has no result"))?;
    Ok(CollectionInfo {
        points_count: result.get("points_count").and_then(Value::as_u64).unwrap_or(0),
        status: result.get("status").and_then(Value::as_str).map(str::to_string),
    })
}

#[async_trait]
impl Vectorstore for QdrantVectorstore {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>, ExternalServiceError> {
        let vectors = self
            .embedder
            .embed(&self.embedding_model, &[query.to_string()])
            .await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| ExternalServiceError::payload("embedding", "no query vector returned"))?;

        let url = self
            .connection
            .collection_url(&self.collection, &["points", "search"])?;
        let body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": true,
        });
        let response = self
            .connection
            .send(self.connection.http.post(url).json(&body))
            .await?;
        parse_search_response(&response)
    }

    async fn collection_info(&self) -> Result<CollectionInfo, ExternalServiceError> {
        let url = self.connection.collection_url(&self.collection, &[])?;
        let response = self.connection.send(self.connection.http.get(url)).await?;
        parse_collection_info(&response)
    }
}

/// Opens a [`QdrantVectorstore`] per model target
pub struct QdrantProvider {
    connection: Connection,
    embedder: Arc<dyn Embedder>,
}

impl QdrantProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        embedder: Arc<dyn Embedder>,
        timeout: Duration,
    ) -> Result<Self, ExternalServiceError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExternalServiceError::request(SERVICE, e))?;
        Ok(Self {
            connection: Connection {
                http,
                base_url: base_url.into().trim_end_matches('/').to_string(),
                api_key,
            },
            embedder,
        })
    }
}

#[async_trait]
impl VectorstoreProvider for QdrantProvider {
    /// Open the target's collection; fails if the collection cannot be read
    async fn open(&self, target: &ModelTarget) -> Result<Arc<dyn Vectorstore>, ExternalServiceError> {
        let store = QdrantVectorstore {
            connection: self.connection.clone(),
            collection: target.collection.clone(),
            embedder: Arc::clone(&self.embedder),
            embedding_model: target.embedding_model().to_string(),
        };

        let info = store.collection_info().await?;
        if info.points_count == 0 {
            tracing::warn!(collection = %target.collection, "collection is empty");
        } else {
            tracing::info!(
                collection = %target.collection,
                points = info.points_count,
                "vectorstore ready"
            );
        }
        Ok(Arc::new(store))
    }
}
