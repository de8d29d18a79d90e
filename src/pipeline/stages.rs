//! Stage interfaces and the built-in techniques
//!
//! Each category has one trait. Retrieval, reranking and generation may call out
//! to external services and are async; filtering and prompt construction are pure.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::cross_encoder::CrossEncoder;
use crate::clients::{GenerationOptions, LlmClient, Vectorstore};
use crate::config::StageCategory;
use crate::document::RetrievedDocument;
use crate::error::StageExecutionError;
use crate::metrics::parse_judge_score;

/// Produces candidate documents for a query
#[async_trait]
pub trait Retriever: Send + Sync {
    fn technique(&self) -> &'static str;

    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>, StageExecutionError>;
}

/// Reorders (and possibly truncates) candidate documents
#[async_trait]
pub trait Reranker: Send + Sync {
    fn technique(&self) -> &'static str;

    async fn rerank(
        &self,
        query: &str,
        documents: Vec<RetrievedDocument>,
    ) -> Result<Vec<RetrievedDocument>, StageExecutionError>;
}

/// Drops documents; survivors keep their relative order
pub trait DocumentFilter: Send + Sync {
    fn technique(&self) -> &'static str;

    fn filter(&self, documents: Vec<RetrievedDocument>) -> Vec<RetrievedDocument>;
}

/// Turns the query and final documents into a model prompt
pub trait PromptBuilder: Send + Sync {
    fn technique(&self) -> &'static str;

    fn build(&self, query: &str, documents: &[RetrievedDocument]) -> String;
}

/// Output of a generation stage
#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub answer: String,
    pub tokens_per_second: f64,
    pub elapsed: Duration,
}

/// Produces an answer from a prompt
#[async_trait]
pub trait Generator: Send + Sync {
    fn technique(&self) -> &'static str;

    async fn generate(&self, prompt: &str) -> Result<Generation, StageExecutionError>;
}

// ============================================================================
// Retrieval
// ============================================================================

/// Similarity search against a vectorstore collection
pub struct VectorstoreRetriever {
    store: Arc<dyn Vectorstore>,
}

impl VectorstoreRetriever {
    pub fn new(store: Arc<dyn Vectorstore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Retriever for VectorstoreRetriever {
    fn technique(&self) -> &'static str {
        "vectorstore"
    }

    async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>, StageExecutionError> {
        let mut documents = self
            .store
            .similarity_search(query, k)
            .await
            .map_err(|e| StageExecutionError::from_service(StageCategory::Retrieval, e))?;
        documents.truncate(k);
        Ok(documents)
    }
}

// ============================================================================
// Rerank
// ============================================================================

/// Stable descending sort by score, then optional truncation
///
/// Original similarity scores are left untouched; only the order changes.
fn order_by_scores(
    documents: Vec<RetrievedDocument>,
    scores: Vec<f32>,
    top_n: Option<usize>,
) -> Vec<RetrievedDocument> {
    let mut scored: Vec<(f32, RetrievedDocument)> = scores.into_iter().zip(documents).collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    if let Some(n) = top_n {
        scored.truncate(n);
    }
    scored.into_iter().map(|(_, doc)| doc).collect()
}

/// Keeps the incoming order
pub struct IdentityReranker;

#[async_trait]
impl Reranker for IdentityReranker {
    fn technique(&self) -> &'static str {
        "identity"
    }

    async fn rerank(
        &self,
        _query: &str,
        documents: Vec<RetrievedDocument>,
    ) -> Result<Vec<RetrievedDocument>, StageExecutionError> {
        Ok(documents)
    }
}

/// Scores (query, document) pairs with a cross-encoder
pub struct CrossEncoderReranker {
    encoder: Arc<dyn CrossEncoder>,
    top_n: Option<usize>,
}

impl CrossEncoderReranker {
    pub fn new(encoder: Arc<dyn CrossEncoder>, top_n: Option<usize>) -> Self {
        Self { encoder, top_n }
    }
}

#[async_trait]
impl Reranker for CrossEncoderReranker {
    fn technique(&self) -> &'static str {
        "cross_encoder"
    }

    async fn rerank(
        &self,
        query: &str,
        documents: Vec<RetrievedDocument>,
    ) -> Result<Vec<RetrievedDocument>, StageExecutionError> {
        if documents.is_empty() {
            return Ok(documents);
        }
        let encoder = Arc::clone(&self.encoder);
        let query = query.to_string();
        let contents: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();

        // Run in blocking task since the cross-encoder is synchronous
        let scores = tokio::task::spawn_blocking(move || encoder.score(&query, &contents))
            .await
            .map_err(|e| StageExecutionError::new(StageCategory::Rerank, e))?
            .map_err(|e| StageExecutionError::new(StageCategory::Rerank, e))?;

        if scores.len() != documents.len() {
            return Err(StageExecutionError::new(
                StageCategory::Rerank,
                format!("cross-encoder returned {} scores for {} documents", scores.len(), documents.len()),
            ));
        }
        Ok(order_by_scores(documents, scores, self.top_n))
    }
}

/// Prompt asking a model for a 1-10 relevance rating
pub fn relevance_prompt(query: &str, document: &str) -> String {
    format!(
        "Rate how relevant the document is to the question on a scale of 1 to 10.\n\n\
         Question: {query}\n\n\
         Document:\n{document}\n\n\
         Reply with a JSON block:\n```json\n{{\"score\": <1-10>}}\n```"
    )
}

/// Asks an LLM to rate each document's relevance
pub struct LlmReranker {
    llm: Arc<dyn LlmClient>,
    model: String,
    top_n: Option<usize>,
}

impl LlmReranker {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, top_n: Option<usize>) -> Self {
        Self {
            llm,
            model: model.into(),
            top_n,
        }
    }

    async fn rate(&self, query: &str, document: &RetrievedDocument) -> Result<f32, StageExecutionError> {
        let reply = self
            .llm
            .respond(&self.model, &relevance_prompt(query, &document.content))
            .await
            .map_err(|e| StageExecutionError::from_service(StageCategory::Rerank, e))?;
        let score = parse_judge_score(&reply.response)
            .map_err(|e| StageExecutionError::new(StageCategory::Rerank, e))?;
        Ok(score as f32)
    }
}

#[async_trait]
impl Reranker for LlmReranker {
    fn technique(&self) -> &'static str {
        "llm"
    }

    async fn rerank(
        &self,
        query: &str,
        documents: Vec<RetrievedDocument>,
    ) -> Result<Vec<RetrievedDocument>, StageExecutionError> {
        let ratings = futures::future::join_all(documents.iter().map(|doc| self.rate(query, doc))).await;
        let scores = ratings.into_iter().collect::<Result<Vec<_>, _>>()?;
        Ok(order_by_scores(documents, scores, self.top_n))
    }
}

// ============================================================================
// Filter
// ============================================================================

/// Keeps documents whose similarity score is at least `threshold`
pub struct SimilarityThresholdFilter {
    threshold: f32,
}

impl SimilarityThresholdFilter {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }
}

impl DocumentFilter for SimilarityThresholdFilter {
    fn technique(&self) -> &'static str {
        "similarity_threshold"
    }

    fn filter(&self, documents: Vec<RetrievedDocument>) -> Vec<RetrievedDocument> {
        documents
            .into_iter()
            .filter(|doc| doc.similarity_score >= self.threshold)
            .collect()
    }
}

// ============================================================================
// Prompt
// ============================================================================

pub const DEFAULT_PROMPT_TEMPLATE: &str = "Answer the question using only the context below.\n\n\
Context:\n{context}\n\n\
Question: {question}\n\
Answer:";

const EMPTY_CONTEXT: &str = "(no context documents)";

/// Numbered context blocks followed by the question
pub struct SimpleListingPrompt {
    template: String,
}

impl SimpleListingPrompt {
    /// `template` may use `{context}` and `{question}` placeholders
    pub fn new(template: Option<String>) -> Self {
        Self {
            template: template.unwrap_or_else(|| DEFAULT_PROMPT_TEMPLATE.to_string()),
        }
    }

    fn context(documents: &[RetrievedDocument]) -> String {
        if documents.is_empty() {
            return EMPTY_CONTEXT.to_string();
        }
        documents
            .iter()
            .enumerate()
            .map(|(i, doc)| format!("[{}] {}", i + 1, doc.content.trim()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl PromptBuilder for SimpleListingPrompt {
    fn technique(&self) -> &'static str {
        "simple_listing"
    }

    fn build(&self, query: &str, documents: &[RetrievedDocument]) -> String {
        fill_template(&self.template, &Self::context(documents), query)
    }
}

/// Substitute `{context}` and `{question}` in a single left-to-right pass
///
/// Substituted text is never rescanned, so placeholders inside documents or
/// the query come through literally.
fn fill_template(template: &str, context: &str, question: &str) -> String {
    let mut out = String::with_capacity(template.len() + context.len() + question.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix("{context}") {
            out.push_str(context);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{question}") {
            out.push_str(question);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Plain concatenation of document texts, then the question
pub struct ConcatenatePrompt;

impl PromptBuilder for ConcatenatePrompt {
    fn technique(&self) -> &'static str {
        "concatenate"
    }

    fn build(&self, query: &str, documents: &[RetrievedDocument]) -> String {
        let context: Vec<&str> = documents.iter().map(|d| d.content.trim()).collect();
        format!("{}\n\n{}", context.join("\n"), query)
    }
}

// ============================================================================
// Generation
// ============================================================================

/// Completion from an LLM
pub struct LlmGenerator {
    llm: Arc<dyn LlmClient>,
    model: String,
    options: GenerationOptions,
}

impl LlmGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, options: GenerationOptions) -> Self {
        Self {
            llm,
            model: model.into(),
            options,
        }
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    fn technique(&self) -> &'static str {
        "llm"
    }

    async fn generate(&self, prompt: &str) -> Result<Generation, StageExecutionError> {
        let start = Instant::now();
        let reply = self
            .llm
            .respond_with_options(&self.model, prompt, &self.options)
            .await
            .map_err(|e| StageExecutionError::from_service(StageCategory::Generation, e))?;
        Ok(Generation {
            answer: reply.response.trim().to_string(),
            tokens_per_second: reply.tokens_per_second,
            elapsed: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{CollectionInfo, LlmResponse};
    use crate::error::ExternalServiceError;
    use crate::pipeline::cross_encoder::tests::WordOverlap;

    fn docs() -> Vec<RetrievedDocument> {
        vec![
            RetrievedDocument::new("a", "billing cycles", 0.9),
            RetrievedDocument::new("b", "reset your password by email", 0.6),
            RetrievedDocument::new("c", "password policy", 0.3),
        ]
    }

    fn ids(documents: &[RetrievedDocument]) -> Vec<&str> {
        documents.iter().filter_map(|d| d.doc_id.as_deref()).collect()
    }

    struct FixedStore(Vec<RetrievedDocument>);

    #[async_trait]
    impl Vectorstore for FixedStore {
        async fn similarity_search(&self, _query: &str, _k: usize) -> Result<Vec<RetrievedDocument>, ExternalServiceError> {
            Ok(self.0.clone())
        }

        async fn collection_info(&self) -> Result<CollectionInfo, ExternalServiceError> {
            Ok(CollectionInfo::default())
        }
    }

    /// Rates a document by the number in its content, if any
    struct DigitJudge;

    #[async_trait]
    impl LlmClient for DigitJudge {
        async fn respond(&self, _model: &str, prompt: &str) -> Result<LlmResponse, ExternalServiceError> {
            let document = prompt.split("Document:\n").nth(1).unwrap_or_default();
            let score = document.chars().find(|c| c.is_ascii_digit()).unwrap_or('1');
            Ok(LlmResponse {
                response: format!("```json\n{{\"score\": {}}}\n```", score),
                tokens_per_second: 0.0,
            })
        }
    }

    #[tokio::test]
    async fn test_vectorstore_retriever_truncates_to_k() {
        let retriever = VectorstoreRetriever::new(Arc::new(FixedStore(docs())));
        let result = retriever.retrieve("q", 2).await.unwrap();
        assert_eq!(ids(&result), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_cross_encoder_reorders_and_truncates() {
        let reranker = CrossEncoderReranker::new(Arc::new(WordOverlap), Some(2));
        let result = reranker.rerank("reset password", docs()).await.unwrap();
        assert_eq!(ids(&result), vec!["b", "c"]);
        // Scores are carried through unchanged
        assert!((result[0].similarity_score - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_llm_reranker_orders_by_rating() {
        let documents = vec![
            RetrievedDocument::new("low", "rating 2", 0.9),
            RetrievedDocument::new("high", "rating 9", 0.1),
            RetrievedDocument::new("mid", "rating 5", 0.5),
        ];
        let reranker = LlmReranker::new(Arc::new(DigitJudge), "judge", None);
        let result = reranker.rerank("q", documents).await.unwrap();
        assert_eq!(ids(&result), vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_identity_reranker_keeps_order() {
        let result = IdentityReranker.rerank("q", docs()).await.unwrap();
        assert_eq!(ids(&result), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_threshold_filter_keeps_order() {
        let documents = vec![
            RetrievedDocument::new("x", "", 0.4),
            RetrievedDocument::new("y", "", 0.8),
            RetrievedDocument::new("z", "", 0.5),
        ];
        let result = SimilarityThresholdFilter::new(0.5).filter(documents);
        assert_eq!(ids(&result), vec!["y", "z"]);
    }

    #[test]
    fn test_simple_listing_prompt() {
        let prompt = SimpleListingPrompt::new(None).build("How do I reset?", &docs()[..2]);
        assert!(prompt.contains("[1] billing cycles\n\n[2] reset your password by email"));
        assert!(prompt.contains("Question: How do I reset?"));

        let empty = SimpleListingPrompt::new(None).build("q", &[]);
        assert!(empty.contains(EMPTY_CONTEXT));

        let custom = SimpleListingPrompt::new(Some("Q={question}|C={context}".to_string()));
        assert_eq!(custom.build("why", &docs()[..1]), "Q=why|C=[1] billing cycles");
    }

    #[test]
    fn test_placeholders_in_documents_stay_literal() {
        let template = SimpleListingPrompt::new(Some("C={context}|Q={question}|{other}".to_string()));
        let documents = vec![RetrievedDocument::new("a", "ask {question} here", 1.0)];
        assert_eq!(
            template.build("what about {context}?", &documents),
            "C=[1] ask {question} here|Q=what about {context}?|{other}"
        );
    }

    #[tokio::test]
    async fn test_llm_generator_trims_answer() {
        struct Echo;

        #[async_trait]
        impl LlmClient for Echo {
            async fn respond(&self, _model: &str, _prompt: &str) -> Result<LlmResponse, ExternalServiceError> {
                Ok(LlmResponse {
                    response: "  Paris.\n".to_string(),
                    tokens_per_second: 42.0,
                })
            }
        }

        let generator = LlmGenerator::new(Arc::new(Echo), "llama3.1", GenerationOptions::default());
        let generation = generator.generate("prompt").await.unwrap();
        assert_eq!(generation.answer, "Paris.");
        assert_eq!(generation.tokens_per_second, 42.0);
    }
}
