//! Metrics engine
//!
//! Scores retrieval and generation outputs.
//!
//! ## Modules
//!
//! - `retrieval` - Precision@K, Recall@K, nDCG@K, MAP over string document ids
//! - `generation` - LLM judge score, semantic similarity, combined score
//!
//! Retrieval metrics are pure and synchronous. Generation scoring awaits the
//! judge model and the similarity service.

pub mod generation;
pub mod retrieval;

pub use generation::{
    check_unit_range, combined_score, judge_prompt, parse_judge_score, GenerationScorer,
    GenerationScores, DEFAULT_JUDGE_WEIGHT,
};
pub use retrieval::{
    average_precision, canonical_retrieval_score, extract_doc_ids, ndcg_at_k, normalize_doc_id,
    precision_at_k, recall_at_k, retrieval_metrics, CANONICAL_RETRIEVAL_METRIC, DEFAULT_K_VALUES,
};

/// Arithmetic mean (0.0 for an empty slice)
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Cosine similarity between two vectors (0.0 on length mismatch or zero norm)
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
