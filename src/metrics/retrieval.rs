//! Ranking metrics for retrieval evaluation
//!
//! Implements Precision@K, Recall@K, nDCG@K and MAP over string document ids.
//!
//! ## Metrics Overview
//!
//! - **Precision@K**: `|top_k ∩ relevant| / k`
//! - **Recall@K**: `|top_k ∩ relevant| / |relevant|`
//! - **nDCG@K**: binary-gain DCG normalized by the ideal DCG of
//!   `min(k, |relevant|)` perfectly ranked relevant items
//! - **MAP**: mean of precision at each rank holding a relevant document,
//!   divided by `|relevant|`
//!
//! Every metric is 0.0 when the relevant set is empty.

use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::document::RetrievedDocument;

/// Default k values for ranking metrics
pub const DEFAULT_K_VALUES: [usize; 4] = [1, 3, 5, 10];

/// Canonical single-number score for retrieval-only runs
pub const CANONICAL_RETRIEVAL_METRIC: &str = "recall@5";

/// Normalize an identifier value to its string form
///
/// Strings are trimmed, integral numbers lose any fractional part (`7.0` → `"7"`),
/// empty strings and non-scalar values are rejected.
pub fn normalize_doc_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Some(u.to_string())
            } else {
                n.as_f64().map(|f| {
                    if f.fract() == 0.0 && f.abs() < 1e15 {
                        format!("{}", f as i64)
                    } else {
                        f.to_string()
                    }
                })
            }
        }
        _ => None,
    }
}

/// Extract ranked ids from retrieved documents
///
/// Documents whose id cannot be resolved are dropped (and logged); the
/// remaining documents keep their rank order.
pub fn extract_doc_ids(documents: &[RetrievedDocument]) -> Vec<String> {
    let mut ids = Vec::with_capacity(documents.len());
    for (rank, doc) in documents.iter().enumerate() {
        match doc.resolved_id() {
            Some(id) => ids.push(id),
            None => tracing::warn!(
                rank = rank + 1,
                preview = %doc.content.chars().take(60).collect::<String>(),
                "dropping retrieved document without a resolvable id"
            ),
        }
    }
    ids
}

/// Number of distinct relevant ids in the top k
fn hits_at_k(retrieved: &[String], relevant: &HashSet<String>, k: usize) -> usize {
    retrieved
        .iter()
        .take(k)
        .filter(|id| relevant.contains(*id))
        .collect::<HashSet<_>>()
        .len()
}

/// Precision@K: fraction of the k slots holding a relevant document
pub fn precision_at_k(retrieved: &[String], relevant: &HashSet<String>, k: usize) -> f64 {
    if k == 0 || relevant.is_empty() {
        return 0.0;
    }
    hits_at_k(retrieved, relevant, k) as f64 / k as f64
}

/// Recall@K: fraction of relevant documents found in the top k
pub fn recall_at_k(retrieved: &[String], relevant: &HashSet<String>, k: usize) -> f64 {
    if k == 0 || relevant.is_empty() {
        return 0.0;
    }
    hits_at_k(retrieved, relevant, k) as f64 / relevant.len() as f64
}

/// DCG@K with binary gains; repeated ids only count once
pub fn dcg_at_k(retrieved: &[String], relevant: &HashSet<String>, k: usize) -> f64 {
    let mut seen = HashSet::new();
    retrieved
        .iter()
        .take(k)
        .enumerate()
        .filter(|(_, id)| relevant.contains(*id) && seen.insert(id.as_str()))
        .map(|(i, _)| 1.0 / ((i + 2) as f64).log2()) // rank = i + 1
        .sum()
}

/// Ideal DCG@K for `num_relevant` relevant documents
pub fn idcg_at_k(num_relevant: usize, k: usize) -> f64 {
    (0..num_relevant.min(k))
        .map(|i| 1.0 / ((i + 2) as f64).log2())
        .sum()
}

/// nDCG@K = DCG@K / IDCG@K
pub fn ndcg_at_k(retrieved: &[String], relevant: &HashSet<String>, k: usize) -> f64 {
    let idcg = idcg_at_k(relevant.len(), k);
    if idcg == 0.0 {
        return 0.0;
    }
    dcg_at_k(retrieved, relevant, k) / idcg
}

/// Average precision over the retrieved list, optionally cut at `cutoff`
pub fn average_precision(retrieved: &[String], relevant: &HashSet<String>, cutoff: Option<usize>) -> f64 {
    if relevant.is_empty() {
        return 0.0;
    }
    let limit = cutoff.unwrap_or(retrieved.len());
    let mut seen = HashSet::new();
    let mut hits = 0usize;
    let mut precision_sum = 0.0;
    for (i, id) in retrieved.iter().take(limit).enumerate() {
        if relevant.contains(id) && seen.insert(id.as_str()) {
            hits += 1;
            precision_sum += hits as f64 / (i + 1) as f64;
        }
    }
    precision_sum / relevant.len() as f64
}

/// All ranking metrics for one query
///
/// Keys: `precision@k`, `recall@k`, `ndcg@k` for each k, and `map` (cut at the
/// largest k).
pub fn retrieval_metrics(
    retrieved: &[String],
    relevant: &HashSet<String>,
    k_values: &[usize],
) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();
    for &k in k_values {
        metrics.insert(format!("precision@{}", k), precision_at_k(retrieved, relevant, k));
        metrics.insert(format!("recall@{}", k), recall_at_k(retrieved, relevant, k));
        metrics.insert(format!("ndcg@{}", k), ndcg_at_k(retrieved, relevant, k));
    }
    let cutoff = k_values.iter().copied().max();
    metrics.insert("map".to_string(), average_precision(retrieved, relevant, cutoff));
    metrics
}

/// Canonical retrieval score (recall@5), computed even when 5 is not a requested k
pub fn canonical_retrieval_score(retrieved: &[String], relevant: &HashSet<String>) -> f64 {
    recall_at_k(retrieved, relevant, 5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ranked(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_reference_scenario() {
        let retrieved = ranked(&["d1", "d3", "d5", "d9", "d2"]);
        let relevant = set(&["d1", "d2", "d3"]);

        assert!((recall_at_k(&retrieved, &relevant, 5) - 1.0).abs() < 1e-9);
        assert!((precision_at_k(&retrieved, &relevant, 5) - 0.6).abs() < 1e-9);
        assert!((recall_at_k(&retrieved, &relevant, 1) - 1.0 / 3.0).abs() < 1e-9);
        assert!((precision_at_k(&retrieved, &relevant, 1) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_relevant_set_is_all_zero() {
        let retrieved = ranked(&["d1", "d2"]);
        let metrics = retrieval_metrics(&retrieved, &HashSet::new(), &DEFAULT_K_VALUES);
        assert_eq!(metrics.len(), 13);
        assert!(metrics.values().all(|v| *v == 0.0));
    }

    #[test]
    fn test_empty_retrieved_list() {
        let relevant = set(&["d1"]);
        let metrics = retrieval_metrics(&[], &relevant, &DEFAULT_K_VALUES);
        assert!(metrics.values().all(|v| *v == 0.0));
    }

    #[test]
    fn test_recall_is_one_when_relevant_in_top_k() {
        let retrieved = ranked(&["x", "d2", "d1", "y"]);
        let relevant = set(&["d1", "d2"]);
        assert_eq!(recall_at_k(&retrieved, &relevant, 3), 1.0);
        assert_eq!(recall_at_k(&retrieved, &relevant, 10), 1.0);
        assert_eq!(precision_at_k(&retrieved, &relevant, 10), 0.2);
    }

    #[test]
    fn test_precision_and_recall_bounded() {
        let relevant = set(&["a", "b"]);
        let cases = [
            ranked(&[]),
            ranked(&["a"]),
            ranked(&["a", "a", "a"]),
            ranked(&["c", "b", "a", "d", "e", "f"]),
        ];
        for retrieved in &cases {
            for k in 1..=12 {
                let p = precision_at_k(retrieved, &relevant, k);
                let r = recall_at_k(retrieved, &relevant, k);
                assert!((0.0..=1.0).contains(&p), "precision@{} = {}", k, p);
                assert!((0.0..=1.0).contains(&r), "recall@{} = {}", k, r);
            }
        }
    }

    #[test]
    fn test_duplicate_ids_count_once() {
        let retrieved = ranked(&["a", "a", "a"]);
        let relevant = set(&["a", "b"]);
        assert_eq!(recall_at_k(&retrieved, &relevant, 3), 0.5);
        assert!((precision_at_k(&retrieved, &relevant, 3) - 1.0 / 3.0).abs() < 1e-9);
        assert!(ndcg_at_k(&retrieved, &relevant, 3) < 1.0);
    }

    #[test]
    fn test_dcg_at_k() {
        // Relevant at rank 1: DCG = 1/log2(2) = 1.0
        assert!((dcg_at_k(&ranked(&["a", "b"]), &set(&["a"]), 2) - 1.0).abs() < 1e-9);
        // Relevant at rank 2: DCG = 1/log2(3) ≈ 0.631
        assert!((dcg_at_k(&ranked(&["b", "a"]), &set(&["a"]), 2) - 0.631).abs() < 0.001);
    }

    #[test]
    fn test_ndcg_perfect_in_any_order_at_boundary() {
        let relevant = set(&["a", "b"]);
        assert!((ndcg_at_k(&ranked(&["a", "b", "x"]), &relevant, 3) - 1.0).abs() < 1e-9);
        assert!((ndcg_at_k(&ranked(&["b", "a", "x"]), &relevant, 3) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ndcg_penalizes_relevant_below_irrelevant() {
        let relevant = set(&["a", "b"]);
        // a at rank 1, irrelevant x at rank 2, b at rank 3
        // DCG = 1 + 1/log2(4) = 1.5; IDCG = 1 + 1/log2(3) ≈ 1.631
        let ndcg = ndcg_at_k(&ranked(&["a", "x", "b"]), &relevant, 3);
        assert!(ndcg < 1.0);
        assert!((ndcg - 1.5 / (1.0 + 1.0 / 3f64.log2())).abs() < 1e-9);
    }

    #[test]
    fn test_ndcg_ideal_uses_min_k_relevant() {
        // 3 relevant but k = 1: ideal is a single relevant doc at rank 1
        let relevant = set(&["a", "b", "c"]);
        assert!((ndcg_at_k(&ranked(&["c"]), &relevant, 1) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_average_precision() {
        let relevant = set(&["d1", "d2", "d3"]);
        let retrieved = ranked(&["d1", "d3", "d5", "d9", "d2"]);
        // Precision at hits: 1/1, 2/2, 3/5 → (1 + 1 + 0.6) / 3
        let ap = average_precision(&retrieved, &relevant, None);
        assert!((ap - 2.6 / 3.0).abs() < 1e-9);

        // Cut at 3: only d1, d3 counted → (1 + 1) / 3
        let ap_cut = average_precision(&retrieved, &relevant, Some(3));
        assert!((ap_cut - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_retrieval_metrics_keys() {
        let metrics = retrieval_metrics(&ranked(&["d1"]), &set(&["d1"]), &[1, 5]);
        let keys: Vec<_> = metrics.keys().cloned().collect();
        assert_eq!(
            keys,
            vec!["map", "ndcg@1", "ndcg@5", "precision@1", "precision@5", "recall@1", "recall@5"]
        );
        assert_eq!(metrics["precision@5"], 0.2);
        assert_eq!(metrics[CANONICAL_RETRIEVAL_METRIC], 1.0);
    }

    #[test]
    fn test_normalize_doc_id() {
        assert_eq!(normalize_doc_id(&json!(" d1 ")).as_deref(), Some("d1"));
        assert_eq!(normalize_doc_id(&json!(42)).as_deref(), Some("42"));
        assert_eq!(normalize_doc_id(&json!(42.0)).as_deref(), Some("42"));
        assert_eq!(normalize_doc_id(&json!(4.5)).as_deref(), Some("4.5"));
        assert_eq!(normalize_doc_id(&json!("")), None);
        assert_eq!(normalize_doc_id(&json!(null)), None);
        assert_eq!(normalize_doc_id(&json!({"id": 1})), None);
    }

    #[test]
    fn test_extract_doc_ids_drops_unresolvable() {
        let docs = vec![
            RetrievedDocument::new("d1", "one", 0.9),
            RetrievedDocument::anonymous("no id", 0.8),
            RetrievedDocument::anonymous("nested", 0.7).with_metadata(json!({"doc_id": 3})),
        ];
        assert_eq!(extract_doc_ids(&docs), ranked(&["d1", "3"]));
    }
}
