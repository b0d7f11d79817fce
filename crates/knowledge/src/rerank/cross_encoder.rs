//! Batch pairwise (cross-encoder) reranking.
//!
//! `(question, text)` pairs are sent to a scoring backend in fixed-size
//! batches. The bundled HTTP backend speaks the text-embeddings-inference
//! `/predict` API, which serves cross-encoder models such as
//! `cross-encoder/ms-marco-MiniLM-L-6-v2`.
//!
//! Pairs from a batch that could not be scored get 0.0 and rank after every
//! scored pair, whatever scale the backend uses.

use super::Reranker;
use crate::types::{sort_by_rerank_score, Candidate, ScoredCandidate};
use hrdesk_core::{AppError, AppResult};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Trait for pairwise scoring backends.
#[async_trait::async_trait]
pub trait ScoringBackend: Send + Sync {
    /// Score each `(query, text)` pair; one score per pair, in order.
    async fn score_pairs(&self, pairs: &[(String, String)]) -> AppResult<Vec<f32>>;
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    inputs: Vec<[&'a str; 2]>,
    raw_scores: bool,
}

/// Scoring backend over a text-embeddings-inference server.
#[derive(Debug, Clone)]
pub struct TeiScorer {
    client: reqwest::Client,
    endpoint: String,
}

impl TeiScorer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }
}

/// Pull a relevance score out of one prediction.
///
/// Predictions come back as a bare number, a `{"score": ..}` object, or a
/// list of label objects (first label wins).
fn extract_score(prediction: &Value) -> Option<f32> {
    match prediction {
        Value::Number(n) => n.as_f64().map(|s| s as f32),
        Value::Object(map) => map.get("score").and_then(extract_score),
        Value::Array(items) => items.first().and_then(extract_score),
        _ => None,
    }
}

#[async_trait::async_trait]
impl ScoringBackend for TeiScorer {
    #[instrument(skip(self, pairs), fields(pairs = pairs.len()))]
    async fn score_pairs(&self, pairs: &[(String, String)]) -> AppResult<Vec<f32>> {
        let url = format!("{}/predict", self.endpoint);
        let body = PredictRequest {
            inputs: pairs.iter().map(|(q, t)| [q.as_str(), t.as_str()]).collect(),
            raw_scores: false,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Rerank(format!("Failed to reach scoring backend: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Rerank(format!(
                "Scoring backend error ({}): {}",
                status, error_text
            )));
        }

        let predictions: Vec<Value> = response
            .json()
            .await
            .map_err(|e| AppError::Rerank(format!("Failed to parse scores: {}", e)))?;

        predictions
            .iter()
            .map(|p| {
                extract_score(p)
                    .ok_or_else(|| AppError::Rerank(format!("Unrecognized prediction: {}", p)))
            })
            .collect()
    }
}

/// Reranker scoring candidates in batches through a [`ScoringBackend`].
pub struct CrossEncoderReranker {
    backend: Arc<dyn ScoringBackend>,
    batch_size: usize,
    timeout: Option<Duration>,
}

impl CrossEncoderReranker {
    pub fn new(backend: Arc<dyn ScoringBackend>, batch_size: usize) -> Self {
        Self {
            backend,
            batch_size: batch_size.max(1),
            timeout: None,
        }
    }

    /// Bound each batch call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    async fn score_batch(&self, batch: &[(String, String)]) -> AppResult<Vec<f32>> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.backend.score_pairs(batch))
                .await
                .map_err(|_| AppError::Timeout {
                    operation: "scoring batch".to_string(),
                    seconds: limit.as_secs(),
                })?,
            None => self.backend.score_pairs(batch).await,
        }
    }
}

#[async_trait::async_trait]
impl Reranker for CrossEncoderReranker {
    fn name(&self) -> &str {
        "cross_encoder"
    }

    async fn rerank(
        &self,
        question: &str,
        candidates: Vec<Candidate>,
        top_n: usize,
    ) -> Vec<ScoredCandidate> {
        if candidates.is_empty() || top_n == 0 {
            return Vec::new();
        }

        let pairs: Vec<(String, String)> = candidates
            .iter()
            .map(|c| (question.to_string(), c.text().to_string()))
            .collect();

        let mut scores: Vec<Option<f32>> = Vec::with_capacity(pairs.len());
        for (index, batch) in pairs.chunks(self.batch_size).enumerate() {
            match self.score_batch(batch).await {
                Ok(batch_scores) if batch_scores.len() == batch.len() => {
                    scores.extend(batch_scores.into_iter().map(Some))
                }
                Ok(batch_scores) => {
                    warn!(
                        "Scoring batch {} returned {} scores for {} pairs; scoring it 0.0",
                        index,
                        batch_scores.len(),
                        batch.len()
                    );
                    scores.extend(std::iter::repeat(None).take(batch.len()));
                }
                Err(e) => {
                    warn!("Scoring batch {} failed; scoring it 0.0: {}", index, e);
                    scores.extend(std::iter::repeat(None).take(batch.len()));
                }
            }
        }

        let mut scored = Vec::with_capacity(candidates.len());
        let mut unscored = Vec::new();
        for (candidate, score) in candidates.into_iter().zip(scores) {
            match score {
                Some(score) => scored.push(ScoredCandidate::new(candidate, score)),
                None => unscored.push(ScoredCandidate::new(candidate, 0.0)),
            }
        }

        // Unscored candidates keep retrieval order behind the scored ones
        sort_by_rerank_score(&mut scored);
        scored.extend(unscored);
        scored.truncate(top_n);

        debug!("Cross-encoder kept {} candidates", scored.len());
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentChunk;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scores a pair by how many question words the text contains.
    #[derive(Default)]
    struct OverlapScorer {
        batches: Mutex<Vec<usize>>,
        fail_batch: Option<usize>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ScoringBackend for OverlapScorer {
        async fn score_pairs(&self, pairs: &[(String, String)]) -> AppResult<Vec<f32>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.batches.lock().unwrap().push(pairs.len());
            if self.fail_batch == Some(call) {
                return Err(AppError::Rerank("backend unavailable".to_string()));
            }
            Ok(pairs
                .iter()
                .map(|(q, t)| {
                    let text = t.to_lowercase();
                    q.to_lowercase()
                        .split_whitespace()
                        .filter(|w| text.contains(w))
                        .count() as f32
                })
                .collect())
        }
    }

    struct ShortScorer;

    #[async_trait::async_trait]
    impl ScoringBackend for ShortScorer {
        async fn score_pairs(&self, _pairs: &[(String, String)]) -> AppResult<Vec<f32>> {
            Ok(vec![5.0])
        }
    }

    fn candidates(texts: &[&str]) -> Vec<Candidate> {
        texts
            .iter()
            .map(|t| Candidate::new(DocumentChunk::new(*t, "doc.pdf"), 0.5))
            .collect()
    }

    #[tokio::test]
    async fn test_empty_input_gives_empty_output() {
        let scorer = Arc::new(OverlapScorer::default());
        let reranker = CrossEncoderReranker::new(scorer.clone(), 64);
        assert!(reranker.rerank("q", Vec::new(), 5).await.is_empty());
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sorts_and_truncates() {
        let reranker = CrossEncoderReranker::new(Arc::new(OverlapScorer::default()), 64);
        let input = candidates(&[
            "Office hours are 9 to 5.",
            "Parental leave lasts 16 weeks.",
            "Leave requests go to your manager.",
        ]);

        let out = reranker.rerank("parental leave weeks", input.clone(), 2).await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk().content, "Parental leave lasts 16 weeks.");
        assert_eq!(out[0].rerank_score, 3.0);
        assert!(out.iter().all(|s| input.contains(&s.candidate)));
    }

    #[tokio::test]
    async fn test_fixed_batches() {
        let scorer = Arc::new(OverlapScorer::default());
        let reranker = CrossEncoderReranker::new(scorer.clone(), 2);
        let input = candidates(&["a", "b", "c", "d", "e"]);

        let out = reranker.rerank("q", input, 10).await;

        assert_eq!(out.len(), 5);
        assert_eq!(*scorer.batches.lock().unwrap(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_failed_batch_scores_zero() {
        let scorer = Arc::new(OverlapScorer {
            fail_batch: Some(0),
            ..OverlapScorer::default()
        });
        let reranker = CrossEncoderReranker::new(scorer, 2);
        let input = candidates(&["leave policy", "leave", "leave policy details"]);

        let out = reranker.rerank("leave policy", input, 3).await;

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].chunk().content, "leave policy details");
        assert_eq!(out[1].rerank_score, 0.0);
        assert_eq!(out[2].rerank_score, 0.0);
    }

    /// Returns a fixed negative logit, failing on one call.
    struct NegativeScorer {
        fail_batch: usize,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ScoringBackend for NegativeScorer {
        async fn score_pairs(&self, pairs: &[(String, String)]) -> AppResult<Vec<f32>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == self.fail_batch {
                return Err(AppError::Rerank("backend unavailable".to_string()));
            }
            Ok(vec![-2.5; pairs.len()])
        }
    }

    #[tokio::test]
    async fn test_unscored_never_outranks_negative_score() {
        let scorer = Arc::new(NegativeScorer {
            fail_batch: 1,
            calls: AtomicUsize::new(0),
        });
        let reranker = CrossEncoderReranker::new(scorer, 1);

        let out = reranker
            .rerank("leave", candidates(&["relevant", "unscored"]), 1)
            .await;
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].chunk().content, "relevant");
        assert_eq!(out[0].rerank_score, -2.5);
    }

    #[tokio::test]
    async fn test_unscored_rank_last() {
        let scorer = Arc::new(NegativeScorer {
            fail_batch: 0,
            calls: AtomicUsize::new(0),
        });
        let reranker = CrossEncoderReranker::new(scorer, 1);

        let out = reranker
            .rerank("leave", candidates(&["unscored", "second", "third"]), 3)
            .await;

        assert_eq!(out.len(), 3);
        assert!(out[..2].iter().all(|s| s.rerank_score == -2.5));
        assert_eq!(out[2].chunk().content, "unscored");
        assert_eq!(out[2].rerank_score, 0.0);
    }

    #[tokio::test]
    async fn test_short_batch_scores_zero() {
        let reranker = CrossEncoderReranker::new(Arc::new(ShortScorer), 64);
        let out = reranker.rerank("q", candidates(&["a", "b"]), 2).await;
        assert!(out.iter().all(|s| s.rerank_score == 0.0));
    }

    #[test]
    fn test_extract_score_shapes() {
        assert_eq!(extract_score(&json!(2.5)), Some(2.5));
        assert_eq!(extract_score(&json!({"score": -1.0, "label": "LABEL_0"})), Some(-1.0));
        assert_eq!(extract_score(&json!([{"score": 0.75, "label": "LABEL_0"}])), Some(0.75));
        assert_eq!(extract_score(&json!("high")), None);
    }

    #[test]
    fn test_predict_request_shape() {
        let pairs = [("q".to_string(), "t".to_string())];
        let body = PredictRequest {
            inputs: pairs.iter().map(|(q, t)| [q.as_str(), t.as_str()]).collect(),
            raw_scores: false,
        };
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({"inputs": [["q", "t"]], "raw_scores": false})
        );
    }
}
