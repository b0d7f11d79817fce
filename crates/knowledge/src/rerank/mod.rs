//! Rerankers: re-score retrieved candidates and keep the best ones.
//!
//! Rerankers never fail. A scoring call that errors or times out gives the
//! affected candidates a score of 0.0 and ranking continues.

pub mod cross_encoder;
pub mod judge;

pub use cross_encoder::{CrossEncoderReranker, ScoringBackend, TeiScorer};
pub use judge::{parse_judge_score, JudgeReranker};

use crate::types::{Candidate, ScoredCandidate};
use hrdesk_core::{AppConfig, AppError, AppResult};
use hrdesk_llm::LlmClient;
use std::sync::Arc;
use std::time::Duration;

/// Trait for reranking strategies.
#[async_trait::async_trait]
pub trait Reranker: Send + Sync {
    /// Strategy name (e.g. "cross_encoder", "llm").
    fn name(&self) -> &str;

    /// Score candidates against the question and return the best `top_n`,
    /// highest score first.
    ///
    /// The output length is `min(top_n, candidates.len())` and every output
    /// element comes from the input. Tie order is unspecified.
    async fn rerank(
        &self,
        question: &str,
        candidates: Vec<Candidate>,
        top_n: usize,
    ) -> Vec<ScoredCandidate>;
}

/// Keep the first `n` candidates in retrieval order.
///
/// Used when no reranker is configured; the rerank score is the retrieval score.
pub fn truncate_candidates(candidates: Vec<Candidate>, n: usize) -> Vec<ScoredCandidate> {
    candidates
        .into_iter()
        .take(n)
        .map(|candidate| {
            let score = candidate.score;
            ScoredCandidate::new(candidate, score)
        })
        .collect()
}

/// Build the configured reranker.
///
/// Returns `None` for `type: none`. The judge strategy needs a generation
/// client; the cross-encoder strategy needs a scoring endpoint.
pub fn build_reranker(
    config: &AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
) -> AppResult<Option<Arc<dyn Reranker>>> {
    let settings = &config.reranker;
    let timeout = Duration::from_secs(config.pipeline.timeout_secs);

    match settings.kind.to_lowercase().as_str() {
        "none" | "" => Ok(None),

        "cross_encoder" => {
            let endpoint = settings.endpoint.as_deref().ok_or_else(|| {
                AppError::Config("cross_encoder reranker requires reranker.endpoint".to_string())
            })?;
            let scorer = TeiScorer::new(endpoint);
            let reranker = CrossEncoderReranker::new(Arc::new(scorer), settings.batch_size)
                .with_timeout(timeout);
            Ok(Some(Arc::new(reranker)))
        }

        "llm" => {
            let client = llm.ok_or_else(|| {
                AppError::Config("LLM reranker selected but no LLM client available".to_string())
            })?;
            let model = settings.model.clone().unwrap_or_else(|| config.model.clone());
            let reranker = JudgeReranker::new(client, model, settings.snippet_chars).with_timeout(timeout);
            Ok(Some(Arc::new(reranker)))
        }

        other => Err(AppError::Config(format!(
            "Unknown reranker type: {}. Supported: none, cross_encoder, llm",
            other
        ))),
    }
}
