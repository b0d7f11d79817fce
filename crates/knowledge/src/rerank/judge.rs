//! Generation-model-as-judge reranking.
//!
//! Each candidate is scored by its own completion request asking for a
//! 0-10 relevance number. Requests for one question run a few at a time.

use super::Reranker;
use crate::types::{sort_by_rerank_score, Candidate, ScoredCandidate};
use futures::StreamExt;
use hrdesk_core::{AppError, AppResult};
use hrdesk_llm::{LlmClient, LlmRequest};
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Judge requests in flight per question.
const JUDGE_CONCURRENCY: usize = 4;

const MAX_JUDGE_SCORE: f32 = 10.0;

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-?\d*\.?\d+").expect("Invalid judge score regex"))
}

/// Parse a judge reply into a score in `[0, 10]`.
///
/// The first number in the reply wins ("7.5 out of 10" is 7.5). A reply
/// without a number scores 0.0.
pub fn parse_judge_score(reply: &str) -> f32 {
    number_regex()
        .find(reply)
        .and_then(|m| m.as_str().parse::<f32>().ok())
        .map(|score| score.clamp(0.0, MAX_JUDGE_SCORE))
        .unwrap_or(0.0)
}

/// Cut `text` to at most `max_chars` characters.
fn snippet(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Reranker asking a generation model to grade each candidate.
pub struct JudgeReranker {
    client: Arc<dyn LlmClient>,
    model: String,
    snippet_chars: usize,
    timeout: Option<Duration>,
}

impl JudgeReranker {
    pub fn new(client: Arc<dyn LlmClient>, model: impl Into<String>, snippet_chars: usize) -> Self {
        Self {
            client,
            model: model.into(),
            snippet_chars,
            timeout: None,
        }
    }

    /// Bound each judge request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn judge_prompt(&self, question: &str, text: &str) -> String {
        format!(
            "You are scoring candidate context for a question.\n\
             Question: {}\n\
             Candidate text:\n{}\n\n\
             Return ONLY a number 0-10 for relevance.",
            question,
            snippet(text, self.snippet_chars)
        )
    }

    async fn judge(&self, question: &str, text: &str) -> AppResult<f32> {
        let request = LlmRequest::new(self.judge_prompt(question, text), &self.model)
            .with_temperature(0.0)
            .with_max_tokens(8);

        let response = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.client.complete(&request))
                .await
                .map_err(|_| AppError::Timeout {
                    operation: "judge request".to_string(),
                    seconds: limit.as_secs(),
                })??,
            None => self.client.complete(&request).await?,
        };

        Ok(parse_judge_score(&response.content))
    }
}

#[async_trait::async_trait]
impl Reranker for JudgeReranker {
    fn name(&self) -> &str {
        "llm"
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

        let scores: Vec<f32> = futures::stream::iter(0..candidates.len())
            .map(|index| {
                let candidates = &candidates;
                async move {
                    match self.judge(question, candidates[index].text()).await {
                        Ok(score) => score,
                        Err(e) => {
                            warn!(
                                "Judge request for candidate {} failed; scoring 0.0: {}",
                                index, e
                            );
                            0.0
                        }
                    }
                }
            })
            .buffered(JUDGE_CONCURRENCY)
            .collect()
            .await;

        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .zip(scores)
            .map(|(candidate, score)| ScoredCandidate::new(candidate, score))
            .collect();

        sort_by_rerank_score(&mut scored);
        scored.truncate(top_n);

        debug!("Judge kept {} candidates", scored.len());
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DocumentChunk;
    use hrdesk_llm::MockClient;

    fn candidates(texts: &[&str]) -> Vec<Candidate> {
        texts
            .iter()
            .map(|t| Candidate::new(DocumentChunk::new(*t, "doc.pdf"), 0.5))
            .collect()
    }

    /// Replies with the score written in the candidate text ("score=N").
    fn grading_client() -> MockClient {
        MockClient::new().with_responder(|request| {
            let score = request
                .prompt
                .split("score=")
                .nth(1)
                .and_then(|rest| rest.split_whitespace().next());
            match score {
                Some("fail") => Err(AppError::Llm("judge down".to_string())),
                Some(score) => Ok(format!("{} out of 10", score)),
                None => Ok("not sure".to_string()),
            }
        })
    }

    #[test]
    fn test_parse_judge_score() {
        assert_eq!(parse_judge_score("7.5 out of 10"), 7.5);
        assert_eq!(parse_judge_score("Score: 8"), 8.0);
        assert_eq!(parse_judge_score(".5"), 0.5);
        assert_eq!(parse_judge_score("Relevance: .75/10"), 0.75);
        assert_eq!(parse_judge_score("I'd say 12"), 10.0);
        assert_eq!(parse_judge_score("-3"), 0.0);
        assert_eq!(parse_judge_score("highly relevant"), 0.0);
        assert_eq!(parse_judge_score(""), 0.0);
    }

    #[test]
    fn test_snippet_respects_char_boundaries() {
        assert_eq!(snippet("héllo wörld", 4), "héll");
        assert_eq!(snippet("short", 100), "short");
        assert_eq!(snippet("abc", 0), "");
    }

    #[tokio::test]
    async fn test_rerank_by_judge_scores() {
        let client = Arc::new(grading_client());
        let reranker = JudgeReranker::new(client.clone(), "judge", 1200);
        let input = candidates(&["a score=2", "b score=9", "c score=5.5"]);

        let out = reranker.rerank("question", input, 2).await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].chunk().content, "b score=9");
        assert_eq!(out[1].rerank_score, 5.5);
        assert_eq!(client.complete_calls(), 3);
    }

    #[tokio::test]
    async fn test_failures_score_zero_and_never_abort() {
        let reranker = JudgeReranker::new(Arc::new(grading_client()), "judge", 1200);
        let input = candidates(&["a score=fail", "b nothing numeric", "c score=1"]);

        let out = reranker.rerank("question", input, 3).await;

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].chunk().content, "c score=1");
        assert_eq!(out[1].rerank_score, 0.0);
        assert_eq!(out[2].rerank_score, 0.0);
    }

    #[tokio::test]
    async fn test_prompt_truncates_candidate_text() {
        let client = Arc::new(MockClient::new().with_reply("5"));
        let reranker = JudgeReranker::new(client.clone(), "judge", 10);
        let long_text = format!("{}TAIL", "x".repeat(50));

        reranker.rerank("q", candidates(&[&long_text]), 1).await;

        let prompt = &client.requests()[0].prompt;
        assert!(prompt.contains(&"x".repeat(10)));
        assert!(!prompt.contains("TAIL"));
    }

    #[tokio::test]
    async fn test_timeout_scores_zero() {
        let client = Arc::new(
            MockClient::new()
                .with_reply("9")
                .with_delay(Duration::from_millis(200)),
        );
        let reranker =
            JudgeReranker::new(client, "judge", 100).with_timeout(Duration::from_millis(10));

        let out = reranker.rerank("q", candidates(&["a"]), 1).await;
        assert_eq!(out[0].rerank_score, 0.0);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let client = Arc::new(MockClient::new());
        let reranker = JudgeReranker::new(client.clone(), "judge", 100);
        assert!(reranker.rerank("q", Vec::new(), 3).await.is_empty());
        assert_eq!(client.complete_calls(), 0);
    }
}
