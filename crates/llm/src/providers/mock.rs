//! In-process mock LLM client.
//!
//! Used by tests and by `provider: mock` for running the pipeline without a
//! model server. Replies are fixed strings or computed from the request, and
//! every call is counted so tests can assert which backend calls happened.

use crate::client::{LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage};
use hrdesk_core::{AppError, AppResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Computes a reply from a request.
pub type Responder = Box<dyn Fn(&LlmRequest) -> AppResult<String> + Send + Sync>;

enum Reply {
    Fixed(String),
    Computed(Responder),
}

#[derive(Debug, Default)]
struct Counters {
    complete: AtomicUsize,
    json: AtomicUsize,
    stream: AtomicUsize,
    chunks_pulled: AtomicUsize,
}

/// Mock generation backend.
pub struct MockClient {
    reply: Reply,
    json_reply: Option<String>,
    stream_chunks: Option<Vec<String>>,
    stream_fail_after: Option<usize>,
    failure: Option<String>,
    delay: Option<Duration>,
    counters: Arc<Counters>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl MockClient {
    /// A client that answers every request with "mock response".
    pub fn new() -> Self {
        Self {
            reply: Reply::Fixed("mock response".to_string()),
            json_reply: None,
            stream_chunks: None,
            stream_fail_after: None,
            failure: None,
            delay: None,
            counters: Arc::new(Counters::default()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A client whose every call fails with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        let mut client = Self::new();
        client.failure = Some(message.into());
        client
    }

    /// Reply with `reply` to plain requests.
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Reply::Fixed(reply.into());
        self
    }

    /// Compute replies from the request.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&LlmRequest) -> AppResult<String> + Send + Sync + 'static,
    {
        self.reply = Reply::Computed(Box::new(responder));
        self
    }

    /// Reply with `reply` to JSON-mode requests.
    pub fn with_json_reply(mut self, reply: impl Into<String>) -> Self {
        self.json_reply = Some(reply.into());
        self
    }

    /// Stream exactly these chunks.
    pub fn with_stream_chunks<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stream_chunks = Some(chunks.into_iter().map(Into::into).collect());
        self
    }

    /// Fail the stream after `n` chunks have been emitted.
    pub fn with_stream_failure_after(mut self, n: usize) -> Self {
        self.stream_fail_after = Some(n);
        self
    }

    /// Wait this long before answering any call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `complete` calls (JSON-mode ones included).
    pub fn complete_calls(&self) -> usize {
        self.counters.complete.load(Ordering::SeqCst)
    }

    /// Number of JSON-mode `complete` calls.
    pub fn json_calls(&self) -> usize {
        self.counters.json.load(Ordering::SeqCst)
    }

    /// Number of `stream` calls.
    pub fn stream_calls(&self) -> usize {
        self.counters.stream.load(Ordering::SeqCst)
    }

    /// Number of chunks consumers actually pulled from streams.
    pub fn chunks_pulled(&self) -> usize {
        self.counters.chunks_pulled.load(Ordering::SeqCst)
    }

    /// Every request seen so far, in call order.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    async fn begin(&self, request: &LlmRequest) -> AppResult<()> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            Some(message) => Err(AppError::Llm(message.clone())),
            None => Ok(()),
        }
    }

    fn reply_for(&self, request: &LlmRequest) -> AppResult<String> {
        if request.json_mode {
            if let Some(json) = &self.json_reply {
                return Ok(json.clone());
            }
        }
        match &self.reply {
            Reply::Fixed(text) => Ok(text.clone()),
            Reply::Computed(responder) => responder(request),
        }
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmClient for MockClient {
    fn provider_name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        self.counters.complete.fetch_add(1, Ordering::SeqCst);
        if request.json_mode {
            self.counters.json.fetch_add(1, Ordering::SeqCst);
        }
        self.begin(request).await?;

        let content = self.reply_for(request)?;
        let usage = LlmUsage::new(
            request.prompt.split_whitespace().count() as u32,
            content.split_whitespace().count() as u32,
        );

        Ok(LlmResponse {
            content,
            model: request.model.clone(),
            usage,
            done: true,
        })
    }

    async fn stream(&self, request: &LlmRequest) -> AppResult<LlmStream> {
        self.counters.stream.fetch_add(1, Ordering::SeqCst);
        self.begin(request).await?;

        let chunks = match &self.stream_chunks {
            Some(chunks) => chunks.clone(),
            None => vec![self.reply_for(request)?],
        };
        let fail_after = self.stream_fail_after;
        let counters = Arc::clone(&self.counters);
        let model = request.model.clone();

        let stream = futures::stream::unfold(0usize, move |index| {
            let counters = Arc::clone(&counters);
            let model = model.clone();
            let chunk = chunks.get(index).cloned();
            let total = chunks.len();
            async move {
                if fail_after == Some(index) {
                    return Some((
                        Err(AppError::Llm("mock stream interrupted".to_string())),
                        usize::MAX,
                    ));
                }
                if index > total {
                    return None;
                }
                match chunk {
                    Some(content) => {
                        counters.chunks_pulled.fetch_add(1, Ordering::SeqCst);
                        Some((Ok(LlmStreamChunk::partial(content, model)), index + 1))
                    }
                    None => Some((
                        Ok(LlmStreamChunk {
                            content: String::new(),
                            model,
                            done: true,
                            usage: None,
                        }),
                        usize::MAX,
                    )),
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_fixed_and_json_replies() {
        let client = MockClient::new()
            .with_reply("plain")
            .with_json_reply(r#"{"ok":true}"#);

        let plain = client.complete(&LlmRequest::new("q", "m")).await.unwrap();
        let json = client
            .complete(&LlmRequest::new("q", "m").with_json_output())
            .await
            .unwrap();

        assert_eq!(plain.content, "plain");
        assert_eq!(json.content, r#"{"ok":true}"#);
        assert_eq!(client.complete_calls(), 2);
        assert_eq!(client.json_calls(), 1);
    }

    #[tokio::test]
    async fn test_responder_sees_request() {
        let client = MockClient::new().with_responder(|req| Ok(req.prompt.to_uppercase()));
        let response = client.complete(&LlmRequest::new("abc", "m")).await.unwrap();
        assert_eq!(response.content, "ABC");
    }

    #[tokio::test]
    async fn test_stream_chunks_then_done() {
        let client = MockClient::new().with_stream_chunks(["Hel", "lo"]);
        let stream = client.stream(&LlmRequest::new("q", "m")).await.unwrap();
        let chunks: Vec<_> = stream.collect().await;

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].as_ref().unwrap().content, "Hel");
        assert_eq!(chunks[1].as_ref().unwrap().content, "lo");
        assert!(chunks[2].as_ref().unwrap().done);
        assert_eq!(client.chunks_pulled(), 2);
    }

    #[tokio::test]
    async fn test_stream_is_lazy() {
        let client = MockClient::new().with_stream_chunks(["a", "b", "c"]);
        let mut stream = client.stream(&LlmRequest::new("q", "m")).await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.content, "a");
        drop(stream);

        assert_eq!(client.chunks_pulled(), 1);
    }

    #[tokio::test]
    async fn test_stream_failure_after() {
        let client = MockClient::new()
            .with_stream_chunks(["a", "b"])
            .with_stream_failure_after(1);
        let chunks: Vec<_> = client
            .stream(&LlmRequest::new("q", "m"))
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].is_ok());
        assert!(chunks[1].is_err());
    }

    #[tokio::test]
    async fn test_failing_client() {
        let client = MockClient::failing("down");
        let err = client.complete(&LlmRequest::new("q", "m")).await.unwrap_err();
        assert!(err.to_string().contains("down"));
        assert!(client.stream(&LlmRequest::new("q", "m")).await.is_err());
        assert_eq!(client.requests().len(), 2);
    }
}
