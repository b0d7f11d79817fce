//! Per-question orchestration.
//!
//! A question moves through the stages of [`PipelineStage`] strictly in
//! order. Routing, retrieval, reranking and prompt assembly always run
//! eagerly. Generation then either completes in one call
//! ([`Pipeline::answer_once`]) or is relayed chunk by chunk
//! ([`Pipeline::answer_stream`]), in which case the memory commit waits until
//! the backend has delivered its last chunk. A stream that fails or is
//! dropped early never commits, so sessions only ever hold complete turns.

use crate::events::{ChatEvent, ChatRequest, ChatResult, ChatStream};
use crate::memory::SessionStore;
use crate::route::{Route, RouteDecision, Router};
use futures::StreamExt;
use hrdesk_core::{AppConfig, AppError, AppResult};
use hrdesk_knowledge::{
    truncate_candidates, Candidate, CandidateStore, FetchRequest, Reranker, ScoredCandidate,
};
use hrdesk_llm::{LlmClient, LlmRequest, LlmStream};
use hrdesk_prompt::{build_answer_prompt, AnswerPromptInput, PromptSet, SourcePassage};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

/// Stages of one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Routing,
    Retrieving,
    Reranking,
    Assembling,
    Generating,
    Committing,
    Done,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Routing => "routing",
            PipelineStage::Retrieving => "retrieving",
            PipelineStage::Reranking => "reranking",
            PipelineStage::Assembling => "assembling",
            PipelineStage::Generating => "generating",
            PipelineStage::Committing => "committing",
            PipelineStage::Done => "done",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn enter(stage: PipelineStage) {
    tracing::debug!(stage = %stage, "Pipeline stage");
}

/// Tunables read by the orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Model used for answer generation
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub system_prompt: Option<String>,

    /// Candidates fetched from the store
    pub candidate_count: usize,

    /// Candidates kept for the prompt
    pub top_n: usize,

    pub default_role: String,
    pub admin_roles: Vec<String>,

    /// Filter used for routes without their own
    pub base_filter: String,
    pub route_filters: HashMap<String, String>,

    /// Deadline applied to each external call
    pub timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.llm.temperature,
            max_output_tokens: config.llm.max_output_tokens,
            system_prompt: config.llm.system_prompt.clone(),
            candidate_count: config.candidate_count(),
            top_n: config.final_top_n(),
            default_role: config.roles.default_role.clone(),
            admin_roles: config.roles.admin_roles.clone(),
            base_filter: config.retriever.expr.clone(),
            route_filters: config.routing.filters.clone(),
            timeout: Duration::from_secs(config.pipeline.timeout_secs),
        }
    }

    /// Filter expression used when retrieving for `route`.
    pub fn filter_for(&self, route: &Route) -> &str {
        self.route_filters
            .get(route.as_str())
            .map(String::as_str)
            .unwrap_or(&self.base_filter)
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Run `future` under a deadline; expiry becomes [`AppError::Timeout`].
async fn with_deadline<T, F>(limit: Duration, operation: &str, future: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| AppError::Timeout {
            operation: operation.to_string(),
            seconds: limit.as_secs(),
        })?
}

/// Everything generation needs, produced by the eager stages.
struct PreparedTurn {
    user_id: String,
    question: String,
    route: Route,
    request: LlmRequest,
}

/// The question-answering pipeline.
pub struct Pipeline {
    router: Router,
    store: Arc<dyn CandidateStore>,
    reranker: Option<Arc<dyn Reranker>>,
    memory: Arc<SessionStore>,
    prompts: PromptSet,
    llm: Arc<dyn LlmClient>,
    settings: PipelineSettings,
}

impl Pipeline {
    /// Create a pipeline with default settings, default memory and no reranker.
    ///
    /// Fails with a configuration error if a route has no answer template.
    pub fn new(
        router: Router,
        store: Arc<dyn CandidateStore>,
        llm: Arc<dyn LlmClient>,
        prompts: PromptSet,
    ) -> AppResult<Self> {
        hrdesk_prompt::ensure_route_templates(&prompts, router.routes().names())?;

        Ok(Self {
            router,
            store,
            reranker: None,
            memory: Arc::new(SessionStore::default()),
            prompts,
            llm,
            settings: PipelineSettings::default(),
        })
    }

    pub fn with_reranker(mut self, reranker: Option<Arc<dyn Reranker>>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn with_memory(mut self, memory: Arc<SessionStore>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn memory(&self) -> &Arc<SessionStore> {
        &self.memory
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    fn role_of<'a>(&'a self, request: &'a ChatRequest) -> &'a str {
        let role = request.role.trim();
        if role.is_empty() {
            self.settings.default_role.as_str()
        } else {
            role
        }
    }

    /// Route a request without answering it.
    pub async fn classify(&self, request: &ChatRequest) -> RouteDecision {
        self.router
            .classify(&request.question, self.role_of(request))
            .await
    }

    /// Fetch `k` candidates for `question` under `filter`.
    pub async fn fetch_candidates(
        &self,
        question: &str,
        k: usize,
        filter: &str,
    ) -> AppResult<Vec<Candidate>> {
        let request = FetchRequest::new(question, k).with_filter(filter);
        let candidates = with_deadline(
            self.settings.timeout,
            "candidate store",
            self.store.fetch(&request),
        )
        .await?;

        tracing::debug!(
            store = self.store.name(),
            requested = k,
            returned = candidates.len(),
            "Fetched candidates"
        );
        Ok(candidates)
    }

    /// Rerank candidates, or truncate them when no reranker is configured.
    ///
    /// A reranker that overruns the deadline is abandoned in favor of
    /// retrieval order.
    pub async fn rerank(
        &self,
        question: &str,
        candidates: Vec<Candidate>,
        top_n: usize,
    ) -> Vec<ScoredCandidate> {
        let Some(reranker) = &self.reranker else {
            return truncate_candidates(candidates, top_n);
        };

        match tokio::time::timeout(
            self.settings.timeout,
            reranker.rerank(question, candidates.clone(), top_n),
        )
        .await
        {
            Ok(ranked) => ranked,
            Err(_) => {
                tracing::warn!(
                    reranker = reranker.name(),
                    "Reranking timed out; keeping retrieval order"
                );
                truncate_candidates(candidates, top_n)
            }
        }
    }

    /// Run the eager stages: routing through prompt assembly.
    async fn prepare(&self, request: &ChatRequest) -> AppResult<PreparedTurn> {
        if request.question.trim().is_empty() {
            return Err(AppError::Pipeline("Question cannot be empty".to_string()));
        }
        let role = self.role_of(request);

        enter(PipelineStage::Routing);
        let decision = self.router.classify(&request.question, role).await;
        tracing::info!(
            route = %decision.route,
            method = ?decision.method,
            confidence = decision.confidence,
            "Routed question"
        );

        enter(PipelineStage::Retrieving);
        let filter = self.settings.filter_for(&decision.route);
        let candidates = self
            .fetch_candidates(&request.question, self.settings.candidate_count, filter)
            .await?;

        enter(PipelineStage::Reranking);
        let ranked = self
            .rerank(&request.question, candidates, self.settings.top_n)
            .await;

        enter(PipelineStage::Assembling);
        let template = self
            .prompts
            .route_template(decision.route.as_str())
            .ok_or_else(|| {
                AppError::Config(format!("No answer template for route '{}'", decision.route))
            })?;

        let session = self.memory.get_or_create(&request.user_id);
        let history = self.memory.render_history(&session);
        let passages: Vec<SourcePassage<'_>> = ranked
            .iter()
            .map(|scored| SourcePassage {
                text: &scored.chunk().content,
                path: scored.chunk().display_path(),
                page: scored.chunk().page,
            })
            .collect();

        let prompt = build_answer_prompt(
            template,
            &AnswerPromptInput {
                question: &request.question,
                role,
                passages: &passages,
                admin_roles: &self.settings.admin_roles,
                history: &history,
            },
        )?;

        let llm_request = LlmRequest::new(prompt, self.settings.model.clone())
            .with_optional_system(self.settings.system_prompt.as_deref())
            .with_temperature(self.settings.temperature)
            .with_max_tokens(self.settings.max_output_tokens);

        Ok(PreparedTurn {
            user_id: request.user_id.clone(),
            question: request.question.clone(),
            route: decision.route,
            request: llm_request,
        })
    }

    /// Answer a question in one generation call and record the exchange.
    pub async fn answer_once(&self, request: &ChatRequest) -> AppResult<ChatResult> {
        let span = request_span(request);

        async move {
            let turn = self.prepare(request).await?;

            enter(PipelineStage::Generating);
            let response = with_deadline(
                self.settings.timeout,
                "generation",
                self.llm.complete(&turn.request),
            )
            .await?;

            enter(PipelineStage::Committing);
            self.memory
                .commit_exchange(&turn.user_id, &turn.question, &response.content);

            enter(PipelineStage::Done);
            tracing::info!(
                answer_chars = response.content.len(),
                completion_tokens = response.usage.completion_tokens,
                "Answered question"
            );

            Ok(ChatResult {
                route: turn.route.to_string(),
                answer: response.content,
            })
        }
        .instrument(span)
        .await
    }

    /// Answer a question as a stream of events.
    ///
    /// Errors before generation starts are returned directly. Once the stream
    /// exists, failures arrive as a single [`ChatEvent::Error`]. The exchange
    /// is committed only after the backend's last chunk; dropping the stream
    /// earlier stops consuming the backend and discards the partial answer.
    pub async fn answer_stream(&self, request: ChatRequest) -> AppResult<ChatStream> {
        let span = request_span(&request);

        let (turn, upstream) = async {
            let turn = self.prepare(&request).await?;
            enter(PipelineStage::Generating);
            let upstream = with_deadline(
                self.settings.timeout,
                "generation",
                self.llm.stream(&turn.request),
            )
            .await?;
            Ok::<_, AppError>((turn, upstream))
        }
        .instrument(span.clone())
        .await?;

        let state = AnswerStream {
            upstream,
            phase: Phase::Route(turn.route.to_string()),
            answer: String::new(),
            commit: Some(PendingCommit {
                memory: Arc::clone(&self.memory),
                user_id: turn.user_id,
                question: turn.question,
            }),
            timeout: self.settings.timeout,
            span,
        };

        Ok(Box::pin(futures::stream::unfold(state, |state| {
            let span = state.span.clone();
            state.next_event().instrument(span)
        })))
    }
}

fn request_span(request: &ChatRequest) -> tracing::Span {
    tracing::info_span!(
        "chat",
        request_id = %uuid::Uuid::new_v4(),
        user_id = %request.user_id
    )
}

/// A memory write deferred until the answer is complete.
struct PendingCommit {
    memory: Arc<SessionStore>,
    user_id: String,
    question: String,
}

impl PendingCommit {
    fn commit(self, answer: &str) {
        self.memory.commit_exchange(&self.user_id, &self.question, answer);
    }
}

enum Phase {
    Route(String),
    Tokens,
    Closing,
    Finished,
}

struct AnswerStream {
    upstream: LlmStream,
    phase: Phase,
    answer: String,
    commit: Option<PendingCommit>,
    timeout: Duration,
    span: tracing::Span,
}

impl AnswerStream {
    async fn next_event(mut self) -> Option<(ChatEvent, Self)> {
        match std::mem::replace(&mut self.phase, Phase::Tokens) {
            Phase::Route(route) => return Some((ChatEvent::Route { route }, self)),
            Phase::Closing => {
                let event = self.finish();
                return Some((event, self));
            }
            Phase::Finished => {
                self.phase = Phase::Finished;
                return None;
            }
            Phase::Tokens => {}
        }

        loop {
            let next = match tokio::time::timeout(self.timeout, self.upstream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    let event = self.fail(format!(
                        "Timed out after {}s waiting for generation",
                        self.timeout.as_secs()
                    ));
                    return Some((event, self));
                }
            };

            match next {
                Some(Ok(chunk)) => {
                    if !chunk.content.is_empty() {
                        self.answer.push_str(&chunk.content);
                        if chunk.done {
                            self.phase = Phase::Closing;
                        }
                        return Some((ChatEvent::Token { text: chunk.content }, self));
                    }
                    if chunk.done {
                        let event = self.finish();
                        return Some((event, self));
                    }
                }
                Some(Err(e)) => {
                    let event = self.fail(e.to_string());
                    return Some((event, self));
                }
                None => {
                    let event = self.finish();
                    return Some((event, self));
                }
            }
        }
    }

    fn finish(&mut self) -> ChatEvent {
        self.phase = Phase::Finished;
        enter(PipelineStage::Committing);
        if let Some(commit) = self.commit.take() {
            commit.commit(&self.answer);
        }
        enter(PipelineStage::Done);
        tracing::info!(answer_chars = self.answer.len(), "Streamed answer");
        ChatEvent::End
    }

    fn fail(&mut self, message: String) -> ChatEvent {
        self.phase = Phase::Finished;
        self.commit = None;
        tracing::warn!(error = %message, "Answer stream failed; exchange not committed");
        ChatEvent::Error { message }
    }
}

impl Drop for AnswerStream {
    fn drop(&mut self) {
        if self.commit.is_some() {
            let _entered = self.span.enter();
            tracing::info!(
                partial_chars = self.answer.len(),
                "Answer stream dropped before completion; exchange not committed"
            );
        }
    }
}
