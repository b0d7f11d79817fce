//! Configuration management for hrdesk.
//!
//! This module handles loading and merging configuration from multiple sources:
//! - Built-in defaults
//! - Config file (.hrdesk/config.yaml)
//! - Environment variables
//! - Command-line flags
//!
//! Precedence grows in that order. YAML keys are camelCase.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Providers the generation client factory knows how to build.
pub const KNOWN_PROVIDERS: [&str; 3] = ["ollama", "openai", "mock"];

/// Reranker strategies the reranker factory knows how to build.
pub const KNOWN_RERANKERS: [&str; 3] = ["none", "cross_encoder", "llm"];

/// Keywords that route a question to onboarding without a model call.
pub const DEFAULT_ONBOARDING_KEYWORDS: [&str; 18] = [
    "onboard",
    "onboarding",
    "new hire",
    "first day",
    "orientation",
    "equipment",
    "laptop",
    "account",
    "provision",
    "provisioning",
    "setup",
    "vpn",
    "email setup",
    "joining",
    "day 1",
    "paperwork",
    "access",
    "badge",
];

/// Main application configuration.
///
/// Holds every option the pipeline and its collaborators read. Built once at
/// startup and shared read-only afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .hrdesk/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Active generation provider (e.g., "ollama", "openai")
    pub provider: String,

    /// Active model identifier
    pub model: String,

    /// API key override for the generation provider
    pub api_key: Option<String>,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// Generation backend settings
    pub llm: LlmConfig,

    /// Query embedding settings
    pub embedding: EmbeddingConfig,

    /// Candidate store settings
    pub vector_store: VectorStoreConfig,

    /// Candidate fetch settings
    pub retriever: RetrieverConfig,

    /// Reranking settings
    pub reranker: RerankerConfig,

    /// Session memory settings
    pub memory: MemoryConfig,

    /// Role settings
    pub roles: RolesConfig,

    /// Route set and keyword rules
    pub routing: RoutingConfig,

    /// Orchestration settings
    pub pipeline: PipelineConfig,

    /// HTTP/WebSocket server settings
    pub server: ServerConfig,
}

/// Generation backend configuration from config.yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    pub active_provider: String,

    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub temperature: f32,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// System prompt sent with answer generation requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_output_tokens() -> u32 {
    2048
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            active_provider: "ollama".to_string(),
            providers: HashMap::new(),
            temperature: 0.0,
            max_output_tokens: default_max_output_tokens(),
            system_prompt: None,
        }
    }
}

/// Provider-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderConfig {
    OpenAI {
        #[serde(rename = "apiKeyEnv")]
        api_key_env: String,
        model: String,
        endpoint: Option<String>,
    },
    Ollama {
        endpoint: String,
        model: String,
        timeout: Option<u64>,
    },
}

impl ProviderConfig {
    /// Model configured for this provider.
    pub fn model(&self) -> &str {
        match self {
            ProviderConfig::OpenAI { model, .. } => model,
            ProviderConfig::Ollama { model, .. } => model,
        }
    }

    /// Endpoint configured for this provider, if any.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            ProviderConfig::OpenAI { endpoint, .. } => endpoint.as_deref(),
            ProviderConfig::Ollama { endpoint, .. } => Some(endpoint.as_str()),
        }
    }
}

/// Query embedding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmbeddingConfig {
    /// Provider name: "ollama" or "mock"
    pub provider: String,

    /// Model identifier (provider-specific)
    pub model: String,

    /// Embedding vector dimensions
    pub dimensions: usize,

    /// Optional endpoint override
    pub endpoint: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
            endpoint: None,
        }
    }
}

/// Candidate store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VectorStoreConfig {
    /// Store type: "milvus" or "memory"
    #[serde(rename = "type")]
    pub kind: String,

    /// Milvus REST endpoint
    pub endpoint: String,

    /// Collection holding the document chunks
    pub collection: String,

    /// Environment variable holding the bearer token (Zilliz Cloud)
    pub token_env: Option<String>,

    /// Vector field searched by the query embedding
    pub anns_field: String,

    /// Field holding the chunk text
    pub text_field: String,

    /// JSONL file with pre-chunked documents for the memory store
    pub documents_path: Option<PathBuf>,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            kind: "milvus".to_string(),
            endpoint: "http://127.0.0.1:19530".to_string(),
            collection: "hr_documents".to_string(),
            token_env: None,
            anns_field: "vector".to_string(),
            text_field: "text".to_string(),
            documents_path: None,
        }
    }
}

/// Candidate fetch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrieverConfig {
    /// Candidates fetched when no reranker overrides it; also the
    /// pass-through size when no reranker is configured
    pub k: usize,

    /// Filter expression passed verbatim to the store (empty = none)
    pub expr: String,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            k: 4,
            expr: String::new(),
        }
    }
}

/// Reranker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RerankerConfig {
    /// Strategy: "none", "cross_encoder" or "llm"
    #[serde(rename = "type")]
    pub kind: String,

    /// Scoring backend endpoint (cross_encoder)
    pub endpoint: Option<String>,

    /// Scoring model name, informational for the scoring backend
    pub model: Option<String>,

    /// Candidates fetched before reranking
    pub candidates: Option<usize>,

    /// Candidates kept after reranking
    pub top_n: Option<usize>,

    /// Pairs scored per scoring request
    pub batch_size: usize,

    /// Characters of candidate text shown to the judge
    pub snippet_chars: usize,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            kind: "none".to_string(),
            endpoint: None,
            model: None,
            candidates: None,
            top_n: None,
            batch_size: 64,
            snippet_chars: 1200,
        }
    }
}

/// Session memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    /// "conversation_buffer_window" enables memory, "none" disables it
    #[serde(rename = "type")]
    pub kind: String,

    /// Turns kept per session
    pub k: usize,

    /// Optional cap on live sessions
    pub max_sessions: Option<usize>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            kind: "conversation_buffer_window".to_string(),
            k: 10,
            max_sessions: None,
        }
    }
}

impl MemoryConfig {
    /// Whether session memory is enabled.
    pub fn enabled(&self) -> bool {
        self.kind == "conversation_buffer_window"
    }
}

/// Role configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RolesConfig {
    /// Role used when the caller supplies none
    pub default_role: String,

    /// Roles allowed to see restricted content, exposed to templates
    pub admin_roles: Vec<String>,
}

impl Default for RolesConfig {
    fn default() -> Self {
        Self {
            default_role: "employee".to_string(),
            admin_roles: vec!["admin".to_string(), "hr_manager".to_string()],
        }
    }
}

/// A keyword rule mapping question terms to a route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordRoute {
    pub route: String,
    pub keywords: Vec<String>,
}

/// Route set configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoutingConfig {
    /// Every route a question may be assigned
    pub routes: Vec<String>,

    /// Route used when classification fails or is out of set
    pub default_route: String,

    /// Keyword rules checked in order before the model fallback
    pub keyword_routes: Vec<KeywordRoute>,

    /// Per-route filter expressions overriding `retriever.expr`
    pub filters: HashMap<String, String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            routes: vec!["hr_policy".to_string(), "onboarding".to_string()],
            default_route: "hr_policy".to_string(),
            keyword_routes: vec![KeywordRoute {
                route: "onboarding".to_string(),
                keywords: DEFAULT_ONBOARDING_KEYWORDS
                    .iter()
                    .map(|k| k.to_string())
                    .collect(),
            }],
            filters: HashMap::new(),
        }
    }
}

/// Orchestration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PipelineConfig {
    /// Deadline applied to each external call
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    llm: Option<LlmConfig>,
    embedding: Option<EmbeddingConfig>,
    vector_store: Option<VectorStoreConfig>,
    retriever: Option<RetrieverConfig>,
    reranker: Option<RerankerConfig>,
    memory: Option<MemoryConfig>,
    roles: Option<RolesConfig>,
    routing: Option<RoutingConfig>,
    pipeline: Option<PipelineConfig>,
    server: Option<ServerConfig>,
    workspace: Option<WorkspaceConfig>,
    logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WorkspaceConfig {
    path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            provider: "ollama".to_string(), // Local-first default
            model: "llama3.2".to_string(),
            api_key: None,
            log_level: None,
            verbose: false,
            no_color: false,
            llm: LlmConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector_store: VectorStoreConfig::default(),
            retriever: RetrieverConfig::default(),
            reranker: RerankerConfig::default(),
            memory: MemoryConfig::default(),
            roles: RolesConfig::default(),
            routing: RoutingConfig::default(),
            pipeline: PipelineConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the config file, environment variables and defaults.
    ///
    /// Environment variables:
    /// - `HRDESK_WORKSPACE`: Override workspace path
    /// - `HRDESK_CONFIG`: Path to config file
    /// - `HRDESK_PROVIDER`: Generation provider
    /// - `HRDESK_MODEL`: Model identifier
    /// - `HRDESK_API_KEY`: API key
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    ///
    /// # Example
    /// ```no_run
    /// use hrdesk_core::config::AppConfig;
    ///
    /// let config = AppConfig::load().expect("Failed to load config");
    /// println!("Workspace: {:?}", config.workspace);
    /// ```
    pub fn load() -> AppResult<Self> {
        let workspace = std::env::var("HRDESK_WORKSPACE").ok().map(PathBuf::from);
        let config_file = std::env::var("HRDESK_CONFIG").ok().map(PathBuf::from);
        Self::load_from(workspace, config_file)
    }

    /// Load configuration for an explicit workspace and config file.
    ///
    /// `None` falls back to the current directory and to
    /// `<workspace>/.hrdesk/config.yaml`. Environment variables other than
    /// the two paths still override the file.
    pub fn load_from(workspace: Option<PathBuf>, config_file: Option<PathBuf>) -> AppResult<Self> {
        let mut config = Self::default();

        if let Some(workspace) = workspace {
            config.workspace = workspace;
        }
        config.config_file = config_file;

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = match config.config_file {
            Some(ref cf) => cf.clone(),
            None => config.hrdesk_dir().join("config.yaml"),
        };

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        } else if config.config_file.is_some() {
            return Err(AppError::Config(format!(
                "Config file does not exist: {:?}",
                config_path
            )));
        }

        // Environment variables override YAML config
        if let Ok(provider) = std::env::var("HRDESK_PROVIDER") {
            config.provider = provider;
        }

        if let Ok(model) = std::env::var("HRDESK_MODEL") {
            config.model = model;
        }

        config.api_key = std::env::var("HRDESK_API_KEY").ok();

        if let Ok(level) = std::env::var("RUST_LOG") {
            config.log_level = Some(level);
        }

        if std::env::var("NO_COLOR").is_ok() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge a YAML configuration file into a copy of this config.
    pub fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        self.merge_yaml_str(&contents)
            .map_err(|e| AppError::Config(format!("Failed to parse config file {:?}: {}", path, e)))
    }

    fn merge_yaml_str(&self, contents: &str) -> AppResult<Self> {
        let config_file: ConfigFile = serde_yaml::from_str(contents)?;
        let mut result = self.clone();

        if let Some(path) = config_file.workspace.and_then(|ws| ws.path) {
            result.workspace = PathBuf::from(path);
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        if let Some(llm) = config_file.llm {
            result.provider = llm.active_provider.clone();
            if let Some(provider_config) = llm.providers.get(&llm.active_provider) {
                result.model = provider_config.model().to_string();
            }
            result.llm = llm;
        }

        if let Some(embedding) = config_file.embedding {
            result.embedding = embedding;
        }
        if let Some(vector_store) = config_file.vector_store {
            result.vector_store = vector_store;
        }
        if let Some(retriever) = config_file.retriever {
            result.retriever = retriever;
        }
        if let Some(reranker) = config_file.reranker {
            result.reranker = reranker;
        }
        if let Some(memory) = config_file.memory {
            result.memory = memory;
        }
        if let Some(roles) = config_file.roles {
            result.roles = roles;
        }
        if let Some(routing) = config_file.routing {
            result.routing = routing;
        }
        if let Some(pipeline) = config_file.pipeline {
            result.pipeline = pipeline;
        }
        if let Some(server) = config_file.server {
            result.server = server;
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// Command-line flags take precedence over environment variables and the
    /// config file.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        provider: Option<String>,
        model: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(provider) = provider {
            self.provider = provider;
        }

        if let Some(model) = model {
            self.model = model;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Get the path to the .hrdesk directory.
    pub fn hrdesk_dir(&self) -> PathBuf {
        self.workspace.join(".hrdesk")
    }

    /// Path of the prompt set file.
    pub fn prompts_path(&self) -> PathBuf {
        self.hrdesk_dir().join("prompts.yaml")
    }

    /// Get the configuration block of a generation provider.
    pub fn get_provider_config(&self, provider: &str) -> Option<&ProviderConfig> {
        self.llm.providers.get(provider)
    }

    /// Endpoint of the active generation provider, if configured.
    pub fn resolve_endpoint(&self) -> Option<String> {
        self.get_provider_config(&self.provider)
            .and_then(|pc| pc.endpoint())
            .map(str::to_string)
    }

    /// Resolve the API key of a provider from the override or its environment variable.
    pub fn resolve_api_key(&self, provider: &str) -> Option<String> {
        if let Some(ref key) = self.api_key {
            return Some(key.clone());
        }

        match self.get_provider_config(provider) {
            Some(ProviderConfig::OpenAI { api_key_env, .. }) => std::env::var(api_key_env).ok(),
            _ => None,
        }
    }

    /// Number of candidates fetched from the store.
    pub fn candidate_count(&self) -> usize {
        self.reranker.candidates.unwrap_or(self.retriever.k)
    }

    /// Number of candidates kept after reranking.
    pub fn final_top_n(&self) -> usize {
        self.reranker.top_n.unwrap_or(self.retriever.k)
    }

    /// Validate configuration before the pipeline is built.
    pub fn validate(&self) -> AppResult<()> {
        let provider = self.provider.to_lowercase();
        if !KNOWN_PROVIDERS.contains(&provider.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown provider: {}. Supported: {}",
                self.provider,
                KNOWN_PROVIDERS.join(", ")
            )));
        }

        if let Some(ProviderConfig::OpenAI { api_key_env, .. }) =
            self.get_provider_config(&self.provider)
        {
            if self.api_key.is_none() && std::env::var(api_key_env).is_err() {
                return Err(AppError::Config(format!(
                    "API key not found in environment variable: {}",
                    api_key_env
                )));
            }
        }

        let reranker = self.reranker.kind.to_lowercase();
        if !KNOWN_RERANKERS.contains(&reranker.as_str()) {
            return Err(AppError::Config(format!(
                "Unknown reranker type: {}. Supported: {}",
                self.reranker.kind,
                KNOWN_RERANKERS.join(", ")
            )));
        }

        if !matches!(self.memory.kind.as_str(), "conversation_buffer_window" | "none") {
            return Err(AppError::Config(format!(
                "Unknown memory type: {}. Supported: conversation_buffer_window, none",
                self.memory.kind
            )));
        }

        if !matches!(self.vector_store.kind.as_str(), "milvus" | "memory") {
            return Err(AppError::Config(format!(
                "Unknown vector store type: {}. Supported: milvus, memory",
                self.vector_store.kind
            )));
        }

        if self.retriever.k == 0 || self.candidate_count() == 0 || self.final_top_n() == 0 {
            return Err(AppError::Config(
                "retriever.k, reranker.candidates and reranker.topN must be positive".to_string(),
            ));
        }

        if self.reranker.batch_size == 0 {
            return Err(AppError::Config(
                "reranker.batchSize must be positive".to_string(),
            ));
        }

        self.validate_routing()
    }

    fn validate_routing(&self) -> AppResult<()> {
        let routing = &self.routing;
        let known = |route: &str| routing.routes.iter().any(|r| r == route);

        if routing.routes.is_empty() {
            return Err(AppError::Config("routing.routes cannot be empty".to_string()));
        }

        if !known(&routing.default_route) {
            return Err(AppError::Config(format!(
                "Default route '{}' is not one of: {}",
                routing.default_route,
                routing.routes.join(", ")
            )));
        }

        for rule in &routing.keyword_routes {
            if !known(&rule.route) {
                return Err(AppError::Config(format!(
                    "Keyword rule targets unknown route '{}'",
                    rule.route
                )));
            }
        }

        for route in routing.filters.keys() {
            if !known(route) {
                return Err(AppError::Config(format!(
                    "Filter configured for unknown route '{}'",
                    route
                )));
            }
        }

        Ok(())
    }
}
