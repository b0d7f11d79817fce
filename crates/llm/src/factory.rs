//! LLM provider factory.
//!
//! Creates LLM clients from the provider name and resolved settings.

use crate::client::LlmClient;
use crate::providers::{MockClient, OllamaClient, OpenAiClient, DEFAULT_OPENAI_BASE_URL};
use crate::types::ProviderType;
use hrdesk_core::config::ProviderConfig;
use hrdesk_core::{AppConfig, AppError, AppResult};
use std::sync::Arc;
use std::time::Duration;

/// Create an LLM client based on the provider name.
///
/// # Arguments
/// * `provider` - Provider identifier ("ollama", "openai", "mock")
/// * `endpoint` - Optional custom endpoint URL
/// * `api_key` - Optional API key (sent as a bearer token to OpenAI-compatible servers)
///
/// # Errors
/// Returns a configuration error if the provider is unknown.
pub fn create_client(
    provider: &str,
    endpoint: Option<&str>,
    api_key: Option<&str>,
) -> AppResult<Arc<dyn LlmClient>> {
    let provider_type = ProviderType::parse(provider)
        .ok_or_else(|| AppError::Config(format!("Unknown provider: {}", provider)))?;

    let client: Arc<dyn LlmClient> = match provider_type {
        ProviderType::Ollama => Arc::new(OllamaClient::with_base_url(
            endpoint.unwrap_or("http://localhost:11434"),
        )),
        ProviderType::OpenAI => Arc::new(OpenAiClient::new(
            endpoint.unwrap_or(DEFAULT_OPENAI_BASE_URL),
            api_key.map(str::to_string),
        )),
        ProviderType::Mock => Arc::new(MockClient::new()),
    };

    Ok(client)
}

/// Create the client for the active provider of a loaded configuration.
///
/// An Ollama `timeout` (seconds) in the provider block bounds connecting
/// and each read, not the length of a streamed answer.
pub fn create_client_from_config(config: &AppConfig) -> AppResult<Arc<dyn LlmClient>> {
    let endpoint = config.resolve_endpoint();
    let api_key = config.resolve_api_key(&config.provider);

    tracing::debug!(
        provider = %config.provider,
        endpoint = endpoint.as_deref().unwrap_or("default"),
        "Creating LLM client"
    );

    match config.get_provider_config(&config.provider) {
        Some(ProviderConfig::Ollama {
            endpoint,
            timeout: Some(secs),
            ..
        }) if ProviderType::parse(&config.provider) == Some(ProviderType::Ollama) => Ok(Arc::new(
            OllamaClient::with_base_url(endpoint.as_str()).with_timeout(Duration::from_secs(*secs)),
        )),
        _ => create_client(&config.provider, endpoint.as_deref(), api_key.as_deref()),
    }
}
