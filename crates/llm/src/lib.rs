//! Generation backends for hrdesk.
//!
//! This crate provides a provider-agnostic abstraction for talking to
//! Large Language Models: full completions, incremental (streaming)
//! completions, and structured completions parsed into typed values.
//!
//! # Providers
//! - **Ollama**: Local LLM runtime (default)
//! - **OpenAI**: api.openai.com and compatible servers
//! - **Mock**: In-process client for tests and offline runs
//!
//! # Example
//! ```no_run
//! use hrdesk_llm::{LlmClient, LlmRequest, providers::OllamaClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = OllamaClient::new();
//! let request = LlmRequest::new("Hello, world!", "llama3.2");
//! let response = client.complete(&request).await?;
//! println!("{}", response.content);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod factory;
pub mod providers;
pub mod structured;
pub mod types;

// Re-export main types
pub use client::{LlmClient, LlmRequest, LlmResponse, LlmStream, LlmStreamChunk, LlmUsage};
pub use factory::{create_client, create_client_from_config};
pub use providers::{MockClient, OllamaClient, OpenAiClient};
pub use structured::{complete_structured, parse_structured, Structured, StructuredSchema};
pub use types::ProviderType;
