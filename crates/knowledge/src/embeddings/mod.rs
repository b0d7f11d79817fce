//! Query embedding providers.
//!
//! Candidate stores that search by vector embed the query text with one of
//! these providers before searching.

pub mod provider;
pub mod providers;

pub use provider::{create_provider, EmbeddingProvider};
pub use providers::{MockProvider, OllamaProvider};
