//! Candidate stores: similarity search over indexed document chunks.

pub mod filter;
pub mod memory;
pub mod milvus;

pub use filter::ChunkFilter;
pub use memory::InMemoryStore;
pub use milvus::MilvusStore;

use crate::embeddings::EmbeddingProvider;
use crate::types::Candidate;
use hrdesk_core::config::VectorStoreConfig;
use hrdesk_core::{AppError, AppResult};
use std::sync::Arc;

/// A similarity search request.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Query text
    pub query: String,

    /// Number of candidates to return
    pub k: usize,

    /// Store-specific filter expression, passed through unmodified
    pub filter: Option<String>,
}

impl FetchRequest {
    pub fn new(query: impl Into<String>, k: usize) -> Self {
        Self {
            query: query.into(),
            k,
            filter: None,
        }
    }

    /// Attach a filter; empty expressions mean no filter.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        let filter = filter.into();
        self.filter = (!filter.trim().is_empty()).then_some(filter);
        self
    }
}

/// Trait for candidate store backends.
///
/// Implementations return at most `k` candidates in descending similarity
/// order. No match is an empty list, not an error.
#[async_trait::async_trait]
pub trait CandidateStore: Send + Sync {
    /// Backend name (e.g. "milvus", "memory").
    fn name(&self) -> &str;

    async fn fetch(&self, request: &FetchRequest) -> AppResult<Vec<Candidate>>;
}

/// Create the configured candidate store.
pub async fn create_store(
    config: &VectorStoreConfig,
    embedder: Arc<dyn EmbeddingProvider>,
) -> AppResult<Arc<dyn CandidateStore>> {
    match config.kind.to_lowercase().as_str() {
        "milvus" => Ok(Arc::new(MilvusStore::new(config, embedder)?)),
        "memory" => {
            let store = match &config.documents_path {
                Some(path) => InMemoryStore::load_jsonl(path, embedder).await?,
                None => {
                    tracing::warn!("Memory store has no documentsPath; it will return no candidates");
                    InMemoryStore::new(embedder)
                }
            };
            Ok(Arc::new(store))
        }
        other => Err(AppError::Config(format!(
            "Unknown vector store type: {}. Supported: milvus, memory",
            other
        ))),
    }
}
