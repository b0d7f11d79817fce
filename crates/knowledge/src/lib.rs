//! Retrieval for hrdesk.
//!
//! Provides the candidate side of the pipeline:
//! - Query embedding providers (Ollama, deterministic mock)
//! - Candidate stores (Milvus REST, in-memory)
//! - Rerankers (batch cross-encoder, generation-model judge)

pub mod embeddings;
pub mod rerank;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use embeddings::{create_provider, EmbeddingProvider, MockProvider};
pub use rerank::{build_reranker, truncate_candidates, Reranker};
pub use store::{create_store, CandidateStore, FetchRequest, InMemoryStore, MilvusStore};
pub use types::{Candidate, DocumentChunk, ScoredCandidate};
