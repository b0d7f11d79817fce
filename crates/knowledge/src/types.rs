//! Retrieval data types.

use serde::{Deserialize, Serialize};

/// A passage of an ingested document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    /// Passage text
    #[serde(alias = "text", alias = "page_content")]
    pub content: String,

    /// Document name (e.g. "handbook.pdf")
    #[serde(default)]
    pub source: String,

    /// Document path as ingested
    #[serde(default)]
    pub path: String,

    /// Page number, when the document has pages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,

    /// Position of the chunk within its document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<u64>,
}

impl DocumentChunk {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            content: content.into(),
            path: source.clone(),
            source,
            page: None,
            chunk_id: None,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_chunk_id(mut self, chunk_id: u64) -> Self {
        self.chunk_id = Some(chunk_id);
        self
    }

    /// Path if known, otherwise the source name.
    pub fn display_path(&self) -> &str {
        if self.path.is_empty() {
            &self.source
        } else {
            &self.path
        }
    }
}

/// A chunk returned by a candidate store with its similarity score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub chunk: DocumentChunk,

    /// Store-specific similarity (higher is closer)
    pub score: f32,
}

impl Candidate {
    pub fn new(chunk: DocumentChunk, score: f32) -> Self {
        Self { chunk, score }
    }

    pub fn text(&self) -> &str {
        &self.chunk.content
    }
}

/// A candidate after reranking.
///
/// `rerank_score` is on the reranker's own scale and is not comparable with
/// the retrieval score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub rerank_score: f32,
}

impl ScoredCandidate {
    pub fn new(candidate: Candidate, rerank_score: f32) -> Self {
        Self {
            candidate,
            rerank_score,
        }
    }

    pub fn chunk(&self) -> &DocumentChunk {
        &self.candidate.chunk
    }
}

/// Order scored candidates by descending rerank score.
///
/// Ties keep no particular order.
pub fn sort_by_rerank_score(scored: &mut [ScoredCandidate]) {
    scored.sort_unstable_by(|a, b| b.rerank_score.total_cmp(&a.rerank_score));
}
