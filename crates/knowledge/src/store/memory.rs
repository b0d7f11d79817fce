//! In-process candidate store.
//!
//! Holds embedded chunks in memory and ranks them by cosine similarity.
//! Used for offline runs and tests; chunks come from a JSONL file with one
//! [`DocumentChunk`] per line.

use super::filter::ChunkFilter;
use super::{CandidateStore, FetchRequest};
use crate::embeddings::EmbeddingProvider;
use crate::types::{Candidate, DocumentChunk};
use hrdesk_core::{AppError, AppResult};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

/// Candidate store over embedded chunks held in memory.
#[derive(Debug)]
pub struct InMemoryStore {
    embedder: Arc<dyn EmbeddingProvider>,
    entries: Vec<(DocumentChunk, Vec<f32>)>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            entries: Vec::new(),
        }
    }

    /// Create a store holding `chunks`, embedding them up front.
    pub async fn from_chunks(
        embedder: Arc<dyn EmbeddingProvider>,
        chunks: Vec<DocumentChunk>,
    ) -> AppResult<Self> {
        let mut store = Self::new(embedder);
        store.insert(chunks).await?;
        Ok(store)
    }

    /// Load chunks from a JSONL file.
    pub async fn load_jsonl(path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> AppResult<Self> {
        let file = std::fs::File::open(path).map_err(|e| {
            AppError::Retrieval(format!("Failed to open documents file {:?}: {}", path, e))
        })?;

        let mut chunks = Vec::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            let chunk: DocumentChunk = serde_json::from_str(&line).map_err(|e| {
                AppError::Retrieval(format!(
                    "Failed to parse line {} of {:?}: {}",
                    line_num + 1,
                    path,
                    e
                ))
            })?;
            chunks.push(chunk);
        }

        tracing::info!("Loaded {} chunks from {:?}", chunks.len(), path);

        Self::from_chunks(embedder, chunks).await
    }

    /// Embed and append chunks. Insertion order breaks score ties.
    pub async fn insert(&mut self, chunks: Vec<DocumentChunk>) -> AppResult<()> {
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        if embeddings.len() != chunks.len() {
            return Err(AppError::Retrieval(format!(
                "Embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        self.entries.extend(chunks.into_iter().zip(embeddings));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait::async_trait]
impl CandidateStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch(&self, request: &FetchRequest) -> AppResult<Vec<Candidate>> {
        let filter = ChunkFilter::parse(request.filter.as_deref().unwrap_or_default())?;

        if request.k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let query = self.embedder.embed(&request.query).await?;

        let mut scored: Vec<Candidate> = self
            .entries
            .iter()
            .filter(|(chunk, _)| filter.matches(chunk))
            .map(|(chunk, embedding)| Candidate::new(chunk.clone(), cosine_similarity(&query, embedding)))
            .collect();

        // Stable sort keeps insertion order among equal scores
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(request.k);

        tracing::debug!(
            "Retrieved {} chunks (requested top-{})",
            scored.len(),
            request.k
        );

        Ok(scored)
    }
}

/// Cosine similarity; 0.0 for mismatched lengths or zero vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockProvider;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn chunks() -> Vec<DocumentChunk> {
        vec![
            DocumentChunk::new("Employees accrue vacation days every month.", "pto.pdf").with_page(1),
            DocumentChunk::new("Your badge is issued by security on day one.", "onboarding.pdf")
                .with_page(2),
            DocumentChunk::new("Vacation requests need manager approval.", "pto.pdf").with_page(3),
        ]
    }

    async fn store() -> InMemoryStore {
        InMemoryStore::from_chunks(Arc::new(MockProvider::new(256)), chunks())
            .await
            .unwrap()
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[tokio::test]
    async fn test_fetch_orders_by_similarity() {
        let store = store().await;
        let results = store
            .fetch(&FetchRequest::new("vacation days", 2))
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
        assert!(results.iter().all(|c| c.chunk.source == "pto.pdf"));
    }

    #[tokio::test]
    async fn test_fetch_is_idempotent() {
        let store = store().await;
        let request = FetchRequest::new("badge security", 3);

        let first = store.fetch(&request).await.unwrap();
        let second = store.fetch(&request).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_fetch_applies_filter() {
        let store = store().await;
        let request =
            FetchRequest::new("vacation", 5).with_filter(r#"source == "pto.pdf" and page == 3"#);

        let results = store.fetch(&request).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.page, Some(3));
    }

    #[tokio::test]
    async fn test_no_match_is_empty_not_error() {
        let store = store().await;
        let request = FetchRequest::new("vacation", 5).with_filter(r#"source == "missing.pdf""#);
        assert!(store.fetch(&request).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_filter_is_error() {
        let store = store().await;
        let request = FetchRequest::new("vacation", 5).with_filter("page >= 2");
        assert!(store.fetch(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_load_jsonl() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"content": "Payroll runs on the 25th.", "source": "payroll.md"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"text": "Benefits enrollment opens in May.", "source": "benefits.md", "page": 7}}"#).unwrap();

        let store = InMemoryStore::load_jsonl(file.path(), Arc::new(MockProvider::new(64)))
            .await
            .unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_load_jsonl_integer_chunk_id() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"text": "Leave is 20 days.", "source": "hr.pdf", "page": 3, "chunk_id": 5}}"#).unwrap();

        let store = InMemoryStore::load_jsonl(file.path(), Arc::new(MockProvider::new(64)))
            .await
            .unwrap();
        let results = store.fetch(&FetchRequest::new("leave", 1)).await.unwrap();
        assert_eq!(results[0].chunk.chunk_id, Some(5));
        assert_eq!(results[0].chunk.page, Some(3));
    }

    #[tokio::test]
    async fn test_load_jsonl_bad_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "not json").unwrap();

        let err = InMemoryStore::load_jsonl(file.path(), Arc::new(MockProvider::new(64)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}
