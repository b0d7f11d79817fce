//! Milvus candidate store over the REST v2 API.
//!
//! Milvus REST: https://milvus.io/api-reference/restful/v2.4.x/v2/Vector%20(v2)/Search.md
//!
//! The query is embedded locally and searched against the configured vector
//! field. The filter expression is handed to Milvus verbatim.

use super::{CandidateStore, FetchRequest};
use crate::embeddings::EmbeddingProvider;
use crate::types::{Candidate, DocumentChunk};
use hrdesk_core::config::VectorStoreConfig;
use hrdesk_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::instrument;

const SEARCH_ENDPOINT: &str = "/v2/vectordb/entities/search";

/// Metadata fields requested alongside the text field.
const METADATA_FIELDS: [&str; 4] = ["source", "path", "page", "chunk_id"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest<'a> {
    collection_name: &'a str,
    data: Vec<Vec<f32>>,
    anns_field: &'a str,
    limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<&'a str>,
    output_fields: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Vec<Map<String, Value>>,
}

/// Candidate store backed by a Milvus (or Zilliz Cloud) collection.
#[derive(Debug)]
pub struct MilvusStore {
    client: reqwest::Client,
    endpoint: String,
    collection: String,
    anns_field: String,
    text_field: String,
    token: Option<String>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl MilvusStore {
    /// Create a store. The token is read from `tokenEnv` when configured.
    pub fn new(config: &VectorStoreConfig, embedder: Arc<dyn EmbeddingProvider>) -> AppResult<Self> {
        let token = match &config.token_env {
            Some(var) => Some(std::env::var(var).map_err(|_| {
                AppError::Config(format!("Milvus token not found in environment variable: {}", var))
            })?),
            None => None,
        };

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            anns_field: config.anns_field.clone(),
            text_field: config.text_field.clone(),
            token,
            embedder,
        })
    }

    fn search_body<'a>(&'a self, vector: Vec<f32>, request: &'a FetchRequest) -> SearchRequest<'a> {
        let mut output_fields = vec![self.text_field.as_str()];
        output_fields.extend(METADATA_FIELDS);

        SearchRequest {
            collection_name: &self.collection,
            data: vec![vector],
            anns_field: &self.anns_field,
            limit: request.k,
            filter: request.filter.as_deref(),
            output_fields,
        }
    }

    /// Map a search hit to a candidate; hits without text are skipped.
    fn hit_to_candidate(&self, hit: &Map<String, Value>) -> Option<Candidate> {
        let content = hit.get(&self.text_field)?.as_str()?.to_string();
        let string_field = |name: &str| {
            hit.get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_default()
        };

        let chunk = DocumentChunk {
            content,
            source: string_field("source"),
            path: string_field("path"),
            page: hit.get("page").and_then(page_number),
            chunk_id: hit.get("chunk_id").and_then(integer_field),
        };

        let score = hit.get("distance").and_then(Value::as_f64).unwrap_or(0.0) as f32;
        Some(Candidate::new(chunk, score))
    }
}

/// Pages may be stored as integers or numeric strings.
fn page_number(value: &Value) -> Option<u32> {
    integer_field(value).and_then(|p| u32::try_from(p).ok())
}

fn integer_field(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[async_trait::async_trait]
impl CandidateStore for MilvusStore {
    fn name(&self) -> &str {
        "milvus"
    }

    #[instrument(skip(self, request), fields(collection = %self.collection, k = request.k))]
    async fn fetch(&self, request: &FetchRequest) -> AppResult<Vec<Candidate>> {
        if request.k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(&request.query).await?;
        let url = format!("{}{}", self.endpoint, SEARCH_ENDPOINT);

        let mut builder = self.client.post(&url).json(&self.search_body(vector, request));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AppError::Retrieval(format!("Failed to reach Milvus at {}: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Retrieval(format!(
                "Milvus API error ({}): {}",
                status, error_text
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| AppError::Retrieval(format!("Failed to parse Milvus response: {}", e)))?;

        if body.code != 0 {
            return Err(AppError::Retrieval(format!(
                "Milvus search failed (code {}): {}",
                body.code,
                body.message.unwrap_or_default()
            )));
        }

        let candidates: Vec<Candidate> = body
            .data
            .iter()
            .filter_map(|hit| self.hit_to_candidate(hit))
            .take(request.k)
            .collect();

        tracing::debug!("Milvus returned {} candidates", candidates.len());

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::MockProvider;
    use serde_json::json;

    fn store() -> MilvusStore {
        MilvusStore::new(&VectorStoreConfig::default(), Arc::new(MockProvider::new(4))).unwrap()
    }

    #[test]
    fn test_search_body_passes_filter_verbatim() {
        let store = store();
        let request = FetchRequest::new("q", 20).with_filter(r#"source like "pto%""#);
        let body = serde_json::to_value(store.search_body(vec![0.5; 4], &request)).unwrap();

        assert_eq!(body["collectionName"], "hr_documents");
        assert_eq!(body["annsField"], "vector");
        assert_eq!(body["limit"], 20);
        assert_eq!(body["filter"], r#"source like "pto%""#);
        assert_eq!(body["outputFields"][0], "text");
        assert_eq!(body["data"][0].as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_search_body_without_filter() {
        let store = store();
        let body =
            serde_json::to_value(store.search_body(vec![0.0; 4], &FetchRequest::new("q", 4)))
                .unwrap();
        assert!(body.get("filter").is_none());
    }

    #[test]
    fn test_hit_mapping() {
        let store = store();
        let hit = json!({
            "distance": 0.83,
            "id": 42,
            "text": "Badges are issued on day one.",
            "source": "onboarding.pdf",
            "page": "2",
            "chunk_id": 7
        });

        let candidate = store.hit_to_candidate(hit.as_object().unwrap()).unwrap();
        assert_eq!(candidate.chunk.content, "Badges are issued on day one.");
        assert_eq!(candidate.chunk.page, Some(2));
        assert_eq!(candidate.chunk.chunk_id, Some(7));
        assert!((candidate.score - 0.83).abs() < 1e-6);

        let textless = json!({"distance": 0.5, "source": "x"});
        assert!(store.hit_to_candidate(textless.as_object().unwrap()).is_none());
    }

    #[test]
    fn test_missing_token_env_is_config_error() {
        let config = VectorStoreConfig {
            token_env: Some("HRDESK_TEST_MILVUS_TOKEN_UNSET".to_string()),
            ..VectorStoreConfig::default()
        };
        let err = MilvusStore::new(&config, Arc::new(MockProvider::new(4))).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_error_response_shape() {
        let body: SearchResponse =
            serde_json::from_str(r#"{"code": 1100, "message": "collection not found"}"#).unwrap();
        assert_eq!(body.code, 1100);
        assert!(body.data.is_empty());
    }
}
