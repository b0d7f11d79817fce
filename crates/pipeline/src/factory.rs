//! Wiring of a [`Pipeline`] from configuration.

use crate::memory::SessionStore;
use crate::orchestrator::{Pipeline, PipelineSettings};
use crate::route::{RouteSet, Router};
use hrdesk_core::config::VectorStoreConfig;
use hrdesk_core::{AppConfig, AppResult};
use hrdesk_knowledge::{build_reranker, create_provider, create_store};
use hrdesk_llm::create_client_from_config;
use hrdesk_prompt::{ensure_route_templates, PromptSet};
use std::sync::Arc;
use std::time::Duration;

/// Build the pipeline described by `config`.
///
/// Every configuration problem (unknown provider or reranker, missing route
/// template, keyword rule naming an unknown route) is reported here, before
/// any question is answered.
pub async fn build_pipeline(config: &AppConfig, prompts: &PromptSet) -> AppResult<Pipeline> {
    config.validate()?;

    let routes = RouteSet::from_config(&config.routing)?;
    ensure_route_templates(prompts, routes.names())?;

    let llm = create_client_from_config(config)?;
    let embedder = create_provider(&config.embedding)?;
    let store = create_store(&resolve_store_paths(config), embedder).await?;
    let reranker = build_reranker(config, Some(Arc::clone(&llm)))?;

    let settings = PipelineSettings::from_config(config);
    let router = Router::new(
        routes,
        &config.routing.keyword_routes,
        prompts.router.clone(),
        Arc::clone(&llm),
        config.model.clone(),
    )?
    .with_timeout(Duration::from_secs(config.pipeline.timeout_secs));

    tracing::info!(
        provider = llm.provider_name(),
        model = %config.model,
        store = store.name(),
        reranker = reranker.as_ref().map(|r| r.name()).unwrap_or("none"),
        memory = config.memory.enabled(),
        "Pipeline ready"
    );

    Ok(Pipeline::new(router, store, llm, prompts.clone())?
        .with_reranker(reranker)
        .with_memory(Arc::new(SessionStore::from_config(&config.memory)))
        .with_settings(settings))
}

/// Resolve a relative documents path against the workspace.
fn resolve_store_paths(config: &AppConfig) -> VectorStoreConfig {
    let mut store = config.vector_store.clone();
    if let Some(path) = &store.documents_path {
        if path.is_relative() {
            store.documents_path = Some(config.workspace.join(path));
        }
    }
    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChatRequest;
    use std::io::Write;

    fn offline_config(workspace: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.workspace = workspace.to_path_buf();
        config.provider = "mock".to_string();
        config.embedding.provider = "mock".to_string();
        config.embedding.dimensions = 64;
        config.vector_store.kind = "memory".to_string();
        config
    }

    #[test]
    fn test_relative_documents_path_is_resolved() {
        let mut config = AppConfig::default();
        config.workspace = std::path::PathBuf::from("/srv/hrdesk");
        config.vector_store.documents_path = Some("docs/chunks.jsonl".into());

        let store = resolve_store_paths(&config);
        assert_eq!(
            store.documents_path.unwrap(),
            std::path::PathBuf::from("/srv/hrdesk/docs/chunks.jsonl")
        );
    }

    #[tokio::test]
    async fn test_build_offline_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("chunks.jsonl")).unwrap();
        writeln!(
            file,
            r#"{{"text": "Badges are issued by security on your first day.", "source": "onboarding.pdf", "page": 2}}"#
        )
        .unwrap();

        let mut config = offline_config(dir.path());
        config.vector_store.documents_path = Some("chunks.jsonl".into());

        let pipeline = build_pipeline(&config, &PromptSet::default()).await.unwrap();
        let result = pipeline
            .answer_once(&ChatRequest::new("Where do I get my badge?").with_user("u1"))
            .await
            .unwrap();

        assert_eq!(result.route, "onboarding");
        assert_eq!(result.answer, "mock response");
        assert_eq!(pipeline.memory().history("u1").len(), 2);
    }

    #[tokio::test]
    async fn test_missing_route_template_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = offline_config(dir.path());
        config.routing.routes.push("benefits".to_string());

        let err = build_pipeline(&config, &PromptSet::default())
            .await
            .err()
            .unwrap();
        assert!(err.is_config());
        assert!(err.to_string().contains("benefits"));
    }

    #[tokio::test]
    async fn test_unknown_provider_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = offline_config(dir.path());
        config.provider = "bard".to_string();

        let err = build_pipeline(&config, &PromptSet::default())
            .await
            .err()
            .unwrap();
        assert!(err.is_config());
    }
}
