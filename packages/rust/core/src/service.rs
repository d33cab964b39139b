//! Wiring of config into a running set of services.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, instrument};

use sitekb_crawler::build_fetcher;
use sitekb_shared::{AppConfig, Result};
use sitekb_storage::IndexStore;

use crate::controller::CrawlJobController;
use crate::index::VectorStore;
use crate::providers::{Embedder, Generator, OpenAiClient};
use crate::query::QueryEngine;
use crate::registry::JobRegistry;
use crate::supervisor::JobSupervisor;

/// Everything the HTTP surface and the CLI need, built once per process.
#[derive(Clone)]
pub struct SiteKb {
    pub config: Arc<AppConfig>,
    pub supervisor: Arc<JobSupervisor>,
    pub query: Arc<QueryEngine>,
}

impl SiteKb {
    /// Build services using the configured OpenAI-compatible provider.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let provider = Arc::new(OpenAiClient::from_settings(&config.provider)?);
        Self::with_providers(config, provider.clone(), provider).await
    }

    /// Build services around the given embedding and generation providers.
    #[instrument(skip_all, fields(db = %config.index.database_path, output = %config.crawl.output_dir))]
    pub async fn with_providers(
        config: AppConfig,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let index = Arc::new(IndexStore::open(&PathBuf::from(&config.index.database_path)).await?);
        let store = Arc::new(VectorStore::new(embedder, index, &config.index.namespace));

        let fetcher = build_fetcher(&config.crawl)?;
        let controller = CrawlJobController::new(
            JobRegistry::new(),
            fetcher,
            store.clone(),
            &config.crawl.output_dir,
        );
        let supervisor = Arc::new(JobSupervisor::new(controller, config.crawl.max_limit));
        let query = Arc::new(QueryEngine::new(store, generator, config.query.clone()));

        info!(namespace = %config.index.namespace, backend = ?config.crawl.backend, "services ready");
        Ok(Self {
            config: Arc::new(config),
            supervisor,
            query,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::testing::*;
    use crate::query::NO_CONTEXT_ANSWER;
    use sitekb_shared::JobStatus;

    fn test_config(root: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.index.database_path = root.join("index.db").display().to_string();
        config.crawl.output_dir = root.join("output").display().to_string();
        config.crawl.allow_private_hosts = true;
        config.crawl.request_timeout_secs = 5;
        config
    }

    #[tokio::test]
    async fn empty_index_answers_without_context() {
        let root = std::env::temp_dir().join(format!("sitekb-svc-{}", uuid::Uuid::now_v7()));
        let kb = SiteKb::with_providers(
            test_config(&root),
            Arc::new(LetterEmbedder),
            Arc::new(EchoGenerator::default()),
        )
        .await
        .unwrap();

        let result = kb.query.answer("hello").await.unwrap();
        assert_eq!(result.answer, NO_CONTEXT_ANSWER);

        std::fs::remove_dir_all(&root).ok();
    }

    #[tokio::test]
    async fn crawl_then_ask_end_to_end() {
        let server = wiremock::MockServer::start().await;
        let home = r#"<html><head><title>Widget Docs</title></head><body><main>
            <h1>Widget Docs</h1><p>Widgets are small gadgets.</p>
            <a href="/install">Install</a></main></body></html>"#;
        let install = r#"<html><head><title>Install</title></head><body><main>
            <h1>Install</h1><h2>Steps</h2><p>Run the widget installer.</p>
            <a href="/">Home</a></main></body></html>"#;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/"))
            .respond_with(
                wiremock::ResponseTemplate::new(200).set_body_raw(home, "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/install"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_raw(install, "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let root = std::env::temp_dir().join(format!("sitekb-e2e-{}", uuid::Uuid::now_v7()));
        let kb = SiteKb::with_providers(
            test_config(&root),
            Arc::new(LetterEmbedder),
            Arc::new(EchoGenerator::default()),
        )
        .await
        .unwrap();

        let job = kb
            .supervisor
            .submit(&format!("{}/", server.uri()), 5)
            .await
            .unwrap();
        let done = kb.supervisor.wait(&job.id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed, "{:?}", done.error);
        assert_eq!(done.total_pages, 2);
        assert_eq!(done.pages_ingested, 2);

        let entries = sitekb_artifacts::list_archive(&kb.supervisor.archive_path(&job.id)).unwrap();
        assert_eq!(entries, vec!["install_install.md", "widget_docs.md"]);

        let result = kb.query.answer("widget installer").await.unwrap();
        assert!(!result.context.is_empty());
        assert!(!result.retrieved.is_empty());
        assert!(result.retrieved[0].metadata["source"]
            .as_str()
            .unwrap()
            .starts_with(&server.uri()));

        std::fs::remove_dir_all(&root).ok();
    }
}
