//! Question answering over the indexed crawl output.

use std::sync::Arc;

use tracing::{debug, instrument};

use sitekb_shared::{
    ContextDocument, QuerySettings, Result, RetrievalResult, RetrievedMatch, SiteKbError,
};

use crate::index::VectorStore;
use crate::providers::Generator;

/// Returned instead of calling the generator when nothing was retrieved.
pub const NO_CONTEXT_ANSWER: &str =
    "I could not find any relevant information in the indexed documents to answer that question.";

/// Answers questions from retrieved chunks and reports the raw matches.
pub struct QueryEngine {
    store: Arc<VectorStore>,
    generator: Arc<dyn Generator>,
    settings: QuerySettings,
}

impl QueryEngine {
    pub fn new(store: Arc<VectorStore>, generator: Arc<dyn Generator>, settings: QuerySettings) -> Self {
        Self {
            store,
            generator,
            settings,
        }
    }

    /// Answer `question`.
    ///
    /// Runs two retrievals concurrently: `retriever_k` documents feed the
    /// generator, and a separate `top_k` lookup is reported as `retrieved`.
    /// Any provider or index failure fails the whole call.
    #[instrument(skip_all, fields(question_len = question.len()))]
    pub async fn answer(&self, question: &str) -> Result<RetrievalResult> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SiteKbError::validation("query is required"));
        }

        let ((answer, context), retrieved) =
            tokio::try_join!(self.grounded_answer(question), self.nearest_matches(question))?;

        debug!(
            context_docs = context.len(),
            matches = retrieved.len(),
            "question answered"
        );
        Ok(RetrievalResult {
            answer,
            context,
            retrieved,
        })
    }

    async fn grounded_answer(
        &self,
        question: &str,
    ) -> Result<(String, Vec<ContextDocument>)> {
        let context = self
            .store
            .similarity_search(question, self.settings.retriever_k)
            .await?;
        if context.is_empty() {
            return Ok((NO_CONTEXT_ANSWER.to_string(), context));
        }
        let answer = self.generator.generate(question, &context).await?;
        Ok((answer, context))
    }

    async fn nearest_matches(&self, question: &str) -> Result<Vec<RetrievedMatch>> {
        if self.settings.top_k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.store.embedder().embed_query(question).await?;
        let hits = self
            .store
            .index()
            .query(self.store.namespace(), &vector, self.settings.top_k, false)
            .await?;
        Ok(hits
            .into_iter()
            .map(|hit| RetrievedMatch {
                id: hit.id,
                score: hit.score,
                metadata: hit.metadata,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Document;
    use crate::index::testing::*;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn settings(top_k: usize, retriever_k: usize) -> QuerySettings {
        QuerySettings { top_k, retriever_k }
    }

    async fn seeded_store(label: &str) -> (Arc<VectorStore>, std::path::PathBuf) {
        let (index, dir) = temp_index(label).await;
        let store = Arc::new(VectorStore::new(Arc::new(LetterEmbedder), index, "docs"));
        let docs: Vec<Document> = ["aaaa", "aabb", "bbbb", "cccc", "abcd", "dddd"]
            .iter()
            .map(|text| Document {
                id: format!("id-{text}"),
                text: text.to_string(),
                metadata: json!({ "source": format!("https://example.com/{text}") }),
            })
            .collect();
        store.add_documents(&docs).await.unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn answer_uses_retriever_k_context_and_top_k_matches() {
        let (store, dir) = seeded_store("query-answer").await;
        let generator = Arc::new(EchoGenerator::default());
        let engine = QueryEngine::new(store, generator.clone(), settings(5, 4));

        let result = engine.answer("aaa").await.unwrap();

        assert_eq!(result.answer, "aaa (4 docs)");
        assert_eq!(result.context.len(), 4);
        assert_eq!(result.context[0].page_content, "aaaa");
        assert_eq!(result.retrieved.len(), 5);
        assert_eq!(result.retrieved[0].id, "id-aaaa");
        assert_eq!(result.retrieved[0].metadata["source"], "https://example.com/aaaa");
        assert!(result.retrieved[0].score >= result.retrieved[1].score);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn empty_index_skips_generation() {
        let (index, dir) = temp_index("query-empty").await;
        let store = Arc::new(VectorStore::new(Arc::new(LetterEmbedder), index, "docs"));
        let generator = Arc::new(EchoGenerator::default());
        let engine = QueryEngine::new(store, generator.clone(), settings(5, 4));

        let result = engine.answer("anything at all").await.unwrap();
        assert_eq!(result.answer, NO_CONTEXT_ANSWER);
        assert!(result.context.is_empty());
        assert!(result.retrieved.is_empty());
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let (store, dir) = seeded_store("query-blank").await;
        let engine = QueryEngine::new(store, Arc::new(EchoGenerator::default()), settings(5, 4));

        let err = engine.answer("   ").await.unwrap_err();
        assert!(matches!(err, SiteKbError::Validation { .. }));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn provider_failure_propagates() {
        let (index, dir) = temp_index("query-broken").await;
        let store = Arc::new(VectorStore::new(Arc::new(BrokenEmbedder), index, "docs"));
        let engine = QueryEngine::new(store, Arc::new(EchoGenerator::default()), settings(5, 4));

        let err = engine.answer("what is this?").await.unwrap_err();
        assert!(err.to_string().contains("embedding service unavailable"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
