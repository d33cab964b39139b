//! Embedding-backed document store over a namespaced vector index.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use sitekb_shared::{ContextDocument, Result, SiteKbError};
use sitekb_storage::{IndexRecord, IndexStore, ScoredRecord};

use crate::providers::Embedder;

/// Namespaced nearest-neighbor index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace records by id. Returns the number written.
    async fn upsert(&self, namespace: &str, records: &[IndexRecord]) -> Result<usize>;

    /// Drop every record whose `metadata.source` is `source`, then write `records`.
    async fn replace_source(
        &self,
        namespace: &str,
        source: &str,
        records: &[IndexRecord],
    ) -> Result<usize>;

    /// Best `top_k` matches for `vector`, highest score first.
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        include_values: bool,
    ) -> Result<Vec<ScoredRecord>>;
}

#[async_trait]
impl VectorIndex for IndexStore {
    async fn upsert(&self, namespace: &str, records: &[IndexRecord]) -> Result<usize> {
        IndexStore::upsert(self, namespace, records).await
    }

    async fn replace_source(
        &self,
        namespace: &str,
        source: &str,
        records: &[IndexRecord],
    ) -> Result<usize> {
        IndexStore::replace_source(self, namespace, source, records).await
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        include_values: bool,
    ) -> Result<Vec<ScoredRecord>> {
        IndexStore::query(self, namespace, vector, top_k, include_values).await
    }
}

/// A text chunk ready for embedding, keyed by a stable id.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub metadata: Value,
}

/// Embeds documents on the way in and queries on the way out.
pub struct VectorStore {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    namespace: String,
}

impl VectorStore {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            embedder,
            index,
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn index(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Embed and upsert `docs`. Re-adding a document with the same id replaces it.
    #[instrument(skip_all, fields(namespace = %self.namespace, docs = docs.len()))]
    pub async fn add_documents(&self, docs: &[Document]) -> Result<usize> {
        if docs.is_empty() {
            return Ok(0);
        }

        let records = self.embed(docs).await?;
        let written = self.index.upsert(&self.namespace, &records).await?;
        debug!(written, "documents indexed");
        Ok(written)
    }

    /// Make `docs` the only indexed documents for `source`.
    ///
    /// Earlier documents from the same source are removed even when `docs`
    /// is shorter or empty.
    #[instrument(skip_all, fields(namespace = %self.namespace, %source, docs = docs.len()))]
    pub async fn replace_documents(&self, source: &str, docs: &[Document]) -> Result<usize> {
        let records = if docs.is_empty() {
            Vec::new()
        } else {
            self.embed(docs).await?
        };
        let written = self
            .index
            .replace_source(&self.namespace, source, &records)
            .await?;
        debug!(written, "source reindexed");
        Ok(written)
    }

    async fn embed(&self, docs: &[Document]) -> Result<Vec<IndexRecord>> {
        let texts: Vec<String> = docs.iter().map(|d| d.text.clone()).collect();
        let vectors = self.embedder.embed_documents(&texts).await?;
        if vectors.len() != docs.len() {
            return Err(SiteKbError::Provider(format!(
                "embedder returned {} vectors for {} documents",
                vectors.len(),
                docs.len()
            )));
        }

        Ok(docs
            .iter()
            .zip(vectors)
            .map(|(doc, embedding)| IndexRecord {
                id: doc.id.clone(),
                text: doc.text.clone(),
                metadata: doc.metadata.clone(),
                embedding,
            })
            .collect())
    }

    /// The `k` stored chunks most similar to `query`, as generator context.
    pub async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<ContextDocument>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed_query(query).await?;
        let hits = self.index.query(&self.namespace, &vector, k, false).await?;
        Ok(hits
            .into_iter()
            .map(|hit| ContextDocument {
                page_content: hit.text,
                metadata: hit.metadata,
            })
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Deterministic stand-ins for the provider seams.

    use super::*;
    use crate::providers::Generator;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Bag-of-letters embedding: similar spellings give similar vectors.
    pub struct LetterEmbedder;

    pub fn letter_vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 26];
        for c in text.to_ascii_lowercase().chars() {
            if c.is_ascii_lowercase() {
                v[(c as u8 - b'a') as usize] += 1.0;
            }
        }
        v
    }

    #[async_trait]
    impl Embedder for LetterEmbedder {
        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            Ok(letter_vector(text))
        }

        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| letter_vector(t)).collect())
        }
    }

    /// Embedder that always fails.
    pub struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
            Err(SiteKbError::Provider("embedding service unavailable".into()))
        }

        async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(SiteKbError::Provider("embedding service unavailable".into()))
        }
    }

    /// Generator that echoes how much context it saw.
    #[derive(Default)]
    pub struct EchoGenerator {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, question: &str, context: &[ContextDocument]) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{question} ({} docs)", context.len()))
        }
    }

    pub async fn temp_index(label: &str) -> (Arc<IndexStore>, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("sitekb-{label}-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = IndexStore::open(&dir.join("index.db")).await.unwrap();
        (Arc::new(store), dir)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;

    fn doc(id: &str, text: &str) -> Document {
        Document {
            id: id.into(),
            text: text.into(),
            metadata: json!({ "source": format!("https://example.com/{id}") }),
        }
    }

    #[tokio::test]
    async fn add_then_search_returns_nearest_first() {
        let (index, dir) = temp_index("vs-search").await;
        let store = VectorStore::new(Arc::new(LetterEmbedder), index.clone(), "docs");

        let written = store
            .add_documents(&[doc("a", "aaaa"), doc("b", "bbbb"), doc("ab", "aabb")])
            .await
            .unwrap();
        assert_eq!(written, 3);

        let results = store.similarity_search("aaa", 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].page_content, "aaaa");
        assert_eq!(results[0].metadata["source"], "https://example.com/a");
        assert_eq!(results[1].page_content, "aabb");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn re_adding_same_id_replaces() {
        let (index, dir) = temp_index("vs-replace").await;
        let store = VectorStore::new(Arc::new(LetterEmbedder), index.clone(), "docs");

        store.add_documents(&[doc("a", "old text")]).await.unwrap();
        store.add_documents(&[doc("a", "new text")]).await.unwrap();

        assert_eq!(index.count("docs").await.unwrap(), 1);
        let results = store.similarity_search("new text", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].page_content, "new text");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn replace_documents_scopes_to_one_source() {
        let (index, dir) = temp_index("vs-source").await;
        let store = VectorStore::new(Arc::new(LetterEmbedder), index.clone(), "docs");

        store
            .add_documents(&[doc("a", "alpha"), doc("b", "beta")])
            .await
            .unwrap();
        let written = store
            .replace_documents("https://example.com/a", &[doc("a", "apple")])
            .await
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(index.count("docs").await.unwrap(), 2);

        store
            .replace_documents("https://example.com/a", &[])
            .await
            .unwrap();
        assert_eq!(index.count("docs").await.unwrap(), 1);
        let results = store.similarity_search("beta", 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].metadata["source"], "https://example.com/b");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn empty_inputs_short_circuit() {
        let (index, dir) = temp_index("vs-empty").await;
        let store = VectorStore::new(Arc::new(BrokenEmbedder), index, "docs");

        assert_eq!(store.add_documents(&[]).await.unwrap(), 0);
        assert!(store.similarity_search("anything", 0).await.unwrap().is_empty());
        assert!(store.similarity_search("anything", 3).await.is_err());

        std::fs::remove_dir_all(&dir).ok();
    }
}
