//! Per-page ingestion: write the Markdown file, then chunk and index it.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use sitekb_crawler::page_filename;
use sitekb_markdown::split_by_h2;
use sitekb_shared::{PageRecord, Result, SiteKbError};

use crate::index::{Document, VectorStore};

/// What one [`IngestionSink::ingest`] call produced.
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub path: PathBuf,
    pub chunks: usize,
}

/// Writes pages of one job into its output directory and the shared index.
pub struct IngestionSink {
    output_dir: PathBuf,
    base_url: String,
    store: Arc<VectorStore>,
}

impl IngestionSink {
    pub fn new(output_dir: impl Into<PathBuf>, base_url: &str, store: Arc<VectorStore>) -> Self {
        Self {
            output_dir: output_dir.into(),
            base_url: base_url.to_string(),
            store,
        }
    }

    /// Persist `page` as `<title>[_<path>].md` and index its H2 sections.
    ///
    /// Pages mapping to an existing filename overwrite it. Any chunks already
    /// indexed for the page URL are dropped before the new ones are written.
    #[instrument(skip_all, fields(url = %page.url))]
    pub async fn ingest(&self, page: &PageRecord) -> Result<IngestReport> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| SiteKbError::io(&self.output_dir, e))?;

        let filename = page_filename(page.title.as_deref(), &page.url, &self.base_url);
        let path = self.output_dir.join(&filename);
        tokio::fs::write(&path, &page.markdown)
            .await
            .map_err(|e| SiteKbError::io(&path, e))?;
        debug!(file = %filename, "page written");

        let docs = chunk_documents(page);
        let chunks = self.store.replace_documents(&page.url, &docs).await?;

        Ok(IngestReport { path, chunks })
    }
}

/// Split a page on H2 headings into indexable documents.
pub fn chunk_documents(page: &PageRecord) -> Vec<Document> {
    split_by_h2(&page.markdown)
        .into_iter()
        .enumerate()
        .map(|(ordinal, chunk)| {
            let mut metadata = Map::new();
            metadata.insert("source".into(), Value::String(page.url.clone()));
            if let Some(heading) = chunk.heading {
                metadata.insert("section".into(), Value::String(heading));
            }
            Document {
                id: chunk_id(&page.url, ordinal),
                text: chunk.text,
                metadata: Value::Object(metadata),
            }
        })
        .collect()
}

fn chunk_id(url: &str, ordinal: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(b"#");
    hasher.update(ordinal.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}
