//! Embedding and answer-generation providers.
//!
//! Both seams are traits so the query path and the ingestion sink can be
//! exercised without a network. [`OpenAiClient`] implements both against any
//! OpenAI-compatible HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use sitekb_shared::{ContextDocument, ProviderSettings, Result, SiteKbError, resolve_api_key};

/// System prompt for grounded answers. `{context}` is replaced with the
/// retrieved documents.
pub const QA_SYSTEM_PROMPT: &str =
    "Answer any use questions based solely on the context below:\n\n<context>\n{context}\n</context>";

/// Texts per embeddings request.
const EMBED_BATCH_SIZE: usize = 64;

const PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

/// Turns text into fixed-length vectors.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// One vector per input, in input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Produces a natural-language answer from a question and supporting documents.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, question: &str, context: &[ContextDocument]) -> Result<String>;
}

/// Render the system prompt with `context` stuffed in, separated by blank lines.
pub fn render_system_prompt(context: &[ContextDocument]) -> String {
    let joined = context
        .iter()
        .map(|doc| doc.page_content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    QA_SYSTEM_PROMPT.replace("{context}", &joined)
}

// ---------------------------------------------------------------------------
// OpenAI-compatible client
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Client for `/embeddings` and `/chat/completions` on an OpenAI-compatible API.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    embedding_model: String,
    chat_model: String,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(settings: &ProviderSettings, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(PROVIDER_TIMEOUT)
            .build()
            .map_err(|e| SiteKbError::Provider(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            embedding_model: settings.embedding_model.clone(),
            chat_model: settings.chat_model.clone(),
            temperature: settings.temperature,
        })
    }

    /// Build a client using the API key from the configured env var.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self> {
        let api_key = resolve_api_key(settings)?;
        Self::new(settings, api_key)
    }

    async fn post<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let response = self
            .http
            .post(format!("{}/{path}", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .send()
            .await
            .map_err(|e| SiteKbError::Provider(format!("{path} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SiteKbError::Provider(format!(
                "{path} returned {status}: {text}"
            )));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| SiteKbError::Provider(format!("{path} response malformed: {e}")))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: texts,
        };
        let response: EmbeddingResponse = self.post("embeddings", &request).await?;

        if response.data.len() != texts.len() {
            return Err(SiteKbError::Provider(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| SiteKbError::Provider("empty embeddings response".into()))
    }

    #[instrument(skip_all, fields(texts = texts.len(), model = %self.embedding_model))]
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        debug!(vectors = vectors.len(), "documents embedded");
        Ok(vectors)
    }
}

#[async_trait]
impl Generator for OpenAiClient {
    #[instrument(skip_all, fields(model = %self.chat_model, context_docs = context.len()))]
    async fn generate(&self, question: &str, context: &[ContextDocument]) -> Result<String> {
        let request = ChatRequest {
            model: &self.chat_model,
            temperature: self.temperature,
            messages: vec![
                ChatMessage {
                    role: "system".into(),
                    content: render_system_prompt(context),
                },
                ChatMessage {
                    role: "user".into(),
                    content: question.to_string(),
                },
            ],
        };

        let response: ChatResponse = self.post("chat/completions", &request).await?;
        response
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| SiteKbError::Provider("chat completion returned no choices".into()))
    }
}
