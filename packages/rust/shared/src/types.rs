//! Core domain types for SiteKB crawl jobs and retrieval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for crawl job identifiers (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// CrawlJob
// ---------------------------------------------------------------------------

/// Lifecycle state of a crawl job.
///
/// `Starting -> Processing -> {Completed | Failed | Cancelled}`. Terminal
/// states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Starting,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Snapshot of one crawl run, as stored in the job registry and returned
/// by the status endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlJob {
    #[serde(rename = "jobId")]
    pub id: JobId,
    pub status: JobStatus,
    /// Seed URL; defines crawl scope.
    pub base_url: String,
    /// Total visited-page budget.
    pub limit: usize,
    /// URLs visited (fetched or attempted) so far.
    pub progress: usize,
    /// Final visited count, set on completion.
    pub total_pages: usize,
    /// Pages fetched and written successfully.
    pub pages_ingested: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl CrawlJob {
    /// A fresh job in the `starting` state.
    pub fn new(base_url: impl Into<String>, limit: usize) -> Self {
        Self {
            id: JobId::new(),
            status: JobStatus::Starting,
            base_url: base_url.into(),
            limit,
            progress: 0,
            total_pages: 0,
            pages_ingested: 0,
            current_url: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// PageRecord
// ---------------------------------------------------------------------------

/// Content of one successfully fetched page. Consumed by ingestion and then dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub title: Option<String>,
    pub markdown: String,
    /// Same-site links discovered on the page, as absolute URLs.
    pub internal_links: Vec<String>,
}

// ---------------------------------------------------------------------------
// Retrieval
// ---------------------------------------------------------------------------

/// A chunk handed to the generator as context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDocument {
    pub page_content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One hit of the raw nearest-neighbor lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedMatch {
    pub id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Answer to one question plus the evidence behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub answer: String,
    pub context: Vec<ContextDocument>,
    pub retrieved: Vec<RetrievedMatch>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_display_and_parse() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().expect("parse");
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Starting.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn crawl_job_serializes_camel_case() {
        let job = CrawlJob::new("https://example.com", 3);
        let json = serde_json::to_value(&job).expect("serialize");
        assert_eq!(json["jobId"], job.id.to_string());
        assert_eq!(json["status"], "starting");
        assert_eq!(json["progress"], 0);
        assert_eq!(json["totalPages"], 0);
        assert_eq!(json["baseUrl"], "https://example.com");
        assert!(json.get("currentUrl").is_none());
        assert!(json.get("error").is_none());
    }
}
