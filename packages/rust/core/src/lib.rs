//! Crawl job orchestration and retrieval for SiteKB.
//!
//! This crate ties crawling, Markdown ingestion, archiving and the vector
//! index together: [`JobSupervisor`] runs crawl jobs in the background and
//! [`QueryEngine`] answers questions over what they indexed.

pub mod controller;
pub mod index;
pub mod providers;
pub mod query;
pub mod registry;
pub mod service;
pub mod sink;
pub mod supervisor;

pub use controller::CrawlJobController;
pub use index::{Document, VectorIndex, VectorStore};
pub use providers::{Embedder, Generator, OpenAiClient, QA_SYSTEM_PROMPT};
pub use query::{NO_CONTEXT_ANSWER, QueryEngine};
pub use registry::JobRegistry;
pub use service::SiteKb;
pub use sink::{IngestReport, IngestionSink};
pub use supervisor::{CancelOutcome, JobSupervisor, validate_seed};
