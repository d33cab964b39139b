//! Shared types, error model, and configuration for SiteKB.
//!
//! This crate is the foundation depended on by all other SiteKB crates.
//! It provides:
//! - [`SiteKbError`]: the unified error type
//! - Domain types ([`CrawlJob`], [`JobStatus`], [`PageRecord`], [`RetrievalResult`])
//! - Configuration ([`AppConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlBackend, CrawlSettings, IndexSettings, ProviderSettings, QuerySettings,
    ServerSettings, config_dir, config_file_path, init_config, load_config, load_config_from,
    resolve_api_key,
};
pub use error::{Result, SiteKbError};
pub use types::{
    ContextDocument, CrawlJob, JobId, JobStatus, PageRecord, RetrievalResult, RetrievedMatch,
};
