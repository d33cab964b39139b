//! Crawl frontier, URL normalization, and page fetcher backends.
//!
//! This crate provides:
//! - [`normalize`]: URL and title tokens used for output filenames
//! - [`frontier`]: per-job pending/visited sets, scope and page budget
//! - [`fetcher`]: the [`PageFetcher`] boundary with HTTP and crawl-service backends

pub mod fetcher;
pub mod frontier;
pub mod normalize;

use std::sync::Arc;
use std::time::Duration;

use sitekb_shared::{CrawlBackend, CrawlSettings, Result};

pub use fetcher::{FetchOutcome, HttpFetcher, InternalLink, PageFetcher, ServiceFetcher};
pub use frontier::{Frontier, Scope};
pub use normalize::{DEFAULT_TITLE, clean_title, normalize_path, page_filename};

/// Build the fetcher selected by the `[crawl]` config section.
pub fn build_fetcher(settings: &CrawlSettings) -> Result<Arc<dyn PageFetcher>> {
    let timeout = Duration::from_secs(settings.request_timeout_secs);
    let fetcher: Arc<dyn PageFetcher> = match settings.backend {
        CrawlBackend::Http => Arc::new(
            HttpFetcher::new(timeout)?.allow_private_hosts(settings.allow_private_hosts),
        ),
        CrawlBackend::Service => Arc::new(ServiceFetcher::new(&settings.service_url, timeout)?),
    };
    tracing::debug!(backend = ?settings.backend, "page fetcher ready");
    Ok(fetcher)
}
