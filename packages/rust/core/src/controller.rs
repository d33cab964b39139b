//! Runs one crawl job from seed URL to downloadable archive.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use sitekb_artifacts::{ARCHIVE_EXTENSION, pack_directory};
use sitekb_crawler::{FetchOutcome, Frontier, PageFetcher};
use sitekb_shared::{CrawlJob, JobId, JobStatus, Result, SiteKbError};

use crate::index::VectorStore;
use crate::registry::JobRegistry;
use crate::sink::IngestionSink;

/// How the crawl loop ended.
enum CrawlExit {
    Exhausted { visited: usize },
    Cancelled,
}

/// Drives the fetch → ingest → enqueue loop for a job and records its
/// lifecycle in the [`JobRegistry`].
pub struct CrawlJobController {
    registry: JobRegistry,
    fetcher: Arc<dyn PageFetcher>,
    store: Arc<VectorStore>,
    output_root: PathBuf,
}

impl CrawlJobController {
    pub fn new(
        registry: JobRegistry,
        fetcher: Arc<dyn PageFetcher>,
        store: Arc<VectorStore>,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            registry,
            fetcher,
            store,
            output_root: output_root.into(),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Working directory for a job's Markdown files.
    pub fn output_dir(&self, id: &JobId) -> PathBuf {
        self.output_root.join(format!("output_{id}"))
    }

    /// Where a completed job's archive is written.
    pub fn archive_path(&self, id: &JobId) -> PathBuf {
        self.output_root
            .join(format!("output_{id}.{ARCHIVE_EXTENSION}"))
    }

    /// Run `job` to a terminal state and return that state.
    ///
    /// Per-page failures are logged and skipped. Only setup and packaging
    /// errors fail the job. Cancellation is honored between pages and while
    /// a fetch is in flight.
    #[instrument(skip_all, fields(job_id = %job.id, base_url = %job.base_url))]
    pub async fn run(&self, job: CrawlJob, cancel: CancellationToken) -> JobStatus {
        let started = Instant::now();
        info!(limit = job.limit, "crawl started");

        let status = match self.crawl(&job, &cancel).await {
            Ok(CrawlExit::Exhausted { visited }) => match self.finalize(&job.id).await {
                Ok(()) => {
                    self.registry.mark_completed(&job.id, visited).await;
                    JobStatus::Completed
                }
                Err(e) => self.fail(&job.id, &e).await,
            },
            Ok(CrawlExit::Cancelled) => {
                let out_dir = self.output_dir(&job.id);
                if let Err(e) = tokio::fs::remove_dir_all(&out_dir).await {
                    debug!(error = %e, "no partial output to remove");
                }
                self.registry.mark_cancelled(&job.id).await;
                JobStatus::Cancelled
            }
            Err(e) => self.fail(&job.id, &e).await,
        };

        info!(
            status = %status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "crawl finished"
        );
        status
    }

    async fn crawl(&self, job: &CrawlJob, cancel: &CancellationToken) -> Result<CrawlExit> {
        let out_dir = self.output_dir(&job.id);
        tokio::fs::create_dir_all(&out_dir)
            .await
            .map_err(|e| SiteKbError::io(&out_dir, e))?;

        let sink = IngestionSink::new(out_dir, &job.base_url, self.store.clone());
        let mut frontier = Frontier::new(&job.base_url, job.limit);

        while frontier.has_work() {
            if cancel.is_cancelled() {
                return Ok(CrawlExit::Cancelled);
            }
            let Some(url) = frontier.next() else {
                break;
            };

            self.registry
                .mark_processing(&job.id, frontier.visited_count(), &url)
                .await;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(CrawlExit::Cancelled),
                outcome = self.fetcher.fetch(&url) => outcome,
            };
            frontier.mark_visited(&url);

            match outcome {
                FetchOutcome::Fetched(page) => {
                    match sink.ingest(&page).await {
                        Ok(report) => {
                            self.registry.record_ingested(&job.id).await;
                            debug!(%url, file = %report.path.display(), chunks = report.chunks, "page ingested");
                        }
                        Err(e) => warn!(%url, error = %e, "ingestion failed, continuing"),
                    }

                    let queued = page
                        .internal_links
                        .iter()
                        .filter(|link| frontier.offer(link))
                        .count();
                    debug!(%url, queued, pending = frontier.pending_count(), "links queued");
                }
                FetchOutcome::Failed { reason } => {
                    warn!(%url, %reason, "fetch failed, continuing");
                }
            }
        }

        Ok(CrawlExit::Exhausted {
            visited: frontier.visited_count(),
        })
    }

    /// Archive the output directory, then remove it.
    async fn finalize(&self, id: &JobId) -> Result<()> {
        let out_dir = self.output_dir(id);
        let summary = pack_directory(&out_dir, &self.archive_path(id)).await?;
        tokio::fs::remove_dir_all(&out_dir)
            .await
            .map_err(|e| SiteKbError::io(&out_dir, e))?;
        debug!(files = summary.files, "output directory archived");
        Ok(())
    }

    async fn fail(&self, id: &JobId, error: &SiteKbError) -> JobStatus {
        warn!(error = %error, "crawl failed");
        self.registry.mark_failed(id, &error.to_string()).await;
        JobStatus::Failed
    }
}
