//! Launches crawl jobs in the background and tracks them to completion.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, instrument};
use url::Url;

use sitekb_shared::{CrawlJob, JobId, Result, SiteKbError};

use crate::controller::CrawlJobController;
use crate::registry::JobRegistry;

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of [`JobSupervisor::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was running and has been asked to stop.
    Requested,
    /// The job already reached a terminal state.
    AlreadyFinished,
    NotFound,
}

/// Accepts crawl submissions, runs each as its own task and supports
/// cancellation and graceful shutdown.
pub struct JobSupervisor {
    controller: Arc<CrawlJobController>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    running: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
    max_limit: usize,
}

impl JobSupervisor {
    pub fn new(controller: CrawlJobController, max_limit: usize) -> Self {
        Self {
            controller: Arc::new(controller),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            running: Arc::new(Mutex::new(HashMap::new())),
            max_limit,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        self.controller.registry()
    }

    pub fn max_limit(&self) -> usize {
        self.max_limit
    }

    /// Archive location for a job, whether or not it exists yet.
    pub fn archive_path(&self, id: &JobId) -> PathBuf {
        self.controller.archive_path(id)
    }

    /// Validate the request, register a job and start it in the background.
    ///
    /// Returns the job snapshot as registered, before any work has happened.
    #[instrument(skip(self))]
    pub async fn submit(&self, url: &str, limit: usize) -> Result<CrawlJob> {
        let seed = validate_seed(url)?;
        if limit > self.max_limit {
            return Err(SiteKbError::validation(format!(
                "limit {limit} exceeds the maximum of {}",
                self.max_limit
            )));
        }
        if self.tracker.is_closed() {
            return Err(SiteKbError::validation("server is shutting down"));
        }

        let job = self.controller.registry().create(&seed, limit).await;
        let token = self.shutdown.child_token();
        self.running.lock().await.insert(job.id, token.clone());

        let controller = self.controller.clone();
        let running = self.running.clone();
        let task_job = job.clone();
        self.tracker.spawn(async move {
            let id = task_job.id;
            controller.run(task_job, token).await;
            running.lock().await.remove(&id);
        });

        info!(job_id = %job.id, "crawl job submitted");
        Ok(job)
    }

    /// Ask a running job to stop. The job records `cancelled` once its
    /// task observes the request.
    pub async fn cancel(&self, id: &JobId) -> CancelOutcome {
        match self.registry().get(id).await {
            None => return CancelOutcome::NotFound,
            Some(job) if job.status.is_terminal() => return CancelOutcome::AlreadyFinished,
            Some(_) => {}
        }
        match self.running.lock().await.get(id) {
            Some(token) => {
                token.cancel();
                info!(job_id = %id, "cancellation requested");
                CancelOutcome::Requested
            }
            None => CancelOutcome::AlreadyFinished,
        }
    }

    /// Poll until the job reaches a terminal state. `None` for unknown ids.
    pub async fn wait(&self, id: &JobId) -> Option<CrawlJob> {
        loop {
            let job = self.registry().get(id).await?;
            if job.status.is_terminal() {
                return Some(job);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Cancel every running job, refuse new ones and wait for tasks to exit.
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.shutdown.cancel();
        self.tracker.wait().await;
        info!("all crawl jobs stopped");
    }
}

/// Accept only absolute http(s) URLs with a host. Returns the canonical form.
pub fn validate_seed(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SiteKbError::validation("url is required"));
    }
    let url = Url::parse(raw).map_err(|e| SiteKbError::validation(format!("invalid url {raw:?}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SiteKbError::validation(format!(
            "unsupported url scheme {:?}",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(SiteKbError::validation("url must include a host"));
    }
    Ok(url.to_string())
}
