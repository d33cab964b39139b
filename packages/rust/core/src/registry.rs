//! Shared, concurrency-safe store of crawl job snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use sitekb_shared::{CrawlJob, JobId, JobStatus};

/// Mapping from job id to the latest [`CrawlJob`] snapshot.
///
/// Cheap to clone; every clone sees the same jobs. Jobs are never removed.
/// Once a job reaches a terminal status further updates are ignored, and
/// `progress` never moves backwards.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<JobId, CrawlJob>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job in the `starting` state and return its snapshot.
    pub async fn create(&self, base_url: &str, limit: usize) -> CrawlJob {
        let job = CrawlJob::new(base_url, limit);
        self.jobs.write().await.insert(job.id, job.clone());
        debug!(job_id = %job.id, base_url, limit, "job registered");
        job
    }

    pub async fn get(&self, id: &JobId) -> Option<CrawlJob> {
        self.jobs.read().await.get(id).cloned()
    }

    /// All jobs, newest first.
    pub async fn list(&self) -> Vec<CrawlJob> {
        let mut jobs: Vec<_> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.id.0.cmp(&a.id.0));
        jobs
    }

    /// Enter (or stay in) `processing` just before fetching `current_url`.
    pub async fn mark_processing(&self, id: &JobId, progress: usize, current_url: &str) -> bool {
        self.update(id, |job| {
            job.status = JobStatus::Processing;
            job.progress = job.progress.max(progress.min(job.limit));
            job.current_url = Some(current_url.to_string());
        })
        .await
    }

    /// Count one more page written and indexed.
    pub async fn record_ingested(&self, id: &JobId) -> bool {
        self.update(id, |job| job.pages_ingested += 1).await
    }

    pub async fn mark_completed(&self, id: &JobId, total_pages: usize) -> bool {
        self.update(id, |job| {
            job.status = JobStatus::Completed;
            job.progress = job.progress.max(total_pages);
            job.total_pages = total_pages;
            job.current_url = None;
            job.finished_at = Some(Utc::now());
        })
        .await
    }

    pub async fn mark_failed(&self, id: &JobId, reason: &str) -> bool {
        self.update(id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(reason.to_string());
            job.current_url = None;
            job.finished_at = Some(Utc::now());
        })
        .await
    }

    pub async fn mark_cancelled(&self, id: &JobId) -> bool {
        self.update(id, |job| {
            job.status = JobStatus::Cancelled;
            job.current_url = None;
            job.finished_at = Some(Utc::now());
        })
        .await
    }

    /// Apply `f` to a non-terminal job. Returns whether the update happened.
    async fn update(&self, id: &JobId, f: impl FnOnce(&mut CrawlJob)) -> bool {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(id) {
            Some(job) if job.status.is_terminal() => {
                warn!(job_id = %id, status = %job.status, "ignoring update to finished job");
                false
            }
            Some(job) => {
                f(job);
                true
            }
            None => {
                warn!(job_id = %id, "update for unknown job");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_and_get() {
        let registry = JobRegistry::new();
        let job = registry.create("https://example.com", 3).await;

        let fetched = registry.get(&job.id).await.unwrap();
        assert_eq!(fetched.status, JobStatus::Starting);
        assert_eq!(fetched.progress, 0);
        assert_eq!(fetched.limit, 3);
        assert!(registry.get(&JobId::new()).await.is_none());
    }

    #[tokio::test]
    async fn progress_never_decreases() {
        let registry = JobRegistry::new();
        let job = registry.create("https://example.com", 5).await;

        registry.mark_processing(&job.id, 2, "https://example.com/b").await;
        registry.mark_processing(&job.id, 1, "https://example.com/a").await;
        let snapshot = registry.get(&job.id).await.unwrap();
        assert_eq!(snapshot.progress, 2);
        assert_eq!(snapshot.current_url.as_deref(), Some("https://example.com/a"));

        registry.mark_processing(&job.id, 99, "https://example.com/c").await;
        assert_eq!(registry.get(&job.id).await.unwrap().progress, 5);
    }

    #[tokio::test]
    async fn terminal_states_are_absorbing() {
        let registry = JobRegistry::new();
        let job = registry.create("https://example.com", 2).await;

        assert!(registry.mark_completed(&job.id, 2).await);
        assert!(!registry.mark_processing(&job.id, 0, "https://example.com").await);
        assert!(!registry.mark_failed(&job.id, "late error").await);
        assert!(!registry.mark_cancelled(&job.id).await);

        let snapshot = registry.get(&job.id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.total_pages, 2);
        assert_eq!(snapshot.progress, 2);
        assert!(snapshot.current_url.is_none());
        assert!(snapshot.error.is_none());
        assert!(snapshot.finished_at.is_some());
    }

    #[tokio::test]
    async fn failure_records_reason() {
        let registry = JobRegistry::new();
        let job = registry.create("https://example.com", 1).await;
        registry.mark_processing(&job.id, 0, "https://example.com").await;
        registry.mark_failed(&job.id, "disk full").await;

        let snapshot = registry.get(&job.id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("disk full"));
        assert!(snapshot.current_url.is_none());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_clones_share_state() {
        let registry = JobRegistry::new();
        let first = registry.create("https://a.example", 1).await;
        let second = registry.clone().create("https://b.example", 1).await;

        let ids: Vec<_> = registry.list().await.into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn concurrent_readers_see_consistent_snapshots() {
        let registry = JobRegistry::new();
        let job = registry.create("https://example.com", 100).await;

        let writer = {
            let registry = registry.clone();
            tokio::spawn(async move {
                for i in 0..100 {
                    registry
                        .mark_processing(&job.id, i, &format!("https://example.com/{i}"))
                        .await;
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut last = 0;
        for _ in 0..200 {
            let snapshot = registry.get(&job.id).await.unwrap();
            assert!(snapshot.progress >= last, "progress went backwards");
            assert!(snapshot.progress <= snapshot.limit);
            last = snapshot.progress;
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
    }
}
