//! Request handlers.

use axum::Json;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::io::ReaderStream;
use tracing::{info, instrument};

use sitekb_core::{CancelOutcome, SiteKb};
use sitekb_shared::{CrawlJob, JobId, JobStatus, RetrievalResult};

use crate::error::ApiError;

/// Filename offered to browsers for a job archive.
pub const DOWNLOAD_FILENAME: &str = "crawl_results.tar.gz";

#[derive(Debug, Deserialize)]
pub struct CrawlRequest {
    #[serde(default)]
    pub url: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlAccepted {
    pub job_id: JobId,
    pub status: JobStatus,
    pub progress: usize,
    pub total_pages: usize,
}

#[derive(Debug, Deserialize)]
pub struct RagRequest {
    #[serde(default)]
    pub query: String,
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::NotFound(format!("job {raw} not found")))
}

async fn find_job(kb: &SiteKb, raw: &str) -> Result<CrawlJob, ApiError> {
    let id = parse_job_id(raw)?;
    kb.supervisor
        .registry()
        .get(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("job {raw} not found")))
}

/// `POST /api/crawl`
#[instrument(skip_all)]
pub async fn start_crawl(
    State(kb): State<SiteKb>,
    payload: Result<Json<CrawlRequest>, JsonRejection>,
) -> Result<Json<CrawlAccepted>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let limit = request.limit.unwrap_or(kb.config.crawl.default_limit);

    let job = kb.supervisor.submit(&request.url, limit).await?;
    info!(job_id = %job.id, url = %job.base_url, limit, "crawl accepted");

    Ok(Json(CrawlAccepted {
        job_id: job.id,
        status: job.status,
        progress: job.progress,
        total_pages: job.total_pages,
    }))
}

/// `GET /api/status/{job_id}`
pub async fn job_status(
    State(kb): State<SiteKb>,
    Path(job_id): Path<String>,
) -> Result<Json<CrawlJob>, ApiError> {
    Ok(Json(find_job(&kb, &job_id).await?))
}

/// `GET /api/jobs`
pub async fn list_jobs(State(kb): State<SiteKb>) -> Json<Vec<CrawlJob>> {
    Json(kb.supervisor.registry().list().await)
}

/// `DELETE /api/crawl/{job_id}`
pub async fn cancel_crawl(
    State(kb): State<SiteKb>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_job_id(&job_id)?;
    match kb.supervisor.cancel(&id).await {
        CancelOutcome::Requested => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "jobId": id, "status": "cancelling" })),
        )),
        CancelOutcome::AlreadyFinished => {
            Err(ApiError::Conflict(format!("job {id} has already finished")))
        }
        CancelOutcome::NotFound => Err(ApiError::NotFound(format!("job {id} not found"))),
    }
}

/// `GET /api/download/{job_id}`
pub async fn download(
    State(kb): State<SiteKb>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let job = find_job(&kb, &job_id).await?;
    if job.status != JobStatus::Completed {
        return Err(ApiError::BadRequest(format!(
            "job {} is {}, not completed",
            job.id, job.status
        )));
    }

    let path = kb.supervisor.archive_path(&job.id);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound(format!("archive for job {} not found", job.id)));
        }
        Err(e) => return Err(ApiError::Internal(format!("{}: {e}", path.display()))),
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/gzip"));
    let disposition = format!("attachment; filename=\"{DOWNLOAD_FILENAME}\"");
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition).map_err(|e| ApiError::Internal(e.to_string()))?,
    );
    if let Ok(meta) = file.metadata().await {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.len()));
    }

    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

/// `POST /api/rag`
#[instrument(skip_all)]
pub async fn rag(
    State(kb): State<SiteKb>,
    payload: Result<Json<RagRequest>, JsonRejection>,
) -> Result<Json<RetrievalResult>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let result = kb
        .query
        .answer(&request.query)
        .await
        .map_err(ApiError::from_query)?;
    Ok(Json(result))
}

/// `GET /health`
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
