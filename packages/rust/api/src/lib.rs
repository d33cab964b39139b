//! HTTP surface for SiteKB: crawl submission, job status, archive download
//! and retrieval-augmented questions.

pub mod error;
pub mod routes;

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use sitekb_core::SiteKb;
use sitekb_shared::{Result, SiteKbError};

pub use error::ApiError;

/// Build the application router over shared services.
pub fn router(kb: SiteKb) -> Router {
    Router::new()
        .route("/api/crawl", post(routes::start_crawl))
        .route("/api/crawl/{job_id}", delete(routes::cancel_crawl))
        .route("/api/status/{job_id}", get(routes::job_status))
        .route("/api/download/{job_id}", get(routes::download))
        .route("/api/jobs", get(routes::list_jobs))
        .route("/api/rag", post(routes::rag))
        .route("/health", get(routes::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(kb)
}

/// Serve until `shutdown` resolves, then stop crawl jobs and return.
pub async fn serve(
    kb: SiteKb,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| SiteKbError::Network(format!("failed to bind {addr}: {e}")))?;
    info!(%addr, "listening");

    let supervisor = kb.supervisor.clone();
    axum::serve(listener, router(kb))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| SiteKbError::Network(format!("server error: {e}")))?;

    info!("server stopped, waiting for crawl jobs");
    supervisor.shutdown().await;
    Ok(())
}
