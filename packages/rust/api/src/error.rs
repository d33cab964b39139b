//! HTTP error mapping.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use sitekb_shared::SiteKbError;

/// Error returned by handlers; renders as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    /// A model provider or the index failed while answering.
    Upstream(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::BadRequest(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Upstream(m)
            | Self::Internal(m) => m,
        }
    }

    /// Map a query-path error: client mistakes stay 4xx, everything else is 502.
    pub fn from_query(err: SiteKbError) -> Self {
        match err {
            SiteKbError::Validation { message } => Self::BadRequest(message),
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<SiteKbError> for ApiError {
    fn from(err: SiteKbError) -> Self {
        match err {
            SiteKbError::Validation { message } => Self::BadRequest(message),
            SiteKbError::NotFound(what) => Self::NotFound(what),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = self.message(), "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = self.message(), "request rejected");
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}
