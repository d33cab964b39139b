//! Error types for SiteKB.
//!
//! Library crates use [`SiteKbError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all SiteKB operations.
#[derive(Debug, thiserror::Error)]
pub enum SiteKbError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while crawling or talking to a model provider.
    #[error("network error: {0}")]
    Network(String),

    /// HTML or response-body parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or vector index error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Embedding or generation provider error (bad status, malformed reply).
    #[error("provider error: {0}")]
    Provider(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (bad URL, limit out of range, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// HTML-to-Markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Archive packaging error.
    #[error("archive error: {0}")]
    Archive(String),

    /// A referenced entity (job, artifact) does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SiteKbError>;

impl SiteKbError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = SiteKbError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = SiteKbError::validation("limit 500 exceeds max_limit 100");
        assert!(err.to_string().contains("max_limit 100"));

        let err = SiteKbError::io(
            "/tmp/out",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(err.to_string().contains("/tmp/out"));
    }
}
