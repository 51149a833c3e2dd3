//! Error types for the request execution core.
//!
//! Every failure surfaced by the pipeline, batch engine, retry transport and
//! caches is expressed as a [`SpRestError`]. Only throttling (429) and
//! service-unavailable (503) responses are ever recovered locally; everything
//! else propagates to the immediate caller untouched.

use crate::network::HttpResponse;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for sprest operations.
#[derive(Debug, Error)]
pub enum SpRestError {
    // Transport errors
    #[error("HTTP {status} {status_text}")]
    Http {
        status: u16,
        status_text: String,
        /// The raw response, body included.
        response: Box<HttpResponse>,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    // Batch errors
    #[error("Batch response could not be parsed: {message}")]
    BatchParse { message: String },

    #[error("Batch {batch_id} failed: {message}")]
    BatchFailed { batch_id: String, message: String },

    #[error("Batch {batch_id} is already executing and no longer accepts requests")]
    BatchClosed { batch_id: String },

    #[error("This query is already part of a batch")]
    AlreadyInBatch,

    // Authentication context errors
    #[error("Unable to determine API url from {url}")]
    ApiUrl { url: String },

    #[error("Failed to retrieve context information for {web_url}: {message}")]
    ContextInfo { web_url: String, message: String },

    // Parsing errors
    #[error("Failed to parse response: {message}")]
    Parse { message: String },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Storage errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for sprest operations.
pub type Result<T> = std::result::Result<T, SpRestError>;

impl From<std::io::Error> for SpRestError {
    fn from(err: std::io::Error) -> Self {
        SpRestError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for SpRestError {
    fn from(err: serde_json::Error) -> Self {
        SpRestError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for SpRestError {
    fn from(err: rusqlite::Error) -> Self {
        SpRestError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for SpRestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SpRestError::Timeout(std::time::Duration::from_secs(0))
        } else {
            SpRestError::Network {
                message: err.to_string(),
                cause: std::error::Error::source(&err).map(|s| s.to_string()),
            }
        }
    }
}

impl SpRestError {
    /// Build an [`SpRestError::Http`] from a non-success response.
    pub fn from_response(response: HttpResponse) -> Self {
        SpRestError::Http {
            status: response.status(),
            status_text: response.status_text().to_string(),
            response: Box::new(response),
        }
    }

    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        SpRestError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// HTTP status carried by this error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            SpRestError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Check if this error should trigger a retry.
    ///
    /// Only throttling (429) and service unavailable (503) responses qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(self.status(), Some(429) | Some(503))
    }

    /// Whether this error rejected a whole batch rather than one operation.
    pub fn is_batch_failure(&self) -> bool {
        matches!(
            self,
            SpRestError::BatchParse { .. } | SpRestError::BatchFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SpRestError::ApiUrl {
            url: "https://contoso.sharepoint.com/sites/dev".into(),
        };
        assert_eq!(
            err.to_string(),
            "Unable to determine API url from https://contoso.sharepoint.com/sites/dev"
        );
        assert_eq!(
            SpRestError::AlreadyInBatch.to_string(),
            "This query is already part of a batch"
        );
    }

    #[test]
    fn test_retryable_errors() {
        let throttled = SpRestError::from_response(HttpResponse::new(429, "Too Many Requests"));
        let unavailable =
            SpRestError::from_response(HttpResponse::new(503, "Service Unavailable"));
        let missing = SpRestError::from_response(HttpResponse::new(404, "Not Found"));

        assert!(throttled.is_retryable());
        assert!(unavailable.is_retryable());
        assert!(!missing.is_retryable());
        assert!(!SpRestError::Timeout(std::time::Duration::from_secs(5)).is_retryable());
    }

    #[test]
    fn test_http_error_keeps_response() {
        let err = SpRestError::from_response(
            HttpResponse::new(500, "Internal Server Error").with_body("boom"),
        );
        assert_eq!(err.status(), Some(500));
        match err {
            SpRestError::Http { response, .. } => assert_eq!(response.text().unwrap(), "boom"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_batch_failure_classification() {
        assert!(SpRestError::BatchParse {
            message: "Unexpected end of input".into()
        }
        .is_batch_failure());
        assert!(!SpRestError::AlreadyInBatch.is_batch_failure());
    }
}
