use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::server::headers::with_cors;

/// Body of every 400 produced for an undecodable proxy path
pub const INVALID_TARGET_MESSAGE: &str =
    "Invalid proxy request. Path must be /proxy/<percent-encoded URL>";

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("invalid proxy target: {0}")]
    InvalidTarget(String),

    #[error("upstream request to {url} failed: HTTP {status} {status_text}. Body: {body_snippet}")]
    Upstream {
        url: String,
        status: u16,
        status_text: String,
        body_snippet: String,
    },

    #[error("upstream request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("master playlist recursion too deep ({depth} > {max}): {url}")]
    RecursionExceeded { depth: u32, max: u32, url: String },

    #[error("corrupt cache entry: {0}")]
    CacheCorrupt(String),

    #[error("missing or invalid access credentials")]
    Unauthorized,

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True for both upstream failure shapes (bad status and transport error)
    pub fn is_upstream(&self) -> bool {
        matches!(self, RelayError::Upstream { .. } | RelayError::Network { .. })
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            RelayError::InvalidTarget(_) => INVALID_TARGET_MESSAGE.to_string(),
            RelayError::Unauthorized => "Unauthorized".to_string(),
            other => {
                error!("Proxy request failed: {}", other);
                format!("Proxy error: {}", other)
            }
        };

        with_cors((status, body).into_response())
    }
}
