//! Mapping of engine failures onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use blocker_core::BlockerError;
use thiserror::Error;

/// Error returned by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Failure inside the block engine
    #[error(transparent)]
    Engine(#[from] BlockerError),

    /// Spooling the request body failed
    #[error("upload failed: {0}")]
    Upload(#[from] std::io::Error),

    /// Response could not be assembled
    #[error("response error: {0}")]
    Http(#[from] axum::http::Error),

    /// Malformed request
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    /// Status code sent for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Engine(BlockerError::ManifestNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Engine(BlockerError::InvalidInput(_)) => StatusCode::BAD_REQUEST,
            ApiError::Engine(_) | ApiError::Upload(_) | ApiError::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<axum::extract::multipart::MultipartError> for ApiError {
    fn from(e: axum::extract::multipart::MultipartError) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}
