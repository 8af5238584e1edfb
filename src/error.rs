//! Error types for the pipeline stages and the HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failure of one pipeline stage.
///
/// The `Display` output is what the front-end shows in place of the
/// stage's text region, so every variant renders with its user-facing
/// prefix.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("Error: could not reach {service}: {detail}")]
    Network { service: String, detail: String },

    #[error("Error: {service} returned an unexpected response: {body}")]
    ResponseFormat { service: String, body: String },

    #[error("Error: {0}")]
    ServiceReported(String),

    #[error("Error during execution:\n{0}")]
    ExecutionFault(String),
}

/// Machine-readable error category, so callers branch on kind instead of
/// matching message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    ResponseFormat,
    ServiceReported,
    ExecutionFault,
}

impl PipelineError {
    pub fn network(service: &str, detail: impl ToString) -> Self {
        Self::Network {
            service: service.to_string(),
            detail: detail.to_string(),
        }
    }

    pub fn response_format(service: &str, body: impl Into<String>) -> Self {
        Self::ResponseFormat {
            service: service.to_string(),
            body: body.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } => ErrorKind::Network,
            Self::ResponseFormat { .. } => ErrorKind::ResponseFormat,
            Self::ServiceReported(_) => ErrorKind::ServiceReported,
            Self::ExecutionFault(_) => ErrorKind::ExecutionFault,
        }
    }
}

/// Outcome of a pipeline stage as stored in the session.
pub type StageResult = Result<String, PipelineError>;

/// Errors returned by HTTP handlers before or instead of running a stage.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("session not found: {0}")]
    SessionNotFound(uuid::Uuid),

    #[error("no image uploaded in session {0}")]
    NoImage(uuid::Uuid),

    #[error("{0}")]
    Conflict(String),

    #[error("upload failed: {0}")]
    Upload(#[from] axum::extract::multipart::MultipartError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::NoImage(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upload(e) => e.status(),
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
