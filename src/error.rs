//! Pipeline errors and the HTTP error contract.
//!
//! Every error response has the same JSON body:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be empty" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request` | 400 |
//! | `unauthorized` | 401 (with `WWW-Authenticate: Bearer`) |
//! | `not_found` | 404 |
//! | `upstream_error` | 502 |
//! | `internal` | 500 |

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::extract::ExtractError;

/// Failures of the ingestion and retrieval pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("Embedding failed: {0:#}")]
    Embedding(anyhow::Error),

    #[error("Vector store error: {0:#}")]
    VectorStore(anyhow::Error),

    #[error("Answer generation failed: {0:#}")]
    Generation(anyhow::Error),

    #[error("{0}")]
    NotFound(String),
}

impl PipelineError {
    /// Client errors: the request itself was unacceptable.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            PipelineError::Validation(_) | PipelineError::Extract(_) | PipelineError::NotFound(_)
        )
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Error type returned by route handlers.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let unauthorized = self.status == StatusCode::UNAUTHORIZED;
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        if unauthorized {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer"),
            );
        }
        response
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

pub fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

pub fn unauthorized(message: impl Into<String>) -> AppError {
    app_error(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

pub fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

pub fn upstream_error(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_GATEWAY, "upstream_error", message)
}

pub fn internal(message: impl Into<String>) -> AppError {
    app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let message = err.to_string();
        match err {
            PipelineError::Validation(_) | PipelineError::Extract(_) => bad_request(message),
            PipelineError::NotFound(_) => not_found(message),
            PipelineError::Embedding(_)
            | PipelineError::VectorStore(_)
            | PipelineError::Generation(_) => {
                tracing::error!("{}", message);
                upstream_error(message)
            }
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("database error: {}", err);
        internal(format!("database error: {}", err))
    }
}
