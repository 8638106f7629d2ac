use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Application-wide error types with appropriate HTTP status codes.
///
/// Client errors carry a message that is safe to show. Dependency and
/// internal errors are logged in full and answered with a generic body.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Too many requests, retry after {retry_after_secs}s")]
    TooManyRequests { retry_after_secs: u64 },

    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(format!("Invalid JSON: {}", rejection.body_text()))
    }
}

/// Error response body for API endpoints.
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::TooManyRequests { retry_after_secs } = self {
            return (
                StatusCode::TOO_MANY_REQUESTS,
                [(axum::http::header::RETRY_AFTER, retry_after_secs.to_string())],
                axum::Json(ErrorResponse::new(
                    "too_many_requests",
                    "Too many failed attempts. Please try again later.",
                )),
            )
                .into_response();
        }

        let (status, error_type, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.as_str()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.as_str()),
            AppError::TooManyRequests { .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "too_many_requests",
                "Too many requests",
            ),
            AppError::Store(StoreError::NotFound) => {
                (StatusCode::NOT_FOUND, "not_found", "Resource not found")
            }
            AppError::Store(_) => {
                tracing::error!(error = %self, "Request failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "store_unavailable",
                    "Storage is temporarily unavailable. Please try again later.",
                )
            }
            AppError::Internal(_) | AppError::ConfigError(_) => {
                tracing::error!(error = %self, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred.",
                )
            }
        };

        (status, axum::Json(ErrorResponse::new(error_type, message))).into_response()
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
