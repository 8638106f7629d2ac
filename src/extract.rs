//! Request extractors with API-shaped rejections.

use axum::extract::FromRequest;

use crate::error::AppError;

/// `axum::Json` whose rejections are [`AppError::BadRequest`].
///
/// Malformed bodies and a missing `Content-Type: application/json` are
/// answered with the same JSON error body as every other client error.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);
