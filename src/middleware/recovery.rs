//! Panic recovery for the whole pipeline.
//!
//! Built on `tower_http::catch_panic`. The panic payload is logged server-side
//! and the client receives a generic 500 JSON body.

use std::any::Any;

use axum::body::Body;
use axum::http::{Response, StatusCode, header};
use tower_http::catch_panic::CatchPanicLayer;
use tracing::error;

/// Handler type plugged into [`CatchPanicLayer::custom`].
pub type PanicHandler = fn(Box<dyn Any + Send + 'static>) -> Response<Body>;

/// Recovery layer converting panics into 500 responses.
pub fn recovery_layer() -> CatchPanicLayer<PanicHandler> {
    CatchPanicLayer::custom(panic_response as PanicHandler)
}

/// Build the response for a caught panic.
pub fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response<Body> {
    let detail = if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    error!(panic = %detail, "Recovered from panic while handling request");

    let mut response = Response::new(Body::from(
        r#"{"error":"internal_error","message":"Internal server error"}"#,
    ));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    response
}
