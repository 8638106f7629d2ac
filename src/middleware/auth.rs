//! Session-cookie authentication for the protected route subtree.
//!
//! # Flow
//!
//! ```text
//! no session_id cookie        → 401 "Authentication required"
//! cookie is not a UUID        → 401 "Invalid session"
//! store: not found / expired  → 401 "Session expired or invalid"
//! store: any other failure    → 500 (no detail leaked)
//! store: live session         → attach UserId (if any), call inner service
//! ```
//!
//! Validity is decided entirely by [`SessionStore::get_valid_session`]; the
//! gate does not re-check `expires_at`. The store call sits on the request's
//! critical path and the gate imposes no timeout of its own.
//!
//! # Usage
//!
//! The layer is attached with `route_layer` to the protected subtree only:
//!
//! ```rust,ignore
//! let admin = Router::new()
//!     .route("/me", get(handlers::me))
//!     .route_layer(require_auth(sessions));
//! ```

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap, Request, Response, StatusCode, header};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::ip::client_ip;
use crate::metrics;
use crate::store::{SessionStore, StoreError};

/// Name of the cookie carrying the session id.
pub const SESSION_COOKIE: &str = "session_id";

/// Identity attached to requests that passed the gate with a user-bound session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub i32);

/// Read the authenticated user id from request extensions.
pub fn user_id(extensions: &Extensions) -> Option<i32> {
    extensions.get::<UserId>().map(|UserId(id)| *id)
}

/// Extractor for handlers behind the gate; `None` for sessions without a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser(pub Option<i32>);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(CurrentUser(user_id(&parts.extensions)))
    }
}

/// Why a request was turned away by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    MissingCookie,
    InvalidCookie,
    ExpiredSession,
    StoreFailure,
}

impl AuthRejection {
    /// Short label used for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthRejection::MissingCookie => "missing_cookie",
            AuthRejection::InvalidCookie => "invalid_cookie",
            AuthRejection::ExpiredSession => "expired_session",
            AuthRejection::StoreFailure => "store_failure",
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> axum::response::Response {
        let (status, error, message) = match self {
            AuthRejection::MissingCookie => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Authentication required",
            ),
            AuthRejection::InvalidCookie => {
                (StatusCode::UNAUTHORIZED, "unauthorized", "Invalid session")
            }
            AuthRejection::ExpiredSession => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Session expired or invalid",
            ),
            AuthRejection::StoreFailure => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "Internal server error",
            ),
        };
        (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            format!(r#"{{"error":"{error}","message":"{message}"}}"#),
        )
            .into_response()
    }
}

/// Find the raw `session_id` cookie value across all `Cookie` headers.
pub fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
}

/// Parse the session id out of the request cookies.
pub fn session_id(headers: &HeaderMap) -> Result<Uuid, AuthRejection> {
    let raw = session_cookie(headers).ok_or(AuthRejection::MissingCookie)?;
    Uuid::parse_str(raw).map_err(|_| AuthRejection::InvalidCookie)
}

/// Build the auth gate for a protected subtree.
pub fn require_auth(sessions: Arc<dyn SessionStore>) -> SessionAuthLayer {
    SessionAuthLayer { sessions }
}

/// Session authentication layer.
#[derive(Clone)]
pub struct SessionAuthLayer {
    sessions: Arc<dyn SessionStore>,
}

impl<S> Layer<S> for SessionAuthLayer {
    type Service = SessionAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        SessionAuthService {
            inner,
            sessions: self.sessions.clone(),
        }
    }
}

/// Session authentication service wrapper.
#[derive(Clone)]
pub struct SessionAuthService<S> {
    inner: S,
    sessions: Arc<dyn SessionStore>,
}

impl<S> Service<Request<Body>> for SessionAuthService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let sessions = self.sessions.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match authenticate(sessions.as_ref(), req.headers()).await {
                Ok(user) => {
                    if let Some(id) = user {
                        req.extensions_mut().insert(UserId(id));
                    }
                    inner.call(req).await
                }
                Err(rejection) => {
                    warn!(
                        path = %req.uri().path(),
                        client_ip = %client_ip(&req),
                        reason = rejection.reason(),
                        "Rejected request to protected route"
                    );
                    metrics::record_auth_rejection(rejection.reason());
                    Ok(rejection.into_response())
                }
            }
        })
    }
}

/// Resolve the request's session to its (optional) user id.
async fn authenticate(
    sessions: &dyn SessionStore,
    headers: &HeaderMap,
) -> Result<Option<i32>, AuthRejection> {
    let id = session_id(headers)?;

    match sessions.get_valid_session(id).await {
        Ok(session) => {
            debug!(session_id = %id, user_id = ?session.user_id, "Session validated");
            Ok(session.user_id)
        }
        Err(StoreError::NotFound) => Err(AuthRejection::ExpiredSession),
        Err(e) => {
            error!(error = %e, "Session lookup failed");
            Err(AuthRejection::StoreFailure)
        }
    }
}
