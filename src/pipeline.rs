//! Ordered middleware pipeline applied to every route.
//!
//! # Stage Order (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │     Logging      │ ← request id + trace span around everything
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Recovery     │ ← panic anywhere below → 500
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │       CORS       │ ← preflight answered here (200, empty body)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │    Client IP     │ ← resolves ClientIp marker
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │    Analytics     │ ← GET → spawned page-view write
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Rate Limiting  │ ← 429 if over budget
//! └────────┬─────────┘
//!          ▼
//!      Dispatch (auth gate only on the protected subtree)
//! ```
//!
//! The order is data ([`PIPELINE`]), not the accident of a chain of `.layer`
//! calls. `Router::layer` makes the most recently added layer the outermost,
//! so [`chain`] applies stages in reverse.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, warn};

use crate::middleware::{
    AnalyticsCapture, AnalyticsLayer, ClientIpLayer, RateLimitLayer, RateLimiter,
    TrustedProxyConfig, recovery_layer,
};

/// A cross-cutting concern in the global pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Logging,
    Recovery,
    Cors,
    ClientIp,
    Analytics,
    RateLimit,
}

/// The production stage order, outermost first.
pub const PIPELINE: [Stage; 6] = [
    Stage::Logging,
    Stage::Recovery,
    Stage::Cors,
    Stage::ClientIp,
    Stage::Analytics,
    Stage::RateLimit,
];

/// Everything the stages need to be built.
#[derive(Clone)]
pub struct PipelineParts {
    pub cors: CorsLayer,
    pub trusted_proxies: TrustedProxyConfig,
    pub analytics: AnalyticsCapture,
    /// `None` disables rate limiting.
    pub limiter: Option<Arc<RateLimiter>>,
}

/// Wrap `router` in `stages`, with `stages[0]` outermost.
pub fn chain<S>(router: Router<S>, stages: &[Stage], parts: &PipelineParts) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    stages
        .iter()
        .rev()
        .fold(router, |router, stage| apply(router, *stage, parts))
}

fn apply<S>(router: Router<S>, stage: Stage, parts: &PipelineParts) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    match stage {
        Stage::Logging => router
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            )
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid)),
        Stage::Recovery => router.layer(recovery_layer()),
        Stage::Cors => router.layer(parts.cors.clone()),
        Stage::ClientIp => router.layer(ClientIpLayer::new(parts.trusted_proxies.clone())),
        Stage::Analytics => router.layer(AnalyticsLayer::new(parts.analytics.clone())),
        Stage::RateLimit => match &parts.limiter {
            Some(limiter) => router.layer(RateLimitLayer::new(limiter.clone())),
            None => router,
        },
    }
}

/// Build the CORS layer from configured origins.
///
/// `*` anywhere in the list allows any origin. Unparseable origins are
/// skipped with a warning.
///
/// Preflights are answered by `CorsLayer` itself with `200 OK` and an empty
/// body, not `204 No Content`. Browsers accept either; clients should only
/// rely on a 2xx status and the `Access-Control-*` headers.
pub fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(Duration::from_secs(300));

    if allowed_origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(origin) => Some(origin),
            Err(_) => {
                warn!(origin = %o, "Invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    base.allow_origin(origins)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn position(stage: Stage) -> usize {
        PIPELINE.iter().position(|s| *s == stage).unwrap()
    }

    #[test]
    fn test_every_stage_appears_once() {
        for stage in PIPELINE {
            assert_eq!(PIPELINE.iter().filter(|s| **s == stage).count(), 1);
        }
    }

    #[test]
    fn test_recovery_wraps_everything_but_logging() {
        assert_eq!(position(Stage::Logging), 0);
        assert_eq!(position(Stage::Recovery), 1);
    }

    #[test]
    fn test_preflight_short_circuits_before_work() {
        assert!(position(Stage::Cors) < position(Stage::ClientIp));
        assert!(position(Stage::Cors) < position(Stage::Analytics));
        assert!(position(Stage::Cors) < position(Stage::RateLimit));
    }

    #[test]
    fn test_ip_resolved_before_consumers() {
        assert!(position(Stage::ClientIp) < position(Stage::Analytics));
        assert!(position(Stage::ClientIp) < position(Stage::RateLimit));
    }

    #[test]
    fn test_rate_limit_is_innermost() {
        assert_eq!(position(Stage::RateLimit), PIPELINE.len() - 1);
    }

    #[tokio::test]
    async fn test_preflight_answered_with_empty_200() {
        use axum::body::Body;
        use axum::http::{Method, Request, StatusCode, header};
        use axum::routing::post;
        use tower::ServiceExt;

        let router = Router::new()
            .route("/events", post(|| async { "handled" }))
            .layer(build_cors_layer(&["https://example.com".to_string()]));
        let response = router
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/events")
                    .header(header::ORIGIN, "https://example.com")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://example.com"
        );
        assert_eq!(response.headers()[header::ACCESS_CONTROL_MAX_AGE], "300");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn test_build_cors_layer() {
        let _any = build_cors_layer(&["*".to_string()]);
        let _specific = build_cors_layer(&[
            "https://example.com".to_string(),
            "not a header value\n".to_string(),
        ]);
    }
}
