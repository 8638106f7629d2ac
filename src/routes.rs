//! Application routing.
//!
//! # Route Groups
//!
//! - `/healthz`, `/health` - liveness
//! - `/auth/login`, `/auth/logout` - session management
//! - `/pageviews`, `/events` - analytics ingestion
//! - `{PROTECTED_PREFIX}/...` - session-gated subtree (`/me`,
//!   `/analytics/stats`, `GET /events`)
//!
//! Every route sits inside the global [`PIPELINE`]; the session gate and the
//! per-route metrics are route layers, so they run after dispatch and never
//! see unmatched paths.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn;
use axum::routing::{get, post};
use tracing::{info, warn};

use crate::handlers;
use crate::middleware::{TrustedProxyConfig, require_auth, track_metrics};
use crate::pipeline::{PIPELINE, PipelineParts, build_cors_layer, chain};
use crate::state::AppState;

/// Routes that require a live session, relative to the protected prefix.
fn protected_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/me", get(handlers::me))
        .route("/analytics/stats", get(handlers::analytics_stats))
        .route("/events", get(handlers::list_events))
        .route_layer(require_auth(state.stores.sessions.clone()))
}

/// Build the application router with all routes and the pipeline applied.
///
/// Serve it with `into_make_service_with_connect_info::<SocketAddr>()` so the
/// transport address is available to IP resolution.
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let router = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/health", get(handlers::health_check))
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        .route("/pageviews", post(handlers::create_page_view))
        .route("/events", post(handlers::create_event))
        .nest(&config.protected_prefix, protected_routes(&state))
        .route_layer(from_fn(track_metrics))
        .layer(DefaultBodyLimit::max(config.max_request_body_size));

    info!(prefix = %config.protected_prefix, "Session-protected routes mounted");

    match &state.limiter {
        Some(limiter) => info!(
            capacity = limiter.capacity(),
            window_secs = limiter.window().as_secs(),
            "Rate limiting enabled"
        ),
        None => info!("Rate limiting disabled (RATE_LIMIT_CAPACITY=0)"),
    }

    let trusted_proxies = TrustedProxyConfig::new(&config.trusted_proxies);
    if trusted_proxies.is_enabled() {
        info!(
            ranges = config.trusted_proxies.len(),
            "Forwarding headers honoured only from trusted proxies"
        );
    } else {
        warn!("TRUSTED_PROXIES not set; forwarding headers are trusted from every peer");
    }

    let parts = PipelineParts {
        cors: build_cors_layer(&config.cors_allowed_origins),
        trusted_proxies,
        analytics: state.analytics_capture.clone(),
        limiter: state.limiter.clone(),
    };

    chain(router, &PIPELINE, &parts).with_state(state)
}
