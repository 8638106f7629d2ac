//! HTTP middleware for the request pipeline.
//!
//! - **Client IP**: resolves the client address once per request
//! - **Analytics**: fire-and-forget page-view capture for `GET` requests
//! - **Rate Limiting**: per-client token bucket, mutex-guarded
//! - **Session Auth**: cookie-based gate for the protected subtree
//! - **Recovery**: panics become 500 responses
//! - **Request Metrics**: per-route counters and latency
//!
//! The global ordering lives in [`crate::pipeline`].

pub mod analytics;
pub mod auth;
pub mod ip;
pub mod rate_limit;
pub mod recovery;
pub mod request_metrics;

pub use analytics::{AnalyticsCapture, AnalyticsLayer};
pub use auth::{CurrentUser, SESSION_COOKIE, SessionAuthLayer, UserId, require_auth, user_id};
pub use ip::{ClientIp, ClientIpLayer, TrustedProxyConfig, client_ip, resolve_client_ip};
pub use rate_limit::{Decision, RateLimitError, RateLimitLayer, RateLimiter};
pub use recovery::recovery_layer;
pub use request_metrics::track_metrics;
