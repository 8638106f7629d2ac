//! Per-client rate limiting middleware.
//!
//! # Algorithm
//!
//! Each client key owns a [`Visitor`] with a token budget. All visitors live
//! in one map behind one mutex, and every check is a single locked
//! read-modify-write, so concurrent requests from the same client can never
//! lose an update or spend more than `capacity` tokens per window.
//!
//! Per request, under the lock:
//!
//! 1. No visitor, or the visitor was last seen more than `window` ago:
//!    start a fresh window with `capacity - 1` tokens (this request spends one).
//! 2. Otherwise, with zero tokens left: reject and leave the visitor untouched.
//! 3. Otherwise: spend one token and refresh `last_seen`.
//!
//! This is a sliding-reset limiter, not a sliding log. A burst at the end of
//! one window followed by a burst at the start of the next can briefly exceed
//! the nominal rate. Because `last_seen` advances on every allowed request, a
//! client that keeps hitting the limiter never gets a refill until it stays
//! quiet for a full window.
//!
//! # Client Key
//!
//! The [`ClientIp`](super::ip::ClientIp) marker when present and non-empty,
//! otherwise the transport peer IP, otherwise the shared [`UNKNOWN_CLIENT`]
//! key.
//!
//! # Response Headers
//!
//! On rate limit exceeded (429, plain-text body):
//! - `Retry-After`: Seconds until the current window lapses
//! - `X-RateLimit-Limit`: Configured capacity
//! - `X-RateLimit-Remaining`: Always `0`
//!
//! # Memory
//!
//! Visitors are never removed by [`RateLimiter::check`]. Call
//! [`RateLimiter::sweep`] periodically to evict idle entries; `AppState`
//! runs a background sweeper for this.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::warn;

use super::ip::{ClientIp, peer_addr};
use crate::metrics;

/// Default tokens per window.
pub const DEFAULT_CAPACITY: u32 = 60;

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Shared key for requests whose client cannot be identified.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Error type for rate limiter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitError {
    /// Capacity cannot be zero.
    ZeroCapacity,
    /// Window cannot be zero.
    ZeroWindow,
}

impl fmt::Display for RateLimitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitError::ZeroCapacity => write!(
                f,
                "capacity must be greater than 0; leave the layer out for no limiting"
            ),
            RateLimitError::ZeroWindow => write!(f, "window must be greater than 0"),
        }
    }
}

impl std::error::Error for RateLimitError {}

/// Per-client limiter state.
#[derive(Debug, Clone, Copy)]
struct Visitor {
    tokens: u32,
    last_seen: Instant,
}

/// Outcome of a single [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Token-bucket limiter keyed by client.
#[derive(Debug)]
pub struct RateLimiter {
    visitors: Mutex<HashMap<String, Visitor>>,
    capacity: u32,
    window: Duration,
}

impl RateLimiter {
    /// # Errors
    ///
    /// Returns an error if `capacity` or `window` is zero.
    pub fn new(capacity: u32, window: Duration) -> Result<Self, RateLimitError> {
        if capacity == 0 {
            return Err(RateLimitError::ZeroCapacity);
        }
        if window.is_zero() {
            return Err(RateLimitError::ZeroWindow);
        }
        Ok(Self {
            visitors: Mutex::new(HashMap::new()),
            capacity,
            window,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Spend one token for `key`, or report that the budget is exhausted.
    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    /// [`check`](Self::check) with an explicit clock reading.
    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        let mut visitors = self.lock();

        if let Some(visitor) = visitors.get_mut(key)
            && now.saturating_duration_since(visitor.last_seen) <= self.window
        {
            if visitor.tokens == 0 {
                let elapsed = now.saturating_duration_since(visitor.last_seen);
                return Decision::Limited {
                    retry_after: self.window.saturating_sub(elapsed),
                };
            }
            visitor.tokens -= 1;
            visitor.last_seen = now;
            return Decision::Allowed {
                remaining: visitor.tokens,
            };
        }

        let remaining = self.capacity - 1;
        visitors.insert(
            key.to_string(),
            Visitor {
                tokens: remaining,
                last_seen: now,
            },
        );
        Decision::Allowed { remaining }
    }

    /// Evict visitors idle for longer than `max_idle`; returns how many.
    ///
    /// `max_idle` should be at least one window: an evicted visitor is then
    /// one that would have been reset on its next request anyway.
    pub fn sweep(&self, max_idle: Duration) -> usize {
        self.sweep_at(Instant::now(), max_idle)
    }

    pub fn sweep_at(&self, now: Instant, max_idle: Duration) -> usize {
        let mut visitors = self.lock();
        let before = visitors.len();
        visitors.retain(|_, v| now.saturating_duration_since(v.last_seen) <= max_idle);
        before - visitors.len()
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Visitor>> {
        // The map stays consistent even if a holder panicked mid-check.
        self.visitors.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Key the limiter uses for `req`.
fn client_key<B>(req: &Request<B>) -> String {
    if let Some(ClientIp(ip)) = req.extensions().get::<ClientIp>()
        && !ip.is_empty()
    {
        return ip.clone();
    }
    peer_addr(req)
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

// =============================================================================
// Layer
// =============================================================================

/// Rate limiting layer for the Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let limiter = Arc::new(RateLimiter::new(60, Duration::from_secs(60))?);
/// let app = Router::new()
///     .route("/api", get(handler))
///     .layer(RateLimitLayer::new(limiter));
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
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

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let key = client_key(&req);
        // Decided before the future is built so the lock is never held across an await.
        let decision = self.limiter.check(&key);
        let capacity = self.limiter.capacity();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match decision {
                Decision::Allowed { .. } => inner.call(req).await,
                Decision::Limited { retry_after } => {
                    let retry_after_secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
                    warn!(
                        client_key = %key,
                        path = %req.uri().path(),
                        retry_after_secs,
                        "Rate limit exceeded"
                    );
                    metrics::record_rate_limited();
                    Ok(too_many_requests(capacity, retry_after_secs))
                }
            }
        })
    }
}

fn too_many_requests(capacity: u32, retry_after_secs: u64) -> Response<Body> {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [
            ("Retry-After", retry_after_secs.to_string()),
            ("X-RateLimit-Limit", capacity.to_string()),
            ("X-RateLimit-Remaining", "0".to_string()),
        ],
        "Too Many Requests",
    )
        .into_response()
}
