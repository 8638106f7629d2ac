//! Shared application state for Axum handlers and the pipeline.
//!
//! # Structured Concurrency
//!
//! Background work (the rate-limit sweeper and spawned analytics writes) runs
//! on one `tokio_util::task::TaskTracker`. The sweeper stops on the
//! `CancellationToken`; analytics writes are left to finish. Call `shutdown()`
//! after the server stops accepting requests to drain both.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as KeyedLimiter};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::config::Config;
use crate::middleware::{AnalyticsCapture, RateLimitError, RateLimiter};
use crate::store::{AnalyticsStore, MemoryStore, SessionStore, UserStore};

/// Login attempts allowed per client IP per minute.
const LOGIN_ATTEMPT_LIMIT: NonZeroU32 = NonZeroU32::new(10).unwrap();

/// Burst of login attempts allowed before throttling starts.
const LOGIN_ATTEMPT_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();

/// Per-IP limiter for login attempts.
pub type LoginLimiter = KeyedLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// The persistence collaborators the application talks to.
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub analytics: Arc<dyn AnalyticsStore>,
    pub users: Arc<dyn UserStore>,
}

impl Stores {
    /// Back every contract with the same in-memory store.
    pub fn memory(store: &MemoryStore) -> Self {
        Self {
            sessions: Arc::new(store.clone()),
            analytics: Arc::new(store.clone()),
            users: Arc::new(store.clone()),
        }
    }
}

/// Shared application state.
///
/// Cloned per request; everything inside is behind `Arc` or is itself a
/// cheap handle.
///
/// ```rust,ignore
/// let state = AppState::new(config, Stores::memory(&store))?;
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    pub stores: Stores,
    /// Global per-client limiter, `None` when disabled
    pub limiter: Option<Arc<RateLimiter>>,
    /// Page-view capture shared by every request
    pub analytics_capture: AnalyticsCapture,
    pub login_limiter: Arc<LoginLimiter>,
    /// Timestamp when the application started
    pub started_at: Instant,
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Build state and start background tasks.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitError` if the rate-limit window is zero while
    /// limiting is enabled.
    pub fn new(config: Config, stores: Stores) -> Result<Self, RateLimitError> {
        let limiter = if config.rate_limiting_enabled() {
            Some(Arc::new(RateLimiter::new(
                config.rate_limit_capacity,
                config.rate_limit_window,
            )?))
        } else {
            None
        };

        let task_tracker = TaskTracker::new();
        let analytics_capture = AnalyticsCapture::new(
            stores.analytics.clone(),
            task_tracker.clone(),
            config.analytics_max_in_flight,
        );
        let login_limiter = Arc::new(KeyedLimiter::keyed(
            Quota::per_minute(LOGIN_ATTEMPT_LIMIT).allow_burst(LOGIN_ATTEMPT_BURST),
        ));

        let state = Self {
            config: Arc::new(config),
            stores,
            limiter,
            analytics_capture,
            login_limiter,
            started_at: Instant::now(),
            task_tracker,
            cancellation_token: CancellationToken::new(),
        };

        state.spawn_sweeper_task();

        Ok(state)
    }

    /// Periodically evict visitors idle for more than two windows.
    ///
    /// Their next request would start a fresh window anyway, so eviction
    /// never changes a rate-limit decision.
    fn spawn_sweeper_task(&self) {
        let Some(limiter) = self.limiter.clone() else {
            return;
        };
        let period = self.config.rate_limit_sweep_interval;
        if period.is_zero() {
            debug!("Rate limiter sweeper disabled");
            return;
        }
        let max_idle = limiter.window().saturating_mul(2);
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Rate limiter sweeper received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = limiter.sweep(max_idle);
                        if evicted > 0 {
                            debug!(evicted, remaining = limiter.len(), "Evicted idle visitors");
                        }
                    }
                }
            }
        });
    }

    /// Gracefully shutdown background work.
    ///
    /// Stops the sweeper, then waits for pending analytics writes.
    pub async fn shutdown(&self) {
        info!(
            pending = self.task_tracker.len(),
            "Initiating graceful shutdown of background tasks"
        );

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Same as [`shutdown`](Self::shutdown) but gives up after `timeout`.
    ///
    /// Returns `false` if tasks were still running.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.shutdown()).await.is_ok()
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
