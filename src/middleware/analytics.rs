//! Fire-and-forget page-view capture for read requests.
//!
//! For every `GET`, the layer builds a [`NewPageView`] from the request (path,
//! referrer, user agent, anonymized client IP) and spawns the store write onto
//! a [`TaskTracker`]. The request is forwarded immediately; the write may land
//! before, during or after the response and its outcome is never observed by
//! the client. Other methods pass straight through.
//!
//! Writes are not tied to the request's lifetime: dropping the response future
//! does not cancel them. The tracker lets shutdown wait for pending writes.
//!
//! With a non-zero `max_in_flight`, captures beyond that many concurrent writes
//! are dropped instead of queued.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::http::{Method, Request, header};
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tower::{Layer, Service};
use tracing::debug;

use super::ip::client_ip;
use crate::anonymize::anonymize;
use crate::metrics;
use crate::store::{AnalyticsStore, NewPageView};

/// Schedules page-view writes against an [`AnalyticsStore`].
#[derive(Clone)]
pub struct AnalyticsCapture {
    store: Arc<dyn AnalyticsStore>,
    tracker: TaskTracker,
    permits: Option<Arc<Semaphore>>,
}

impl AnalyticsCapture {
    /// `max_in_flight == 0` leaves the number of pending writes unbounded.
    pub fn new(store: Arc<dyn AnalyticsStore>, tracker: TaskTracker, max_in_flight: usize) -> Self {
        Self {
            store,
            tracker,
            permits: (max_in_flight > 0).then(|| Arc::new(Semaphore::new(max_in_flight))),
        }
    }

    /// Capture the request if it is a `GET`.
    ///
    /// Returns whether a write was scheduled.
    pub fn capture<B>(&self, req: &Request<B>) -> bool {
        if req.method() != Method::GET {
            return false;
        }

        let permit = match &self.permits {
            Some(permits) => match permits.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    debug!(path = %req.uri().path(), "Analytics capture dropped, too many writes in flight");
                    return false;
                }
            },
            None => None,
        };

        let view = page_view(req);
        metrics::record_page_view(&view.path, req.method().as_str());

        let store = self.store.clone();
        self.tracker.spawn(async move {
            let _permit = permit;
            let path = view.path.clone();
            if let Err(e) = store.create_page_view(view).await {
                debug!(path = %path, error = %e, "Page view write failed");
            }
        });
        true
    }
}

fn page_view<B>(req: &Request<B>) -> NewPageView {
    let header_value = |name: header::HeaderName| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    NewPageView {
        path: req.uri().path().to_string(),
        referrer: header_value(header::REFERER),
        user_agent: header_value(header::USER_AGENT),
        ip_address: Some(anonymize(&client_ip(req))),
        viewed_at: Utc::now(),
    }
}

/// Layer that runs [`AnalyticsCapture`] on every request it sees.
#[derive(Clone)]
pub struct AnalyticsLayer {
    capture: AnalyticsCapture,
}

impl AnalyticsLayer {
    pub fn new(capture: AnalyticsCapture) -> Self {
        Self { capture }
    }
}

impl<S> Layer<S> for AnalyticsLayer {
    type Service = AnalyticsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AnalyticsService {
            inner,
            capture: self.capture.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AnalyticsService<S> {
    inner: S,
    capture: AnalyticsCapture,
}

impl<S, B> Service<Request<B>> for AnalyticsService<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        self.capture.capture(&req);
        self.inner.call(req)
    }
}
