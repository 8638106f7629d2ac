//! Prometheus metrics for the request pipeline.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//! Every recording function is a no-op until [`init_metrics`] has installed a
//! recorder, so tests and metric-less deployments can call them freely.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `http_page_views_total` - Captured page views (labels: path, method)
//! - `http_events_total` - Stored analytics events (labels: event_name)
//! - `http_requests_total` - Completed requests (labels: route, method, status)
//! - `http_rate_limited_total` - Requests rejected by the rate limiter
//! - `auth_rejections_total` - Requests rejected by the auth gate (labels: reason)
//!
//! ## Histograms
//! - `http_request_duration_seconds` - Request duration (labels: route, method, status)
//!
//! # Usage
//!
//! ```rust,ignore
//! use site_backend::metrics::{init_metrics, record_page_view};
//!
//! init_metrics("0.0.0.0:9090".parse()?)?;
//! record_page_view("/blog", "GET");
//! ```

use std::net::SocketAddr;

use anyhow::Context;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const PAGE_VIEWS_TOTAL: &str = "http_page_views_total";
    pub const EVENTS_TOTAL: &str = "http_events_total";
    pub const REQUESTS_TOTAL: &str = "http_requests_total";
    pub const REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
    pub const RATE_LIMITED_TOTAL: &str = "http_rate_limited_total";
    pub const AUTH_REJECTIONS_TOTAL: &str = "auth_rejections_total";
}

/// Install the Prometheus exporter and describe all metrics.
pub fn init_metrics(metrics_addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    describe_counter!(names::PAGE_VIEWS_TOTAL, "Total number of captured page views");
    describe_counter!(names::EVENTS_TOTAL, "Total number of stored analytics events");
    describe_counter!(names::REQUESTS_TOTAL, "Total number of completed HTTP requests");
    describe_counter!(
        names::RATE_LIMITED_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_counter!(
        names::AUTH_REJECTIONS_TOTAL,
        "Total number of requests rejected by session authentication"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

/// Record a captured page view.
pub fn record_page_view(path: &str, method: &str) {
    counter!(names::PAGE_VIEWS_TOTAL, "path" => path.to_string(), "method" => method.to_string())
        .increment(1);
}

/// Record a stored analytics event.
pub fn record_event(event_name: &str) {
    counter!(names::EVENTS_TOTAL, "event_name" => event_name.to_string()).increment(1);
}

/// Record a completed request and its duration.
pub fn record_request(route: &str, method: &str, status: u16, duration_secs: f64) {
    let status = status.to_string();
    counter!(names::REQUESTS_TOTAL, "route" => route.to_string(), "method" => method.to_string(), "status" => status.clone())
        .increment(1);
    histogram!(names::REQUEST_DURATION_SECONDS, "route" => route.to_string(), "method" => method.to_string(), "status" => status)
        .record(duration_secs);
}

/// Record a rate-limit rejection.
pub fn record_rate_limited() {
    counter!(names::RATE_LIMITED_TOTAL).increment(1);
}

/// Record an auth gate rejection.
pub fn record_auth_rejection(reason: &str) {
    counter!(names::AUTH_REJECTIONS_TOTAL, "reason" => reason.to_string()).increment(1);
}
