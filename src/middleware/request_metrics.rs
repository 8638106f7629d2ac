//! Per-route request counters and latency histograms.
//!
//! Attached with `route_layer` so the matched route template (not the raw
//! path) is used as the `route` label, keeping label cardinality bounded.

use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::metrics;

/// `axum::middleware::from_fn` handler recording request metrics.
pub async fn track_metrics(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let method = req.method().clone();

    let response = next.run(req).await;

    metrics::record_request(
        &route,
        method.as_str(),
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
