//! Explicit analytics ingestion and the admin read side.
//!
//! Unlike the capture middleware, these writes are the purpose of the request,
//! so store failures are reported to the client.
//!
//! The read endpoints (`/analytics/stats`, `GET /events`) are mounted under
//! the protected prefix.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use chrono::Utc;
use tracing::{debug, instrument};

use crate::anonymize::anonymize;
use crate::error::AppResult;
use crate::extract::AppJson;
use crate::metrics;
use crate::middleware::ClientIp;
use crate::models::{
    AnalyticsStatsResponse, CreatedResponse, EventListQuery, EventRequest, PageViewRequest,
    StatsQuery,
};
use crate::state::AppState;
use crate::store::{EventFilter, NewEvent, NewPageView};
use crate::validation::{validate_event_name, validate_path, validate_session_id};

/// Record a client-reported page view.
///
/// The stored IP is the anonymized client IP; the user agent falls back to
/// the request header when the body omits it.
#[instrument(skip_all, fields(path = %body.path))]
pub async fn create_page_view(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    AppJson(body): AppJson<PageViewRequest>,
) -> AppResult<(StatusCode, Json<CreatedResponse>)> {
    validate_path(&body.path)?;

    let user_agent = body.user_agent.or_else(|| {
        headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });

    state
        .stores
        .analytics
        .create_page_view(NewPageView {
            path: body.path.clone(),
            referrer: body.referrer,
            user_agent,
            ip_address: Some(anonymize(&ip)),
            viewed_at: Utc::now(),
        })
        .await?;

    metrics::record_page_view(&body.path, "POST");
    Ok((StatusCode::CREATED, Json(CreatedResponse { success: true })))
}

/// Record a named analytics event.
#[instrument(skip_all, fields(event_name = %body.event_name))]
pub async fn create_event(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    AppJson(body): AppJson<EventRequest>,
) -> AppResult<(StatusCode, Json<CreatedResponse>)> {
    validate_event_name(&body.event_name)?;
    validate_session_id(&body.session_id)?;
    if let Some(path) = &body.path {
        validate_path(path)?;
    }

    state
        .stores
        .analytics
        .create_event(NewEvent {
            event_name: body.event_name.clone(),
            session_id: body.session_id,
            path: body.path,
            ip_address: Some(anonymize(&ip)),
            metadata: body.metadata,
            occurred_at: Utc::now(),
        })
        .await?;

    metrics::record_event(&body.event_name);
    Ok((StatusCode::CREATED, Json(CreatedResponse { success: true })))
}

/// Reporting periods offered by the dashboard, in days.
pub const STATS_PERIODS: [i64; 2] = [7, 30];

/// Events returned when no `limit` is given.
pub const DEFAULT_EVENT_PAGE_SIZE: usize = 20;

/// Upper bound on `limit` for the events listing.
pub const MAX_EVENT_PAGE_SIZE: usize = 100;

/// Aggregate page views and events for the last 7 or 30 days.
///
/// ```json
/// {
///   "total_page_views": 42,
///   "total_events": 7,
///   "page_views_by_path": [{ "path": "/", "count": 30 }],
///   "events_by_name": [{ "event_name": "newsletter.subscribed", "count": 7 }],
///   "period": "7 days"
/// }
/// ```
#[instrument(skip_all)]
pub async fn analytics_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> AppResult<Json<AnalyticsStatsResponse>> {
    let days = stats_period(query.days.as_deref());
    let since = Utc::now() - chrono::Duration::days(days);

    let summary = state.stores.analytics.summarize(since).await?;
    debug!(days, total_page_views = summary.total_page_views, "Analytics stats served");

    Ok(Json(AnalyticsStatsResponse {
        summary,
        period: format!("{days} days"),
    }))
}

/// List recorded events, newest first.
///
/// Query: `limit` (default 20, max 100), `offset`, `event_name`, `session_id`.
#[instrument(skip_all)]
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventListQuery>,
) -> AppResult<Json<Vec<NewEvent>>> {
    let events = state.stores.analytics.list_events(event_filter(query)).await?;
    Ok(Json(events))
}

fn stats_period(days: Option<&str>) -> i64 {
    days.and_then(|d| d.trim().parse::<i64>().ok())
        .filter(|d| STATS_PERIODS.contains(d))
        .unwrap_or(STATS_PERIODS[0])
}

fn event_filter(query: EventListQuery) -> EventFilter {
    let limit = query
        .limit
        .and_then(|l| l.parse::<usize>().ok())
        .filter(|l| *l > 0)
        .map_or(DEFAULT_EVENT_PAGE_SIZE, |l| l.min(MAX_EVENT_PAGE_SIZE));
    let offset = query
        .offset
        .and_then(|o| o.parse::<usize>().ok())
        .unwrap_or(0);

    EventFilter {
        event_name: query.event_name.filter(|n| !n.is_empty()),
        session_id: query.session_id.filter(|s| !s.is_empty()),
        limit,
        offset,
    }
}
