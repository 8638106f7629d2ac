//! Request and response bodies for the HTTP API.
//!
//! Required string fields default to empty so a missing field reaches
//! validation and is answered with 400 rather than the extractor's 422.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::AnalyticsSummary;

/// `POST /auth/login` body. `username` may also be an email address.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Successful login.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user_id: i32,
    pub username: String,
}

/// `POST /auth/logout` result.
#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub success: bool,
}

/// Identity seen by a handler behind the auth gate.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user_id: Option<i32>,
}

/// `POST /pageviews` body.
#[derive(Debug, Deserialize)]
pub struct PageViewRequest {
    #[serde(default)]
    pub path: String,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
}

/// `POST /events` body.
#[derive(Debug, Deserialize)]
pub struct EventRequest {
    #[serde(default)]
    pub event_name: String,
    /// Client-generated analytics session, unrelated to login sessions.
    #[serde(default)]
    pub session_id: String,
    pub path: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Acknowledgement for accepted analytics writes.
#[derive(Debug, Serialize)]
pub struct CreatedResponse {
    pub success: bool,
}

/// `GET {protected}/analytics/stats` query.
///
/// `days` is read leniently: anything but a supported period means the
/// default, never a 400.
#[derive(Debug, Default, Deserialize)]
pub struct StatsQuery {
    pub days: Option<String>,
}

/// Aggregates for the admin dashboard.
#[derive(Debug, Serialize)]
pub struct AnalyticsStatsResponse {
    #[serde(flatten)]
    pub summary: AnalyticsSummary,
    /// e.g. `"7 days"`
    pub period: String,
}

/// `GET {protected}/events` query. Numbers that do not parse are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct EventListQuery {
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub event_name: Option<String>,
    pub session_id: Option<String>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service health status
    pub status: String,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
}
