//! Persistence contracts consumed by the request pipeline.
//!
//! The pipeline never talks to a database directly. It depends on three
//! narrow traits:
//!
//! - [`SessionStore`] - create, validate, and expire login sessions
//! - [`AnalyticsStore`] - page views and events, plus the aggregates the
//!   admin dashboard reads back
//! - [`UserStore`] - credential lookup for the login handler
//!
//! [`MemoryStore`] implements all three and backs the binary and the tests.
//! A SQL-backed implementation only has to satisfy the same traits.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryStore;

/// Failures reported by a store implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The requested row does not exist (or is no longer valid).
    #[error("record not found")]
    NotFound,

    /// The backing store could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A server-side login session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Option<i32>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Whether the session is still live at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Parameters for [`SessionStore::create_session`].
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Option<i32>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// A page view as handed to [`AnalyticsStore::create_page_view`].
///
/// `ip_address` is always anonymized before it reaches the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewPageView {
    pub path: String,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub viewed_at: DateTime<Utc>,
}

/// A client-reported analytics event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewEvent {
    pub event_name: String,
    pub session_id: String,
    pub path: Option<String>,
    pub ip_address: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub occurred_at: DateTime<Utc>,
}

/// Page views for one path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathCount {
    pub path: String,
    pub count: i64,
}

/// Occurrences of one event name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventNameCount {
    pub event_name: String,
    pub count: i64,
}

/// Totals over a reporting period.
///
/// Both breakdowns are ordered by count descending, then by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalyticsSummary {
    pub total_page_views: i64,
    pub total_events: i64,
    pub page_views_by_path: Vec<PathCount>,
    pub events_by_name: Vec<EventNameCount>,
}

/// Selection for [`AnalyticsStore::list_events`]. `None` filters match all.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_name: Option<String>,
    pub session_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

/// Credentials row used by the login handler.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub id: i32,
    pub username: String,
    pub email: Option<String>,
    /// `None` for accounts that cannot log in with a password.
    pub password_hash: Option<String>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, params: NewSession) -> Result<Session, StoreError>;

    /// Return the session only if it exists and has not expired.
    ///
    /// Expiry is enforced here; callers do not re-check `expires_at`.
    async fn get_valid_session(&self, id: Uuid) -> Result<Session, StoreError>;

    async fn expire_session(&self, id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn create_page_view(&self, view: NewPageView) -> Result<(), StoreError>;

    async fn create_event(&self, event: NewEvent) -> Result<(), StoreError>;

    /// Aggregate everything recorded at or after `since`.
    async fn summarize(&self, since: DateTime<Utc>) -> Result<AnalyticsSummary, StoreError>;

    /// Matching events, newest first.
    async fn list_events(&self, filter: EventFilter) -> Result<Vec<NewEvent>, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up a user by username or email.
    async fn find_credentials(&self, login: &str) -> Result<Option<UserCredentials>, StoreError>;
}
