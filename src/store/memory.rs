//! In-process store used by the binary and the test suites.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AnalyticsStore, AnalyticsSummary, EventFilter, EventNameCount, NewEvent, NewPageView,
    NewSession, PathCount, Session, SessionStore, StoreError, UserCredentials, UserStore,
};
use crate::password::{DEFAULT_COST, PasswordError, hash_password};

/// Thread-safe in-memory implementation of every store contract.
///
/// Cloning is cheap and clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
    hash_cost: u32,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_hash_cost(DEFAULT_COST)
    }
}

#[derive(Default)]
struct Inner {
    sessions: RwLock<HashMap<Uuid, Session>>,
    page_views: RwLock<Vec<NewPageView>>,
    events: RwLock<Vec<NewEvent>>,
    users: RwLock<Vec<UserCredentials>>,
    next_user_id: AtomicI32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose [`add_user`](Self::add_user) hashes at bcrypt `cost`.
    pub fn with_hash_cost(cost: u32) -> Self {
        Self {
            inner: Arc::default(),
            hash_cost: cost,
        }
    }

    /// Register a password-capable account and return its id.
    ///
    /// # Errors
    ///
    /// Fails when the configured hash cost is rejected by bcrypt.
    pub async fn add_user(
        &self,
        username: &str,
        email: Option<&str>,
        password: &str,
    ) -> Result<i32, PasswordError> {
        let password_hash = hash_password(password, self.hash_cost)?;
        let id = self.inner.next_user_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner.users.write().await.push(UserCredentials {
            id,
            username: username.to_string(),
            email: email.map(str::to_string),
            password_hash: Some(password_hash),
        });
        Ok(id)
    }

    /// Snapshot of all recorded page views in insertion order.
    pub async fn page_views(&self) -> Vec<NewPageView> {
        self.inner.page_views.read().await.clone()
    }

    /// Snapshot of all recorded events in insertion order.
    pub async fn events(&self) -> Vec<NewEvent> {
        self.inner.events.read().await.clone()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, params: NewSession) -> Result<Session, StoreError> {
        let session = Session {
            id: Uuid::new_v4(),
            user_id: params.user_id,
            ip_address: params.ip_address,
            user_agent: params.user_agent,
            created_at: Utc::now(),
            expires_at: params.expires_at,
        };
        self.inner
            .sessions
            .write()
            .await
            .insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_valid_session(&self, id: Uuid) -> Result<Session, StoreError> {
        let sessions = self.inner.sessions.read().await;
        match sessions.get(&id) {
            Some(session) if session.is_live_at(Utc::now()) => Ok(session.clone()),
            _ => Err(StoreError::NotFound),
        }
    }

    async fn expire_session(&self, id: Uuid) -> Result<(), StoreError> {
        let mut sessions = self.inner.sessions.write().await;
        let session = sessions.get_mut(&id).ok_or(StoreError::NotFound)?;
        session.expires_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl AnalyticsStore for MemoryStore {
    async fn create_page_view(&self, view: NewPageView) -> Result<(), StoreError> {
        self.inner.page_views.write().await.push(view);
        Ok(())
    }

    async fn create_event(&self, event: NewEvent) -> Result<(), StoreError> {
        self.inner.events.write().await.push(event);
        Ok(())
    }

    async fn summarize(&self, since: DateTime<Utc>) -> Result<AnalyticsSummary, StoreError> {
        let views = self.inner.page_views.read().await;
        let mut by_path: HashMap<&str, i64> = HashMap::new();
        for view in views.iter().filter(|v| v.viewed_at >= since) {
            *by_path.entry(view.path.as_str()).or_default() += 1;
        }

        let events = self.inner.events.read().await;
        let mut by_name: HashMap<&str, i64> = HashMap::new();
        for event in events.iter().filter(|e| e.occurred_at >= since) {
            *by_name.entry(event.event_name.as_str()).or_default() += 1;
        }

        Ok(AnalyticsSummary {
            total_page_views: by_path.values().sum(),
            total_events: by_name.values().sum(),
            page_views_by_path: ranked(by_path)
                .map(|(path, count)| PathCount { path, count })
                .collect(),
            events_by_name: ranked(by_name)
                .map(|(event_name, count)| EventNameCount { event_name, count })
                .collect(),
        })
    }

    async fn list_events(&self, filter: EventFilter) -> Result<Vec<NewEvent>, StoreError> {
        let events = self.inner.events.read().await;
        // Newest insertion first so equal timestamps keep a stable order
        let mut matching: Vec<NewEvent> = events
            .iter()
            .rev()
            .filter(|e| filter.event_name.as_ref().is_none_or(|n| *n == e.event_name))
            .filter(|e| filter.session_id.as_ref().is_none_or(|s| *s == e.session_id))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));

        Ok(matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit)
            .collect())
    }
}

/// Counts ordered by count descending, ties by key.
fn ranked(counts: HashMap<&str, i64>) -> impl Iterator<Item = (String, i64)> {
    let mut rows: Vec<(&str, i64)> = counts.into_iter().collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    rows.into_iter().map(|(key, count)| (key.to_string(), count))
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_credentials(&self, login: &str) -> Result<Option<UserCredentials>, StoreError> {
        let users = self.inner.users.read().await;
        Ok(users
            .iter()
            .find(|u| u.username == login || u.email.as_deref() == Some(login))
            .cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::password::{MIN_COST, verify_password};

    fn new_session(expires_in: Duration) -> NewSession {
        NewSession {
            user_id: Some(7),
            ip_address: Some("203.0.113.9".to_string()),
            user_agent: Some("test-agent".to_string()),
            expires_at: Utc::now() + expires_in,
        }
    }

    #[tokio::test]
    async fn test_live_session_is_returned() {
        let store = MemoryStore::new();
        let created = store.create_session(new_session(Duration::hours(1))).await.unwrap();

        let fetched = store.get_valid_session(created.id).await.unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.user_id, Some(7));
    }

    #[tokio::test]
    async fn test_expired_session_is_not_found() {
        let store = MemoryStore::new();
        let created = store.create_session(new_session(Duration::seconds(-1))).await.unwrap();

        assert_eq!(
            store.get_valid_session(created.id).await,
            Err(StoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let store = MemoryStore::new();
        assert_eq!(
            store.get_valid_session(Uuid::new_v4()).await,
            Err(StoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_expire_session_invalidates_it() {
        let store = MemoryStore::new();
        let created = store.create_session(new_session(Duration::hours(1))).await.unwrap();

        store.expire_session(created.id).await.unwrap();
        assert_eq!(
            store.get_valid_session(created.id).await,
            Err(StoreError::NotFound)
        );
        assert_eq!(
            store.expire_session(Uuid::new_v4()).await,
            Err(StoreError::NotFound)
        );
    }

    #[tokio::test]
    async fn test_find_credentials_by_username_or_email() {
        let store = MemoryStore::with_hash_cost(MIN_COST);
        let id = store
            .add_user("admin", Some("admin@example.com"), "hunter2")
            .await
            .unwrap();

        let by_name = store.find_credentials("admin").await.unwrap().unwrap();
        let by_email = store.find_credentials("admin@example.com").await.unwrap().unwrap();
        assert_eq!(by_name.id, id);
        assert_eq!(by_email.id, id);
        assert!(verify_password("hunter2", by_name.password_hash.as_deref().unwrap()));
        assert!(store.find_credentials("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_page_views_are_recorded_in_order() {
        let store = MemoryStore::new();
        for path in ["/a", "/b"] {
            store
                .create_page_view(NewPageView {
                    path: path.to_string(),
                    referrer: None,
                    user_agent: None,
                    ip_address: Some("10.0.0.0".to_string()),
                    viewed_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let views = store.page_views().await;
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].path, "/a");
        assert_eq!(views[1].path, "/b");
    }

    fn view(path: &str, age: Duration) -> NewPageView {
        NewPageView {
            path: path.to_string(),
            referrer: None,
            user_agent: None,
            ip_address: None,
            viewed_at: Utc::now() - age,
        }
    }

    fn event(name: &str, session: &str, age: Duration) -> NewEvent {
        NewEvent {
            event_name: name.to_string(),
            session_id: session.to_string(),
            path: None,
            ip_address: None,
            metadata: None,
            occurred_at: Utc::now() - age,
        }
    }

    #[tokio::test]
    async fn test_summarize_counts_only_the_period() {
        let store = MemoryStore::new();
        for v in [
            view("/blog", Duration::days(1)),
            view("/", Duration::days(2)),
            view("/blog", Duration::hours(3)),
            view("/blog", Duration::days(10)),
        ] {
            store.create_page_view(v).await.unwrap();
        }
        for e in [
            event("click", "s1", Duration::hours(1)),
            event("click", "s2", Duration::days(20)),
            event("signup", "s1", Duration::days(6)),
        ] {
            store.create_event(e).await.unwrap();
        }

        let summary = store.summarize(Utc::now() - Duration::days(7)).await.unwrap();
        assert_eq!(summary.total_page_views, 3);
        assert_eq!(summary.total_events, 2);
        assert_eq!(
            summary.page_views_by_path,
            vec![
                PathCount { path: "/blog".into(), count: 2 },
                PathCount { path: "/".into(), count: 1 },
            ]
        );
        assert_eq!(
            summary.events_by_name,
            vec![
                EventNameCount { event_name: "click".into(), count: 1 },
                EventNameCount { event_name: "signup".into(), count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_summarize_empty_store() {
        let summary = MemoryStore::new().summarize(Utc::now()).await.unwrap();
        assert_eq!(summary, AnalyticsSummary::default());
    }

    #[tokio::test]
    async fn test_list_events_filters_and_pages_newest_first() {
        let store = MemoryStore::new();
        for e in [
            event("click", "s1", Duration::minutes(30)),
            event("click", "s2", Duration::minutes(20)),
            event("signup", "s1", Duration::minutes(10)),
            event("click", "s1", Duration::minutes(5)),
        ] {
            store.create_event(e).await.unwrap();
        }

        let all = store
            .list_events(EventFilter { limit: 10, ..EventFilter::default() })
            .await
            .unwrap();
        let names: Vec<_> = all.iter().map(|e| e.event_name.as_str()).collect();
        assert_eq!(names, ["click", "signup", "click", "click"]);
        assert_eq!(all[0].session_id, "s1");
        assert_eq!(all[3].session_id, "s1");

        let clicks_for_s1 = store
            .list_events(EventFilter {
                event_name: Some("click".into()),
                session_id: Some("s1".into()),
                limit: 10,
                offset: 0,
            })
            .await
            .unwrap();
        assert_eq!(clicks_for_s1.len(), 2);

        let page = store
            .list_events(EventFilter { limit: 1, offset: 1, ..EventFilter::default() })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].event_name, "signup");
    }
}
