//! Tests against a real listener on an ephemeral port.
//!
//! These exercise what `oneshot` cannot: the transport peer address coming
//! from `ConnectInfo`, and cookies travelling over HTTP.
//!
//! Run with: `cargo test --test server_tests`
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;

use reqwest::{Client, StatusCode, header};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use site_backend::password::MIN_COST;
use site_backend::store::MemoryStore;
use site_backend::{AppState, Config, Stores, build_router};

struct TestServer {
    base_url: String,
    state: AppState,
    store: MemoryStore,
    client: Client,
}

impl TestServer {
    async fn start(config: Config) -> Self {
        let store = MemoryStore::with_hash_cost(MIN_COST);
        let state = AppState::new(config, Stores::memory(&store)).unwrap();
        let app = build_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            store,
            client: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[tokio::test]
async fn test_session_lifecycle_over_http() {
    let server = TestServer::start(Config::default()).await;
    let user_id = server.store.add_user("admin", None, "correct horse").await.unwrap();

    let response = server
        .client
        .post(server.url("/auth/login"))
        .json(&json!({ "username": "admin", "password": "correct horse" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response.headers()[header::SET_COOKIE]
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();

    let response = server
        .client
        .get(server.url("/admin/me"))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["user_id"], user_id);

    let response = server
        .client
        .post(server.url("/auth/logout"))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = server
        .client
        .get(server.url("/admin/me"))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_page_view_uses_peer_address() {
    let server = TestServer::start(Config::default()).await;

    let response = server
        .client
        .get(server.url("/healthz"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    server.state.shutdown().await;
    let views = server.store.page_views().await;
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].ip_address.as_deref(), Some("127.0.0.0"));
}

#[tokio::test]
async fn test_forwarding_headers_ignored_from_untrusted_peer() {
    let server = TestServer::start(Config {
        trusted_proxies: vec!["10.0.0.0/8".to_string()],
        ..Config::default()
    })
    .await;

    server
        .client
        .get(server.url("/healthz"))
        .header("x-forwarded-for", "203.0.113.99")
        .send()
        .await
        .unwrap();

    server.state.shutdown().await;
    let views = server.store.page_views().await;
    assert_eq!(views[0].ip_address.as_deref(), Some("127.0.0.0"));
}

#[tokio::test]
async fn test_peer_is_rate_limited_without_port() {
    // Every request opens a fresh connection, so the source port changes
    let server = TestServer::start(Config {
        rate_limit_capacity: 3,
        ..Config::default()
    })
    .await;

    for _ in 0..3 {
        let response = Client::new()
            .get(server.url("/healthz"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = Client::new()
        .get(server.url("/healthz"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["x-ratelimit-limit"], "3");
}
