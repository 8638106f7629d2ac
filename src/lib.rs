//! # Site Backend
//!
//! Public HTTP API backend for a personal site, built around one request
//! pipeline:
//!
//! - **Rate limiting**: per-client token bucket behind a single mutex
//! - **Sessions**: cookie-based auth gate on a protected route subtree
//! - **Analytics**: fire-and-forget page-view capture with IP anonymization
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Pipeline: Logging → Recovery → CORS → Client IP →          │
//! │            Analytics → Rate Limit                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Routes (+ session gate on the protected prefix)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, auth, pageviews, events)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Stores (SessionStore, AnalyticsStore, UserStore)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//!
//! use site_backend::store::MemoryStore;
//! use site_backend::{AppState, Config, Stores, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = MemoryStore::new();
//!     let state = AppState::new(config, Stores::memory(&store))?;
//!     let app = build_router(state.clone());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//!     state.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod anonymize;
pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod password;
pub mod pipeline;
pub mod routes;
pub mod state;
pub mod store;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use state::{AppState, Stores};
