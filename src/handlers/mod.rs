mod analytics;
pub mod auth;
mod health;

pub use analytics::{analytics_stats, create_event, create_page_view, list_events};
pub use auth::{login, logout, me};
pub use health::{health_check, healthz};
