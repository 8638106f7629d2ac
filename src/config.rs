//! Application configuration loaded from environment variables.
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_CAPACITY`: Requests allowed per client per window (default: 60, 0 = disabled)
//! - `RATE_LIMIT_WINDOW_SECS`: Window length (default: 60)
//! - `RATE_LIMIT_SWEEP_INTERVAL_SECS`: Idle visitor eviction period (default: 300, 0 = disabled)
//!
//! # Sessions
//!
//! - `SESSION_TTL_HOURS`: Lifetime of login sessions and their cookie (default: 24)
//! - `SESSION_COOKIE_SECURE`: Mark the session cookie `Secure` (default: false)
//! - `PROTECTED_PREFIX`: Mount point of the authenticated subtree (default: `/admin`)
//!
//! # Security
//!
//! - `CORS_ALLOWED_ORIGINS`: Comma-separated list of allowed origins (default: `*` for dev)
//! - `TRUSTED_PROXIES`: CIDR ranges allowed to set forwarding headers (default: empty = all)

use std::env;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::middleware::rate_limit::{DEFAULT_CAPACITY, DEFAULT_WINDOW};

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 8080)
    pub port: u16,

    /// Maximum request body size in bytes (default: 1MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Tokens per client per window (default: 60)
    /// Set to 0 to disable rate limiting
    pub rate_limit_capacity: u32,

    /// Length of one rate-limit window (default: 60s)
    pub rate_limit_window: Duration,

    /// How often idle visitors are evicted (default: 300s, zero = never)
    pub rate_limit_sweep_interval: Duration,

    // =========================================================================
    // Session Configuration
    // =========================================================================
    /// Lifetime of login-created sessions (default: 24h)
    pub session_ttl: Duration,

    /// Add `Secure` to the session cookie; enable behind HTTPS
    pub session_cookie_secure: bool,

    /// Path prefix of the auth-gated subtree (default: "/admin")
    pub protected_prefix: String,

    /// Account seeded into the in-memory user store at startup
    pub admin_username: Option<String>,
    pub admin_password: Option<String>,

    // =========================================================================
    // Analytics Configuration
    // =========================================================================
    /// Maximum concurrent page-view writes; extra captures are dropped
    /// (default: 0 = unbounded)
    pub analytics_max_in_flight: usize,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Comma-separated list of allowed CORS origins
    /// Use "*" to allow all origins (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    /// Trusted proxy CIDR ranges for IP spoofing mitigation.
    /// X-Forwarded-For and X-Real-IP are only honoured when the connection
    /// originates from one of these networks.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: Empty (trust all sources)
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value fails to parse or validate.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 8080)?,
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?,

            // Rate limiting
            rate_limit_capacity: Self::parse_env("RATE_LIMIT_CAPACITY", DEFAULT_CAPACITY)?,
            rate_limit_window: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_WINDOW_SECS",
                DEFAULT_WINDOW.as_secs(),
            )?),
            rate_limit_sweep_interval: Duration::from_secs(Self::parse_env(
                "RATE_LIMIT_SWEEP_INTERVAL_SECS",
                300,
            )?),

            // Sessions
            session_ttl: Duration::from_secs(
                Self::parse_env::<u64>("SESSION_TTL_HOURS", 24)?.saturating_mul(3600),
            ),
            session_cookie_secure: Self::parse_env("SESSION_COOKIE_SECURE", false)?,
            protected_prefix: env::var("PROTECTED_PREFIX").unwrap_or_else(|_| "/admin".to_string()),
            admin_username: env::var("ADMIN_USERNAME").ok().filter(|s| !s.is_empty()),
            admin_password: env::var("ADMIN_PASSWORD").ok().filter(|s| !s.is_empty()),

            // Analytics
            analytics_max_in_flight: Self::parse_env("ANALYTICS_MAX_IN_FLIGHT", 0)?,

            // Security
            cors_allowed_origins: Self::parse_cors_origins(),
            trusted_proxies: Self::parse_trusted_proxies(),

            // Observability
            log_json: env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }

        if self.session_ttl.is_zero() {
            return Err(AppError::ConfigError(
                "SESSION_TTL_HOURS must be greater than 0".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        if !self.protected_prefix.starts_with('/') || self.protected_prefix == "/" {
            return Err(AppError::ConfigError(format!(
                "PROTECTED_PREFIX must start with '/' and not be the root, got {:?}",
                self.protected_prefix
            )));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_capacity > 0
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_enabled()
            .then(|| std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .trim()
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse CORS allowed origins from environment variable.
    fn parse_cors_origins() -> Vec<String> {
        split_list(&env::var("CORS_ALLOWED_ORIGINS").unwrap_or_else(|_| "*".to_string()))
    }

    /// Parse trusted proxy CIDR ranges from environment variable.
    ///
    /// When empty, forwarding headers are trusted from every peer, which
    /// allows IP spoofing. In production, configure this to the reverse
    /// proxy's ranges.
    fn parse_trusted_proxies() -> Vec<String> {
        env::var("TRUSTED_PROXIES")
            .map(|s| split_list(&s))
            .unwrap_or_default()
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_request_body_size: 1024 * 1024,
            // Rate limiting
            rate_limit_capacity: DEFAULT_CAPACITY,
            rate_limit_window: DEFAULT_WINDOW,
            rate_limit_sweep_interval: Duration::from_secs(300),
            // Sessions
            session_ttl: Duration::from_secs(24 * 3600),
            session_cookie_secure: false,
            protected_prefix: "/admin".to_string(),
            admin_username: None,
            admin_password: None,
            // Analytics
            analytics_max_in_flight: 0,
            // Security
            cors_allowed_origins: vec!["*".to_string()],
            trusted_proxies: vec![], // Empty = trust all (dev mode)
            // Observability
            log_json: false,
            metrics_port: 9090,
        }
    }
}
