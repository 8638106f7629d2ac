use std::net::SocketAddr;
use std::process::ExitCode;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use site_backend::store::MemoryStore;
use site_backend::{AppState, Config, Stores, build_router, metrics};

#[tokio::main]
async fn main() -> ExitCode {
    // Pick up LOG_FORMAT / RUST_LOG from .env before the subscriber exists
    let _ = dotenvy::dotenv();
    init_tracing();

    info!("Starting site backend v{}", env!("CARGO_PKG_VERSION"));

    match run().await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

/// Human-readable logs by default, JSON lines with `LOG_FORMAT=json`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    }
}

/// Run the application, returning an exit code on error.
async fn run() -> Result<(), exitcode::ExitCode> {
    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {e}");
        exitcode::CONFIG
    })?;
    info!(
        host = %config.host,
        port = %config.port,
        protected_prefix = %config.protected_prefix,
        json_logs = config.log_json,
        "Configuration loaded"
    );

    if let Some(addr) = config.metrics_addr() {
        metrics::try_init_metrics(addr);
    } else {
        info!("Prometheus metrics disabled (METRICS_PORT=0)");
    }

    // In-memory persistence, optionally seeded with one account
    let store = MemoryStore::new();
    match (&config.admin_username, &config.admin_password) {
        (Some(username), Some(password)) => {
            let id = store.add_user(username, None, password).await.map_err(|e| {
                error!("Failed to seed admin account: {e}");
                exitcode::SOFTWARE
            })?;
            info!(user_id = id, username = %username, "Seeded admin account");
        }
        (Some(_), None) | (None, Some(_)) => {
            warn!("ADMIN_USERNAME and ADMIN_PASSWORD must both be set; no account seeded");
        }
        (None, None) => info!("No admin account configured; login will always fail"),
    }

    // Build application state and router
    let state = AppState::new(config.clone(), Stores::memory(&store)).map_err(|e| {
        error!("Invalid rate limit configuration: {e}");
        exitcode::CONFIG
    })?;
    let app = build_router(state.clone());

    // Start server
    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET  /healthz          - Liveness (plain text)");
    info!("  GET  /health           - Health check");
    info!("  POST /auth/login       - Create session");
    info!("  POST /auth/logout      - End session");
    info!("  POST /pageviews        - Record a page view");
    info!("  POST /events           - Record an analytics event");
    info!("  GET  {}/me         - Current user (session required)", config.protected_prefix);
    info!("  GET  {}/analytics/stats - Aggregates, ?days=7|30 (session required)", config.protected_prefix);
    info!("  GET  {}/events     - Event listing (session required)", config.protected_prefix);

    // Start server with graceful shutdown
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    // Drain pending analytics writes and stop the sweeper
    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolve on Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed is logged and never fires; the other
/// one still works.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
