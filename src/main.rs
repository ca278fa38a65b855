use chat_relay::config::Config;
use chat_relay::ws::{CloseReason, HeartbeatMonitor};
use chat_relay::{create_app, db, AppState};
use std::panic;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "chat_relay=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });
    if config.is_development() {
        info!("Running in {} mode", config.environment);
    }

    // Storage, falls back to memory without a database
    let store = db::init_store(config.db_url.as_deref()).await;

    let address = config.server_address();
    let state = AppState::new(config, store);

    // Liveness monitor for every open session
    let (stop_tx, stop_rx) = watch::channel(false);
    let heartbeat = HeartbeatMonitor::new(
        state.registry.clone(),
        state.config.heartbeat_interval(),
        state.config.heartbeat_timeout(),
    )
    .spawn(stop_rx);

    let app = create_app(state.clone());

    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", address, e);
            std::process::exit(1);
        }
    };

    info!("🚀 Server running on http://{}", address);
    info!("📡 WebSocket available at ws://{}/ws", address);
    info!("📚 Swagger UI available at http://{}/swagger", address);

    let registry = state.registry.clone();
    let shutdown = async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => error!("Failed to listen for the shutdown signal: {}", e),
        }
        // Stop probing, then drop every connection still open
        stop_tx.send_replace(true);
        registry.close_all(CloseReason::Shutdown);
    };

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        error!("Server error: {}", e);
    }

    if let Err(e) = heartbeat.await {
        error!("Heartbeat monitor failed: {}", e);
    }
    info!("Server stopped");
}
