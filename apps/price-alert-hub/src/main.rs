//! Price Alert Hub Binary
//!
//! Starts the subscription multiplexer and alert engine.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-alert-hub
//! ```
//!
//! # Environment Variables
//!
//! - `ALERT_HUB_WS_PORT`: Client WebSocket port (default: 5000)
//! - `ALERT_HUB_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `ALERT_HUB_DATABASE_URL`: SQLite URL, or `memory` (default: sqlite://price_alerts.db)
//! - `ALERT_HUB_FEED`: simulated | websocket (default: simulated)
//! - `ALERT_HUB_FEED_URL`: Upstream URL for the websocket feed
//! - `ALERT_HUB_SIM_INTERVAL_MS`: Simulated tick interval (default: 1000)
//! - `ALERT_HUB_CLIENT_QUEUE`: Per-client queued tick limit (default: 1024)
//! - `ALERT_HUB_FEED_BUFFER`: Per-feed tick buffer (default: 256)
//! - `ALERT_HUB_TRIGGER_LOG_LIMIT`: Trigger logs sent on connect (default: 50)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use price_alert_hub::application::ports::{
    Clock, PersistenceStore, PriceFeedProvider, SystemClock, TickSink,
};
use price_alert_hub::application::services::{
    AlertEngine, Broadcaster, ClientGateway, ConnectionRegistry, FeedMultiplexer,
};
use price_alert_hub::domain::subscription::InterestTable;
use price_alert_hub::infrastructure::feed::{
    SimulatedFeedConfig, SimulatedFeedProvider, WebSocketFeedConfig, WebSocketFeedProvider,
};
use price_alert_hub::infrastructure::health::{HealthServer, HealthServerState};
use price_alert_hub::infrastructure::persistence::{InMemoryStore, SqliteStore};
use price_alert_hub::infrastructure::telemetry;
use price_alert_hub::infrastructure::ws::{WsServer, WsState};
use price_alert_hub::{FeedKind, HubConfig, StoreKind, init_metrics};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[allow(clippy::expect_used)]
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Price Alert Hub");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = HubConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let store: Arc<dyn PersistenceStore> = match &config.store {
        StoreKind::Memory => Arc::new(InMemoryStore::new()),
        StoreKind::Sqlite(url) => Arc::new(SqliteStore::connect(url).await?),
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let provider = build_provider(&config);

    // Sinks see every tick: the broadcaster fans it out, the engine evaluates alerts
    let interest = Arc::new(InterestTable::new());
    let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&interest)));
    let engine = Arc::new(AlertEngine::new(
        Arc::clone(&store),
        Arc::clone(&clock),
        Arc::clone(&broadcaster),
    ));
    let multiplexer = FeedMultiplexer::new(
        provider,
        vec![
            Arc::clone(&broadcaster) as Arc<dyn TickSink>,
            Arc::clone(&engine) as Arc<dyn TickSink>,
        ],
    );
    let registry = Arc::new(ConnectionRegistry::new(interest, multiplexer.clone()));
    let gateway = Arc::new(
        ClientGateway::new(
            registry,
            Arc::clone(&broadcaster),
            engine,
            multiplexer.clone(),
            Arc::clone(&store),
            clock,
        )
        .with_trigger_log_limit(config.client.trigger_log_limit),
    );

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        multiplexer.clone(),
        broadcaster,
        store,
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let ws_state = Arc::new(WsState::new(
        gateway,
        config.client.queue_capacity,
        shutdown_token.clone(),
    ));
    let ws_server = WsServer::new(config.server.ws_port, ws_state);
    let ws_task = tokio::spawn(async move {
        if let Err(e) = ws_server.run().await {
            tracing::error!(error = %e, "WebSocket server error");
        }
    });

    tracing::info!("Price alert hub ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, ws_task).await.is_err() {
        tracing::warn!("WebSocket server did not stop in time");
    }
    multiplexer.shutdown().await;

    tracing::info!("Price alert hub stopped");
    Ok(())
}

fn build_provider(config: &HubConfig) -> Arc<dyn PriceFeedProvider> {
    match config.feed.kind {
        FeedKind::Simulated => Arc::new(SimulatedFeedProvider::new(SimulatedFeedConfig {
            interval: config.feed.sim_interval,
            buffer: config.feed.buffer,
            ..SimulatedFeedConfig::default()
        })),
        FeedKind::WebSocket => Arc::new(WebSocketFeedProvider::new(WebSocketFeedConfig {
            url: config.feed.url.clone(),
            buffer: config.feed.buffer,
        })),
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &HubConfig) {
    let store = match &config.store {
        StoreKind::Memory => "memory",
        StoreKind::Sqlite(_) => "sqlite",
    };
    tracing::info!(
        ws_port = config.server.ws_port,
        health_port = config.server.health_port,
        feed = config.feed.kind.as_str(),
        store,
        client_queue = config.client.queue_capacity,
        "Configuration loaded"
    );
    tracing::debug!(
        feed_url = %config.feed.url,
        sim_interval_ms = config.feed.sim_interval.as_millis(),
        feed_buffer = config.feed.buffer,
        trigger_log_limit = config.client.trigger_log_limit,
        "Feed settings"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
