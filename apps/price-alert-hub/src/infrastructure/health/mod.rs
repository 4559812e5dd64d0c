//! Health and Metrics Endpoint
//!
//! Small HTTP server for probes and scraping, separate from the client
//! WebSocket port.
//!
//! | Route      | Response                                             |
//! |------------|------------------------------------------------------|
//! | `/health`  | JSON status: version, uptime, open feeds, clients    |
//! | `/healthz` | `OK` while the process serves HTTP                   |
//! | `/readyz`  | `READY` once the store answers, else 503             |
//! | `/metrics` | Prometheus text exposition                           |

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::ports::PersistenceStore;
use crate::application::services::{Broadcaster, FeedMultiplexer};
use crate::infrastructure::metrics;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Seconds since the server state was created.
    pub uptime_secs: u64,
    /// Time the response was built.
    pub current_time: DateTime<Utc>,
    /// Upstream feed summary.
    pub feeds: FeedsStatus,
    /// Connected client summary.
    pub clients: ClientStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Store reachable.
    Healthy,
    /// Store unreachable; live fan-out may still work.
    Degraded,
}

/// Upstream feed summary.
#[derive(Debug, Clone, Serialize)]
pub struct FeedsStatus {
    /// Price feed provider name.
    pub provider: &'static str,
    /// Number of open feeds.
    pub open: usize,
    /// Symbols with an open feed, sorted.
    pub symbols: Vec<String>,
}

/// Connected client summary.
#[derive(Debug, Clone, Serialize)]
pub struct ClientStatus {
    /// Total connected clients.
    pub total: usize,
}

/// Shared state for the health routes.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    multiplexer: FeedMultiplexer,
    broadcaster: Arc<Broadcaster>,
    store: Arc<dyn PersistenceStore>,
}

impl HealthServerState {
    /// Capture the collaborators the probes read from.
    #[must_use]
    pub fn new(
        version: String,
        multiplexer: FeedMultiplexer,
        broadcaster: Arc<Broadcaster>,
        store: Arc<dyn PersistenceStore>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            multiplexer,
            broadcaster,
            store,
        }
    }

    async fn store_ready(&self) -> bool {
        match self.store.health_check().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Store health check failed");
                false
            }
        }
    }

    fn snapshot(&self, store_ok: bool) -> HealthResponse {
        let symbols: Vec<String> = self
            .multiplexer
            .open_symbols()
            .into_iter()
            .map(String::from)
            .collect();

        HealthResponse {
            status: if store_ok {
                HealthStatus::Healthy
            } else {
                HealthStatus::Degraded
            },
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            feeds: FeedsStatus {
                provider: self.multiplexer.provider_name(),
                open: symbols.len(),
                symbols,
            },
            clients: ClientStatus {
                total: self.broadcaster.client_count(),
            },
        }
    }
}

/// Probe and metrics HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a server that stops when `cancel` fires.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`HealthServerError::Bind`] if the port is unavailable and
    /// [`HealthServerError::Serve`] if serving fails.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let port = self.port;
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
            .await
            .map_err(|source| HealthServerError::Bind { port, source })?;
        tracing::info!(port, "Health server listening");

        axum::serve(listener, routes(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(HealthServerError::Serve)?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

fn routes(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(status))
        .route("/healthz", get(|| async { "OK" }))
        .route("/readyz", get(ready))
        .route("/metrics", get(prometheus))
        .with_state(state)
}

async fn status(State(state): State<Arc<HealthServerState>>) -> Json<HealthResponse> {
    let store_ok = state.store_ready().await;
    Json(state.snapshot(store_ok))
}

async fn ready(State(state): State<Arc<HealthServerState>>) -> (StatusCode, &'static str) {
    if state.store_ready().await {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn prometheus() -> Response {
    match metrics::get_metrics_handle() {
        Some(handle) => (
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// The port could not be bound.
    #[error("failed to bind health port {port}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The server stopped with an I/O error.
    #[error("health server failed")]
    Serve(#[source] std::io::Error),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{MockPersistenceStore, PersistenceError, PriceFeedProvider};
    use crate::domain::market::Symbol;
    use crate::domain::subscription::InterestTable;
    use crate::infrastructure::feed::ScriptedFeedProvider;
    use crate::infrastructure::persistence::InMemoryStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(store: Arc<dyn PersistenceStore>) -> (FeedMultiplexer, Arc<HealthServerState>) {
        let provider = Arc::new(ScriptedFeedProvider::new()) as Arc<dyn PriceFeedProvider>;
        let multiplexer = FeedMultiplexer::new(provider, vec![]);
        let broadcaster = Arc::new(Broadcaster::new(Arc::new(InterestTable::new())));
        let state = Arc::new(HealthServerState::new(
            "0.1.0".to_string(),
            multiplexer.clone(),
            broadcaster,
            store,
        ));
        (multiplexer, state)
    }

    async fn get_request(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Degraded).unwrap(),
            "\"degraded\""
        );
    }

    #[tokio::test]
    async fn health_reports_open_feeds() {
        let (multiplexer, state) = state(Arc::new(InMemoryStore::new()));
        multiplexer
            .acquire(&Symbol::parse("AAPL").unwrap())
            .await
            .unwrap();

        let (status, body) = get_request(routes(state), "/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["feeds"]["provider"], "scripted");
        assert_eq!(json["feeds"]["open"], 1);
        assert_eq!(json["feeds"]["symbols"][0], "AAPL");
        assert_eq!(json["clients"]["total"], 0);
        multiplexer.shutdown().await;
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let (_multiplexer, state) = state(Arc::new(InMemoryStore::new()));
        let (status, body) = get_request(routes(state), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }

    #[tokio::test]
    async fn readiness_follows_store() {
        let (_multiplexer, ready) = state(Arc::new(InMemoryStore::new()));
        assert_eq!(get_request(routes(ready), "/readyz").await.0, StatusCode::OK);

        let mut down = MockPersistenceStore::new();
        down.expect_health_check()
            .returning(|| Err(PersistenceError::Unavailable("closed".into())));
        let (_multiplexer, not_ready) = state(Arc::new(down));

        let (status, body) = get_request(routes(not_ready), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "NOT READY");
    }
}
