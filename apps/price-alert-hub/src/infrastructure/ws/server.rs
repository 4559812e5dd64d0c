//! WebSocket Server
//!
//! Accepts client connections on `/ws` and bridges each socket to the
//! client gateway.
//!
//! # Connection Task Layout
//!
//! ```text
//!                 ┌──────────────┐   ServerEvent   ┌────────────┐
//!  gateway ──────►│ client queue │────────────────►│ send task  │──► socket
//!  broadcaster    └──────────────┘                 └────────────┘
//!
//!  socket ──► read loop ──► gateway.handle_text (one frame at a time)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{ClientGateway, client_queue};

/// Shared state for WebSocket handlers.
pub struct WsState {
    gateway: Arc<ClientGateway>,
    queue_capacity: usize,
    cancel: CancellationToken,
}

impl WsState {
    /// Create handler state. `queue_capacity` bounds the price ticks queued
    /// for each client.
    #[must_use]
    pub const fn new(
        gateway: Arc<ClientGateway>,
        queue_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            queue_capacity,
            cancel,
        }
    }
}

/// Client WebSocket server.
pub struct WsServer {
    port: u16,
    state: Arc<WsState>,
}

impl WsServer {
    /// Create a new server. It stops when the state's token is cancelled.
    #[must_use]
    pub const fn new(port: u16, state: Arc<WsState>) -> Self {
        Self { port, state }
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`WsServerError::Bind`] if the port is unavailable and
    /// [`WsServerError::Serve`] if serving fails.
    pub async fn run(self) -> Result<(), WsServerError> {
        let port = self.port;
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
            .await
            .map_err(|source| WsServerError::Bind { port, source })?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`WsServerError::Serve`] if serving fails.
    pub async fn serve(self, listener: TcpListener) -> Result<(), WsServerError> {
        let port = listener.local_addr().map_or(self.port, |a| a.port());
        let cancel = self.state.cancel.clone();
        let app = router(self.state);

        tracing::info!(port, "WebSocket server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .map_err(WsServerError::Serve)?;

        tracing::info!("WebSocket server stopped");
        Ok(())
    }
}

fn router(state: Arc<WsState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<WsState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<WsState>) {
    let (outbox, mut events) = client_queue(state.queue_capacity);
    let (mut sink, mut stream) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(event = event.name(), error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let client = state.gateway.connect(outbox).await;

    loop {
        tokio::select! {
            () = state.cancel.cancelled() => break,
            _ = &mut send_task => {
                tracing::debug!(client_id = client, "Send half closed");
                break;
            }
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    state.gateway.handle_text(client, text.as_str()).await;
                }
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => state.gateway.handle_text(client, text).await,
                    Err(_) => tracing::debug!(client_id = client, "Ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(client_id = client, error = %e, "WebSocket read error");
                    break;
                }
            },
        }
    }

    state.gateway.disconnect(client).await;
    send_task.abort();
}

// =============================================================================
// Errors
// =============================================================================

/// WebSocket server errors.
#[derive(Debug, thiserror::Error)]
pub enum WsServerError {
    /// The port could not be bound.
    #[error("failed to bind WebSocket port {port}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The server stopped with an I/O error.
    #[error("WebSocket server failed")]
    Serve(#[source] std::io::Error),
}
