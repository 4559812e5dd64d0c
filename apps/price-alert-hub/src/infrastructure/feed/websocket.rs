//! WebSocket Price Feed
//!
//! Opens one WebSocket connection per symbol, sends a subscribe request,
//! and streams decoded ticks until the consumer drops the stream or the
//! upstream fails.
//!
//! # Protocol
//!
//! After connecting, the client sends `{"subscribe":["<SYMBOL>"]}`. The
//! upstream replies with JSON frames understood by [`TickCodec`]. Frames
//! for other symbols are ignored; undecodable frames are logged and
//! skipped.
//!
//! Reconnection is left to the caller: a failed stream surfaces as an
//! error item, and the multiplexer tears the feed down.

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::codec::TickCodec;
use crate::application::ports::{FeedOpenError, FeedStreamError, PriceFeedProvider, TickStream};
use crate::domain::market::{PriceTick, Symbol};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type TickSender = mpsc::Sender<Result<PriceTick, FeedStreamError>>;

/// Default upstream URL.
pub const DEFAULT_FEED_URL: &str = "wss://streamer.finance.yahoo.com";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the WebSocket feed.
#[derive(Debug, Clone)]
pub struct WebSocketFeedConfig {
    /// Upstream WebSocket URL.
    pub url: String,
    /// Ticks buffered between the socket reader and the feed task.
    pub buffer: usize,
}

impl Default for WebSocketFeedConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_FEED_URL.to_string(),
            buffer: 256,
        }
    }
}

// =============================================================================
// Provider
// =============================================================================

/// WebSocket-backed price feed provider.
#[derive(Debug, Clone)]
pub struct WebSocketFeedProvider {
    config: WebSocketFeedConfig,
    codec: TickCodec,
}

impl WebSocketFeedProvider {
    /// Create a new provider.
    #[must_use]
    pub const fn new(config: WebSocketFeedConfig) -> Self {
        Self {
            config,
            codec: TickCodec::new(),
        }
    }
}

#[async_trait]
impl PriceFeedProvider for WebSocketFeedProvider {
    async fn open(&self, symbol: &Symbol) -> Result<TickStream, FeedOpenError> {
        tracing::info!(url = %self.config.url, symbol = %symbol, "Connecting to price feed");

        let connect_error = |message: String| FeedOpenError::Connect {
            symbol: symbol.to_string(),
            message,
        };

        let (ws_stream, _response) = tokio_tungstenite::connect_async(&self.config.url)
            .await
            .map_err(|e| connect_error(e.to_string()))?;

        let (mut write, read) = ws_stream.split();
        write
            .send(Message::Text(self.codec.encode_subscribe(symbol).into()))
            .await
            .map_err(|e| connect_error(format!("failed to send subscribe: {e}")))?;

        let (tx, rx) = mpsc::channel(self.config.buffer.max(1));
        tokio::spawn(pump(symbol.clone(), self.codec, write, read, tx));

        Ok(ReceiverStream::new(rx).boxed())
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Read frames until the consumer goes away or the socket fails.
async fn pump(
    symbol: Symbol,
    codec: TickCodec,
    mut write: SplitSink<WsStream, Message>,
    mut read: SplitStream<WsStream>,
    tx: TickSender,
) {
    loop {
        tokio::select! {
            () = tx.closed() => {
                tracing::debug!(symbol = %symbol, "Feed consumer dropped, closing socket");
                let _ = write.send(Message::Close(None)).await;
                return;
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match codec.decode(&text, Utc::now()) {
                            Ok(ticks) => {
                                for tick in ticks.into_iter().filter(|t| t.symbol == symbol) {
                                    if tx.send(Ok(tick)).await.is_err() {
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!(symbol = %symbol, error = %e, "Skipping undecodable frame");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            let _ = tx.send(Err(FeedStreamError::Transport(e.to_string()))).await;
                            return;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::info!(symbol = %symbol, "Upstream closed price feed");
                        let _ = tx.send(Err(FeedStreamError::Closed)).await;
                        return;
                    }
                    Some(Ok(_)) => {
                        // Ignore binary and pong frames
                    }
                    Some(Err(e)) => {
                        let _ = tx.send(Err(FeedStreamError::Transport(e.to_string()))).await;
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_points_at_streamer() {
        let config = WebSocketFeedConfig::default();
        assert_eq!(config.url, DEFAULT_FEED_URL);
        assert_eq!(config.buffer, 256);
    }

    #[tokio::test]
    async fn unreachable_upstream_is_connect_error() {
        let provider = WebSocketFeedProvider::new(WebSocketFeedConfig {
            url: "ws://127.0.0.1:1".to_string(),
            buffer: 4,
        });

        let err = provider
            .open(&Symbol::parse("AAPL").unwrap())
            .await
            .err()
            .unwrap();

        assert!(matches!(err, FeedOpenError::Connect { ref symbol, .. } if symbol == "AAPL"));
    }
}
