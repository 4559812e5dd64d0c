//! Price Feed Adapters
//!
//! Implementations of [`PriceFeedProvider`](crate::application::ports::PriceFeedProvider).
//!
//! - `websocket`: JSON tick stream over WebSocket, one connection per symbol
//! - `simulated`: Random-walk ticks for local runs without an upstream
//! - `scripted`: Hand-driven feeds for tests (`test-util` feature)

pub mod codec;
#[cfg(any(test, feature = "test-util"))]
pub mod scripted;
pub mod simulated;
pub mod websocket;

pub use codec::{CodecError, TickCodec};
#[cfg(any(test, feature = "test-util"))]
pub use scripted::ScriptedFeedProvider;
pub use simulated::{SimulatedFeedConfig, SimulatedFeedProvider};
pub use websocket::{DEFAULT_FEED_URL, WebSocketFeedConfig, WebSocketFeedProvider};
