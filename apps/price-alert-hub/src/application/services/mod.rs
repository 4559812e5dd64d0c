//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `FeedMultiplexer`: One ref-counted upstream feed per symbol
//! - `ConnectionRegistry`: Client interest sets tied to feed references
//! - `Broadcaster`: Per-client outboxes and tick fan-out
//! - `AlertEngine`: Alert CRUD and per-tick evaluation
//! - `ClientGateway`: Client protocol handling

pub mod alert_engine;
pub mod broadcaster;
pub mod connection_registry;
pub mod feed_multiplexer;
pub mod gateway;

pub use alert_engine::{AlertEngine, AlertError, AlertFired};
pub use broadcaster::{Broadcaster, Inbox, Outbox, client_queue};
pub use connection_registry::{ConnectionRegistry, SubscribeError, SubscribeOutcome};
pub use feed_multiplexer::{Acquire, FeedMultiplexer, Release};
pub use gateway::{ClientGateway, DEFAULT_TRIGGER_LOG_LIMIT};
