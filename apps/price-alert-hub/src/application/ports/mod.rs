//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following the
//! Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `PriceFeedProvider`: Opens one upstream tick stream per symbol
//! - `PersistenceStore`: Alerts, trigger logs, and persisted subscriptions
//! - `Clock`: Source of "now" for cooldowns and timestamps
//!
//! ## Internal Ports
//!
//! - `TickSink`: Consumers of ticks fanned out by the feed multiplexer

mod clock_port;
mod persistence_port;
mod price_feed_port;
mod tick_sink_port;

pub use clock_port::{Clock, ManualClock, SystemClock};
pub use persistence_port::{PersistenceError, PersistenceStore};
#[cfg(test)]
pub use persistence_port::MockPersistenceStore;
pub use price_feed_port::{FeedOpenError, FeedStreamError, PriceFeedProvider, TickStream};
pub use tick_sink_port::TickSink;
