//! Tick Sink Port
//!
//! Consumers the feed multiplexer delivers every tick to. Sinks are invoked
//! from the feed task of the tick's symbol, so ticks for one symbol reach
//! each sink in upstream order.

use async_trait::async_trait;

use crate::application::ports::FeedStreamError;
use crate::domain::market::{PriceTick, Symbol};

/// Receiver of ticks from open feeds.
#[async_trait]
pub trait TickSink: Send + Sync {
    /// Handle one tick.
    async fn on_tick(&self, tick: &PriceTick);

    /// An open feed failed and was torn down. Called while the symbol's
    /// reference count is being reset, before any new feed can open.
    async fn on_feed_lost(&self, _symbol: &Symbol, _reason: &FeedStreamError) {}
}
