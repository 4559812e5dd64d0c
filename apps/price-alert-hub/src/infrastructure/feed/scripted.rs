//! Scripted Price Feed
//!
//! A provider whose feeds are driven by hand. Tests push ticks, inject
//! stream failures, and make opens fail per symbol, then observe how many
//! times each feed was opened and whether it is still being consumed.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::application::ports::{FeedOpenError, FeedStreamError, PriceFeedProvider, TickStream};
use crate::domain::market::{PriceTick, Symbol};

type ScriptSender = mpsc::UnboundedSender<Result<PriceTick, FeedStreamError>>;

#[derive(Debug, Default)]
struct ScriptState {
    feeds: HashMap<Symbol, ScriptSender>,
    failing: HashSet<Symbol>,
    open_calls: HashMap<Symbol, usize>,
}

/// Hand-driven price feed provider.
#[derive(Debug, Default)]
pub struct ScriptedFeedProvider {
    state: Mutex<ScriptState>,
}

impl ScriptedFeedProvider {
    /// Create a provider with no feeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make future opens for `symbol` fail (or succeed again).
    pub fn set_failing(&self, symbol: &Symbol, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing.insert(symbol.clone());
        } else {
            state.failing.remove(symbol);
        }
    }

    /// Push a tick on the open feed for its symbol.
    ///
    /// Returns `false` if no live feed exists.
    pub fn push(&self, tick: PriceTick) -> bool {
        let state = self.state.lock();
        state
            .feeds
            .get(&tick.symbol)
            .is_some_and(|tx| tx.send(Ok(tick)).is_ok())
    }

    /// Push a tick with `price` stamped now.
    pub fn push_price(&self, symbol: &Symbol, price: f64) -> bool {
        self.push(PriceTick::new(symbol.clone(), price, Utc::now()))
    }

    /// Fail the open feed for `symbol` with `error`.
    pub fn fail_stream(&self, symbol: &Symbol, error: FeedStreamError) -> bool {
        let mut state = self.state.lock();
        state
            .feeds
            .remove(symbol)
            .is_some_and(|tx| tx.send(Err(error)).is_ok())
    }

    /// End the open feed for `symbol` without an error.
    pub fn end_stream(&self, symbol: &Symbol) -> bool {
        self.state.lock().feeds.remove(symbol).is_some()
    }

    /// Whether a feed for `symbol` is open and still consumed.
    #[must_use]
    pub fn is_live(&self, symbol: &Symbol) -> bool {
        self.state
            .lock()
            .feeds
            .get(symbol)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Number of live feeds across all symbols.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.state
            .lock()
            .feeds
            .values()
            .filter(|tx| !tx.is_closed())
            .count()
    }

    /// How many times `open` was called for `symbol`, including failures.
    #[must_use]
    pub fn open_calls(&self, symbol: &Symbol) -> usize {
        self.state
            .lock()
            .open_calls
            .get(symbol)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl PriceFeedProvider for ScriptedFeedProvider {
    async fn open(&self, symbol: &Symbol) -> Result<TickStream, FeedOpenError> {
        let mut state = self.state.lock();
        *state.open_calls.entry(symbol.clone()).or_insert(0) += 1;

        if state.failing.contains(symbol) {
            return Err(FeedOpenError::Rejected {
                symbol: symbol.to_string(),
                message: "scripted failure".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.feeds.insert(symbol.clone(), tx);
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pushed_ticks_arrive_in_order() {
        let provider = ScriptedFeedProvider::new();
        let aapl = Symbol::parse("AAPL").unwrap();
        let mut stream = provider.open(&aapl).await.unwrap();

        assert!(provider.push_price(&aapl, 1.0));
        assert!(provider.push_price(&aapl, 2.0));

        assert_eq!(stream.next().await.unwrap().unwrap().price, 1.0);
        assert_eq!(stream.next().await.unwrap().unwrap().price, 2.0);
    }

    #[tokio::test]
    async fn dropping_stream_marks_feed_dead() {
        let provider = ScriptedFeedProvider::new();
        let aapl = Symbol::parse("AAPL").unwrap();
        let stream = provider.open(&aapl).await.unwrap();
        assert!(provider.is_live(&aapl));

        drop(stream);

        assert!(!provider.is_live(&aapl));
        assert!(!provider.push_price(&aapl, 1.0));
    }

    #[tokio::test]
    async fn failing_symbol_rejects_open() {
        let provider = ScriptedFeedProvider::new();
        let bad = Symbol::parse("BAD").unwrap();
        provider.set_failing(&bad, true);

        assert!(provider.open(&bad).await.is_err());
        assert_eq!(provider.open_calls(&bad), 1);
        assert_eq!(provider.live_count(), 0);
    }
}
