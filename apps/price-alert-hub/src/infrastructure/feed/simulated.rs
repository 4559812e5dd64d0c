//! Simulated Price Feed
//!
//! Generates a random walk per symbol so the hub can run without an
//! upstream. Each opened feed gets its own generator task, which stops as
//! soon as the consumer drops the stream.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::application::ports::{FeedOpenError, FeedStreamError, PriceFeedProvider, TickStream};
use crate::domain::market::{PriceTick, Symbol};

/// Configuration for the simulated feed.
#[derive(Debug, Clone)]
pub struct SimulatedFeedConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Maximum relative move per tick (0.01 = ±1%).
    pub volatility: f64,
    /// Ticks buffered ahead of the consumer.
    pub buffer: usize,
}

impl Default for SimulatedFeedConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            volatility: 0.01,
            buffer: 256,
        }
    }
}

/// Random-walk price feed provider.
#[derive(Debug, Clone, Default)]
pub struct SimulatedFeedProvider {
    config: SimulatedFeedConfig,
}

impl SimulatedFeedProvider {
    /// Create a new provider.
    #[must_use]
    pub const fn new(config: SimulatedFeedConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PriceFeedProvider for SimulatedFeedProvider {
    async fn open(&self, symbol: &Symbol) -> Result<TickStream, FeedOpenError> {
        let (tx, rx) = mpsc::channel(self.config.buffer.max(1));
        tokio::spawn(generate(
            symbol.clone(),
            seed_price(symbol),
            self.config.clone(),
            tx,
        ));
        tracing::debug!(symbol = %symbol, "Simulated feed started");
        Ok(ReceiverStream::new(rx).map(Ok::<_, FeedStreamError>).boxed())
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

async fn generate(
    symbol: Symbol,
    mut price: f64,
    config: SimulatedFeedConfig,
    tx: mpsc::Sender<PriceTick>,
) {
    let mut rng = StdRng::from_os_rng();
    let mut ticker = tokio::time::interval(config.interval);

    loop {
        tokio::select! {
            () = tx.closed() => return,
            _ = ticker.tick() => {
                price = next_price(&mut rng, price, config.volatility);
                if tx.send(PriceTick::new(symbol.clone(), price, Utc::now())).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Starting price derived from the symbol, so restarts look familiar.
fn seed_price(symbol: &Symbol) -> f64 {
    let sum: u32 = symbol.as_str().bytes().map(u32::from).sum();
    20.0 + f64::from(sum.wrapping_mul(7) % 480)
}

/// Next price in the walk, rounded to cents and floored at one cent.
fn next_price(rng: &mut impl Rng, current: f64, volatility: f64) -> f64 {
    let change = if volatility > 0.0 {
        rng.random_range(-volatility..volatility)
    } else {
        0.0
    };
    let next = (current * (1.0 + change) * 100.0).round() / 100.0;
    next.max(0.01)
}
