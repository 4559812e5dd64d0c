//! Price Feed Port (Driven Port)
//!
//! Interface for opening upstream tick streams. A provider knows nothing
//! about reference counting; the feed multiplexer guarantees at most one
//! open stream per symbol. Dropping the returned stream closes it.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::market::{PriceTick, Symbol};

/// A live stream of ticks for one symbol.
///
/// An `Err` item or the end of the stream means the feed is gone.
pub type TickStream = BoxStream<'static, Result<PriceTick, FeedStreamError>>;

/// Failure to open an upstream feed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedOpenError {
    /// Could not reach the upstream.
    #[error("failed to connect price feed for {symbol}: {message}")]
    Connect {
        /// Requested symbol.
        symbol: String,
        /// Error details.
        message: String,
    },

    /// Upstream refused the subscription.
    #[error("price feed rejected {symbol}: {message}")]
    Rejected {
        /// Requested symbol.
        symbol: String,
        /// Error details.
        message: String,
    },
}

/// Failure of an already open feed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedStreamError {
    /// Transport failed mid-stream.
    #[error("price feed transport error: {0}")]
    Transport(String),

    /// Upstream closed the stream.
    #[error("price feed closed by upstream")]
    Closed,
}

/// Port for opening upstream price feeds.
#[async_trait]
pub trait PriceFeedProvider: Send + Sync {
    /// Open a tick stream for `symbol`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedOpenError`] if the upstream cannot be reached or
    /// refuses the symbol.
    async fn open(&self, symbol: &Symbol) -> Result<TickStream, FeedOpenError>;

    /// Short provider name for logs and health output.
    fn name(&self) -> &'static str;
}
