//! Connection Registry
//!
//! Tracks connected clients and their interest sets, taking and dropping
//! feed references as symbols enter and leave those sets.
//!
//! Interest changes run inside the multiplexer's per-symbol critical
//! section, so a symbol's reference count always equals the number of
//! clients listing it.

use std::collections::HashSet;
use std::sync::Arc;

use crate::application::ports::FeedOpenError;
use crate::application::services::feed_multiplexer::{Acquire, FeedMultiplexer, Release};
use crate::domain::market::Symbol;
use crate::domain::subscription::{ClientId, InterestChange, InterestTable};

/// Errors from [`ConnectionRegistry::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeError {
    /// The upstream feed could not be opened.
    #[error(transparent)]
    Feed(#[from] FeedOpenError),

    /// The client disconnected before the subscription completed.
    #[error("client {0} is not connected")]
    UnknownClient(ClientId),
}

/// Result of a successful subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// Symbol was added to the interest set.
    Subscribed,
    /// Symbol was already in the interest set.
    AlreadySubscribed,
}

/// Registry of connected clients.
#[derive(Debug)]
pub struct ConnectionRegistry {
    interest: Arc<InterestTable>,
    multiplexer: FeedMultiplexer,
}

impl ConnectionRegistry {
    /// Create a registry over a shared interest table.
    #[must_use]
    pub const fn new(interest: Arc<InterestTable>, multiplexer: FeedMultiplexer) -> Self {
        Self {
            interest,
            multiplexer,
        }
    }

    /// Register a new client with an empty interest set.
    #[must_use]
    pub fn on_connect(&self) -> ClientId {
        loop {
            let id = uuid::Uuid::new_v4().as_u64_pair().0;
            if self.interest.register(id) {
                tracing::info!(client_id = id, "Client connected");
                return id;
            }
        }
    }

    /// Release every symbol the client held and forget it.
    pub async fn on_disconnect(&self, client: ClientId) {
        let symbols = self.interest.client_symbols(client);
        for symbol in &symbols {
            self.unsubscribe(client, symbol).await;
        }
        self.interest.unregister(client);
        tracing::info!(
            client_id = client,
            released = symbols.len(),
            "Client disconnected"
        );
    }

    /// Add `symbol` to the client's interest set, opening the feed if this
    /// is the first interested client. Idempotent per client.
    ///
    /// # Errors
    ///
    /// Returns [`SubscribeError::Feed`] if the feed could not be opened
    /// (the interest set is unchanged) and [`SubscribeError::UnknownClient`]
    /// if the client is gone.
    pub async fn subscribe(
        &self,
        client: ClientId,
        symbol: &Symbol,
    ) -> Result<SubscribeOutcome, SubscribeError> {
        if !self.interest.is_registered(client) {
            return Err(SubscribeError::UnknownClient(client));
        }
        if self.interest.contains(client, symbol) {
            return Ok(SubscribeOutcome::AlreadySubscribed);
        }

        let mut change = InterestChange::UnknownClient;
        let acquired = self
            .multiplexer
            .acquire_if(symbol, || {
                change = self.interest.add(client, symbol);
                change.is_added()
            })
            .await?;

        match (acquired, change) {
            (Acquire::Claimed { ref_count, .. }, _) => {
                tracing::debug!(client_id = client, symbol = %symbol, ref_count, "Subscribed");
                Ok(SubscribeOutcome::Subscribed)
            }
            (Acquire::Declined, InterestChange::AlreadyPresent) => {
                Ok(SubscribeOutcome::AlreadySubscribed)
            }
            (Acquire::Declined, _) => Err(SubscribeError::UnknownClient(client)),
        }
    }

    /// Remove `symbol` from the client's interest set, closing the feed if
    /// no interested client remains.
    ///
    /// Returns `true` if the symbol was in the set. Idempotent.
    pub async fn unsubscribe(&self, client: ClientId, symbol: &Symbol) -> bool {
        let mut removed = false;
        let release = self
            .multiplexer
            .release_if(symbol, || {
                removed = self.interest.remove(client, symbol);
                removed
            })
            .await;

        if removed {
            tracing::debug!(client_id = client, symbol = %symbol, ?release, "Unsubscribed");
        }
        debug_assert!(removed || release == Release::NotHeld);
        removed
    }

    /// Clients interested in `symbol`.
    #[must_use]
    pub fn interested_clients(&self, symbol: &Symbol) -> HashSet<ClientId> {
        self.interest.interested_clients(symbol)
    }

    /// Symbols the client is subscribed to, sorted.
    #[must_use]
    pub fn client_symbols(&self, client: ClientId) -> Vec<Symbol> {
        self.interest.client_symbols(client)
    }

    /// Number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.interest.stats().client_count
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::PriceFeedProvider;
    use crate::infrastructure::feed::ScriptedFeedProvider;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn setup() -> (Arc<ScriptedFeedProvider>, FeedMultiplexer, ConnectionRegistry) {
        let provider = Arc::new(ScriptedFeedProvider::new());
        let mux = FeedMultiplexer::new(
            Arc::clone(&provider) as Arc<dyn PriceFeedProvider>,
            vec![],
        );
        let registry = ConnectionRegistry::new(Arc::new(InterestTable::new()), mux.clone());
        (provider, mux, registry)
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let (provider, mux, registry) = setup();
        let client = registry.on_connect();

        assert_eq!(
            registry.subscribe(client, &sym("AAPL")).await.unwrap(),
            SubscribeOutcome::Subscribed
        );
        assert_eq!(
            registry.subscribe(client, &sym("AAPL")).await.unwrap(),
            SubscribeOutcome::AlreadySubscribed
        );

        assert_eq!(mux.ref_count(&sym("AAPL")), 1);
        assert_eq!(provider.open_calls(&sym("AAPL")), 1);
    }

    #[tokio::test]
    async fn two_clients_share_one_feed() {
        let (provider, mux, registry) = setup();
        let a = registry.on_connect();
        let b = registry.on_connect();

        registry.subscribe(a, &sym("AAPL")).await.unwrap();
        registry.subscribe(b, &sym("AAPL")).await.unwrap();

        assert_eq!(mux.ref_count(&sym("AAPL")), 2);
        assert_eq!(provider.open_calls(&sym("AAPL")), 1);
        assert_eq!(registry.interested_clients(&sym("AAPL")).len(), 2);

        assert!(registry.unsubscribe(a, &sym("AAPL")).await);
        assert!(mux.is_open(&sym("AAPL")));
        assert!(registry.unsubscribe(b, &sym("AAPL")).await);
        assert!(!mux.is_open(&sym("AAPL")));
    }

    #[tokio::test]
    async fn unsubscribe_unknown_symbol_is_noop() {
        let (_provider, mux, registry) = setup();
        let a = registry.on_connect();
        let b = registry.on_connect();
        registry.subscribe(b, &sym("AAPL")).await.unwrap();

        assert!(!registry.unsubscribe(a, &sym("AAPL")).await);
        assert_eq!(mux.ref_count(&sym("AAPL")), 1);
    }

    #[tokio::test]
    async fn failed_open_leaves_interest_unchanged() {
        let (provider, mux, registry) = setup();
        provider.set_failing(&sym("BAD"), true);
        let client = registry.on_connect();

        let err = registry.subscribe(client, &sym("BAD")).await.unwrap_err();

        assert!(matches!(err, SubscribeError::Feed(_)));
        assert!(registry.client_symbols(client).is_empty());
        assert_eq!(mux.ref_count(&sym("BAD")), 0);
    }

    #[tokio::test]
    async fn disconnect_releases_everything() {
        let (provider, mux, registry) = setup();
        let client = registry.on_connect();
        registry.subscribe(client, &sym("AAPL")).await.unwrap();
        registry.subscribe(client, &sym("MSFT")).await.unwrap();

        registry.on_disconnect(client).await;

        assert_eq!(mux.open_feed_count(), 0);
        assert_eq!(provider.live_count(), 0);
        assert_eq!(registry.client_count(), 0);
        assert!(matches!(
            registry.subscribe(client, &sym("AAPL")).await,
            Err(SubscribeError::UnknownClient(_))
        ));
    }
}
