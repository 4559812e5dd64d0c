//! Shared wiring for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use price_alert_hub::application::ports::{
    Clock, ManualClock, PersistenceStore, PriceFeedProvider, TickSink,
};
use price_alert_hub::infrastructure::feed::ScriptedFeedProvider;
use price_alert_hub::infrastructure::persistence::InMemoryStore;
use price_alert_hub::{
    AlertEngine, Broadcaster, ClientGateway, ConnectionRegistry, FeedMultiplexer, Inbox,
    InterestTable, ServerEvent, Symbol, client_queue,
};

/// Fully wired services over a scripted feed and a manual clock.
pub struct Hub {
    pub provider: Arc<ScriptedFeedProvider>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<dyn PersistenceStore>,
    pub broadcaster: Arc<Broadcaster>,
    pub engine: Arc<AlertEngine>,
    pub multiplexer: FeedMultiplexer,
    pub registry: Arc<ConnectionRegistry>,
    pub gateway: Arc<ClientGateway>,
}

impl Hub {
    pub fn new() -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()))
    }

    pub fn with_store(store: Arc<dyn PersistenceStore>) -> Self {
        let provider = Arc::new(ScriptedFeedProvider::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 2, 14, 30, 0).unwrap(),
        ));
        let interest = Arc::new(InterestTable::new());
        let broadcaster = Arc::new(Broadcaster::new(Arc::clone(&interest)));
        let engine = Arc::new(AlertEngine::new(
            Arc::clone(&store),
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::clone(&broadcaster),
        ));
        let multiplexer = FeedMultiplexer::new(
            Arc::clone(&provider) as Arc<dyn PriceFeedProvider>,
            vec![
                Arc::clone(&broadcaster) as Arc<dyn TickSink>,
                Arc::clone(&engine) as Arc<dyn TickSink>,
            ],
        );
        let registry = Arc::new(ConnectionRegistry::new(interest, multiplexer.clone()));
        let gateway = Arc::new(ClientGateway::new(
            Arc::clone(&registry),
            Arc::clone(&broadcaster),
            Arc::clone(&engine),
            multiplexer.clone(),
            Arc::clone(&store),
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));
        Self {
            provider,
            clock,
            store,
            broadcaster,
            engine,
            multiplexer,
            registry,
            gateway,
        }
    }

    /// Connect a client through the gateway and discard its initial state.
    pub async fn connect(&self) -> (u64, Inbox) {
        let (tx, mut rx) = client_queue(256);
        let client = self.gateway.connect(tx).await;
        drain(&mut rx);
        (client, rx)
    }
}

pub fn sym(s: &str) -> Symbol {
    Symbol::parse(s).unwrap()
}

pub fn drain(rx: &mut Inbox) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn names(events: &[ServerEvent]) -> Vec<&'static str> {
    events.iter().map(ServerEvent::name).collect()
}

/// Receive the next event or fail after one second.
pub async fn next_event(rx: &mut Inbox) -> ServerEvent {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("outbox closed")
}

/// Poll `condition` until it holds or fail after one second.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
