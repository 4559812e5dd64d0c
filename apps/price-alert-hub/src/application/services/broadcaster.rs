//! Broadcaster
//!
//! Delivers events to client outboxes. Price ticks go only to clients whose
//! interest set contains the tick's symbol; alert events go to everyone.
//!
//! # Design
//!
//! Each client owns one ordered queue drained by its connection task. Sends
//! never wait. The queue holds at most `tick_capacity` undelivered
//! `stock_update` events; further ticks are shed for that client only, so a
//! slow consumer cannot stall a feed task or other clients. Every other
//! event (alert notifications, replies, feed-loss errors) is always queued.
//!
//! Tick fan-out runs while holding the interest table's read lock. An
//! unsubscribe takes the write lock, so once it returns no later tick for
//! that symbol can reach the client.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::application::ports::{FeedStreamError, TickSink};
use crate::domain::events::ServerEvent;
use crate::domain::market::{PriceTick, Symbol};
use crate::domain::subscription::{ClientId, InterestTable};
use crate::infrastructure::metrics;

/// Create a client event queue holding at most `tick_capacity` undelivered
/// price ticks.
#[must_use]
pub fn client_queue(tick_capacity: usize) -> (Outbox, Inbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending_ticks = Arc::new(AtomicUsize::new(0));
    let outbox = Outbox {
        tx,
        pending_ticks: Arc::clone(&pending_ticks),
        tick_capacity: tick_capacity.max(1),
    };
    (outbox, Inbox { rx, pending_ticks })
}

/// Sending half of a client's event queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<ServerEvent>,
    pending_ticks: Arc<AtomicUsize>,
    tick_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Enqueue {
    Queued,
    Shed,
    Closed,
}

impl Outbox {
    fn push(&self, event: ServerEvent) -> Enqueue {
        let tick = is_tick(&event);
        if tick
            && self
                .pending_ticks
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                    (n < self.tick_capacity).then_some(n + 1)
                })
                .is_err()
        {
            return Enqueue::Shed;
        }
        if self.tx.send(event).is_ok() {
            Enqueue::Queued
        } else {
            if tick {
                self.pending_ticks.fetch_sub(1, Ordering::AcqRel);
            }
            Enqueue::Closed
        }
    }
}

/// Receiving half of a client's event queue.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::UnboundedReceiver<ServerEvent>,
    pending_ticks: Arc<AtomicUsize>,
}

impl Inbox {
    /// Wait for the next event. Returns `None` once every sender is gone
    /// and the queue is empty.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        let event = self.rx.recv().await?;
        Some(self.settle(event))
    }

    /// Take the next event without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`TryRecvError`] if the queue is empty or closed.
    pub fn try_recv(&mut self) -> Result<ServerEvent, TryRecvError> {
        let event = self.rx.try_recv()?;
        Ok(self.settle(event))
    }

    fn settle(&self, event: ServerEvent) -> ServerEvent {
        if is_tick(&event) {
            self.pending_ticks.fetch_sub(1, Ordering::AcqRel);
        }
        event
    }
}

const fn is_tick(event: &ServerEvent) -> bool {
    matches!(event, ServerEvent::StockUpdate { .. })
}

/// Fans events out to connected clients.
#[derive(Debug)]
pub struct Broadcaster {
    interest: Arc<InterestTable>,
    outboxes: RwLock<HashMap<ClientId, Outbox>>,
}

impl Broadcaster {
    /// Create a broadcaster reading interest from `interest`.
    #[must_use]
    pub fn new(interest: Arc<InterestTable>) -> Self {
        Self {
            interest,
            outboxes: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a client's outbox.
    pub fn attach(&self, client: ClientId, outbox: Outbox) {
        let count = {
            let mut outboxes = self.outboxes.write();
            outboxes.insert(client, outbox);
            outboxes.len()
        };
        metrics::set_connected_clients(count);
    }

    /// Detach a client's outbox. Later events are not delivered to it.
    pub fn detach(&self, client: ClientId) {
        let count = {
            let mut outboxes = self.outboxes.write();
            outboxes.remove(&client);
            outboxes.len()
        };
        metrics::set_connected_clients(count);
    }

    /// Number of attached clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.outboxes.read().len()
    }

    /// Send an event to one client. Returns `true` if it was queued.
    pub fn send_to(&self, client: ClientId, event: ServerEvent) -> bool {
        let name = event.name();
        let queued = self
            .outboxes
            .read()
            .get(&client)
            .is_some_and(|outbox| enqueue(client, outbox, event));
        record(name, u64::from(queued), u64::from(!queued));
        queued
    }

    /// Deliver a tick to every client interested in its symbol.
    ///
    /// Returns the number of clients the tick was queued for.
    pub fn publish_tick(&self, tick: &PriceTick) -> usize {
        let mut delivered = 0u64;
        let mut dropped = 0u64;

        self.interest.for_each_interested(&tick.symbol, |client| {
            let event = ServerEvent::StockUpdate {
                symbol: tick.symbol.clone(),
                data: tick.clone(),
            };
            let queued = self
                .outboxes
                .read()
                .get(&client)
                .is_some_and(|outbox| enqueue(client, outbox, event));
            if queued {
                delivered += 1;
            } else {
                dropped += 1;
            }
        });

        record("stock_update", delivered, dropped);
        usize::try_from(delivered).unwrap_or(usize::MAX)
    }

    /// Deliver an event to every attached client.
    ///
    /// Returns the number of clients the event was queued for.
    pub fn publish_all(&self, event: &ServerEvent) -> usize {
        let mut delivered = 0u64;
        let mut dropped = 0u64;

        for (client, outbox) in self.outboxes.read().iter() {
            if enqueue(*client, outbox, event.clone()) {
                delivered += 1;
            } else {
                dropped += 1;
            }
        }

        record(event.name(), delivered, dropped);
        usize::try_from(delivered).unwrap_or(usize::MAX)
    }
}

fn enqueue(client: ClientId, outbox: &Outbox, event: ServerEvent) -> bool {
    match outbox.push(event) {
        Enqueue::Queued => true,
        Enqueue::Shed => {
            tracing::debug!(client_id = client, "Client behind on ticks, shedding stock_update");
            false
        }
        Enqueue::Closed => false,
    }
}

fn record(event: &'static str, delivered: u64, dropped: u64) {
    if delivered > 0 {
        metrics::record_events_sent(event, delivered);
    }
    if dropped > 0 {
        metrics::record_events_dropped(event, dropped);
    }
}

#[async_trait]
impl TickSink for Broadcaster {
    async fn on_tick(&self, tick: &PriceTick) {
        self.publish_tick(tick);
    }

    async fn on_feed_lost(&self, symbol: &Symbol, reason: &FeedStreamError) {
        let affected = self.interest.purge_symbol(symbol);
        tracing::warn!(
            symbol = %symbol,
            clients = affected.len(),
            error = %reason,
            "Price feed lost, notifying subscribers"
        );
        for client in affected {
            self.send_to(
                client,
                ServerEvent::subscription_error(Some(symbol.clone()), reason),
            );
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
