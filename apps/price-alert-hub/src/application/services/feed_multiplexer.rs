//! Feed Multiplexer
//!
//! Keeps at most one upstream feed open per symbol, shared by every client
//! subscribed to it, and delivers each tick to the registered sinks.
//!
//! # Design
//!
//! Each symbol has a slot guarded by its own async mutex. Acquire, release,
//! and failure teardown for a symbol are serialized on that mutex, so:
//! - a 0→1 acquire opens exactly one feed even under concurrent subscribes
//! - a release that drops the count to zero closes the feed and waits for
//!   its task before returning
//! - a failed open leaves the count at zero
//!
//! Callers pass a closure to [`FeedMultiplexer::acquire_if`] and
//! [`FeedMultiplexer::release_if`] that updates their own bookkeeping
//! under the slot lock. That keeps the count equal to the number of
//! interested clients even when a feed fails concurrently.
//!
//! ```text
//! provider.open ──► feed task ──► last tick cache
//!                       │
//!                       └──► sinks (broadcaster, alert engine)
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use futures::StreamExt;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    FeedOpenError, FeedStreamError, PriceFeedProvider, TickSink, TickStream,
};
use crate::domain::market::{PriceTick, Symbol};
use crate::infrastructure::metrics::{self, CloseReason};

// =============================================================================
// Types
// =============================================================================

/// Outcome of [`FeedMultiplexer::acquire_if`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// The claim succeeded and the count was incremented.
    Claimed {
        /// Count after the increment.
        ref_count: usize,
        /// Whether this call opened the upstream feed.
        opened: bool,
    },
    /// The claim closure declined; the count is unchanged.
    Declined,
}

/// Outcome of [`FeedMultiplexer::release_if`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// The count was decremented and the feed stays open.
    Decremented {
        /// Count after the decrement.
        ref_count: usize,
    },
    /// The count reached zero and the feed was closed.
    Closed,
    /// Nothing was held; no-op.
    NotHeld,
}

/// Handle to a running feed task.
struct FeedHandle {
    generation: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Per-symbol state, guarded by the slot mutex.
#[derive(Default)]
struct FeedSlot {
    ref_count: usize,
    handle: Option<FeedHandle>,
}

/// Lock-free-to-read view of an open feed.
#[derive(Debug, Clone)]
struct OpenFeed {
    generation: u64,
    ref_count: usize,
    last_tick: Option<PriceTick>,
}

// =============================================================================
// Feed Multiplexer
// =============================================================================

/// Reference-counted upstream feeds keyed by symbol.
#[derive(Clone)]
pub struct FeedMultiplexer {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Arc<dyn PriceFeedProvider>,
    sinks: Vec<Arc<dyn TickSink>>,
    slots: Mutex<HashMap<Symbol, Arc<AsyncMutex<FeedSlot>>>>,
    open: RwLock<HashMap<Symbol, OpenFeed>>,
    next_generation: AtomicU64,
}

impl std::fmt::Debug for FeedMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedMultiplexer")
            .field("provider", &self.inner.provider.name())
            .field("sinks", &self.inner.sinks.len())
            .field("open_feeds", &self.open_feed_count())
            .finish()
    }
}

impl FeedMultiplexer {
    /// Create a multiplexer opening feeds through `provider` and delivering
    /// ticks to `sinks` in order.
    #[must_use]
    pub fn new(provider: Arc<dyn PriceFeedProvider>, sinks: Vec<Arc<dyn TickSink>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                sinks,
                slots: Mutex::new(HashMap::new()),
                open: RwLock::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Take a reference on `symbol`, opening the feed on 0→1.
    ///
    /// # Errors
    ///
    /// Returns [`FeedOpenError`] if the feed had to be opened and the
    /// provider failed. The count stays at zero.
    pub async fn acquire(&self, symbol: &Symbol) -> Result<usize, FeedOpenError> {
        match self.acquire_if(symbol, || true).await? {
            Acquire::Claimed { ref_count, .. } => Ok(ref_count),
            Acquire::Declined => Ok(self.ref_count(symbol)),
        }
    }

    /// Take a reference on `symbol` if `claim` returns `true`.
    ///
    /// The feed is opened first when the count is zero; `claim` then runs
    /// under the slot lock. A declined claim on a freshly opened feed closes
    /// it again.
    ///
    /// # Errors
    ///
    /// Returns [`FeedOpenError`] if the provider failed to open the feed.
    /// `claim` is not called in that case.
    pub async fn acquire_if<F>(&self, symbol: &Symbol, claim: F) -> Result<Acquire, FeedOpenError>
    where
        F: FnOnce() -> bool + Send,
    {
        let slot = self.inner.slot(symbol);
        let result = {
            let mut guard = slot.lock().await;
            self.inner.acquire_locked(symbol, &mut guard, claim).await
        };
        self.inner.prune(symbol, &slot);
        result
    }

    /// Drop a reference on `symbol`, closing the feed on 1→0.
    ///
    /// Releasing a symbol with no references is a no-op.
    pub async fn release(&self, symbol: &Symbol) -> Release {
        self.release_if(symbol, || true).await
    }

    /// Drop a reference on `symbol` if `release` returns `true`.
    ///
    /// `release` runs under the slot lock. When the count reaches zero the
    /// feed is cancelled and its task awaited before this returns, so no
    /// tick for `symbol` is delivered afterwards.
    pub async fn release_if<F>(&self, symbol: &Symbol, release: F) -> Release
    where
        F: FnOnce() -> bool + Send,
    {
        let slot = self.inner.slot(symbol);
        let result = {
            let mut guard = slot.lock().await;
            self.inner.release_locked(symbol, &mut guard, release).await
        };
        self.inner.prune(symbol, &slot);
        result
    }

    /// Last tick of the currently open feed for `symbol`.
    #[must_use]
    pub fn latest_tick(&self, symbol: &Symbol) -> Option<PriceTick> {
        self.inner
            .open
            .read()
            .get(symbol)
            .and_then(|feed| feed.last_tick.clone())
    }

    /// Current reference count for `symbol`.
    #[must_use]
    pub fn ref_count(&self, symbol: &Symbol) -> usize {
        self.inner
            .open
            .read()
            .get(symbol)
            .map_or(0, |feed| feed.ref_count)
    }

    /// Whether a feed is open for `symbol`.
    #[must_use]
    pub fn is_open(&self, symbol: &Symbol) -> bool {
        self.inner.open.read().contains_key(symbol)
    }

    /// Symbols with an open feed, sorted.
    #[must_use]
    pub fn open_symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<_> = self.inner.open.read().keys().cloned().collect();
        symbols.sort_unstable();
        symbols
    }

    /// Number of open feeds.
    #[must_use]
    pub fn open_feed_count(&self) -> usize {
        self.inner.open.read().len()
    }

    /// Provider name.
    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.inner.provider.name()
    }

    /// Close every open feed regardless of reference counts.
    pub async fn shutdown(&self) {
        let slots: Vec<_> = self
            .inner
            .slots
            .lock()
            .iter()
            .map(|(symbol, slot)| (symbol.clone(), Arc::clone(slot)))
            .collect();

        for (symbol, slot) in slots {
            {
                let mut guard = slot.lock().await;
                guard.ref_count = 0;
                self.inner.close_locked(&symbol, &mut guard, CloseReason::Released).await;
            }
            self.inner.prune(&symbol, &slot);
        }
        tracing::info!("Feed multiplexer shut down");
    }
}

// =============================================================================
// Slot Operations
// =============================================================================

impl Inner {
    fn slot(&self, symbol: &Symbol) -> Arc<AsyncMutex<FeedSlot>> {
        Arc::clone(self.slots.lock().entry(symbol.clone()).or_default())
    }

    /// Drop an idle slot nobody else is holding.
    fn prune(&self, symbol: &Symbol, slot: &Arc<AsyncMutex<FeedSlot>>) {
        let mut slots = self.slots.lock();
        // One reference from the map, one from the caller.
        if Arc::strong_count(slot) == 2
            && slot
                .try_lock()
                .is_ok_and(|s| s.ref_count == 0 && s.handle.is_none())
        {
            slots.remove(symbol);
        }
    }

    async fn acquire_locked<F>(
        self: &Arc<Self>,
        symbol: &Symbol,
        slot: &mut FeedSlot,
        claim: F,
    ) -> Result<Acquire, FeedOpenError>
    where
        F: FnOnce() -> bool + Send,
    {
        let mut opened = false;
        if slot.ref_count == 0 && slot.handle.is_none() {
            self.open_locked(symbol, slot).await?;
            opened = true;
        }

        if !claim() {
            if opened {
                self.close_locked(symbol, slot, CloseReason::Released).await;
            }
            return Ok(Acquire::Declined);
        }

        slot.ref_count += 1;
        self.set_open_ref_count(symbol, slot.ref_count);
        tracing::debug!(symbol = %symbol, ref_count = slot.ref_count, "Feed acquired");

        Ok(Acquire::Claimed {
            ref_count: slot.ref_count,
            opened,
        })
    }

    async fn release_locked<F>(&self, symbol: &Symbol, slot: &mut FeedSlot, release: F) -> Release
    where
        F: FnOnce() -> bool + Send,
    {
        if !release() || slot.ref_count == 0 {
            return Release::NotHeld;
        }

        slot.ref_count -= 1;
        if slot.ref_count > 0 {
            self.set_open_ref_count(symbol, slot.ref_count);
            tracing::debug!(symbol = %symbol, ref_count = slot.ref_count, "Feed released");
            return Release::Decremented {
                ref_count: slot.ref_count,
            };
        }

        self.close_locked(symbol, slot, CloseReason::Released).await;
        Release::Closed
    }

    async fn open_locked(
        self: &Arc<Self>,
        symbol: &Symbol,
        slot: &mut FeedSlot,
    ) -> Result<(), FeedOpenError> {
        let stream = match self.provider.open(symbol).await {
            Ok(stream) => stream,
            Err(e) => {
                metrics::record_feed_open_failure();
                tracing::warn!(
                    symbol = %symbol,
                    provider = self.provider.name(),
                    error = %e,
                    "Failed to open price feed"
                );
                return Err(e);
            }
        };

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let open_count = {
            let mut open = self.open.write();
            open.insert(
                symbol.clone(),
                OpenFeed {
                    generation,
                    ref_count: 0,
                    last_tick: None,
                },
            );
            open.len()
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_feed(
            Arc::clone(self),
            symbol.clone(),
            generation,
            stream,
            cancel.clone(),
        ));
        slot.handle = Some(FeedHandle {
            generation,
            cancel,
            task,
        });

        metrics::record_feed_opened();
        metrics::set_open_feeds(open_count);
        tracing::info!(
            symbol = %symbol,
            provider = self.provider.name(),
            generation,
            "Price feed opened"
        );
        Ok(())
    }

    async fn close_locked(&self, symbol: &Symbol, slot: &mut FeedSlot, reason: CloseReason) {
        let Some(handle) = slot.handle.take() else {
            return;
        };

        handle.cancel.cancel();
        if let Err(e) = handle.task.await
            && e.is_panic()
        {
            tracing::error!(symbol = %symbol, "Feed task panicked");
        }

        let open_count = {
            let mut open = self.open.write();
            open.remove(symbol);
            open.len()
        };

        metrics::record_feed_closed(reason);
        metrics::set_open_feeds(open_count);
        tracing::info!(
            symbol = %symbol,
            generation = handle.generation,
            "Price feed closed"
        );
    }

    fn set_open_ref_count(&self, symbol: &Symbol, ref_count: usize) {
        if let Some(feed) = self.open.write().get_mut(symbol) {
            feed.ref_count = ref_count;
        }
    }

    /// Cache the tick and hand it to every sink.
    async fn deliver(&self, generation: u64, tick: PriceTick) {
        {
            let mut open = self.open.write();
            match open.get_mut(&tick.symbol) {
                Some(feed) if feed.generation == generation => {
                    feed.last_tick = Some(tick.clone());
                }
                _ => return,
            }
        }

        metrics::record_tick_received(self.provider.name());
        let started = Instant::now();
        join_all(self.sinks.iter().map(|sink| sink.on_tick(&tick))).await;
        metrics::record_fanout_duration(started.elapsed());
    }

    /// Tear down a feed whose stream failed or ended.
    async fn teardown_failed(self: Arc<Self>, symbol: Symbol, generation: u64, reason: FeedStreamError) {
        let slot = self.slot(&symbol);
        {
            let mut guard = slot.lock().await;
            let current = guard
                .handle
                .as_ref()
                .is_some_and(|handle| handle.generation == generation);

            if current {
                tracing::warn!(
                    symbol = %symbol,
                    generation,
                    ref_count = guard.ref_count,
                    error = %reason,
                    "Price feed failed"
                );
                guard.ref_count = 0;
                self.close_locked(&symbol, &mut guard, CloseReason::Failed).await;
                for sink in &self.sinks {
                    sink.on_feed_lost(&symbol, &reason).await;
                }
            }
        }
        self.prune(&symbol, &slot);
    }
}

// =============================================================================
// Feed Task
// =============================================================================

async fn run_feed(
    inner: Arc<Inner>,
    symbol: Symbol,
    generation: u64,
    mut stream: TickStream,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            next = stream.next() => next,
        };
        if cancel.is_cancelled() {
            return;
        }

        match next {
            Some(Ok(tick)) if tick.symbol == symbol => {
                inner.deliver(generation, tick).await;
            }
            Some(Ok(tick)) => {
                tracing::debug!(
                    expected = %symbol,
                    received = %tick.symbol,
                    "Ignoring tick for another symbol"
                );
            }
            Some(Err(e)) => {
                tokio::spawn(Arc::clone(&inner).teardown_failed(symbol, generation, e));
                return;
            }
            None => {
                tokio::spawn(Arc::clone(&inner).teardown_failed(
                    symbol,
                    generation,
                    FeedStreamError::Closed,
                ));
                return;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
