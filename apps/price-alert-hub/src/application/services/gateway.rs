//! Client Gateway
//!
//! Translates client protocol events into registry, alert engine, and
//! persistence calls, and replies on the client's outbox.
//!
//! # Connection Lifecycle
//!
//! ```text
//! connect ──► alerts_list ──► trigger_logs ──► restore_subscriptions
//!                                                   │
//!                                   re-subscribe each persisted symbol
//!                                                   │
//!                                           handle commands ──► disconnect
//! ```
//!
//! Commands from one client are handled one at a time by its connection
//! task; different clients run concurrently.

use std::sync::Arc;

use serde_json::Value;

use crate::application::ports::{Clock, PersistenceStore};
use crate::application::services::alert_engine::{AlertEngine, AlertError};
use crate::application::services::broadcaster::{Broadcaster, Outbox};
use crate::application::services::connection_registry::{ConnectionRegistry, SubscribeOutcome};
use crate::application::services::feed_multiplexer::FeedMultiplexer;
use crate::domain::alert::{AlertId, AlertUpdate};
use crate::domain::events::{ClientEvent, ServerEvent, parse_condition, parse_price};
use crate::domain::market::Symbol;
use crate::domain::subscription::ClientId;

/// Default number of trigger logs sent on connect.
pub const DEFAULT_TRIGGER_LOG_LIMIT: usize = 50;

/// Entry point for client sessions.
pub struct ClientGateway {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Arc<Broadcaster>,
    engine: Arc<AlertEngine>,
    multiplexer: FeedMultiplexer,
    store: Arc<dyn PersistenceStore>,
    clock: Arc<dyn Clock>,
    trigger_log_limit: usize,
}

impl std::fmt::Debug for ClientGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientGateway")
            .field("clients", &self.broadcaster.client_count())
            .field("trigger_log_limit", &self.trigger_log_limit)
            .finish_non_exhaustive()
    }
}

impl ClientGateway {
    /// Wire a gateway from its collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        broadcaster: Arc<Broadcaster>,
        engine: Arc<AlertEngine>,
        multiplexer: FeedMultiplexer,
        store: Arc<dyn PersistenceStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            engine,
            multiplexer,
            store,
            clock,
            trigger_log_limit: DEFAULT_TRIGGER_LOG_LIMIT,
        }
    }

    /// Override how many trigger logs are sent on connect.
    #[must_use]
    pub const fn with_trigger_log_limit(mut self, limit: usize) -> Self {
        self.trigger_log_limit = limit;
        self
    }

    /// Connection registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Register a client, send its initial state, and restore persisted
    /// subscriptions. Returns once the client may send commands.
    pub async fn connect(&self, outbox: Outbox) -> ClientId {
        let client = self.registry.on_connect();
        self.broadcaster.attach(client, outbox);

        match self.engine.list_alerts().await {
            Ok(alerts) => {
                self.reply(client, ServerEvent::AlertsList(alerts));
            }
            Err(e) => {
                tracing::error!(client_id = client, error = %e, "Failed to load alerts");
                self.reply(client, ServerEvent::error(e));
            }
        }

        match self.engine.recent_trigger_logs(self.trigger_log_limit).await {
            Ok(logs) => {
                self.reply(client, ServerEvent::TriggerLogs(logs));
            }
            Err(e) => {
                tracing::error!(client_id = client, error = %e, "Failed to load trigger logs");
                self.reply(client, ServerEvent::error(e));
            }
        }

        self.restore_subscriptions(client).await;
        client
    }

    async fn restore_subscriptions(&self, client: ClientId) {
        let records = match self.store.list_subscriptions().await {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(client_id = client, error = %e, "Failed to load subscriptions");
                self.reply(client, ServerEvent::error(e));
                return;
            }
        };
        if records.is_empty() {
            return;
        }

        let symbols: Vec<Symbol> = records.into_iter().map(|r| r.symbol).collect();
        tracing::info!(client_id = client, count = symbols.len(), "Restoring subscriptions");
        self.reply(client, ServerEvent::RestoreSubscriptions(symbols.clone()));

        for symbol in symbols {
            if let Err(e) = self.registry.subscribe(client, &symbol).await {
                tracing::warn!(client_id = client, symbol = %symbol, error = %e, "Restore failed");
                self.reply(client, ServerEvent::subscription_error(Some(symbol), e));
                continue;
            }
            if let Err(e) = self.store.touch_subscription(&symbol, self.clock.now()).await {
                tracing::warn!(symbol = %symbol, error = %e, "Failed to refresh subscription");
            }
        }
    }

    /// Tear down a client session and release its feeds.
    pub async fn disconnect(&self, client: ClientId) {
        self.broadcaster.detach(client);
        self.registry.on_disconnect(client).await;
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Decode and handle one text frame.
    pub async fn handle_text(&self, client: ClientId, text: &str) {
        match ClientEvent::from_json(text) {
            Ok(event) => self.handle(client, event).await,
            Err(e) => {
                tracing::debug!(client_id = client, error = %e, "Rejected frame");
                self.reply(client, ServerEvent::error(e));
            }
        }
    }

    /// Handle one decoded command.
    pub async fn handle(&self, client: ClientId, event: ClientEvent) {
        tracing::debug!(client_id = client, event = event.name(), "Handling client event");
        match event {
            ClientEvent::Subscribe { symbol } => self.subscribe(client, &symbol).await,
            ClientEvent::Unsubscribe { symbol } => self.unsubscribe(client, &symbol).await,
            ClientEvent::GetSubscriptions => {
                let symbols = self.registry.client_symbols(client);
                self.reply(client, ServerEvent::SubscriptionsList(symbols));
            }
            ClientEvent::CreateAlert {
                symbol,
                price,
                condition,
            } => {
                let result = self.create_alert(&symbol, &price, &condition).await;
                self.reply_on_error(client, result);
            }
            ClientEvent::UpdateAlert {
                id,
                price,
                condition,
                active,
            } => {
                let result = self.update_alert(id, &price, &condition, active).await;
                self.reply_on_error(client, result);
            }
            ClientEvent::DeleteAlert { id } => {
                let result = self
                    .engine
                    .delete_alert(id)
                    .await
                    .map(|deleted| log_missing(id, !deleted));
                self.reply_on_error(client, result);
            }
            ClientEvent::ToggleAlert { id } => {
                let result = self
                    .engine
                    .toggle_alert(id)
                    .await
                    .map(|alert| log_missing(id, alert.is_none()));
                self.reply_on_error(client, result);
            }
        }
    }

    async fn create_alert(
        &self,
        symbol: &str,
        price: &Value,
        condition: &str,
    ) -> Result<(), AlertError> {
        let symbol = Symbol::parse(symbol)?;
        let threshold = parse_price(price)?;
        let condition = parse_condition(condition)?;
        self.engine.create_alert(symbol, threshold, condition).await?;
        Ok(())
    }

    async fn update_alert(
        &self,
        id: AlertId,
        price: &Value,
        condition: &str,
        active: Option<bool>,
    ) -> Result<(), AlertError> {
        let update = AlertUpdate {
            threshold: parse_price(price)?,
            condition: parse_condition(condition)?,
            active: active.unwrap_or(true),
        };
        let updated = self.engine.update_alert(id, update).await?;
        log_missing(id, updated.is_none());
        Ok(())
    }

    async fn subscribe(&self, client: ClientId, raw: &str) {
        let symbol = match Symbol::parse(raw) {
            Ok(symbol) => symbol,
            Err(e) => {
                self.reply(client, ServerEvent::subscription_error(None, e));
                return;
            }
        };

        let outcome = match self.registry.subscribe(client, &symbol).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(client_id = client, symbol = %symbol, error = %e, "Subscribe failed");
                self.reply(client, ServerEvent::subscription_error(Some(symbol), e));
                return;
            }
        };

        // A subscription is only live once it is persisted.
        if let Err(e) = self.store.touch_subscription(&symbol, self.clock.now()).await {
            tracing::error!(client_id = client, symbol = %symbol, error = %e, "Failed to persist subscription");
            if outcome == SubscribeOutcome::Subscribed {
                self.registry.unsubscribe(client, &symbol).await;
            }
            self.reply(client, ServerEvent::subscription_error(Some(symbol), e));
            return;
        }

        self.reply(
            client,
            ServerEvent::SubscriptionSuccess {
                symbol: symbol.clone(),
            },
        );
        if let Some(tick) = self.multiplexer.latest_tick(&symbol) {
            self.reply(client, ServerEvent::StockUpdate { symbol, data: tick });
        }
    }

    async fn unsubscribe(&self, client: ClientId, raw: &str) {
        let symbol = match Symbol::parse(raw) {
            Ok(symbol) => symbol,
            Err(e) => {
                self.reply(client, ServerEvent::error(e));
                return;
            }
        };

        if self.registry.unsubscribe(client, &symbol).await
            && let Err(e) = self.store.delete_subscription(&symbol).await
        {
            tracing::warn!(symbol = %symbol, error = %e, "Failed to delete persisted subscription");
        }

        self.reply(client, ServerEvent::UnsubscribeSuccess { symbol });
    }

    // =========================================================================
    // Replies
    // =========================================================================

    fn reply(&self, client: ClientId, event: ServerEvent) {
        let name = event.name();
        if !self.broadcaster.send_to(client, event) {
            tracing::debug!(client_id = client, event = name, "Reply not delivered");
        }
    }

    fn reply_on_error(&self, client: ClientId, result: Result<(), AlertError>) {
        if let Err(e) = result {
            match &e {
                AlertError::Validation(_) => {
                    tracing::debug!(client_id = client, error = %e, "Invalid alert command");
                }
                AlertError::Persistence(_) => {
                    tracing::error!(client_id = client, error = %e, "Alert command failed");
                }
            }
            self.reply(client, ServerEvent::error(e));
        }
    }
}

fn log_missing(id: AlertId, missing: bool) {
    if missing {
        tracing::debug!(alert_id = id, "Alert not found, ignoring");
    }
}

// =============================================================================
// Tests
// =============================================================================
