//! Alert Engine
//!
//! Evaluates active alerts against every tick and applies client alert
//! mutations. Events are broadcast to every connected client.
//!
//! # Design
//!
//! Evaluation and mutation of one alert are serialized on a per-alert async
//! lock, and every decision re-reads the alert from the store under that
//! lock. Two ticks racing for the same alert therefore fire it at most once
//! per cooldown, and a toggle cannot interleave with a fire.
//!
//! Every state change is committed before its event is broadcast; a failed
//! commit broadcasts nothing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::application::ports::{Clock, PersistenceError, PersistenceStore, TickSink};
use crate::application::services::broadcaster::Broadcaster;
use crate::domain::alert::{
    Alert, AlertCondition, AlertId, AlertUpdate, Evaluation, NewAlert, TriggerLog,
    validate_threshold,
};
use crate::domain::error::ValidationError;
use crate::domain::events::{AlertTriggered, ServerEvent};
use crate::domain::market::{PriceTick, Symbol};
use crate::infrastructure::metrics;

/// Errors from alert operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AlertError {
    /// Client input was invalid.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The store failed; nothing was broadcast.
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// A fire produced by [`AlertEngine::evaluate_tick`].
#[derive(Debug, Clone, PartialEq)]
pub struct AlertFired {
    /// Alert after the fire (paused, stamped).
    pub alert: Alert,
    /// Persisted trigger record.
    pub log: TriggerLog,
}

type AlertLocks = Mutex<HashMap<AlertId, Arc<AsyncMutex<()>>>>;

/// Evaluates and mutates alerts.
pub struct AlertEngine {
    store: Arc<dyn PersistenceStore>,
    clock: Arc<dyn Clock>,
    broadcaster: Arc<Broadcaster>,
    locks: AlertLocks,
}

/// Exclusive hold on one alert. The lock entry is pruned on drop once no
/// other task is holding or waiting for it.
struct AlertGuard<'a> {
    locks: &'a AlertLocks,
    id: AlertId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for AlertGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        drop(self.guard.take());
        if locks
            .get(&self.id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for AlertEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertEngine")
            .field("locked_alerts", &self.locks.lock().len())
            .finish_non_exhaustive()
    }
}

impl AlertEngine {
    /// Create a new engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn PersistenceStore>,
        clock: Arc<dyn Clock>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            store,
            clock,
            broadcaster,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_alert(&self, id: AlertId) -> AlertGuard<'_> {
        let lock = Arc::clone(self.locks.lock().entry(id).or_default());
        let guard = lock.lock_owned().await;
        AlertGuard {
            locks: &self.locks,
            id,
            guard: Some(guard),
        }
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// Evaluate every active alert for `symbol` against `price`.
    ///
    /// Alerts are evaluated concurrently; each fire is committed and then
    /// broadcast as `alert_triggered` followed by `alert_updated`.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Persistence`] if the active alerts cannot be
    /// loaded. Failures on individual alerts are logged and skipped.
    pub async fn evaluate_tick(
        &self,
        symbol: &Symbol,
        price: f64,
    ) -> Result<Vec<AlertFired>, AlertError> {
        let alerts = self.store.active_alerts_for(symbol).await?;
        if alerts.is_empty() {
            return Ok(vec![]);
        }

        let results = join_all(alerts.iter().map(|alert| self.evaluate_one(alert.id, price))).await;

        let mut fired = Vec::new();
        for (alert, result) in alerts.iter().zip(results) {
            match result {
                Ok(Some(f)) => fired.push(f),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(alert_id = alert.id, error = %e, "Failed to evaluate alert");
                }
            }
        }
        Ok(fired)
    }

    async fn evaluate_one(&self, id: AlertId, price: f64) -> Result<Option<AlertFired>, AlertError> {
        let _guard = self.lock_alert(id).await;

        let Some(alert) = self.store.get_alert(id).await? else {
            return Ok(None);
        };

        let now = self.clock.now();
        match alert.evaluate(price, now) {
            Evaluation::Fire => {}
            Evaluation::CoolingDown => {
                metrics::record_alert_suppressed();
                tracing::debug!(alert_id = id, symbol = %alert.symbol, price, "Alert in cooldown");
                return Ok(None);
            }
            Evaluation::Inactive | Evaluation::ConditionNotMet => return Ok(None),
        }

        let Some((alert, log)) = self.store.record_trigger(id, price, now).await? else {
            return Ok(None);
        };

        metrics::record_alert_triggered(alert.condition.as_str());
        tracing::info!(
            alert_id = id,
            symbol = %alert.symbol,
            condition = %alert.condition,
            threshold = alert.threshold,
            price,
            "Alert triggered"
        );

        self.broadcaster
            .publish_all(&ServerEvent::AlertTriggered(AlertTriggered {
                id,
                symbol: alert.symbol.clone(),
                condition: alert.condition,
                alert_price: alert.threshold,
                current_price: price,
                log: log.clone(),
            }));
        self.broadcaster
            .publish_all(&ServerEvent::AlertUpdated(alert.clone()));

        Ok(Some(AlertFired { alert, log }))
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Create an active alert and broadcast `alert_created`.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Validation`] for a non-finite threshold and
    /// [`AlertError::Persistence`] if the insert fails.
    pub async fn create_alert(
        &self,
        symbol: Symbol,
        threshold: f64,
        condition: AlertCondition,
    ) -> Result<Alert, AlertError> {
        let new_alert = NewAlert::new(symbol, threshold, condition)?;
        let alert = self.store.insert_alert(&new_alert, self.clock.now()).await?;

        tracing::info!(
            alert_id = alert.id,
            symbol = %alert.symbol,
            condition = %alert.condition,
            threshold = alert.threshold,
            "Alert created"
        );
        self.broadcaster
            .publish_all(&ServerEvent::AlertCreated(alert.clone()));
        Ok(alert)
    }

    /// Replace an alert's threshold, condition, and armed state, then
    /// broadcast `alert_updated`. Returns `None` if the alert does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Validation`] for a non-finite threshold and
    /// [`AlertError::Persistence`] if the store fails.
    pub async fn update_alert(
        &self,
        id: AlertId,
        update: AlertUpdate,
    ) -> Result<Option<Alert>, AlertError> {
        validate_threshold(update.threshold)?;

        let _guard = self.lock_alert(id).await;

        let Some(mut alert) = self.store.get_alert(id).await? else {
            return Ok(None);
        };
        update.apply(&mut alert);
        if !self.store.save_alert(&alert).await? {
            return Ok(None);
        }

        tracing::info!(alert_id = id, active = alert.active, "Alert updated");
        self.broadcaster
            .publish_all(&ServerEvent::AlertUpdated(alert.clone()));
        Ok(Some(alert))
    }

    /// Flip an alert's armed state and broadcast `alert_updated`.
    /// Returns `None` if the alert does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Persistence`] if the store fails.
    pub async fn toggle_alert(&self, id: AlertId) -> Result<Option<Alert>, AlertError> {
        let _guard = self.lock_alert(id).await;

        let Some(mut alert) = self.store.get_alert(id).await? else {
            return Ok(None);
        };
        alert.active = !alert.active;
        if !self.store.save_alert(&alert).await? {
            return Ok(None);
        }

        tracing::info!(alert_id = id, active = alert.active, "Alert toggled");
        self.broadcaster
            .publish_all(&ServerEvent::AlertUpdated(alert.clone()));
        Ok(Some(alert))
    }

    /// Delete an alert and broadcast `alert_deleted`. Its trigger logs are
    /// kept. Returns `false` if the alert did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Persistence`] if the store fails.
    pub async fn delete_alert(&self, id: AlertId) -> Result<bool, AlertError> {
        let deleted = {
            let _guard = self.lock_alert(id).await;
            self.store.delete_alert(id).await?
        };

        if deleted {
            tracing::info!(alert_id = id, "Alert deleted");
            self.broadcaster
                .publish_all(&ServerEvent::AlertDeleted { id });
        }
        Ok(deleted)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// All alerts, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Persistence`] if the store fails.
    pub async fn list_alerts(&self) -> Result<Vec<Alert>, AlertError> {
        Ok(self.store.list_alerts().await?)
    }

    /// The newest `limit` trigger logs, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Persistence`] if the store fails.
    pub async fn recent_trigger_logs(&self, limit: usize) -> Result<Vec<TriggerLog>, AlertError> {
        Ok(self.store.recent_trigger_logs(limit).await?)
    }
}

#[async_trait]
impl TickSink for AlertEngine {
    async fn on_tick(&self, tick: &PriceTick) {
        if let Err(e) = self.evaluate_tick(&tick.symbol, tick.price).await {
            tracing::error!(symbol = %tick.symbol, error = %e, "Alert evaluation failed");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::ManualClock;
    use crate::domain::subscription::InterestTable;
    use crate::infrastructure::persistence::InMemoryStore;
    use chrono::{TimeDelta, Utc};
    use crate::application::services::broadcaster::{Inbox, client_queue};

    struct Harness {
        engine: Arc<AlertEngine>,
        store: Arc<InMemoryStore>,
        clock: Arc<ManualClock>,
        rx: Inbox,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let interest = Arc::new(InterestTable::new());
        let broadcaster = Arc::new(Broadcaster::new(interest));
        let (tx, rx) = client_queue(64);
        broadcaster.attach(1, tx);
        let engine = Arc::new(AlertEngine::new(
            Arc::clone(&store) as Arc<dyn PersistenceStore>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            broadcaster,
        ));
        Harness {
            engine,
            store,
            clock,
            rx,
        }
    }

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn drain(rx: &mut Inbox) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        names
    }

    #[tokio::test]
    async fn create_broadcasts_alert_created() {
        let mut h = harness();

        let alert = h
            .engine
            .create_alert(sym("AAPL"), 150.0, AlertCondition::Above)
            .await
            .unwrap();

        assert!(alert.active);
        assert_eq!(drain(&mut h.rx), vec!["alert_created"]);
    }

    #[tokio::test]
    async fn create_rejects_non_finite_threshold() {
        let mut h = harness();

        let err = h
            .engine
            .create_alert(sym("AAPL"), f64::NAN, AlertCondition::Above)
            .await
            .unwrap_err();

        assert!(matches!(err, AlertError::Validation(_)));
        assert!(drain(&mut h.rx).is_empty());
        assert!(h.store.list_alerts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fire_pauses_logs_and_broadcasts_in_order() {
        let mut h = harness();
        let alert = h
            .engine
            .create_alert(sym("AAPL"), 150.0, AlertCondition::Above)
            .await
            .unwrap();
        drain(&mut h.rx);

        let fired = h.engine.evaluate_tick(&sym("AAPL"), 151.0).await.unwrap();

        assert_eq!(fired.len(), 1);
        assert!(!fired[0].alert.active);
        assert_eq!(fired[0].log.alert_id, alert.id);
        assert_eq!(fired[0].log.trigger_price, 151.0);
        assert_eq!(fired[0].log.alert_price, 150.0);
        assert_eq!(drain(&mut h.rx), vec!["alert_triggered", "alert_updated"]);

        let stored = h.store.get_alert(alert.id).await.unwrap().unwrap();
        assert!(!stored.active);
        assert_eq!(stored.last_triggered_at, Some(h.clock.now()));
    }

    #[tokio::test]
    async fn paused_alert_does_not_refire() {
        let mut h = harness();
        h.engine
            .create_alert(sym("AAPL"), 150.0, AlertCondition::Above)
            .await
            .unwrap();
        h.engine.evaluate_tick(&sym("AAPL"), 151.0).await.unwrap();
        drain(&mut h.rx);

        let fired = h.engine.evaluate_tick(&sym("AAPL"), 152.0).await.unwrap();

        assert!(fired.is_empty());
        assert!(drain(&mut h.rx).is_empty());
    }

    #[tokio::test]
    async fn reactivated_alert_respects_cooldown() {
        let mut h = harness();
        let alert = h
            .engine
            .create_alert(sym("AAPL"), 100.0, AlertCondition::Below)
            .await
            .unwrap();
        h.engine.evaluate_tick(&sym("AAPL"), 99.0).await.unwrap();
        h.engine.toggle_alert(alert.id).await.unwrap();
        drain(&mut h.rx);

        h.clock.advance(TimeDelta::seconds(30));
        assert!(h.engine.evaluate_tick(&sym("AAPL"), 98.0).await.unwrap().is_empty());
        assert!(drain(&mut h.rx).is_empty());

        h.clock.advance(TimeDelta::seconds(30));
        assert_eq!(h.engine.evaluate_tick(&sym("AAPL"), 98.0).await.unwrap().len(), 1);
        assert_eq!(drain(&mut h.rx), vec!["alert_triggered", "alert_updated"]);
    }

    #[tokio::test]
    async fn equal_condition_uses_epsilon() {
        let h = harness();
        h.engine
            .create_alert(sym("AAPL"), 100.0, AlertCondition::Equal)
            .await
            .unwrap();

        assert!(h.engine.evaluate_tick(&sym("AAPL"), 100.02).await.unwrap().is_empty());
        assert_eq!(h.engine.evaluate_tick(&sym("AAPL"), 100.005).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn other_symbols_are_ignored() {
        let h = harness();
        h.engine
            .create_alert(sym("AAPL"), 1.0, AlertCondition::Above)
            .await
            .unwrap();

        assert!(h.engine.evaluate_tick(&sym("MSFT"), 500.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_ticks_fire_once() {
        let h = harness();
        h.engine
            .create_alert(sym("AAPL"), 100.0, AlertCondition::Above)
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&h.engine);
                tokio::spawn(async move { engine.evaluate_tick(&sym("AAPL"), 101.0).await })
            })
            .collect();
        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap().unwrap().len();
        }

        assert_eq!(total, 1);
        assert_eq!(h.store.recent_trigger_logs(50).await.unwrap().len(), 1);
        assert!(h.engine.locks.lock().is_empty());
    }

    #[tokio::test]
    async fn alert_locks_are_released_after_use() {
        let h = harness();
        let alert = h
            .engine
            .create_alert(sym("AAPL"), 100.0, AlertCondition::Above)
            .await
            .unwrap();

        h.engine.evaluate_tick(&sym("AAPL"), 101.0).await.unwrap();
        h.engine.toggle_alert(alert.id).await.unwrap();
        h.engine.toggle_alert(404).await.unwrap();

        assert!(h.engine.locks.lock().is_empty());

        let held = h.engine.lock_alert(alert.id).await;
        assert_eq!(h.engine.locks.lock().len(), 1);
        drop(held);
        assert!(h.engine.locks.lock().is_empty());
    }

    #[tokio::test]
    async fn update_missing_alert_is_noop() {
        let mut h = harness();

        let result = h
            .engine
            .update_alert(
                42,
                AlertUpdate {
                    threshold: 1.0,
                    condition: AlertCondition::Above,
                    active: true,
                },
            )
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(drain(&mut h.rx).is_empty());
    }

    #[tokio::test]
    async fn update_replaces_fields() {
        let mut h = harness();
        let alert = h
            .engine
            .create_alert(sym("AAPL"), 100.0, AlertCondition::Above)
            .await
            .unwrap();
        drain(&mut h.rx);

        let updated = h
            .engine
            .update_alert(
                alert.id,
                AlertUpdate {
                    threshold: 90.0,
                    condition: AlertCondition::Below,
                    active: false,
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.threshold, 90.0);
        assert_eq!(updated.condition, AlertCondition::Below);
        assert!(!updated.active);
        assert_eq!(drain(&mut h.rx), vec!["alert_updated"]);
    }

    #[tokio::test]
    async fn delete_keeps_trigger_logs() {
        let mut h = harness();
        let alert = h
            .engine
            .create_alert(sym("AAPL"), 100.0, AlertCondition::Above)
            .await
            .unwrap();
        h.engine.evaluate_tick(&sym("AAPL"), 101.0).await.unwrap();
        drain(&mut h.rx);

        assert!(h.engine.delete_alert(alert.id).await.unwrap());
        assert!(!h.engine.delete_alert(alert.id).await.unwrap());

        assert_eq!(drain(&mut h.rx), vec!["alert_deleted"]);
        assert_eq!(h.engine.recent_trigger_logs(50).await.unwrap().len(), 1);
    }
}
