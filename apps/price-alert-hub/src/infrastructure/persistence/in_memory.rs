//! In-Memory Store
//!
//! Keeps alerts, trigger logs, and subscriptions in process memory behind a
//! single lock, which also makes `record_trigger` atomic.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::application::ports::{PersistenceError, PersistenceStore};
use crate::domain::alert::{Alert, AlertId, NewAlert, SubscriptionRecord, TriggerLog, TriggerLogId};
use crate::domain::market::Symbol;

#[derive(Debug, Default)]
struct State {
    alerts: BTreeMap<AlertId, Alert>,
    logs: Vec<TriggerLog>,
    subscriptions: HashMap<Symbol, SubscriptionRecord>,
    next_alert_id: AlertId,
    next_log_id: TriggerLogId,
}

/// In-memory implementation of the persistence port.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceStore for InMemoryStore {
    async fn health_check(&self) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn list_alerts(&self) -> Result<Vec<Alert>, PersistenceError> {
        Ok(self.state.read().alerts.values().cloned().collect())
    }

    async fn get_alert(&self, id: AlertId) -> Result<Option<Alert>, PersistenceError> {
        Ok(self.state.read().alerts.get(&id).cloned())
    }

    async fn active_alerts_for(&self, symbol: &Symbol) -> Result<Vec<Alert>, PersistenceError> {
        Ok(self
            .state
            .read()
            .alerts
            .values()
            .filter(|a| a.active && &a.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn insert_alert(
        &self,
        alert: &NewAlert,
        created_at: DateTime<Utc>,
    ) -> Result<Alert, PersistenceError> {
        let mut state = self.state.write();
        state.next_alert_id += 1;
        let stored = Alert {
            id: state.next_alert_id,
            symbol: alert.symbol.clone(),
            threshold: alert.threshold,
            condition: alert.condition,
            active: true,
            created_at,
            last_triggered_at: None,
        };
        state.alerts.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn save_alert(&self, alert: &Alert) -> Result<bool, PersistenceError> {
        let mut state = self.state.write();
        match state.alerts.get_mut(&alert.id) {
            Some(existing) => {
                *existing = alert.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_alert(&self, id: AlertId) -> Result<bool, PersistenceError> {
        Ok(self.state.write().alerts.remove(&id).is_some())
    }

    async fn record_trigger(
        &self,
        id: AlertId,
        trigger_price: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<(Alert, TriggerLog)>, PersistenceError> {
        let mut state = self.state.write();
        let Some(alert) = state.alerts.get_mut(&id) else {
            return Ok(None);
        };
        alert.mark_triggered(at);
        let alert = alert.clone();

        state.next_log_id += 1;
        let log = TriggerLog {
            id: state.next_log_id,
            alert_id: id,
            symbol: alert.symbol.clone(),
            condition: alert.condition,
            alert_price: alert.threshold,
            trigger_price,
            triggered_at: at,
        };
        state.logs.push(log.clone());
        Ok(Some((alert, log)))
    }

    async fn recent_trigger_logs(&self, limit: usize) -> Result<Vec<TriggerLog>, PersistenceError> {
        let state = self.state.read();
        let mut logs: Vec<_> = state.logs.clone();
        logs.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at).then(b.id.cmp(&a.id)));
        logs.truncate(limit);
        Ok(logs)
    }

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionRecord>, PersistenceError> {
        let mut records: Vec<_> = self.state.read().subscriptions.values().cloned().collect();
        records.sort_by(|a, b| {
            b.last_accessed_at
                .cmp(&a.last_accessed_at)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        Ok(records)
    }

    async fn touch_subscription(
        &self,
        symbol: &Symbol,
        at: DateTime<Utc>,
    ) -> Result<SubscriptionRecord, PersistenceError> {
        let mut state = self.state.write();
        let record = state
            .subscriptions
            .entry(symbol.clone())
            .and_modify(|r| r.last_accessed_at = at)
            .or_insert_with(|| SubscriptionRecord {
                symbol: symbol.clone(),
                created_at: at,
                last_accessed_at: at,
            });
        Ok(record.clone())
    }

    async fn delete_subscription(&self, symbol: &Symbol) -> Result<bool, PersistenceError> {
        Ok(self.state.write().subscriptions.remove(symbol).is_some())
    }
}
