//! Persistence Port (Driven Port)
//!
//! Interface for storing alerts, trigger logs, and persisted subscriptions.
//!
//! # Consistency
//!
//! `record_trigger` must pause the alert, stamp `last_triggered`, and append
//! the trigger log as one atomic unit. Trigger logs outlive the alert they
//! reference.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::alert::{Alert, AlertId, NewAlert, SubscriptionRecord, TriggerLog};
use crate::domain::market::Symbol;

/// Persistence failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PersistenceError {
    /// The backing database returned an error.
    #[error("database error: {0}")]
    Database(String),

    /// A stored row could not be mapped back to a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// The store is not reachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Port for alert and subscription persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Check that the store answers queries.
    async fn health_check(&self) -> Result<(), PersistenceError>;

    /// All alerts, oldest first.
    async fn list_alerts(&self) -> Result<Vec<Alert>, PersistenceError>;

    /// Find an alert by ID.
    async fn get_alert(&self, id: AlertId) -> Result<Option<Alert>, PersistenceError>;

    /// Active alerts watching `symbol`.
    async fn active_alerts_for(&self, symbol: &Symbol) -> Result<Vec<Alert>, PersistenceError>;

    /// Insert a new, active alert.
    async fn insert_alert(
        &self,
        alert: &NewAlert,
        created_at: DateTime<Utc>,
    ) -> Result<Alert, PersistenceError>;

    /// Overwrite an existing alert. Returns `false` if it no longer exists.
    async fn save_alert(&self, alert: &Alert) -> Result<bool, PersistenceError>;

    /// Delete an alert. Returns `false` if it did not exist.
    async fn delete_alert(&self, id: AlertId) -> Result<bool, PersistenceError>;

    /// Atomically pause the alert, stamp its trigger time, and append a
    /// trigger log. Returns `None` if the alert no longer exists.
    async fn record_trigger(
        &self,
        id: AlertId,
        trigger_price: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<(Alert, TriggerLog)>, PersistenceError>;

    /// The newest `limit` trigger logs, newest first.
    async fn recent_trigger_logs(&self, limit: usize) -> Result<Vec<TriggerLog>, PersistenceError>;

    /// Persisted subscriptions, most recently accessed first.
    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionRecord>, PersistenceError>;

    /// Insert a subscription or refresh its `last_accessed` time.
    async fn touch_subscription(
        &self,
        symbol: &Symbol,
        at: DateTime<Utc>,
    ) -> Result<SubscriptionRecord, PersistenceError>;

    /// Delete a persisted subscription. Returns `false` if absent.
    async fn delete_subscription(&self, symbol: &Symbol) -> Result<bool, PersistenceError>;
}
