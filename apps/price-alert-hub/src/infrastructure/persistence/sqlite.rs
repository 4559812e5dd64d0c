//! SQLite Store
//!
//! Durable persistence using `sqlx` over SQLite. The schema is created on
//! connect. Trigger logs carry no foreign key so they survive alert
//! deletion.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::application::ports::{PersistenceError, PersistenceStore};
use crate::domain::alert::{Alert, AlertCondition, AlertId, NewAlert, SubscriptionRecord, TriggerLog};
use crate::domain::market::Symbol;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS alerts (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol         TEXT    NOT NULL,
    price          REAL    NOT NULL,
    condition      TEXT    NOT NULL,
    active         INTEGER NOT NULL DEFAULT 1,
    created_at     TEXT    NOT NULL,
    last_triggered TEXT
);
CREATE INDEX IF NOT EXISTS idx_alerts_symbol_active ON alerts (symbol, active);

CREATE TABLE IF NOT EXISTS trigger_logs (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    alert_id      INTEGER NOT NULL,
    symbol        TEXT    NOT NULL,
    condition     TEXT    NOT NULL,
    alert_price   REAL    NOT NULL,
    trigger_price REAL    NOT NULL,
    triggered_at  TEXT    NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_trigger_logs_triggered_at ON trigger_logs (triggered_at DESC);

CREATE TABLE IF NOT EXISTS subscriptions (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol        TEXT    NOT NULL UNIQUE,
    created_at    TEXT    NOT NULL,
    last_accessed TEXT    NOT NULL
);
";

impl From<sqlx::Error> for PersistenceError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable(e.to_string())
            }
            _ => Self::Database(e.to_string()),
        }
    }
}

// =============================================================================
// Rows
// =============================================================================

#[derive(Debug, FromRow)]
struct AlertRow {
    id: i64,
    symbol: String,
    price: f64,
    condition: String,
    active: bool,
    created_at: DateTime<Utc>,
    last_triggered: Option<DateTime<Utc>>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = PersistenceError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            symbol: parse_symbol(&row.symbol)?,
            threshold: row.price,
            condition: parse_condition(&row.condition)?,
            active: row.active,
            created_at: row.created_at,
            last_triggered_at: row.last_triggered,
        })
    }
}

#[derive(Debug, FromRow)]
struct TriggerLogRow {
    id: i64,
    alert_id: i64,
    symbol: String,
    condition: String,
    alert_price: f64,
    trigger_price: f64,
    triggered_at: DateTime<Utc>,
}

impl TryFrom<TriggerLogRow> for TriggerLog {
    type Error = PersistenceError;

    fn try_from(row: TriggerLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            alert_id: row.alert_id,
            symbol: parse_symbol(&row.symbol)?,
            condition: parse_condition(&row.condition)?,
            alert_price: row.alert_price,
            trigger_price: row.trigger_price,
            triggered_at: row.triggered_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SubscriptionRow {
    symbol: String,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for SubscriptionRecord {
    type Error = PersistenceError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            symbol: parse_symbol(&row.symbol)?,
            created_at: row.created_at,
            last_accessed_at: row.last_accessed,
        })
    }
}

fn parse_symbol(raw: &str) -> Result<Symbol, PersistenceError> {
    Symbol::parse(raw).map_err(|e| PersistenceError::Corrupt(format!("symbol '{raw}': {e}")))
}

fn parse_condition(raw: &str) -> Result<AlertCondition, PersistenceError> {
    raw.parse()
        .map_err(|e| PersistenceError::Corrupt(format!("condition '{raw}': {e}")))
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>, PersistenceError>
where
    T: TryFrom<R, Error = PersistenceError>,
{
    rows.into_iter().map(T::try_from).collect()
}

// =============================================================================
// Store
// =============================================================================

/// SQLite implementation of the persistence port.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `url` (e.g. `sqlite://price_alerts.db`), creating the
    /// database file and schema if missing.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError`] if the URL is invalid, the database
    /// cannot be opened, or the schema cannot be created.
    pub async fn connect(url: &str) -> Result<Self, PersistenceError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| PersistenceError::Unavailable(format!("invalid database URL: {e}")))?
            .create_if_missing(true);

        // Every connection to an in-memory database sees its own copy.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        tracing::info!(url, "SQLite store ready");
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), PersistenceError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl PersistenceStore for SqliteStore {
    async fn health_check(&self) -> Result<(), PersistenceError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn list_alerts(&self) -> Result<Vec<Alert>, PersistenceError> {
        let rows = sqlx::query_as::<_, AlertRow>("SELECT * FROM alerts ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        collect(rows)
    }

    async fn get_alert(&self, id: AlertId) -> Result<Option<Alert>, PersistenceError> {
        sqlx::query_as::<_, AlertRow>("SELECT * FROM alerts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Alert::try_from)
            .transpose()
    }

    async fn active_alerts_for(&self, symbol: &Symbol) -> Result<Vec<Alert>, PersistenceError> {
        let rows = sqlx::query_as::<_, AlertRow>(
            "SELECT * FROM alerts WHERE symbol = ? AND active = 1 ORDER BY id",
        )
        .bind(symbol.as_str())
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn insert_alert(
        &self,
        alert: &NewAlert,
        created_at: DateTime<Utc>,
    ) -> Result<Alert, PersistenceError> {
        let row = sqlx::query_as::<_, AlertRow>(
            r"
            INSERT INTO alerts (symbol, price, condition, active, created_at)
            VALUES (?, ?, ?, 1, ?)
            RETURNING *
            ",
        )
        .bind(alert.symbol.as_str())
        .bind(alert.threshold)
        .bind(alert.condition.as_str())
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(alert_id = row.id, "Alert row inserted");
        Alert::try_from(row)
    }

    async fn save_alert(&self, alert: &Alert) -> Result<bool, PersistenceError> {
        let result = sqlx::query(
            r"
            UPDATE alerts
            SET symbol = ?, price = ?, condition = ?, active = ?, last_triggered = ?
            WHERE id = ?
            ",
        )
        .bind(alert.symbol.as_str())
        .bind(alert.threshold)
        .bind(alert.condition.as_str())
        .bind(alert.active)
        .bind(alert.last_triggered_at)
        .bind(alert.id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_alert(&self, id: AlertId) -> Result<bool, PersistenceError> {
        let result = sqlx::query("DELETE FROM alerts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_trigger(
        &self,
        id: AlertId,
        trigger_price: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<(Alert, TriggerLog)>, PersistenceError> {
        let mut tx = self.pool.begin().await?;

        let Some(row) = sqlx::query_as::<_, AlertRow>(
            r"
            UPDATE alerts
            SET active = 0, last_triggered = ?
            WHERE id = ?
            RETURNING *
            ",
        )
        .bind(at)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            return Ok(None);
        };
        let alert = Alert::try_from(row)?;

        let log_row = sqlx::query_as::<_, TriggerLogRow>(
            r"
            INSERT INTO trigger_logs (alert_id, symbol, condition, alert_price, trigger_price, triggered_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            ",
        )
        .bind(alert.id)
        .bind(alert.symbol.as_str())
        .bind(alert.condition.as_str())
        .bind(alert.threshold)
        .bind(trigger_price)
        .bind(at)
        .fetch_one(&mut *tx)
        .await?;
        let log = TriggerLog::try_from(log_row)?;

        tx.commit().await?;
        Ok(Some((alert, log)))
    }

    async fn recent_trigger_logs(&self, limit: usize) -> Result<Vec<TriggerLog>, PersistenceError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, TriggerLogRow>(
            "SELECT * FROM trigger_logs ORDER BY triggered_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionRecord>, PersistenceError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT symbol, created_at, last_accessed FROM subscriptions ORDER BY last_accessed DESC, symbol",
        )
        .fetch_all(&self.pool)
        .await?;
        collect(rows)
    }

    async fn touch_subscription(
        &self,
        symbol: &Symbol,
        at: DateTime<Utc>,
    ) -> Result<SubscriptionRecord, PersistenceError> {
        let row = sqlx::query_as::<_, SubscriptionRow>(
            r"
            INSERT INTO subscriptions (symbol, created_at, last_accessed)
            VALUES (?, ?, ?)
            ON CONFLICT (symbol) DO UPDATE SET last_accessed = excluded.last_accessed
            RETURNING symbol, created_at, last_accessed
            ",
        )
        .bind(symbol.as_str())
        .bind(at)
        .bind(at)
        .fetch_one(&self.pool)
        .await?;
        SubscriptionRecord::try_from(row)
    }

    async fn delete_subscription(&self, symbol: &Symbol) -> Result<bool, PersistenceError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE symbol = ?")
            .bind(symbol.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// =============================================================================
// Tests
// =============================================================================
