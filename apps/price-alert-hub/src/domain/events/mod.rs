//! Client Protocol Events
//!
//! Inbound commands and outbound events exchanged with connected clients.
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//!
//! # Inbound
//!
//! | Event               | Payload                                   |
//! |---------------------|-------------------------------------------|
//! | `subscribe`         | `{symbol}`                                |
//! | `unsubscribe`       | `{symbol}`                                |
//! | `get_subscriptions` | none                                      |
//! | `create_alert`      | `{symbol, price, condition}`              |
//! | `update_alert`      | `{id, price, condition, active?}`         |
//! | `delete_alert`      | `{id}`                                    |
//! | `toggle_alert`      | `{id}`                                    |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::alert::{Alert, AlertCondition, AlertId, TriggerLog};
use crate::domain::error::ValidationError;
use crate::domain::market::{PriceTick, Symbol, number_like};

// =============================================================================
// Inbound
// =============================================================================

/// A command sent by a client.
///
/// Fields are kept loose (`String`, raw JSON price) so validation can
/// report a precise error instead of a generic decode failure.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Start receiving ticks for a symbol.
    Subscribe {
        /// Raw symbol text.
        symbol: String,
    },
    /// Stop receiving ticks for a symbol.
    Unsubscribe {
        /// Raw symbol text.
        symbol: String,
    },
    /// Ask for the current interest set.
    GetSubscriptions,
    /// Create an alert.
    CreateAlert {
        /// Raw symbol text.
        symbol: String,
        /// Threshold as a number or numeric string.
        price: Value,
        /// Raw condition text.
        condition: String,
    },
    /// Replace an alert's threshold, condition, and armed state.
    UpdateAlert {
        /// Alert to update.
        id: AlertId,
        /// Threshold as a number or numeric string.
        price: Value,
        /// Raw condition text.
        condition: String,
        /// Armed state, defaulting to `true`.
        #[serde(default)]
        active: Option<bool>,
    },
    /// Delete an alert.
    DeleteAlert {
        /// Alert to delete.
        id: AlertId,
    },
    /// Flip an alert's armed state.
    ToggleAlert {
        /// Alert to toggle.
        id: AlertId,
    },
}

impl ClientEvent {
    /// Decode a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MalformedEvent`] if the frame is not a
    /// known event with a well-formed payload.
    pub fn from_json(text: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(text).map_err(|e| ValidationError::MalformedEvent(e.to_string()))
    }

    /// Event name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
            Self::GetSubscriptions => "get_subscriptions",
            Self::CreateAlert { .. } => "create_alert",
            Self::UpdateAlert { .. } => "update_alert",
            Self::DeleteAlert { .. } => "delete_alert",
            Self::ToggleAlert { .. } => "toggle_alert",
        }
    }
}

/// Parse a client-supplied price.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidPrice`] unless the value is a finite
/// number or a string holding one.
pub fn parse_price(value: &Value) -> Result<f64, ValidationError> {
    number_like(value)
        .filter(|p| p.is_finite())
        .ok_or_else(|| ValidationError::InvalidPrice(value.to_string()))
}

/// Parse a client-supplied condition.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidCondition`] for unknown names.
pub fn parse_condition(raw: &str) -> Result<AlertCondition, ValidationError> {
    raw.parse()
}

// =============================================================================
// Outbound
// =============================================================================

/// Payload of `alert_triggered`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertTriggered {
    /// Alert that fired.
    pub id: AlertId,
    /// Watched symbol.
    pub symbol: Symbol,
    /// Condition that held.
    pub condition: AlertCondition,
    /// Alert threshold.
    pub alert_price: f64,
    /// Tick price that fired the alert.
    pub current_price: f64,
    /// Persisted trigger record.
    pub log: TriggerLog,
}

/// An event sent to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Every alert, sent on connect.
    AlertsList(Vec<Alert>),
    /// Newest trigger logs first, sent on connect.
    TriggerLogs(Vec<TriggerLog>),
    /// Persisted subscriptions being restored, newest access first.
    RestoreSubscriptions(Vec<Symbol>),
    /// Subscribe accepted.
    SubscriptionSuccess {
        /// Subscribed symbol.
        symbol: Symbol,
    },
    /// Subscribe failed or an open feed was lost.
    SubscriptionError {
        /// Human-readable reason.
        error: String,
        /// Affected symbol, when known.
        #[serde(skip_serializing_if = "Option::is_none")]
        symbol: Option<Symbol>,
    },
    /// Unsubscribe processed.
    UnsubscribeSuccess {
        /// Unsubscribed symbol.
        symbol: Symbol,
    },
    /// Reply to `get_subscriptions`.
    SubscriptionsList(Vec<Symbol>),
    /// A price tick for a subscribed symbol.
    StockUpdate {
        /// Tick symbol.
        symbol: Symbol,
        /// The tick.
        data: PriceTick,
    },
    /// An alert fired.
    AlertTriggered(AlertTriggered),
    /// An alert was created.
    AlertCreated(Alert),
    /// An alert changed.
    AlertUpdated(Alert),
    /// An alert was deleted.
    AlertDeleted {
        /// Deleted alert.
        id: AlertId,
    },
    /// A command was rejected.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

impl ServerEvent {
    /// Build a `subscription_error`.
    #[must_use]
    pub fn subscription_error(symbol: Option<Symbol>, error: impl ToString) -> Self {
        Self::SubscriptionError {
            error: error.to_string(),
            symbol,
        }
    }

    /// Build an `error`.
    #[must_use]
    pub fn error(message: impl ToString) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }

    /// Event name for logging and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AlertsList(_) => "alerts_list",
            Self::TriggerLogs(_) => "trigger_logs",
            Self::RestoreSubscriptions(_) => "restore_subscriptions",
            Self::SubscriptionSuccess { .. } => "subscription_success",
            Self::SubscriptionError { .. } => "subscription_error",
            Self::UnsubscribeSuccess { .. } => "unsubscribe_success",
            Self::SubscriptionsList(_) => "subscriptions_list",
            Self::StockUpdate { .. } => "stock_update",
            Self::AlertTriggered(_) => "alert_triggered",
            Self::AlertCreated(_) => "alert_created",
            Self::AlertUpdated(_) => "alert_updated",
            Self::AlertDeleted { .. } => "alert_deleted",
            Self::Error { .. } => "error",
        }
    }

    /// Encode as a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns the serializer error; only non-finite floats can cause one.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_subscribe() {
        let event = ClientEvent::from_json(r#"{"event":"subscribe","data":{"symbol":"aapl"}}"#)
            .unwrap();
        assert_eq!(
            event,
            ClientEvent::Subscribe {
                symbol: "aapl".to_string()
            }
        );
        assert_eq!(event.name(), "subscribe");
    }

    #[test]
    fn decodes_unit_event_without_data() {
        let event = ClientEvent::from_json(r#"{"event":"get_subscriptions"}"#).unwrap();
        assert_eq!(event, ClientEvent::GetSubscriptions);
    }

    #[test]
    fn update_alert_active_is_optional() {
        let event = ClientEvent::from_json(
            r#"{"event":"update_alert","data":{"id":3,"price":"12.5","condition":"below"}}"#,
        )
        .unwrap();
        let ClientEvent::UpdateAlert { id, price, active, .. } = event else {
            panic!("expected update_alert");
        };
        assert_eq!(id, 3);
        assert_eq!(price, json!("12.5"));
        assert_eq!(active, None);
    }

    #[test]
    fn unknown_event_is_malformed() {
        let err = ClientEvent::from_json(r#"{"event":"launch","data":{}}"#).unwrap_err();
        assert!(matches!(err, ValidationError::MalformedEvent(_)));
        assert!(ClientEvent::from_json("not json").is_err());
    }

    #[test]
    fn price_accepts_numbers_and_numeric_strings() {
        assert!((parse_price(&json!(10)).unwrap() - 10.0).abs() < f64::EPSILON);
        assert!((parse_price(&json!(" 10.5 ")).unwrap() - 10.5).abs() < f64::EPSILON);
        assert!(parse_price(&json!("ten")).is_err());
        assert!(parse_price(&json!(null)).is_err());
        assert!(parse_price(&json!("NaN")).is_err());
        assert!(parse_price(&json!("inf")).is_err());
    }

    #[test]
    fn server_event_wire_shape() {
        let event = ServerEvent::UnsubscribeSuccess {
            symbol: Symbol::parse("AAPL").unwrap(),
        };
        let json: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json, json!({"event": "unsubscribe_success", "data": {"symbol": "AAPL"}}));
    }

    #[test]
    fn subscription_error_omits_missing_symbol() {
        let json = serde_json::to_value(ServerEvent::subscription_error(None, "boom")).unwrap();
        assert_eq!(json, json!({"event": "subscription_error", "data": {"error": "boom"}}));
    }

    #[test]
    fn alert_deleted_carries_id() {
        let json = serde_json::to_value(ServerEvent::AlertDeleted { id: 7 }).unwrap();
        assert_eq!(json["event"], "alert_deleted");
        assert_eq!(json["data"]["id"], 7);
        assert_eq!(ServerEvent::AlertDeleted { id: 7 }.name(), "alert_deleted");
    }
}
