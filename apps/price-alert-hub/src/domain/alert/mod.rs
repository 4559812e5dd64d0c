//! Price Alerts
//!
//! Alert definitions, trigger history, and the pure evaluation rules the
//! alert engine applies to every tick.
//!
//! # Design
//!
//! An alert fires when its condition holds, it is active, and its cooldown
//! has elapsed. Firing pauses the alert; a client re-arms it by toggling or
//! updating. The cooldown is measured from the last fire regardless of any
//! reactivation in between.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::ValidationError;
use crate::domain::market::Symbol;

// =============================================================================
// Constants
// =============================================================================

/// Tolerance for the `equal` condition.
pub const EQUAL_EPSILON: f64 = 0.01;

/// Minimum seconds between two fires of the same alert.
pub const ALERT_COOLDOWN_SECS: i64 = 60;

/// Minimum time between two fires of the same alert.
#[must_use]
pub fn alert_cooldown() -> TimeDelta {
    TimeDelta::seconds(ALERT_COOLDOWN_SECS)
}

/// Persisted alert identifier.
pub type AlertId = i64;

/// Persisted trigger log identifier.
pub type TriggerLogId = i64;

// =============================================================================
// Condition
// =============================================================================

/// Comparison applied between the tick price and the alert threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    /// Fires when price is strictly greater than the threshold.
    Above,
    /// Fires when price is strictly less than the threshold.
    Below,
    /// Fires when price is within [`EQUAL_EPSILON`] of the threshold.
    Equal,
}

impl AlertCondition {
    /// Wire name of the condition.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Above => "above",
            Self::Below => "below",
            Self::Equal => "equal",
        }
    }

    /// Whether `price` satisfies the condition against `threshold`.
    #[must_use]
    pub fn holds(self, price: f64, threshold: f64) -> bool {
        match self {
            Self::Above => price > threshold,
            Self::Below => price < threshold,
            Self::Equal => (price - threshold).abs() < EQUAL_EPSILON,
        }
    }
}

impl fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertCondition {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "above" => Ok(Self::Above),
            "below" => Ok(Self::Below),
            "equal" => Ok(Self::Equal),
            _ => Err(ValidationError::InvalidCondition(s.to_string())),
        }
    }
}

/// Validate an alert threshold.
///
/// # Errors
///
/// Returns [`ValidationError::InvalidPrice`] for NaN or infinite values.
pub fn validate_threshold(threshold: f64) -> Result<f64, ValidationError> {
    if threshold.is_finite() {
        Ok(threshold)
    } else {
        Err(ValidationError::InvalidPrice(threshold.to_string()))
    }
}

// =============================================================================
// Alert
// =============================================================================

/// A persisted price alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    /// Store-assigned identifier.
    pub id: AlertId,
    /// Watched symbol.
    pub symbol: Symbol,
    /// Threshold price.
    #[serde(rename = "price")]
    pub threshold: f64,
    /// Comparison to apply.
    pub condition: AlertCondition,
    /// Whether the alert is armed.
    pub active: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the most recent fire.
    #[serde(rename = "last_triggered")]
    pub last_triggered_at: Option<DateTime<Utc>>,
}

/// Outcome of evaluating one alert against one price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evaluation {
    /// Alert is paused.
    Inactive,
    /// Condition does not hold.
    ConditionNotMet,
    /// Condition holds but the alert fired less than a cooldown ago.
    CoolingDown,
    /// Alert fires.
    Fire,
}

impl Alert {
    /// Whether the cooldown since the last fire has elapsed at `now`.
    #[must_use]
    pub fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.last_triggered_at
            .is_none_or(|last| now.signed_duration_since(last) >= alert_cooldown())
    }

    /// Evaluate the alert against `price` at `now`.
    #[must_use]
    pub fn evaluate(&self, price: f64, now: DateTime<Utc>) -> Evaluation {
        if !self.active {
            Evaluation::Inactive
        } else if !self.condition.holds(price, self.threshold) {
            Evaluation::ConditionNotMet
        } else if !self.cooldown_elapsed(now) {
            Evaluation::CoolingDown
        } else {
            Evaluation::Fire
        }
    }

    /// Record a fire: stamp the time and pause the alert.
    pub fn mark_triggered(&mut self, now: DateTime<Utc>) {
        self.last_triggered_at = Some(now);
        self.active = false;
    }
}

/// A validated alert awaiting persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAlert {
    /// Watched symbol.
    pub symbol: Symbol,
    /// Threshold price.
    pub threshold: f64,
    /// Comparison to apply.
    pub condition: AlertCondition,
}

impl NewAlert {
    /// Validate and build a new alert.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidPrice`] for a non-finite threshold.
    pub fn new(
        symbol: Symbol,
        threshold: f64,
        condition: AlertCondition,
    ) -> Result<Self, ValidationError> {
        Ok(Self {
            symbol,
            threshold: validate_threshold(threshold)?,
            condition,
        })
    }
}

/// Replacement values for an existing alert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertUpdate {
    /// New threshold price.
    pub threshold: f64,
    /// New comparison.
    pub condition: AlertCondition,
    /// New armed state.
    pub active: bool,
}

impl AlertUpdate {
    /// Apply the update to `alert`.
    pub fn apply(self, alert: &mut Alert) {
        alert.threshold = self.threshold;
        alert.condition = self.condition;
        alert.active = self.active;
    }
}

// =============================================================================
// Trigger Log
// =============================================================================

/// Immutable record of one alert fire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerLog {
    /// Store-assigned identifier.
    pub id: TriggerLogId,
    /// Alert that fired. The alert may since have been deleted.
    pub alert_id: AlertId,
    /// Symbol at fire time.
    pub symbol: Symbol,
    /// Condition at fire time.
    pub condition: AlertCondition,
    /// Threshold at fire time.
    pub alert_price: f64,
    /// Tick price that caused the fire.
    pub trigger_price: f64,
    /// Fire time.
    pub triggered_at: DateTime<Utc>,
}

// =============================================================================
// Subscription Record
// =============================================================================

/// A persisted symbol subscription, replayed to clients on connect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRecord {
    /// Subscribed symbol.
    pub symbol: Symbol,
    /// First subscription time.
    pub created_at: DateTime<Utc>,
    /// Most recent subscribe for this symbol.
    #[serde(rename = "last_accessed")]
    pub last_accessed_at: DateTime<Utc>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn alert(condition: AlertCondition, threshold: f64) -> Alert {
        Alert {
            id: 1,
            symbol: Symbol::parse("AAPL").unwrap(),
            threshold,
            condition,
            active: true,
            created_at: Utc::now(),
            last_triggered_at: None,
        }
    }

    #[test_case(AlertCondition::Above, 101.0, 100.0 => true ; "above when greater")]
    #[test_case(AlertCondition::Above, 100.0, 100.0 => false ; "above is strict")]
    #[test_case(AlertCondition::Below, 99.0, 100.0 => true ; "below when less")]
    #[test_case(AlertCondition::Below, 100.0, 100.0 => false ; "below is strict")]
    #[test_case(AlertCondition::Equal, 100.005, 100.0 => true ; "equal within epsilon")]
    #[test_case(AlertCondition::Equal, 99.995, 100.0 => true ; "equal within epsilon below")]
    #[test_case(AlertCondition::Equal, 100.02, 100.0 => false ; "equal outside epsilon")]
    fn condition_holds(condition: AlertCondition, price: f64, threshold: f64) -> bool {
        condition.holds(price, threshold)
    }

    #[test_case("above" => Ok(AlertCondition::Above))]
    #[test_case(" Below " => Ok(AlertCondition::Below))]
    #[test_case("EQUAL" => Ok(AlertCondition::Equal))]
    #[test_case("crosses" => Err(ValidationError::InvalidCondition("crosses".to_string())))]
    fn condition_parses(raw: &str) -> Result<AlertCondition, ValidationError> {
        raw.parse()
    }

    #[test]
    fn inactive_alert_never_fires() {
        let mut a = alert(AlertCondition::Above, 100.0);
        a.active = false;
        assert_eq!(a.evaluate(150.0, Utc::now()), Evaluation::Inactive);
    }

    #[test]
    fn fresh_alert_fires_when_condition_holds() {
        let a = alert(AlertCondition::Above, 100.0);
        assert_eq!(a.evaluate(150.0, Utc::now()), Evaluation::Fire);
        assert_eq!(a.evaluate(50.0, Utc::now()), Evaluation::ConditionNotMet);
    }

    #[test]
    fn cooldown_suppresses_until_sixty_seconds() {
        let now = Utc::now();
        let mut a = alert(AlertCondition::Above, 100.0);
        a.last_triggered_at = Some(now);

        assert_eq!(
            a.evaluate(150.0, now + TimeDelta::seconds(59)),
            Evaluation::CoolingDown
        );
        assert_eq!(
            a.evaluate(150.0, now + TimeDelta::seconds(60)),
            Evaluation::Fire
        );
    }

    #[test]
    fn mark_triggered_pauses_alert() {
        let now = Utc::now();
        let mut a = alert(AlertCondition::Below, 100.0);
        a.mark_triggered(now);

        assert!(!a.active);
        assert_eq!(a.last_triggered_at, Some(now));
    }

    #[test]
    fn non_finite_threshold_is_rejected() {
        let symbol = Symbol::parse("AAPL").unwrap();
        assert!(NewAlert::new(symbol.clone(), f64::NAN, AlertCondition::Above).is_err());
        assert!(NewAlert::new(symbol, f64::INFINITY, AlertCondition::Above).is_err());
    }

    #[test]
    fn alert_serializes_with_wire_names() {
        let a = alert(AlertCondition::Equal, 12.5);
        let json = serde_json::to_value(&a).unwrap();

        assert_eq!(json["symbol"], "AAPL");
        assert_eq!(json["price"], 12.5);
        assert_eq!(json["condition"], "equal");
        assert_eq!(json["active"], true);
        assert!(json["last_triggered"].is_null());
    }
}
