//! Market Data Types
//!
//! Symbols and the price ticks produced by upstream feeds.
//!
//! # Design
//!
//! Symbols are normalized once at the edge (trimmed, uppercased) so every
//! map keyed by [`Symbol`] agrees on identity. A [`PriceTick`] keeps the
//! raw upstream payload next to the parsed price; clients receive the
//! payload as-is while alert evaluation only looks at `price`.

use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::ValidationError;

/// Maximum accepted symbol length.
pub const MAX_SYMBOL_LEN: usize = 20;

// =============================================================================
// Symbol
// =============================================================================

/// A normalized ticker symbol (e.g. `AAPL`, `BTC-USD`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalize a symbol.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptySymbol`] if the input is blank and
    /// [`ValidationError::SymbolTooLong`] if it exceeds [`MAX_SYMBOL_LEN`].
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let normalized = raw.trim().to_uppercase();
        if normalized.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }
        if normalized.chars().count() > MAX_SYMBOL_LEN {
            return Err(ValidationError::SymbolTooLong {
                symbol: normalized,
                max: MAX_SYMBOL_LEN,
            });
        }
        Ok(Self(normalized))
    }

    /// The normalized symbol text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

// =============================================================================
// Price Tick
// =============================================================================

/// One price observation for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceTick {
    /// Symbol the tick belongs to.
    pub symbol: Symbol,
    /// Last price. Zero when the upstream payload carried none.
    pub price: f64,
    /// Upstream timestamp, or receive time when the payload had none.
    pub timestamp: DateTime<Utc>,
    /// Upstream payload, forwarded to clients unchanged.
    pub raw: Value,
}

impl PriceTick {
    /// Build a tick with a synthesized payload.
    #[must_use]
    pub fn new(symbol: Symbol, price: f64, timestamp: DateTime<Utc>) -> Self {
        let raw = serde_json::json!({
            "id": symbol.as_str(),
            "price": price,
            "time": timestamp.timestamp_millis(),
        });
        Self {
            symbol,
            price,
            timestamp,
            raw,
        }
    }

    /// Build a tick from a raw upstream payload.
    ///
    /// `price` is read as a number or numeric string and defaults to zero
    /// when absent. `time` (epoch milliseconds) is used when present,
    /// otherwise `received_at`.
    #[must_use]
    pub fn from_payload(symbol: Symbol, raw: Value, received_at: DateTime<Utc>) -> Self {
        let price = raw.get("price").and_then(number_like).unwrap_or(0.0);
        let timestamp = raw
            .get("time")
            .and_then(number_like)
            .and_then(|millis| {
                #[allow(clippy::cast_possible_truncation)]
                Utc.timestamp_millis_opt(millis as i64).single()
            })
            .unwrap_or(received_at);
        Self {
            symbol,
            price,
            timestamp,
            raw,
        }
    }
}

/// Read a JSON value as `f64` when it is a number or a numeric string.
#[must_use]
pub fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================
