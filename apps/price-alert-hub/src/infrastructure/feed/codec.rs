//! Tick Codec
//!
//! Decodes upstream JSON frames into price ticks and encodes subscription
//! requests.
//!
//! # Frame Format
//!
//! A frame is a JSON object or an array of objects. Each object carrying a
//! symbol under `id`, `symbol`, or `S` becomes one tick; objects without a
//! symbol (acknowledgements, heartbeats) are skipped.
//!
//! ```json
//! [{"id":"AAPL","price":187.42,"time":1700000000000}]
//! ```

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::domain::market::{PriceTick, Symbol};

/// Keys checked, in order, for the tick symbol.
const SYMBOL_KEYS: [&str; 3] = ["id", "symbol", "S"];

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame was neither an object nor an array.
    #[error("invalid frame format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for upstream tick frames.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickCodec;

impl TickCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame into ticks.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON or is neither an
    /// object nor an array.
    pub fn decode(&self, text: &str, received_at: DateTime<Utc>) -> Result<Vec<PriceTick>, CodecError> {
        let trimmed = text.trim();
        let values = if trimmed.starts_with('[') {
            serde_json::from_str::<Vec<Value>>(trimmed)?
        } else if trimmed.starts_with('{') {
            vec![serde_json::from_str::<Value>(trimmed)?]
        } else {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got: {}...",
                trimmed.chars().take(50).collect::<String>()
            )));
        };

        Ok(values
            .into_iter()
            .filter_map(|value| {
                let symbol = symbol_of(&value)?;
                Some(PriceTick::from_payload(symbol, value, received_at))
            })
            .collect())
    }

    /// Encode a subscribe request for one symbol.
    #[must_use]
    pub fn encode_subscribe(&self, symbol: &Symbol) -> String {
        serde_json::json!({ "subscribe": [symbol.as_str()] }).to_string()
    }
}

fn symbol_of(value: &Value) -> Option<Symbol> {
    SYMBOL_KEYS
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .and_then(|raw| Symbol::parse(raw).ok())
}

// =============================================================================
// Tests
// =============================================================================
