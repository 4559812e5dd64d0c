//! Validation Errors
//!
//! Errors raised while turning client-supplied values into domain types.
//! They are reported back to the requesting client only.

use thiserror::Error;

/// A client-supplied value failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Symbol was empty after trimming.
    #[error("symbol must not be empty")]
    EmptySymbol,

    /// Symbol exceeded the maximum length.
    #[error("symbol '{symbol}' exceeds {max} characters")]
    SymbolTooLong {
        /// The offending symbol.
        symbol: String,
        /// Maximum accepted length.
        max: usize,
    },

    /// Condition was not one of `above`, `below`, `equal`.
    #[error("invalid condition '{0}', expected one of: above, below, equal")]
    InvalidCondition(String),

    /// Price was missing, non-numeric, or not finite.
    #[error("invalid price: {0}")]
    InvalidPrice(String),

    /// The inbound event could not be decoded.
    #[error("malformed event: {0}")]
    MalformedEvent(String),
}
