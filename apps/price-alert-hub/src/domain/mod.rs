//! Domain Layer - Core alerting and subscription types.
//!
//! This layer contains the core domain types for price subscriptions and
//! alert evaluation. Nothing here performs I/O; types carry serialization
//! support so adapters can put them on the wire unchanged.

/// Validation errors for client-supplied values.
pub mod error;

/// Market data types (symbols, price ticks).
pub mod market;

/// Price alerts, trigger logs, and condition evaluation.
pub mod alert;

/// Per-client interest tracking.
pub mod subscription;

/// Client protocol events (inbound commands, outbound events).
pub mod events;
