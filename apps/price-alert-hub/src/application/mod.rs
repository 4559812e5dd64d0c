//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the services that run subscriptions and alerts,
//! and the port interfaces through which they reach feeds, storage, and
//! the clock.

/// Port interfaces for external systems (price feeds, persistence, clock).
pub mod ports;

/// Application services for feeds, clients, and alerts.
pub mod services;
