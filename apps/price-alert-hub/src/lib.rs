#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Price Alert Hub - Subscription Multiplexer + Alert Engine
//!
//! A WebSocket service that keeps at most one upstream price feed open per
//! symbol no matter how many clients watch it, delivers each tick only to
//! the clients interested in that symbol, and evaluates persisted threshold
//! alerts against the same tick stream.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core types and rules, no I/O
//!   - `market`: Symbols and price ticks
//!   - `alert`: Alerts, conditions, cooldown, trigger logs
//!   - `subscription`: Per-client interest sets
//!   - `events`: Client protocol events
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Price feeds, persistence, clock, tick sinks
//!   - `services`: Feed multiplexer, connection registry, broadcaster,
//!     alert engine, client gateway
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: WebSocket and simulated price feeds
//!   - `persistence`: In-memory and SQLite stores
//!   - `ws`: Client WebSocket endpoint
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//!                      ┌──────────────────┐
//! upstream feed ──────►│ FeedMultiplexer  │ one feed per symbol
//! (per symbol)         └────────┬─────────┘
//!                               │ tick
//!                 ┌─────────────┴─────────────┐
//!                 ▼                           ▼
//!         ┌──────────────┐            ┌──────────────┐
//!         │ Broadcaster  │            │ AlertEngine  │
//!         └──────┬───────┘            └──────┬───────┘
//!   stock_update │ interested only            │ alert_* to all
//!                ▼                            ▼
//!            Client 1 … Client N (per-client outbox)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::alert::{Alert, AlertCondition, AlertId, TriggerLog};
pub use domain::events::{ClientEvent, ServerEvent};
pub use domain::market::{PriceTick, Symbol};
pub use domain::subscription::{ClientId, InterestTable};

// Services
pub use application::services::{
    AlertEngine, Broadcaster, ClientGateway, ConnectionRegistry, FeedMultiplexer, Inbox, Outbox,
    client_queue,
};

// Infrastructure config
pub use infrastructure::config::{
    ClientSettings, ConfigError, FeedKind, FeedSettings, HubConfig, ServerSettings, StoreKind,
};

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::ws::{WsServer, WsServerError, WsState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
