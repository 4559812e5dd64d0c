//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the servers and process-level
//! setup.

/// Upstream price feed providers (WebSocket, simulated, scripted).
pub mod feed;

/// Alert and subscription stores (in-memory, SQLite).
pub mod persistence;

/// Client WebSocket endpoint.
pub mod ws;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
