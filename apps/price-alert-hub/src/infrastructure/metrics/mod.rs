//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Ticks**: Upstream ticks received and fan-out latency
//! - **Events**: Client events delivered and dropped by event name
//! - **Feeds**: Upstream feeds opened, closed, and failed
//! - **Alerts**: Alert fires and cooldown suppressions
//! - **Gauges**: Open feeds and connected clients
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns [`BuildError`] if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Tick counters
    describe_counter!(
        "price_alert_hub_ticks_received_total",
        "Total ticks received from upstream feeds"
    );
    describe_histogram!(
        "price_alert_hub_tick_fanout_seconds",
        "Time to deliver one tick to every sink"
    );

    // Event counters
    describe_counter!(
        "price_alert_hub_events_sent_total",
        "Total events queued to client connections"
    );
    describe_counter!(
        "price_alert_hub_events_dropped_total",
        "Total events not delivered: ticks shed for a lagging client, or any event to a closed client"
    );

    // Feed counters
    describe_counter!(
        "price_alert_hub_feeds_opened_total",
        "Total upstream feeds opened"
    );
    describe_counter!(
        "price_alert_hub_feeds_closed_total",
        "Total upstream feeds closed by reason"
    );
    describe_counter!(
        "price_alert_hub_feed_open_failures_total",
        "Total failed attempts to open an upstream feed"
    );

    // Alert counters
    describe_counter!(
        "price_alert_hub_alerts_triggered_total",
        "Total alert fires by condition"
    );
    describe_counter!(
        "price_alert_hub_alerts_suppressed_total",
        "Total alert fires suppressed by the cooldown"
    );

    // Gauges
    describe_gauge!(
        "price_alert_hub_open_feeds",
        "Number of open upstream feeds"
    );
    describe_gauge!(
        "price_alert_hub_connected_clients",
        "Number of connected clients"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Why an upstream feed closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Last interested client released it.
    Released,
    /// The stream failed or ended.
    Failed,
}

impl CloseReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Released => "released",
            Self::Failed => "failed",
        }
    }
}

/// Record a tick received from an upstream feed.
pub fn record_tick_received(provider: &'static str) {
    counter!("price_alert_hub_ticks_received_total", "provider" => provider).increment(1);
}

/// Record how long a tick took to reach every sink.
pub fn record_fanout_duration(duration: Duration) {
    histogram!("price_alert_hub_tick_fanout_seconds").record(duration.as_secs_f64());
}

/// Record events queued to clients.
pub fn record_events_sent(event: &'static str, count: u64) {
    counter!("price_alert_hub_events_sent_total", "event" => event).increment(count);
}

/// Record events dropped for slow or closed clients.
pub fn record_events_dropped(event: &'static str, count: u64) {
    counter!("price_alert_hub_events_dropped_total", "event" => event).increment(count);
}

/// Record an upstream feed opening.
pub fn record_feed_opened() {
    counter!("price_alert_hub_feeds_opened_total").increment(1);
}

/// Record an upstream feed closing.
pub fn record_feed_closed(reason: CloseReason) {
    counter!("price_alert_hub_feeds_closed_total", "reason" => reason.as_str()).increment(1);
}

/// Record a failed attempt to open an upstream feed.
pub fn record_feed_open_failure() {
    counter!("price_alert_hub_feed_open_failures_total").increment(1);
}

/// Record an alert fire.
pub fn record_alert_triggered(condition: &'static str) {
    counter!("price_alert_hub_alerts_triggered_total", "condition" => condition).increment(1);
}

/// Record an alert fire suppressed by the cooldown.
pub fn record_alert_suppressed() {
    counter!("price_alert_hub_alerts_suppressed_total").increment(1);
}

/// Update the open feed count.
#[allow(clippy::cast_precision_loss)]
pub fn set_open_feeds(count: usize) {
    gauge!("price_alert_hub_open_feeds").set(count as f64);
}

/// Update the connected client count.
#[allow(clippy::cast_precision_loss)]
pub fn set_connected_clients(count: usize) {
    gauge!("price_alert_hub_connected_clients").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================
