//! Hub Configuration Settings
//!
//! Configuration types for the alert hub, loaded from environment variables.
//! Unset or unparsable numeric values fall back to their defaults.

use std::time::Duration;

use crate::infrastructure::feed::DEFAULT_FEED_URL;

/// Upstream price feed implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedKind {
    /// Random-walk prices generated in process.
    #[default]
    Simulated,
    /// JSON price stream over WebSocket.
    WebSocket,
}

impl FeedKind {
    /// Parse a feed kind, case-insensitively.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for unknown names.
    pub fn parse(key: &str, raw: &str) -> Result<Self, ConfigError> {
        match raw.trim().to_lowercase().as_str() {
            "simulated" | "sim" => Ok(Self::Simulated),
            "websocket" | "ws" => Ok(Self::WebSocket),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.to_string(),
            }),
        }
    }

    /// Get the feed kind name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::WebSocket => "websocket",
        }
    }
}

/// Persistence backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    /// Process-local store; nothing survives a restart.
    Memory,
    /// SQLite database at the given URL.
    Sqlite(String),
}

impl StoreKind {
    fn from_url(url: &str) -> Self {
        if url.trim().eq_ignore_ascii_case("memory") {
            Self::Memory
        } else {
            Self::Sqlite(url.trim().to_string())
        }
    }
}

impl Default for StoreKind {
    fn default() -> Self {
        Self::Sqlite("sqlite://price_alerts.db".to_string())
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Client WebSocket port.
    pub ws_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            ws_port: 5000,
            health_port: 8083,
        }
    }
}

/// Upstream feed settings.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Which provider to run.
    pub kind: FeedKind,
    /// Upstream URL for the WebSocket provider.
    pub url: String,
    /// Tick interval for the simulated provider.
    pub sim_interval: Duration,
    /// Per-feed tick buffer.
    pub buffer: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            kind: FeedKind::default(),
            url: DEFAULT_FEED_URL.to_string(),
            sim_interval: Duration::from_secs(1),
            buffer: 256,
        }
    }
}

/// Per-client settings.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Undelivered price ticks queued per client before ticks are shed.
    pub queue_capacity: usize,
    /// Trigger logs sent on connect.
    pub trigger_log_limit: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            trigger_log_limit: 50,
        }
    }
}

/// Complete hub configuration.
#[derive(Debug, Clone, Default)]
pub struct HubConfig {
    /// Server port settings.
    pub server: ServerSettings,
    /// Persistence backend.
    pub store: StoreKind,
    /// Upstream feed settings.
    pub feed: FeedSettings,
    /// Per-client settings.
    pub client: ClientSettings,
}

impl HubConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `ALERT_HUB_FEED` names an unknown provider or a
    /// capacity is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`HubConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        let defaults = Self::default();

        let server = ServerSettings {
            ws_port: env.parse("ALERT_HUB_WS_PORT", defaults.server.ws_port),
            health_port: env.parse("ALERT_HUB_HEALTH_PORT", defaults.server.health_port),
        };

        let store = env
            .non_empty("ALERT_HUB_DATABASE_URL")
            .map_or(defaults.store, |url| StoreKind::from_url(&url));

        let kind = match env.non_empty("ALERT_HUB_FEED") {
            Some(raw) => FeedKind::parse("ALERT_HUB_FEED", &raw)?,
            None => defaults.feed.kind,
        };
        let feed = FeedSettings {
            kind,
            url: env
                .non_empty("ALERT_HUB_FEED_URL")
                .unwrap_or(defaults.feed.url),
            sim_interval: Some(env.parse::<u64>("ALERT_HUB_SIM_INTERVAL_MS", 0))
                .filter(|ms| *ms > 0)
                .map_or(defaults.feed.sim_interval, Duration::from_millis),
            buffer: env.parse("ALERT_HUB_FEED_BUFFER", defaults.feed.buffer),
        };

        let client = ClientSettings {
            queue_capacity: env.parse("ALERT_HUB_CLIENT_QUEUE", defaults.client.queue_capacity),
            trigger_log_limit: env.parse(
                "ALERT_HUB_TRIGGER_LOG_LIMIT",
                defaults.client.trigger_log_limit,
            ),
        };

        if feed.buffer == 0 {
            return Err(ConfigError::ZeroCapacity("ALERT_HUB_FEED_BUFFER".to_string()));
        }
        if client.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("ALERT_HUB_CLIENT_QUEUE".to_string()));
        }

        Ok(Self {
            server,
            store,
            feed,
            client,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has a value outside its allowed set.
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Rejected value.
        value: String,
    },
    /// Capacity variable was set to zero.
    #[error("environment variable {0} must be greater than zero")]
    ZeroCapacity(String),
}

struct Env<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn non_empty(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.non_empty(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<HubConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        HubConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config(&[]).unwrap();
        assert_eq!(config.server.ws_port, 5000);
        assert_eq!(config.server.health_port, 8083);
        assert_eq!(
            config.store,
            StoreKind::Sqlite("sqlite://price_alerts.db".to_string())
        );
        assert_eq!(config.feed.kind, FeedKind::Simulated);
        assert_eq!(config.feed.url, DEFAULT_FEED_URL);
        assert_eq!(config.feed.sim_interval, Duration::from_secs(1));
        assert_eq!(config.client.queue_capacity, 1024);
        assert_eq!(config.client.trigger_log_limit, 50);
    }

    #[test]
    fn overrides_from_env() {
        let config = config(&[
            ("ALERT_HUB_WS_PORT", "7000"),
            ("ALERT_HUB_DATABASE_URL", "MEMORY"),
            ("ALERT_HUB_FEED", "WebSocket"),
            ("ALERT_HUB_FEED_URL", "ws://localhost:9000"),
            ("ALERT_HUB_SIM_INTERVAL_MS", "250"),
            ("ALERT_HUB_TRIGGER_LOG_LIMIT", "10"),
        ])
        .unwrap();
        assert_eq!(config.server.ws_port, 7000);
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.feed.kind, FeedKind::WebSocket);
        assert_eq!(config.feed.url, "ws://localhost:9000");
        assert_eq!(config.feed.sim_interval, Duration::from_millis(250));
        assert_eq!(config.client.trigger_log_limit, 10);
    }

    #[test]
    fn unparsable_numbers_fall_back() {
        let config = config(&[
            ("ALERT_HUB_HEALTH_PORT", "not-a-port"),
            ("ALERT_HUB_SIM_INTERVAL_MS", "0"),
        ])
        .unwrap();
        assert_eq!(config.server.health_port, 8083);
        assert_eq!(config.feed.sim_interval, Duration::from_secs(1));
    }

    #[test]
    fn unknown_feed_is_an_error() {
        let err = config(&[("ALERT_HUB_FEED", "carrier-pigeon")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "ALERT_HUB_FEED"));
    }

    #[test]
    fn zero_queue_is_an_error() {
        let err = config(&[("ALERT_HUB_CLIENT_QUEUE", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroCapacity(_)));
    }

    #[test]
    fn feed_kind_names() {
        assert_eq!(FeedKind::Simulated.as_str(), "simulated");
        assert_eq!(FeedKind::parse("K", "sim").unwrap(), FeedKind::Simulated);
        assert_eq!(FeedKind::parse("K", " ws ").unwrap(), FeedKind::WebSocket);
    }
}
