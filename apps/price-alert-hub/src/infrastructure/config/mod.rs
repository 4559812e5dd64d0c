//! Configuration Module
//!
//! Configuration loading for the alert hub service.

mod settings;

pub use settings::{
    ClientSettings, ConfigError, FeedKind, FeedSettings, HubConfig, ServerSettings, StoreKind,
};
