//! # Persistence Module
//!
//! ## Why This Module Exists
//! The dashboard needs exactly one piece of durable state: the connection configuration
//! the user typed into the settings surface. This module defines that configuration, the
//! key/value store it lives in, and the [`config_manager::ConfigManager`] that caches it
//! in memory and announces every successful load or save to the subscription controller.
//!
//! ## Key Abstractions
//! - **All-or-nothing configuration**: a [`ConnectionConfig`] is only ever constructed
//!   with all four fields present and non-empty. Partial data in the store is reported
//!   as [`ConfigError::Incomplete`] and treated as "no configuration".
//! - **Namespaced keys**: each field is stored under its own key (see [`STORAGE_KEYS`]),
//!   read and written as one logical group.
//! - **Version token**: consumers do not compare configurations structurally. Every
//!   successful load or save bumps a counter, and that counter is the change signal.
//!
//! ## Error Handling Strategy
//! Store failures are converted to [`ConfigError`] at the store boundary. The manager
//! records the message so the presentation layer can show it, and never panics.

pub mod config_manager;
pub mod config_store;

use serde::{Deserialize, Serialize};

pub const IDENTITY_POOL_ID_KEY: &str = "@aws_identity_pool_id";
pub const MQTT_ENDPOINT_KEY: &str = "@aws_mqtt_endpoint";
pub const REGION_KEY: &str = "@aws_region";
pub const TOPIC_KEY: &str = "@aws_topic";

/// Store keys in the order [`ConnectionConfig::entries`] yields them.
pub const STORAGE_KEYS: [&str; 4] = [
    IDENTITY_POOL_ID_KEY,
    MQTT_ENDPOINT_KEY,
    REGION_KEY,
    TOPIC_KEY,
];

/// Connection parameters for the telemetry stream.
///
/// ## Lifecycle
/// Created from user input, persisted through a [`config_store::ConfigStore`], loaded
/// once at startup and replaced wholesale on every save. Fields are never mutated in
/// place by the dashboard.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Guest identity pool used by the identity bootstrap
    pub identity_pool_id: String,
    /// Broker endpoint, either a full host or a bare endpoint prefix
    pub mqtt_endpoint: String,
    pub region: String,
    /// Topic the readings are published on
    pub topic: String,
}

impl ConnectionConfig {
    pub fn new(
        identity_pool_id: impl Into<String>,
        mqtt_endpoint: impl Into<String>,
        region: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            identity_pool_id: identity_pool_id.into(),
            mqtt_endpoint: mqtt_endpoint.into(),
            region: region.into(),
            topic: topic.into(),
        }
    }

    /// Builds a configuration from raw store values.
    ///
    /// Values must be given in [`STORAGE_KEYS`] order. Missing or blank values make the
    /// whole configuration incomplete; the error names every offending key.
    pub fn from_store_values(values: [Option<String>; 4]) -> Result<Self, ConfigError> {
        let missing: Vec<&'static str> = STORAGE_KEYS
            .iter()
            .zip(values.iter())
            .filter(|(_, value)| is_blank(value.as_deref()))
            .map(|(key, _)| *key)
            .collect();

        if !missing.is_empty() {
            return Err(ConfigError::Incomplete(missing));
        }

        let [identity_pool_id, mqtt_endpoint, region, topic] = values.map(Option::unwrap_or_default);
        Ok(Self {
            identity_pool_id,
            mqtt_endpoint,
            region,
            topic,
        })
    }

    /// Checks that every field is set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let missing: Vec<&'static str> = self
            .entries()
            .iter()
            .filter(|(_, value)| is_blank(Some(*value)))
            .map(|(key, _)| *key)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Incomplete(missing))
        }
    }

    /// Key/value pairs as they are written to the store.
    pub fn entries(&self) -> [(&'static str, &str); 4] {
        [
            (IDENTITY_POOL_ID_KEY, self.identity_pool_id.as_str()),
            (MQTT_ENDPOINT_KEY, self.mqtt_endpoint.as_str()),
            (REGION_KEY, self.region.as_str()),
            (TOPIC_KEY, self.topic.as_str()),
        ]
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

/// Errors raised while loading or saving the connection configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// One or more fields are missing. Shown as "please configure", not as a failure.
    #[error("Missing connection configuration ({}). Please check settings.", .0.join(", "))]
    Incomplete(Vec<&'static str>),

    /// The store rejected a write; the in-memory configuration is unchanged.
    #[error("Failed to save settings: {0}")]
    Persist(String),

    #[error("Failed to access configuration store: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration store: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration store: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl ConfigError {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ConfigError::Incomplete(_))
    }
}
