//! # Config Manager
//!
//! In-memory owner of the current [`ConnectionConfig`], the last configuration error
//! and the configuration version.
//!
//! ## Change Notification
//! State is published through a `tokio::sync::watch` channel as a [`ConfigSnapshot`].
//! The version increments exactly once per successful `load` or `save`, including a save
//! of a configuration identical to the current one. The subscription controller keys its
//! reconnects on that version, so re-saving unchanged settings doubles as a manual retry.
//!
//! ```text
//! ConfigStore ──load/save──► ConfigManager ──watch<ConfigSnapshot>──► SubscriptionController
//! ```

use super::config_store::ConfigStore;
use super::{ConfigError, ConnectionConfig, STORAGE_KEYS};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Read-only view of the manager's state at one point in time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigSnapshot {
    /// `None` when nothing (or only part of the configuration) is stored
    pub config: Option<ConnectionConfig>,
    /// Human readable description of the last load/save failure
    pub error: Option<String>,
    pub version: u64,
}

pub struct ConfigManager {
    store: Arc<dyn ConfigStore>,
    state: watch::Sender<ConfigSnapshot>,
}

impl ConfigManager {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        let (state, _) = watch::channel(ConfigSnapshot::default());
        Self { store, state }
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConfigSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        self.state.borrow().clone()
    }

    pub fn config(&self) -> Option<ConnectionConfig> {
        self.state.borrow().config.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn version(&self) -> u64 {
        self.state.borrow().version
    }

    /// Reads all four fields from the store.
    ///
    /// On success the configuration is replaced, the version bumped and the error
    /// cleared. On failure the configuration becomes absent and the error is recorded;
    /// the version stays where it was.
    pub async fn load(&self) -> Result<ConnectionConfig, ConfigError> {
        debug!("Loading connection configuration");

        let result = match self.store.get_many(&STORAGE_KEYS).await {
            Ok(values) => match <[Option<String>; 4]>::try_from(values) {
                Ok(values) => ConnectionConfig::from_store_values(values),
                Err(values) => Err(ConfigError::Persist(format!(
                    "store returned {} values for {} keys",
                    values.len(),
                    STORAGE_KEYS.len()
                ))),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(config) => {
                self.apply(config.clone());
                info!(
                    "Loaded connection configuration for topic {} (version {})",
                    config.topic,
                    self.version()
                );
                Ok(config)
            }
            Err(e) => Err(self.record_load_failure(e)),
        }
    }

    /// Re-reads the store. Used as the manual retry entry point.
    pub async fn refresh(&self) -> Result<ConnectionConfig, ConfigError> {
        self.load().await
    }

    /// Validates and persists `new_config`, then makes it current.
    ///
    /// The version is bumped even when `new_config` equals the current configuration.
    /// A rejected write leaves the in-memory configuration untouched.
    pub async fn save(&self, new_config: ConnectionConfig) -> Result<(), ConfigError> {
        if let Err(e) = new_config.validate() {
            warn!("Refusing to save configuration: {}", e);
            self.record_error(&e);
            return Err(e);
        }

        if let Err(e) = self.store.set_many(&new_config.entries()).await {
            let e = match e {
                ConfigError::Persist(reason) => ConfigError::Persist(reason),
                other => ConfigError::Persist(other.to_string()),
            };
            warn!("{}", e);
            self.record_error(&e);
            return Err(e);
        }

        self.apply(new_config);
        info!("Settings saved (version {})", self.version());
        Ok(())
    }

    fn apply(&self, config: ConnectionConfig) {
        self.state.send_modify(|state| {
            state.config = Some(config);
            state.version += 1;
            state.error = None;
        });
    }

    fn record_load_failure(&self, error: ConfigError) -> ConfigError {
        if error.is_incomplete() {
            info!("{}", error);
        } else {
            warn!("Failed to load connection configuration: {}", error);
        }
        self.state.send_modify(|state| {
            state.config = None;
            state.error = Some(error.to_string());
        });
        error
    }

    fn record_error(&self, error: &ConfigError) {
        self.state.send_modify(|state| {
            state.error = Some(error.to_string());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::config_store::MemoryConfigStore;
    use crate::persistence::{MQTT_ENDPOINT_KEY, REGION_KEY, TOPIC_KEY};

    fn sample() -> ConnectionConfig {
        ConnectionConfig::new("p1", "e1", "r1", "t1")
    }

    #[tokio::test]
    async fn load_of_an_empty_store_leaves_config_absent() {
        let manager = ConfigManager::new(Arc::new(MemoryConfigStore::new()));

        let err = manager.load().await.unwrap_err();
        assert!(err.is_incomplete());

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.config, None);
        assert_eq!(snapshot.version, 0);
        assert!(snapshot.error.is_some());
    }

    #[tokio::test]
    async fn load_of_a_complete_store_bumps_version() {
        let store = MemoryConfigStore::with_entries(sample().entries());
        let manager = ConfigManager::new(Arc::new(store));

        assert_eq!(manager.load().await.unwrap(), sample());
        assert_eq!(manager.version(), 1);
        assert_eq!(manager.error(), None);

        manager.refresh().await.unwrap();
        assert_eq!(manager.version(), 2);
    }

    #[tokio::test]
    async fn partial_store_is_treated_as_absent() {
        let store = MemoryConfigStore::with_entries([
            (MQTT_ENDPOINT_KEY, "e1"),
            (REGION_KEY, "r1"),
            (TOPIC_KEY, "t1"),
        ]);
        let manager = ConfigManager::new(Arc::new(store));

        assert!(manager.load().await.is_err());
        assert_eq!(manager.config(), None);
    }

    #[tokio::test]
    async fn failed_load_after_success_clears_config_but_keeps_version() {
        let store = Arc::new(MemoryConfigStore::with_entries(sample().entries()));
        let manager = ConfigManager::new(store.clone());
        manager.load().await.unwrap();

        store.set(TOPIC_KEY, "").await.unwrap();
        assert!(manager.load().await.is_err());

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.config, None);
        assert_eq!(snapshot.version, 1);
    }

    #[tokio::test]
    async fn identical_save_still_bumps_version() {
        let manager = ConfigManager::new(Arc::new(MemoryConfigStore::new()));
        let mut rx = manager.subscribe();

        manager.save(sample()).await.unwrap();
        manager.save(sample()).await.unwrap();

        assert!(rx.has_changed().unwrap());
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.version, 2);
        assert_eq!(snapshot.config, Some(sample()));
        assert_eq!(snapshot.error, None);
    }

    #[tokio::test]
    async fn rejected_write_keeps_previous_config() {
        let store = Arc::new(MemoryConfigStore::new());
        let manager = ConfigManager::new(store.clone());
        manager.save(sample()).await.unwrap();

        store.set_fail_writes(true);
        let err = manager
            .save(ConnectionConfig::new("p2", "e2", "r2", "t2"))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Persist(_)));

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.config, Some(sample()));
        assert_eq!(snapshot.version, 1);
        assert!(snapshot.error.unwrap().starts_with("Failed to save settings"));
    }

    #[tokio::test]
    async fn incomplete_save_is_rejected_before_touching_the_store() {
        let store = Arc::new(MemoryConfigStore::new());
        let manager = ConfigManager::new(store.clone());

        let err = manager
            .save(ConnectionConfig::new("p1", "", "r1", "t1"))
            .await
            .unwrap_err();
        assert!(err.is_incomplete());
        assert_eq!(store.get(REGION_KEY).await.unwrap(), None);
        assert_eq!(manager.version(), 0);
    }
}
