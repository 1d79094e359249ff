//! Key/value stores for the connection configuration.
//!
//! [`FileConfigStore`] keeps the keys in a single TOML table on disk so that a group
//! write lands in one file replace. [`MemoryConfigStore`] backs tests and embedders that
//! manage persistence themselves.

use super::ConfigError;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Durable string key/value storage.
///
/// The grouped helpers read and write several keys as one logical operation from the
/// caller's point of view. Implementations may override them to make the group atomic.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, ConfigError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError>;

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, ConfigError> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), ConfigError> {
        for (key, value) in entries {
            self.set(key, value).await?;
        }
        Ok(())
    }
}

/// TOML-file backed store.
pub struct FileConfigStore {
    path: PathBuf,
    // serializes read-modify-write cycles
    write_lock: tokio::sync::Mutex<()>,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_table(&self) -> Result<BTreeMap<String, String>, ConfigError> {
        if !tokio::fs::try_exists(&self.path).await? {
            debug!(
                "Configuration file {} does not exist yet",
                self.path.display()
            );
            return Ok(BTreeMap::new());
        }

        let content = tokio::fs::read_to_string(&self.path).await?;
        Ok(toml::from_str(&content)?)
    }

    async fn write_table(&self, table: &BTreeMap<String, String>) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !tokio::fs::try_exists(parent).await? {
                info!("Creating configuration directory {}", parent.display());
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = toml::to_string_pretty(table)?;

        // write next to the target and rename so readers never see a half-written table
        let tmp_path = self.path.with_extension("toml.tmp");
        tokio::fs::write(&tmp_path, content).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            warn!("Failed to move {} into place: {}", tmp_path.display(), e);
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        Ok(self.read_table().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        self.set_many(&[(key, value)]).await
    }

    async fn get_many(&self, keys: &[&str]) -> Result<Vec<Option<String>>, ConfigError> {
        let table = self.read_table().await?;
        Ok(keys.iter().map(|key| table.get(*key).cloned()).collect())
    }

    async fn set_many(&self, entries: &[(&str, &str)]) -> Result<(), ConfigError> {
        let _guard = self.write_lock.lock().await;

        let mut table = self.read_table().await?;
        for (key, value) in entries {
            table.insert((*key).to_string(), (*value).to_string());
        }
        self.write_table(&table).await?;

        debug!(
            "Wrote {} keys to {}",
            entries.len(),
            self.path.display()
        );
        Ok(())
    }
}

/// In-memory store with switchable write failures.
#[derive(Default)]
pub struct MemoryConfigStore {
    values: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let values = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            values: Mutex::new(values),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Makes every following `set` fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, ConfigError> {
        self.values
            .lock()
            .map_err(|e| ConfigError::Persist(format!("store lock poisoned: {}", e)))
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ConfigError::Persist(format!("write of {} rejected", key)));
        }
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{REGION_KEY, TOPIC_KEY};
    use tempfile::tempdir;

    #[tokio::test]
    async fn file_store_round_trips_a_group_write() {
        let dir = tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("nested").join("connection.toml"));

        assert_eq!(store.get(TOPIC_KEY).await.unwrap(), None);

        store
            .set_many(&[(REGION_KEY, "eu-north-1"), (TOPIC_KEY, "DHT11")])
            .await
            .unwrap();

        let values = store.get_many(&[TOPIC_KEY, REGION_KEY, "@missing"]).await.unwrap();
        assert_eq!(
            values,
            vec![
                Some("DHT11".to_string()),
                Some("eu-north-1".to_string()),
                None
            ]
        );
        assert!(!dir.path().join("nested").join("connection.toml.tmp").exists());
    }

    #[tokio::test]
    async fn file_store_keeps_unrelated_keys_on_update() {
        let dir = tempdir().unwrap();
        let store = FileConfigStore::new(dir.path().join("connection.toml"));

        store.set(REGION_KEY, "r1").await.unwrap();
        store.set(TOPIC_KEY, "t1").await.unwrap();
        store.set(REGION_KEY, "r2").await.unwrap();

        assert_eq!(store.get(REGION_KEY).await.unwrap().as_deref(), Some("r2"));
        assert_eq!(store.get(TOPIC_KEY).await.unwrap().as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn file_store_reports_corrupt_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("connection.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();

        let store = FileConfigStore::new(path);
        assert!(matches!(
            store.get(TOPIC_KEY).await,
            Err(ConfigError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn memory_store_can_reject_writes() {
        let store = MemoryConfigStore::new();
        store.set_fail_writes(true);
        assert!(matches!(
            store.set(TOPIC_KEY, "t1").await,
            Err(ConfigError::Persist(_))
        ));

        store.set_fail_writes(false);
        store.set(TOPIC_KEY, "t1").await.unwrap();
        assert_eq!(store.get(TOPIC_KEY).await.unwrap().as_deref(), Some("t1"));
    }
}
