//! Runtime settings for the dashboard binary.
//!
//! Read from `settings.toml` in the configuration directory. Every field has a default,
//! so a missing file or a partial file is fine.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{warn, Level};

const CONFIG_DIR: &str = ".config/sensorboard";
const CONFIG_DIR_ENV: &str = "SENSORBOARD_CONFIG_DIR";
pub const SETTINGS_FILE: &str = "settings.toml";
pub const CONNECTION_FILE: &str = "connection.toml";

// rumqttc rejects keep-alive intervals below this
const MIN_KEEP_ALIVE_SECS: u64 = 5;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct DashboardSettings {
    /// Prefix of the MQTT client id; a per-connection suffix is appended
    pub client_id: String,
    /// Broker port used when the endpoint does not carry one
    pub port: u16,
    pub keep_alive_secs: u64,
    /// Upper bound for connect + subscribe; `0` waits forever
    pub connect_timeout_secs: u64,
    /// Buffered stream events per subscription
    pub channel_capacity: usize,
    pub log_level: String,
    pub use_tls: bool,
    /// PEM file with the broker's root CA; platform roots are used when unset
    pub ca_cert: Option<PathBuf>,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        Self {
            client_id: "sensorboard".to_string(),
            port: 8883,
            keep_alive_secs: 30,
            connect_timeout_secs: 15,
            channel_capacity: 100,
            log_level: "info".to_string(),
            use_tls: true,
            ca_cert: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl DashboardSettings {
    /// Loads `settings.toml` from `dir`, falling back to defaults when it is absent.
    pub fn load_from(dir: &Path) -> Result<Self, SettingsError> {
        let path = dir.join(SETTINGS_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| SettingsError::Io {
            path: path.clone(),
            source,
        })?;
        let settings: Self =
            toml::from_str(&content).map_err(|source| SettingsError::Parse { path, source })?;
        Ok(settings.sanitized())
    }

    fn sanitized(mut self) -> Self {
        if self.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            warn!(
                "keep_alive_secs {} is below {}, using {}",
                self.keep_alive_secs, MIN_KEEP_ALIVE_SECS, MIN_KEEP_ALIVE_SECS
            );
            self.keep_alive_secs = MIN_KEEP_ALIVE_SECS;
        }
        if self.channel_capacity == 0 {
            warn!("channel_capacity must be positive, using 1");
            self.channel_capacity = 1;
        }
        self
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        match self.connect_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Maximum tracing level; unknown names fall back to INFO.
    pub fn log_level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }
}

/// Directory holding `settings.toml` and `connection.toml`.
///
/// `SENSORBOARD_CONFIG_DIR` wins over `~/.config/sensorboard`.
pub fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return PathBuf::from(dir);
    }
    let mut path = get_home_dir();
    path.push(CONFIG_DIR);
    path
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}
