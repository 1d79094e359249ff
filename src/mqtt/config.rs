use super::transport::TransportError;
use crate::config::{DashboardSettings, SettingsError};
use std::time::Duration;

const SCHEMES: &[&str] = &["wss://", "ws://", "ssl://", "mqtts://", "tcp://", "mqtt://"];

/// Connection options for [`super::mqtt_handler::MqttTransport`].
#[derive(Clone, Debug, PartialEq)]
pub struct MqttSettings {
    pub client_id: String,
    pub default_port: u16,
    pub keep_alive: Duration,
    pub use_tls: bool,
    /// PEM encoded root CA; platform roots when `None`
    pub ca_cert: Option<Vec<u8>>,
    pub channel_capacity: usize,
}

impl Default for MqttSettings {
    fn default() -> Self {
        let defaults = DashboardSettings::default();
        Self {
            client_id: defaults.client_id,
            default_port: defaults.port,
            keep_alive: Duration::from_secs(defaults.keep_alive_secs),
            use_tls: defaults.use_tls,
            ca_cert: None,
            channel_capacity: defaults.channel_capacity,
        }
    }
}

impl MqttSettings {
    /// Builds transport options, reading the CA file if one is configured.
    pub async fn from_dashboard(settings: &DashboardSettings) -> Result<Self, SettingsError> {
        let ca_cert = match &settings.ca_cert {
            Some(path) => Some(tokio::fs::read(path).await.map_err(|source| {
                SettingsError::Io {
                    path: path.clone(),
                    source,
                }
            })?),
            None => None,
        };

        Ok(Self {
            client_id: settings.client_id.clone(),
            default_port: settings.port,
            keep_alive: Duration::from_secs(settings.keep_alive_secs),
            use_tls: settings.use_tls,
            ca_cert,
            channel_capacity: settings.channel_capacity,
        })
    }
}

/// Host and port the MQTT client dials.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerAddress {
    pub host: String,
    pub port: u16,
}

impl BrokerAddress {
    /// Normalizes a user supplied endpoint.
    ///
    /// Strips a URL scheme and path, honours an explicit port and expands a bare
    /// endpoint prefix such as `a1b2c3-ats` to `a1b2c3-ats.iot.<region>.amazonaws.com`.
    pub fn resolve(region: &str, endpoint: &str, default_port: u16) -> Result<Self, TransportError> {
        let trimmed = endpoint.trim();
        let without_scheme = SCHEMES
            .iter()
            .find_map(|scheme| trimmed.strip_prefix(scheme))
            .unwrap_or(trimmed);
        let authority = without_scheme
            .split('/')
            .next()
            .unwrap_or_default();

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| TransportError::InvalidEndpoint(endpoint.to_string()))?;
                (host, port)
            }
            None => (authority, default_port),
        };

        if host.is_empty() {
            return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
        }

        let host = if host.contains('.') || host == "localhost" {
            host.to_string()
        } else {
            let region = region.trim();
            if region.is_empty() {
                return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
            }
            format!("{}.iot.{}.amazonaws.com", host, region)
        };

        Ok(Self { host, port })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_host_is_kept() {
        let address =
            BrokerAddress::resolve("eu-north-1", "abc-ats.iot.eu-north-1.amazonaws.com", 8883)
                .unwrap();
        assert_eq!(address.host, "abc-ats.iot.eu-north-1.amazonaws.com");
        assert_eq!(address.port, 8883);
    }

    #[test]
    fn bare_prefix_expands_with_region() {
        let address = BrokerAddress::resolve("eu-north-1", "abc-ats", 8883).unwrap();
        assert_eq!(address.host, "abc-ats.iot.eu-north-1.amazonaws.com");
    }

    #[test]
    fn scheme_path_and_port_are_handled() {
        let address =
            BrokerAddress::resolve("r1", "wss://broker.example.com:443/mqtt", 8883).unwrap();
        assert_eq!(
            address,
            BrokerAddress {
                host: "broker.example.com".to_string(),
                port: 443
            }
        );

        let address = BrokerAddress::resolve("r1", "mqtt://localhost:1883", 8883).unwrap();
        assert_eq!(address.host, "localhost");
        assert_eq!(address.port, 1883);
    }

    #[test]
    fn unusable_endpoints_are_rejected() {
        for endpoint in ["", "wss://", "host.example.com:port", ":1883"] {
            assert!(
                matches!(
                    BrokerAddress::resolve("r1", endpoint, 8883),
                    Err(TransportError::InvalidEndpoint(_))
                ),
                "{:?} should be rejected",
                endpoint
            );
        }
        assert!(BrokerAddress::resolve("", "abc-ats", 8883).is_err());
    }
}
