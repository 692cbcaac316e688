pub mod bluetooth_config;
pub mod mqtt_config;
pub mod sensor_config;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::bluetooth_config::BluetoothConfig;
use crate::config::mqtt_config::MqttConfig;
use crate::config::sensor_config::SensorConfig;

pub const CONFIG_FILE_NAME: &str = "thingy_bridge.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bluetooth: BluetoothConfig,
    pub sensor: SensorConfig,
    pub mqtt: MqttConfig,
}

impl AppConfig {
    pub fn scan_duration(&self) -> Duration {
        Duration::from_secs(self.bluetooth.scan_duration_secs)
    }

    pub fn enumeration_timeout(&self) -> Option<Duration> {
        self.bluetooth.enumeration_timeout_secs.map(Duration::from_secs)
    }

    /// Loads the config from `path`, falling back to defaults when the file
    /// does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        let path_str = path.to_string_lossy().into_owned();

        if !path.exists() {
            warn!("Config file not found at {:?}, using default.", path_str);
            return Ok(Self::default());
        }

        let config_json = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path_str))?;
        let config: Self = serde_json::from_str(&config_json)
            .with_context(|| format!("Failed to parse config file {}", path_str))?;

        info!("Config loaded from {:?}", path_str);
        Ok(config)
    }

    /// Saves the config to `path`, creating parent directories as needed.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create config directory {:?}", dir))?;
        }
        let path_str = path.to_string_lossy().into_owned();

        let config_json = match serde_json::to_string_pretty(&self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(path, config_json).await?;
        info!("Config saved to {:?}.", path_str);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::constants::UUID_THINGY_TEMPERATURE_CHAR;
    use crate::core::bluetooth::matcher::CapabilityId;
    use crate::core::sensor::PayloadFormat;
    use crate::sink::Qos;

    #[tokio::test]
    async fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join(CONFIG_FILE_NAME)).await.unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.scan_duration(), Duration::from_secs(20));
        assert_eq!(config.mqtt.broker_addr(), "localhost:1883");
        assert_eq!(config.sensor.topic, "thingy52");
    }

    #[tokio::test]
    async fn partial_file_overrides_only_given_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(
            &path,
            r#"{
                "bluetooth": { "scan_duration_secs": 5, "enumeration_timeout_secs": null },
                "sensor": {
                    "characteristic_uuid": "EF680201-9B35-4933-9B10-52FFA9740042",
                    "qos": 1,
                    "payload_format": "json"
                },
                "mqtt": { "host": "broker.local" }
            }"#,
        )
        .await
        .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.bluetooth.adapter, "hci0");
        assert_eq!(config.scan_duration(), Duration::from_secs(5));
        assert_eq!(config.enumeration_timeout(), None);
        assert_eq!(
            config.sensor.characteristic_uuid,
            CapabilityId::from(UUID_THINGY_TEMPERATURE_CHAR)
        );
        assert_eq!(config.sensor.qos, Qos::AtLeastOnce);
        assert_eq!(config.sensor.payload_format, PayloadFormat::Json);
        assert_eq!(config.mqtt.host, "broker.local");
        assert_eq!(config.mqtt.port, 1883);
    }

    #[tokio::test]
    async fn invalid_uuid_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(&path, r#"{ "sensor": { "service_uuid": "weather" } }"#)
            .await
            .unwrap();
        assert!(AppConfig::load(&path).await.is_err());
    }

    #[tokio::test]
    async fn save_then_load_in_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE_NAME);
        let mut config = AppConfig::default();
        config.sensor.tags.insert("operator".into(), "lab".into());
        config.save(&path).await.unwrap();
        assert_eq!(AppConfig::load(&path).await.unwrap(), config);
    }
}
