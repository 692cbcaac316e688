use serde::{Deserialize, Serialize};

/// MQTT broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker host name or address.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Client ID. A process-specific ID is generated when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Keep-alive interval in seconds.
    pub keep_alive_secs: u64,
    /// How long `connect` waits for the broker's CONNACK.
    pub connect_timeout_secs: u64,
    /// Publishes that may be queued before `publish` starts failing.
    pub request_capacity: usize,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: None,
            username: None,
            password: None,
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
            request_capacity: 10,
        }
    }
}

impl MqttConfig {
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
