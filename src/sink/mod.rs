//! Message sink the decoded sensor values are published to.

pub mod memory;
mod mqtt;

pub use mqtt::MqttPublisher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// MQTT QoS level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Qos {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for Qos {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            other => Err(format!("invalid QoS level {}, expected 0, 1 or 2", other)),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        qos as u8
    }
}

impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("Can not connect to MQTT broker {broker}: {reason}")]
    Connect { broker: String, reason: String },

    #[error("Timed out connecting to MQTT broker {broker}")]
    ConnectTimeout { broker: String },

    #[error("Not connected to the message sink")]
    NotConnected,

    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// Publish side of the message sink.
///
/// `publish` must not block: the bridge calls it from the dispatcher loop.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn connect(&self) -> Result<(), SinkError>;

    fn publish(&self, topic: &str, message: &str, qos: Qos) -> Result<(), SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_round_trips_through_u8() {
        assert_eq!(Qos::try_from(1u8), Ok(Qos::AtLeastOnce));
        assert_eq!(u8::from(Qos::ExactlyOnce), 2);
        assert!(Qos::try_from(3u8).is_err());
        assert_eq!(Qos::default(), Qos::AtMostOnce);
    }

    #[test]
    fn qos_deserializes_from_number() {
        let qos: Qos = serde_json::from_str("2").unwrap();
        assert_eq!(qos, Qos::ExactlyOnce);
        assert!(serde_json::from_str::<Qos>("7").is_err());
        assert_eq!(serde_json::to_string(&Qos::AtLeastOnce).unwrap(), "1");
    }
}
