use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{
    DEFAULT_MEASUREMENT, DEFAULT_TOPIC, UUID_THINGY_TEMPERATURE_CHAR, UUID_THINGY_WEATHER_SERVICE,
};
use crate::core::bluetooth::matcher::CapabilityId;
use crate::core::sensor::PayloadFormat;
use crate::sink::Qos;

/// What to look for on the peripheral and where to publish its values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Service that must be present on the device
    pub service_uuid: CapabilityId,
    /// Characteristic, inside that service, whose notifications are streamed
    pub characteristic_uuid: CapabilityId,
    pub topic: String,
    pub qos: Qos,
    pub payload_format: PayloadFormat,
    /// Measurement name for the JSON payload format
    pub measurement: String,
    /// Extra tags for the JSON payload format
    pub tags: BTreeMap<String, String>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            service_uuid: CapabilityId::from(UUID_THINGY_WEATHER_SERVICE),
            characteristic_uuid: CapabilityId::from(UUID_THINGY_TEMPERATURE_CHAR),
            topic: DEFAULT_TOPIC.to_string(),
            qos: Qos::AtMostOnce,
            payload_format: PayloadFormat::Text,
            measurement: DEFAULT_MEASUREMENT.to_string(),
            tags: BTreeMap::new(),
        }
    }
}
