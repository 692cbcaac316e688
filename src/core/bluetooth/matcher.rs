//! Capability identifiers and the comparison used to pick out the
//! service and characteristic we stream from.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

use crate::core::bluetooth::constants::*;

/// A 128-bit service/characteristic/descriptor type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CapabilityId(Uuid);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid capability identifier {input:?}")]
pub struct ParseCapabilityError {
    pub input: String,
}

impl CapabilityId {
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Expands a 16-bit assigned number onto the Bluetooth base UUID.
    pub const fn from_short(short: u16) -> Self {
        Self::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for CapabilityId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for CapabilityId {
    type Err = ParseCapabilityError;

    /// Accepts any textual UUID form (hyphenated, simple, braced, urn) in
    /// either case, plus 4-digit short forms like `2a19`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let err = || ParseCapabilityError {
            input: s.to_string(),
        };
        if trimmed.len() == 4 {
            return u16::from_str_radix(trimmed, 16)
                .map(Self::from_short)
                .map_err(|_| err());
        }
        Uuid::parse_str(trimmed).map(Self).map_err(|_| err())
    }
}

impl TryFrom<String> for CapabilityId {
    type Error = ParseCapabilityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CapabilityId> for String {
    fn from(id: CapabilityId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Exact identifier comparison. Textual case and encoding were already
/// normalised away when the identifiers were parsed.
pub fn matches(observed: &CapabilityId, target: &CapabilityId) -> bool {
    observed == target
}

/// Renders characteristic flags for display, e.g. `read,notify`.
pub fn render_flags(flags: &[String]) -> String {
    flags.join(",")
}

const WELL_KNOWN_NAMES: &[(Uuid, &str)] = &[
    (UUID_GENERIC_ACCESS_SERVICE, "Generic Access"),
    (UUID_GENERIC_ATTRIBUTE_SERVICE, "Generic Attribute"),
    (UUID_DEVICE_INFORMATION_SERVICE, "Device Information"),
    (UUID_BATTERY_SERVICE, "Battery Service"),
    (UUID_DEVICE_NAME, "Device Name"),
    (UUID_APPEARANCE, "Appearance"),
    (UUID_SERVICE_CHANGED, "Service Changed"),
    (UUID_BATTERY_LEVEL, "Battery Level"),
    (UUID_MODEL_NUMBER, "Model Number String"),
    (UUID_FIRMWARE_REVISION, "Firmware Revision String"),
    (UUID_MANUFACTURER_NAME, "Manufacturer Name String"),
    (UUID_CHARACTERISTIC_USER_DESCRIPTION, "Characteristic User Description"),
    (UUID_CLIENT_CHARACTERISTIC_CONFIG, "Client Characteristic Configuration"),
    (UUID_THINGY_CONFIGURATION_SERVICE, "Thingy Configuration Service"),
    (UUID_THINGY_WEATHER_SERVICE, "Thingy Weather Service"),
    (UUID_THINGY_TEMPERATURE_CHAR, "Thingy Temperature"),
    (UUID_THINGY_PRESSURE_CHAR, "Thingy Pressure"),
    (UUID_THINGY_HUMIDITY_CHAR, "Thingy Humidity"),
    (UUID_THINGY_MOTION_SERVICE, "Thingy Motion Service"),
];

/// Human readable name for well-known identifiers.
pub fn name_for_uuid(id: &CapabilityId) -> &'static str {
    WELL_KNOWN_NAMES
        .iter()
        .find(|(uuid, _)| *uuid == id.uuid())
        .map(|(_, name)| *name)
        .unwrap_or("Unknown")
}
