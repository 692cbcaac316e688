//! Bluetooth device representation and address helpers

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::bluetooth::types::{DeviceAttributes, ObjectPath};

static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}$").expect("address pattern is valid")
});

static EMBEDDED_ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9A-Fa-f]{2}[:_-]){5}[0-9A-Fa-f]{2}").expect("address pattern is valid")
});

/// Represents a discovered Bluetooth device as listed after a scan
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DiscoveredDevice {
    /// Bus path of the device
    pub path: ObjectPath,
    /// Last-known attributes
    pub attributes: DeviceAttributes,
}

impl DiscoveredDevice {
    pub fn address(&self) -> Option<&str> {
        self.attributes.address.as_deref()
    }

    /// Address if known, else the bus path.
    pub fn label(&self) -> String {
        device_label(&self.path, &self.attributes)
    }
}

impl fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())?;
        if let Some(name) = &self.attributes.name {
            write!(f, " Device's name : {}", name)?;
        }
        Ok(())
    }
}

pub(crate) fn device_label(path: &ObjectPath, attributes: &DeviceAttributes) -> String {
    attributes
        .address
        .clone()
        .unwrap_or_else(|| path.to_string())
}

/// Validates an address like `aa-bb-cc-dd-ee-ff` and returns it as
/// `AA:BB:CC:DD:EE:FF`.
pub fn normalize_address(input: &str) -> Option<String> {
    let trimmed = input.trim();
    if !ADDRESS_RE.is_match(trimmed) {
        return None;
    }
    Some(trimmed.replace('-', ":").to_uppercase())
}

/// Pulls the last MAC address out of a platform-specific identifier string.
pub fn extract_mac_address(device_id_str: &str) -> Option<String> {
    EMBEDDED_ADDRESS_RE
        .find_iter(device_id_str)
        .last()
        .map(|m| m.as_str().replace(['-', '_'], ":").to_uppercase())
}

/// Bus path of the device with `address` on `adapter`,
/// e.g. `/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF`.
pub fn device_path(root: &str, adapter: &str, address: &str) -> Option<ObjectPath> {
    let address = normalize_address(address)?;
    Some(ObjectPath::new(format!(
        "{}/{}/dev_{}",
        root,
        adapter,
        address.replace(':', "_")
    )))
}
