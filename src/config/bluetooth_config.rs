use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{
    DEFAULT_ADAPTER, DEFAULT_ENUMERATION_TIMEOUT_SECS, DEFAULT_SCAN_DURATION_SECS,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Adapter name, e.g. `hci0`
    pub adapter: String,
    /// How long a scan runs before the device list is produced
    pub scan_duration_secs: u64,
    /// How long a connected device may take to report its service tree.
    /// `null` waits forever.
    pub enumeration_timeout_secs: Option<u64>,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            adapter: DEFAULT_ADAPTER.to_string(),
            scan_duration_secs: DEFAULT_SCAN_DURATION_SECS,
            enumeration_timeout_secs: Some(DEFAULT_ENUMERATION_TIMEOUT_SECS),
        }
    }
}
