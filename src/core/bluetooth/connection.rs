//! Bluetooth connection handling
//! Maps an operator-chosen address to a device path, connects to it and
//! reports what the device says about itself.

use std::sync::Arc;

use log::{error, info, warn};

use crate::core::bluetooth::bus::DeviceBus;
use crate::core::bluetooth::device::{device_path, normalize_address};
use crate::core::bluetooth::types::{DeviceAttributes, ObjectPath};
use crate::error::SessionError;

/// Connection manager for the selected device
#[derive(Clone)]
pub struct ConnectionManager {
    bus: Arc<dyn DeviceBus>,
    root: String,
    adapter: String,
}

impl ConnectionManager {
    pub fn new(bus: Arc<dyn DeviceBus>, root: impl Into<String>, adapter: impl Into<String>) -> Self {
        Self {
            bus,
            root: root.into(),
            adapter: adapter.into(),
        }
    }

    /// Bus path of the device with `address` on our adapter.
    pub fn resolve_path(&self, address: &str) -> Result<ObjectPath, SessionError> {
        let normalized =
            normalize_address(address).ok_or_else(|| SessionError::InvalidAddress(address.to_string()))?;
        device_path(&self.root, &self.adapter, &normalized)
            .ok_or(SessionError::InvalidAddress(normalized))
    }

    pub async fn connect(&self, device: &ObjectPath) -> Result<(), SessionError> {
        info!("Connecting to {}....", device);
        match self.bus.connect(device).await {
            Ok(()) => {
                info!("Connected OK");
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect");
                error!("{}", e.code);
                error!("{}", e.message);
                if e.is_unknown_object() {
                    warn!("Try scanning first to resolve this problem");
                    return Err(SessionError::UnknownDevice {
                        device: device.clone(),
                        source: e,
                    });
                }
                Err(SessionError::ConnectFailed {
                    device: device.clone(),
                    source: e,
                })
            }
        }
    }

    /// Logs the connected device's general information.
    pub async fn device_info(&self, device: &ObjectPath) -> Option<DeviceAttributes> {
        match self.bus.device_attributes(device).await {
            Ok(attributes) => {
                info!("Connected Bluetooth device general information:");
                info!("Device name: {}", attributes.name.as_deref().unwrap_or("Unknown"));
                info!("Device address: {}", attributes.address.as_deref().unwrap_or("Unknown"));
                let status = if attributes.connected == Some(true) {
                    "Successful connection"
                } else {
                    "Failed connection"
                };
                info!("Device status: {}", status);
                Some(attributes)
            }
            Err(e) => {
                warn!("Failed to read device information for {}: {}", device, e);
                None
            }
        }
    }

    pub async fn disconnect(&self, device: &ObjectPath) -> bool {
        match self.bus.disconnect(device).await {
            Ok(()) => {
                info!("Disconnected OK");
                true
            }
            Err(e) => {
                error!("Failed to disconnect");
                error!("{}", e.code);
                error!("{}", e.message);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bluetooth::bus::BusError;
    use crate::core::bluetooth::constants::{BLUEZ_ROOT, DEFAULT_ADAPTER};
    use crate::core::bluetooth::events::EventHub;
    use crate::core::bluetooth::memory::{BusCall, MemoryBus};
    use crate::core::bluetooth::types::Entity;

    fn manager() -> (Arc<MemoryBus>, ConnectionManager) {
        let (hub, _events) = EventHub::new();
        let bus = Arc::new(MemoryBus::new(hub));
        let manager = ConnectionManager::new(bus.clone(), BLUEZ_ROOT, DEFAULT_ADAPTER);
        (bus, manager)
    }

    #[test]
    fn resolves_and_validates_addresses() {
        let (_bus, manager) = manager();
        assert_eq!(
            manager.resolve_path("aa:bb:cc:dd:ee:ff").unwrap().as_str(),
            "/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF"
        );
        assert!(matches!(
            manager.resolve_path("thingy"),
            Err(SessionError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn unknown_device_hints_at_scanning() {
        let (_bus, manager) = manager();
        let path = manager.resolve_path("AA:BB:CC:DD:EE:FF").unwrap();
        assert!(matches!(
            manager.connect(&path).await,
            Err(SessionError::UnknownDevice { .. })
        ));
    }

    #[tokio::test]
    async fn rejected_connect_is_connect_failed() {
        let (bus, manager) = manager();
        let path = manager.resolve_path("AA:BB:CC:DD:EE:FF").unwrap();
        bus.add_known(path.clone(), Entity::Device(DeviceAttributes::default()));
        bus.fail_next(
            BusCall::Connect(path.clone()),
            BusError::new("org.bluez.Error.Failed", "le-connection-abort-by-local"),
        );
        assert!(matches!(
            manager.connect(&path).await,
            Err(SessionError::ConnectFailed { .. })
        ));
    }

    #[tokio::test]
    async fn reports_device_info_after_connect() {
        let (bus, manager) = manager();
        let path = manager.resolve_path("AA:BB:CC:DD:EE:FF").unwrap();
        bus.add_known(
            path.clone(),
            Entity::Device(DeviceAttributes {
                address: Some("AA:BB:CC:DD:EE:FF".into()),
                name: Some("Thingy".into()),
                ..DeviceAttributes::default()
            }),
        );
        manager.connect(&path).await.unwrap();
        let info = manager.device_info(&path).await.unwrap();
        assert_eq!(info.name.as_deref(), Some("Thingy"));
        assert_eq!(info.connected, Some(true));

        assert!(manager.disconnect(&path).await);
        assert_eq!(manager.device_info(&path).await.unwrap().connected, Some(false));
    }
}
