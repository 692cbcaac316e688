//! Defines shared data structures for the Bluetooth module.

use std::fmt;

use crate::core::bluetooth::matcher::CapabilityId;

/// Path of an object on the device bus, e.g. `/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(transparent)]
pub struct ObjectPath(String);

impl ObjectPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path of a child object, `self/segment`.
    pub fn child(&self, segment: &str) -> Self {
        Self(format!("{}/{}", self.0, segment))
    }

    /// True if `self` lies strictly below `ancestor` in the object tree.
    pub fn is_descendant_of(&self, ancestor: &ObjectPath) -> bool {
        self.0.len() > ancestor.0.len()
            && self.0.starts_with(&ancestor.0)
            && self.0.as_bytes()[ancestor.0.len()] == b'/'
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

/// Last-known attributes of a peripheral. Absent fields were not reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct DeviceAttributes {
    /// The address of the device (MAC address on most platforms)
    pub address: Option<String>,
    /// The advertised name of the device, if available
    pub name: Option<String>,
    /// The signal strength (RSSI) of the device
    pub rssi: Option<i16>,
    /// Whether the device is connected
    pub connected: Option<bool>,
}

impl DeviceAttributes {
    /// Overwrites every field present in `update`, keeping the others.
    /// Returns whether anything changed.
    pub fn merge(&mut self, update: &DeviceAttributes) -> bool {
        let before = self.clone();
        if let Some(address) = &update.address {
            self.address = Some(address.clone());
        }
        if let Some(name) = &update.name {
            self.name = Some(name.clone());
        }
        if let Some(rssi) = update.rssi {
            self.rssi = Some(rssi);
        }
        if let Some(connected) = update.connected {
            self.connected = Some(connected);
        }
        *self != before
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Device,
    Service,
    Characteristic,
    Descriptor,
}

/// An object that appeared on the bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Device(DeviceAttributes),
    Service {
        uuid: CapabilityId,
    },
    Characteristic {
        uuid: CapabilityId,
        /// Flag strings such as `read` or `notify`. Informational only.
        flags: Vec<String>,
    },
    Descriptor {
        uuid: CapabilityId,
    },
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Device(_) => EntityKind::Device,
            Self::Service { .. } => EntityKind::Service,
            Self::Characteristic { .. } => EntityKind::Characteristic,
            Self::Descriptor { .. } => EntityKind::Descriptor,
        }
    }
}

/// Properties reported in a single change notification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyChanges {
    /// The peripheral finished advertising its full service tree.
    pub services_resolved: Option<bool>,
    pub connected: Option<bool>,
    pub rssi: Option<i16>,
    pub name: Option<String>,
    /// Characteristic value pushed by a notification.
    pub value: Option<Vec<u8>>,
}

impl PropertyChanges {
    pub fn services_resolved(resolved: bool) -> Self {
        Self {
            services_resolved: Some(resolved),
            ..Self::default()
        }
    }

    pub fn connected(connected: bool) -> Self {
        Self {
            connected: Some(connected),
            ..Self::default()
        }
    }

    pub fn value(value: impl Into<Vec<u8>>) -> Self {
        Self {
            value: Some(value.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    EntityAdded {
        path: ObjectPath,
        entity: Entity,
    },
    EntityRemoved {
        path: ObjectPath,
        kinds: Vec<EntityKind>,
    },
    PropertiesChanged {
        path: ObjectPath,
        changes: PropertyChanges,
    },
}

impl BusEvent {
    pub fn path(&self) -> &ObjectPath {
        match self {
            Self::EntityAdded { path, .. }
            | Self::EntityRemoved { path, .. }
            | Self::PropertiesChanged { path, .. } => path,
        }
    }
}

/// One-shot timers that share the dispatcher queue with bus events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    ScanWindow,
    Enumeration,
}

/// Identifies one armed timer; ids are never reused by a hub.
pub type TimerId = u64;

/// Everything the dispatcher loop consumes.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    Bus(BusEvent),
    Timer(TimerKind, TimerId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descendant_requires_separator() {
        let device = ObjectPath::new("/org/bluez/hci0/dev_AA");
        assert!(ObjectPath::new("/org/bluez/hci0/dev_AA/service000c").is_descendant_of(&device));
        assert!(!ObjectPath::new("/org/bluez/hci0/dev_AAB/service000c").is_descendant_of(&device));
        assert!(!device.is_descendant_of(&device));
    }

    #[test]
    fn merge_preserves_absent_fields() {
        let mut attrs = DeviceAttributes {
            address: Some("AA:BB:CC:DD:EE:FF".into()),
            name: Some("Thingy".into()),
            rssi: Some(-60),
            connected: None,
        };
        let changed = attrs.merge(&DeviceAttributes {
            rssi: Some(-48),
            ..DeviceAttributes::default()
        });
        assert!(changed);
        assert_eq!(attrs.name.as_deref(), Some("Thingy"));
        assert_eq!(attrs.rssi, Some(-48));
        assert!(!attrs.merge(&DeviceAttributes::default()));
    }
}
