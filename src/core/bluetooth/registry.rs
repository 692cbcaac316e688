//! In-memory cache of the devices seen during discovery.

use std::collections::HashMap;

use log::info;

use crate::core::bluetooth::device::{device_label, DiscoveredDevice};
use crate::core::bluetooth::types::{DeviceAttributes, ObjectPath};

/// Maps device paths to their last-known attributes, remembering the
/// order in which devices were first seen.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    order: Vec<ObjectPath>,
    entries: HashMap<ObjectPath, DeviceAttributes>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `path` or merges `attributes` into its entry.
    /// Returns whether the cache changed.
    pub fn upsert(&mut self, path: &ObjectPath, attributes: &DeviceAttributes) -> bool {
        match self.entries.get_mut(path) {
            Some(existing) => {
                let changed = existing.merge(attributes);
                if changed {
                    info!("UPD {} : {:?}", device_label(path, existing), existing);
                }
                changed
            }
            None => {
                info!("NEW path : {}", path);
                if let Some(address) = &attributes.address {
                    info!("NEW bdaddr : {}", address);
                }
                if let Some(name) = &attributes.name {
                    info!("NEW name : {}", name);
                }
                if let Some(rssi) = attributes.rssi {
                    info!("NEW RSSI : {}", rssi);
                }
                self.order.push(path.clone());
                self.entries.insert(path.clone(), attributes.clone());
                true
            }
        }
    }

    /// Records devices the bus already knew about before scanning.
    pub fn seed(&mut self, known: impl IntoIterator<Item = (ObjectPath, DeviceAttributes)>) -> usize {
        let mut count = 0;
        for (path, attributes) in known {
            info!("EXI path : {}", path);
            if let Some(address) = &attributes.address {
                info!("EXI bdaddr : {}", address);
            }
            match self.entries.get_mut(&path) {
                Some(existing) => {
                    existing.merge(&attributes);
                }
                None => {
                    self.order.push(path.clone());
                    self.entries.insert(path, attributes);
                }
            }
            count += 1;
        }
        count
    }

    /// Drops `path`. Removing an unknown path is a no-op.
    pub fn remove(&mut self, path: &ObjectPath) -> bool {
        match self.entries.remove(path) {
            Some(attributes) => {
                self.order.retain(|p| p != path);
                match &attributes.address {
                    Some(address) => info!("DEL bdaddr : {}", address),
                    None => info!("DEL path : {}", path),
                }
                true
            }
            None => false,
        }
    }

    pub fn find_by_address(&self, address: &str) -> Option<DiscoveredDevice> {
        self.order.iter().find_map(|path| {
            let attributes = self.entries.get(path)?;
            let known = attributes.address.as_deref()?;
            known.eq_ignore_ascii_case(address).then(|| DiscoveredDevice {
                path: path.clone(),
                attributes: attributes.clone(),
            })
        })
    }

    /// Snapshot in first-seen order.
    pub fn list(&self) -> Vec<DiscoveredDevice> {
        self.order
            .iter()
            .filter_map(|path| {
                self.entries.get(path).map(|attributes| DiscoveredDevice {
                    path: path.clone(),
                    attributes: attributes.clone(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
