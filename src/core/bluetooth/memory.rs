//! In-memory device bus.
//!
//! Scripted stand-in for a real adapter: devices to report as already
//! known, advertisements to emit when discovery starts, and the service
//! tree each device exposes once connected. Every call is recorded so
//! callers can check what the core asked the transport to do.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use log::debug;

use crate::core::bluetooth::bus::{BusError, DeviceBus};
use crate::core::bluetooth::events::EventHub;
use crate::core::bluetooth::types::{
    BusEvent, DeviceAttributes, Entity, EntityKind, ObjectPath, PropertyChanges,
};

/// A transport call, as recorded by [`MemoryBus::calls`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BusCall {
    ManagedObjects,
    StartDiscovery,
    StopDiscovery,
    Connect(ObjectPath),
    Disconnect(ObjectPath),
    DeviceAttributes(ObjectPath),
    StartNotify(ObjectPath),
    StopNotify(ObjectPath),
}

impl BusCall {
    /// Same call ignoring its path argument.
    fn same_kind(&self, other: &BusCall) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

#[derive(Default)]
struct MemoryState {
    known: Vec<(ObjectPath, Entity)>,
    advertisements: Vec<(ObjectPath, DeviceAttributes)>,
    /// Reported while discovery is being stopped.
    late_advertisements: Vec<(ObjectPath, DeviceAttributes)>,
    withdrawals: Vec<ObjectPath>,
    trees: HashMap<ObjectPath, Vec<(ObjectPath, Entity)>>,
    /// Devices that never report a resolved service tree.
    unresolved: HashSet<ObjectPath>,
    connected: HashSet<ObjectPath>,
    failures: Vec<(BusCall, BusError)>,
    calls: Vec<BusCall>,
}

pub struct MemoryBus {
    hub: EventHub,
    state: Mutex<MemoryState>,
}

impl MemoryBus {
    pub fn new(hub: EventHub) -> Self {
        Self {
            hub,
            state: Mutex::new(MemoryState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// An object reported by `managed_objects`.
    pub fn add_known(&self, path: ObjectPath, entity: Entity) {
        self.state().known.push((path, entity));
    }

    /// A device announced once discovery starts.
    pub fn advertise(&self, path: ObjectPath, attributes: DeviceAttributes) {
        self.state().advertisements.push((path, attributes));
    }

    /// A device the adapter reports while discovery is being stopped,
    /// after the scan window has already closed.
    pub fn advertise_on_stop(&self, path: ObjectPath, attributes: DeviceAttributes) {
        self.state().late_advertisements.push((path, attributes));
    }

    /// A device reported gone right after the advertisements.
    pub fn withdraw(&self, path: ObjectPath) {
        self.state().withdrawals.push(path);
    }

    /// Objects announced, in order, after `device` connects. The device
    /// then reports a resolved service tree.
    pub fn set_tree(&self, device: ObjectPath, entities: Vec<(ObjectPath, Entity)>) {
        self.state().trees.insert(device, entities);
    }

    /// `device` connects but never reports a resolved service tree.
    pub fn never_resolve(&self, device: ObjectPath) {
        self.state().unresolved.insert(device);
    }

    /// The next call of the same kind as `call` fails with `error`.
    pub fn fail_next(&self, call: BusCall, error: BusError) {
        self.state().failures.push((call, error));
    }

    pub fn calls(&self) -> Vec<BusCall> {
        self.state().calls.clone()
    }

    /// Pushes an arbitrary event into the hub, as a transport signal would.
    pub fn emit(&self, event: BusEvent) {
        self.hub.emit(event);
    }

    /// Emits a characteristic value notification.
    pub fn notify_value(&self, characteristic: &ObjectPath, value: &[u8]) {
        self.emit(BusEvent::PropertiesChanged {
            path: characteristic.clone(),
            changes: PropertyChanges::value(value),
        });
    }

    fn record(&self, call: BusCall) -> Result<(), BusError> {
        let mut state = self.state();
        state.calls.push(call.clone());
        match state.failures.iter().position(|(c, _)| c.same_kind(&call)) {
            Some(index) => Err(state.failures.remove(index).1),
            None => Ok(()),
        }
    }

    fn attributes_of(&self, device: &ObjectPath) -> Option<DeviceAttributes> {
        let state = self.state();
        let known = state.known.iter().find_map(|(path, entity)| match entity {
            Entity::Device(attributes) if path == device => Some(attributes.clone()),
            _ => None,
        });
        let advertised = state
            .advertisements
            .iter()
            .chain(state.late_advertisements.iter())
            .find(|(path, _)| path == device)
            .map(|(_, attributes)| attributes.clone());
        let mut attributes = match (known, advertised) {
            (None, None) => return None,
            (Some(mut known), Some(advertised)) => {
                known.merge(&advertised);
                known
            }
            (known, advertised) => known.or(advertised).unwrap_or_default(),
        };
        attributes.connected = Some(state.connected.contains(device));
        Some(attributes)
    }
}

#[async_trait]
impl DeviceBus for MemoryBus {
    async fn managed_objects(&self) -> Result<Vec<(ObjectPath, Entity)>, BusError> {
        self.record(BusCall::ManagedObjects)?;
        Ok(self.state().known.clone())
    }

    async fn start_discovery(&self) -> Result<(), BusError> {
        self.record(BusCall::StartDiscovery)?;
        let (advertisements, withdrawals) = {
            let state = self.state();
            (state.advertisements.clone(), state.withdrawals.clone())
        };
        for (path, attributes) in advertisements {
            self.emit(BusEvent::EntityAdded {
                path,
                entity: Entity::Device(attributes),
            });
        }
        for path in withdrawals {
            self.emit(BusEvent::EntityRemoved {
                path,
                kinds: vec![EntityKind::Device],
            });
        }
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), BusError> {
        self.record(BusCall::StopDiscovery)?;
        let late = self.state().late_advertisements.clone();
        for (path, attributes) in late {
            self.emit(BusEvent::EntityAdded {
                path,
                entity: Entity::Device(attributes),
            });
        }
        Ok(())
    }

    async fn connect(&self, device: &ObjectPath) -> Result<(), BusError> {
        self.record(BusCall::Connect(device.clone()))?;
        if self.attributes_of(device).is_none() {
            return Err(BusError::unknown_object(device));
        }

        let (tree, resolve) = {
            let mut state = self.state();
            state.connected.insert(device.clone());
            (
                state.trees.get(device).cloned().unwrap_or_default(),
                !state.unresolved.contains(device),
            )
        };
        debug!("Memory bus connected {} ({} objects)", device, tree.len());

        self.emit(BusEvent::PropertiesChanged {
            path: device.clone(),
            changes: PropertyChanges::connected(true),
        });
        for (path, entity) in tree {
            self.emit(BusEvent::EntityAdded { path, entity });
        }
        if resolve {
            self.emit(BusEvent::PropertiesChanged {
                path: device.clone(),
                changes: PropertyChanges::services_resolved(true),
            });
        }
        Ok(())
    }

    async fn disconnect(&self, device: &ObjectPath) -> Result<(), BusError> {
        self.record(BusCall::Disconnect(device.clone()))?;
        let was_connected = self.state().connected.remove(device);
        if was_connected {
            self.emit(BusEvent::PropertiesChanged {
                path: device.clone(),
                changes: PropertyChanges::connected(false),
            });
        }
        Ok(())
    }

    async fn device_attributes(&self, device: &ObjectPath) -> Result<DeviceAttributes, BusError> {
        self.record(BusCall::DeviceAttributes(device.clone()))?;
        self.attributes_of(device)
            .ok_or_else(|| BusError::unknown_object(device))
    }

    async fn start_notify(&self, characteristic: &ObjectPath) -> Result<(), BusError> {
        self.record(BusCall::StartNotify(characteristic.clone()))?;
        let exists = self.state().trees.values().flatten().any(|(path, entity)| {
            path == characteristic && entity.kind() == EntityKind::Characteristic
        });
        if exists {
            Ok(())
        } else {
            Err(BusError::unknown_object(characteristic))
        }
    }

    async fn stop_notify(&self, characteristic: &ObjectPath) -> Result<(), BusError> {
        self.record(BusCall::StopNotify(characteristic.clone()))
    }
}
