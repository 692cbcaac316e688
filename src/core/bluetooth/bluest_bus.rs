//! Device bus backed by the `bluest` crate.
//!
//! bluest hands out device and GATT handles rather than bus objects, so
//! this transport names them with BlueZ style paths
//! (`/org/bluez/hci0/dev_AA_BB_CC_DD_EE_FF/service0000/char0001`) and turns
//! scan results, service discovery and notification streams into
//! [`BusEvent`]s on the hub.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device};
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::bus::{BusError, DeviceBus, ERROR_NOT_READY};
use crate::core::bluetooth::device::extract_mac_address;
use crate::core::bluetooth::events::EventHub;
use crate::core::bluetooth::matcher::CapabilityId;
use crate::core::bluetooth::types::{BusEvent, DeviceAttributes, Entity, ObjectPath, PropertyChanges};

fn bus_error(e: bluest::Error) -> BusError {
    BusError::new(format!("bluest.Error.{:?}", e.kind()), e.to_string())
}

#[derive(Default)]
struct Handles {
    devices: HashMap<ObjectPath, Device>,
    characteristics: HashMap<ObjectPath, Characteristic>,
    scan: Option<CancellationToken>,
    notifications: HashMap<ObjectPath, CancellationToken>,
}

type SharedHandles = Arc<Mutex<Handles>>;

fn lock(handles: &SharedHandles) -> MutexGuard<'_, Handles> {
    handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct BluestBus {
    adapter: Adapter,
    adapter_path: ObjectPath,
    hub: EventHub,
    handles: SharedHandles,
}

impl BluestBus {
    /// Opens the default adapter and waits for it to become available.
    pub async fn new(hub: EventHub, root: &str, adapter_name: &str) -> Result<Self, BusError> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| BusError::new(ERROR_NOT_READY, "No Bluetooth adapter found"))?;
        adapter.wait_available().await.map_err(bus_error)?;
        info!("Bluetooth adapter is available.");
        Ok(Self {
            adapter,
            adapter_path: ObjectPath::new(format!("{}/{}", root, adapter_name)),
            hub,
            handles: Arc::new(Mutex::new(Handles::default())),
        })
    }

    /// Path and address for a bluest device. Platforms that hide the MAC
    /// address get a path derived from their opaque device id.
    fn path_for(adapter_path: &ObjectPath, device: &Device) -> (ObjectPath, Option<String>) {
        let id = device.id().to_string();
        match extract_mac_address(&id) {
            Some(address) => (
                adapter_path.child(&format!("dev_{}", address.replace(':', "_"))),
                Some(address),
            ),
            None => {
                let sanitized: String = id
                    .chars()
                    .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                    .collect();
                (adapter_path.child(&format!("dev_{}", sanitized)), None)
            }
        }
    }

    fn device(&self, path: &ObjectPath) -> Result<Device, BusError> {
        lock(&self.handles)
            .devices
            .get(path)
            .cloned()
            .ok_or_else(|| BusError::unknown_object(path))
    }

    async fn characteristic_flags(path: &ObjectPath, characteristic: &Characteristic) -> Vec<String> {
        match characteristic.properties().await {
            Ok(props) => [
                (props.read, "read"),
                (props.write, "write"),
                (props.write_without_response, "write-without-response"),
                (props.notify, "notify"),
                (props.indicate, "indicate"),
            ]
            .into_iter()
            .filter(|(set, _)| *set)
            .map(|(_, flag)| flag.to_string())
            .collect(),
            Err(e) => {
                debug!("No properties for {}: {}", path, e);
                Vec::new()
            }
        }
    }

    /// Announces every service, characteristic and descriptor of a freshly
    /// connected device, then reports the tree as resolved.
    async fn enumerate(&self, path: &ObjectPath, device: &Device) -> Result<(), BusError> {
        let services = device.discover_services().await.map_err(bus_error)?;
        for (s, service) in services.iter().enumerate() {
            let service_path = path.child(&format!("service{:04x}", s));
            self.hub.emit(BusEvent::EntityAdded {
                path: service_path.clone(),
                entity: Entity::Service {
                    uuid: CapabilityId::from(service.uuid()),
                },
            });

            let characteristics = service.discover_characteristics().await.map_err(bus_error)?;
            for (c, characteristic) in characteristics.into_iter().enumerate() {
                let char_path = service_path.child(&format!("char{:04x}", c));
                let flags = Self::characteristic_flags(&char_path, &characteristic).await;
                self.hub.emit(BusEvent::EntityAdded {
                    path: char_path.clone(),
                    entity: Entity::Characteristic {
                        uuid: CapabilityId::from(characteristic.uuid()),
                        flags,
                    },
                });

                match characteristic.discover_descriptors().await {
                    Ok(descriptors) => {
                        for (d, descriptor) in descriptors.iter().enumerate() {
                            self.hub.emit(BusEvent::EntityAdded {
                                path: char_path.child(&format!("desc{:04x}", d)),
                                entity: Entity::Descriptor {
                                    uuid: CapabilityId::from(descriptor.uuid()),
                                },
                            });
                        }
                    }
                    Err(e) => debug!("No descriptors for {}: {}", char_path, e),
                }

                lock(&self.handles).characteristics.insert(char_path, characteristic);
            }
        }

        self.hub.emit(BusEvent::PropertiesChanged {
            path: path.clone(),
            changes: PropertyChanges::services_resolved(true),
        });
        Ok(())
    }
}

#[async_trait]
impl DeviceBus for BluestBus {
    async fn managed_objects(&self) -> Result<Vec<(ObjectPath, Entity)>, BusError> {
        let connected = self.adapter.connected_devices().await.map_err(bus_error)?;
        let mut objects = Vec::with_capacity(connected.len());
        for device in connected {
            let (path, address) = Self::path_for(&self.adapter_path, &device);
            let attributes = DeviceAttributes {
                address,
                name: device.name().ok(),
                rssi: None,
                connected: Some(true),
            };
            lock(&self.handles).devices.insert(path.clone(), device);
            objects.push((path, Entity::Device(attributes)));
        }
        Ok(objects)
    }

    async fn start_discovery(&self) -> Result<(), BusError> {
        let token = CancellationToken::new();
        if let Some(previous) = lock(&self.handles).scan.replace(token.clone()) {
            previous.cancel();
        }

        let adapter = self.adapter.clone();
        let adapter_path = self.adapter_path.clone();
        let hub = self.hub.clone();
        let handles = self.handles.clone();
        let (ready_tx, ready_rx) = oneshot::channel();

        // The scan stream borrows the adapter, so both live in the task.
        tokio::spawn(async move {
            let mut stream = match adapter.scan(&[]).await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(bus_error(e)));
                    return;
                }
            };
            loop {
                tokio::select! {
                    next = stream.next() => {
                        let Some(found) = next else {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        };
                        let (path, address) = Self::path_for(&adapter_path, &found.device);
                        let attributes = DeviceAttributes {
                            address,
                            name: found.adv_data.local_name.clone().or_else(|| found.device.name().ok()),
                            rssi: found.rssi,
                            connected: None,
                        };
                        lock(&handles).devices.insert(path.clone(), found.device);
                        hub.emit(BusEvent::EntityAdded {
                            path,
                            entity: Entity::Device(attributes),
                        });
                    }
                    _ = token.cancelled() => break,
                }
            }
            debug!("Scan task finished");
        });

        ready_rx
            .await
            .unwrap_or_else(|_| Err(BusError::failed("Scan task ended before starting")))
    }

    async fn stop_discovery(&self) -> Result<(), BusError> {
        if let Some(scan) = lock(&self.handles).scan.take() {
            scan.cancel();
        }
        Ok(())
    }

    async fn connect(&self, device: &ObjectPath) -> Result<(), BusError> {
        let handle = self.device(device)?;
        if !handle.is_connected().await {
            self.adapter.connect_device(&handle).await.map_err(bus_error)?;
        }
        self.hub.emit(BusEvent::PropertiesChanged {
            path: device.clone(),
            changes: PropertyChanges::connected(true),
        });
        // A failed walk leaves the tree unresolved; the enumeration
        // deadline reports it.
        if let Err(e) = self.enumerate(device, &handle).await {
            error!("Service discovery on {} failed: {}", device, e);
        }
        Ok(())
    }

    async fn disconnect(&self, device: &ObjectPath) -> Result<(), BusError> {
        let handle = self.device(device)?;
        self.adapter.disconnect_device(&handle).await.map_err(bus_error)?;
        self.hub.emit(BusEvent::PropertiesChanged {
            path: device.clone(),
            changes: PropertyChanges::connected(false),
        });
        Ok(())
    }

    async fn device_attributes(&self, device: &ObjectPath) -> Result<DeviceAttributes, BusError> {
        let handle = self.device(device)?;
        Ok(DeviceAttributes {
            address: extract_mac_address(&handle.id().to_string()),
            name: handle.name().ok(),
            rssi: handle.rssi().await.ok(),
            connected: Some(handle.is_connected().await),
        })
    }

    async fn start_notify(&self, characteristic: &ObjectPath) -> Result<(), BusError> {
        let handle = lock(&self.handles)
            .characteristics
            .get(characteristic)
            .cloned()
            .ok_or_else(|| BusError::unknown_object(characteristic))?;

        let token = CancellationToken::new();
        let cancelled = token.clone();
        let path = characteristic.clone();
        let hub = self.hub.clone();
        let (ready_tx, ready_rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut stream = match handle.notify().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(bus_error(e)));
                    return;
                }
            };
            loop {
                tokio::select! {
                    next = stream.next() => match next {
                        Some(Ok(value)) => hub.emit(BusEvent::PropertiesChanged {
                            path: path.clone(),
                            changes: PropertyChanges::value(value),
                        }),
                        Some(Err(e)) => {
                            warn!("Error in notification stream for {}: {}", path, e);
                            break;
                        }
                        None => break,
                    },
                    _ = cancelled.cancelled() => break,
                }
            }
            info!("Notification stream for {} ended", path);
        });

        ready_rx
            .await
            .unwrap_or_else(|_| Err(BusError::failed("Notification task ended before starting")))?;
        if let Some(previous) = lock(&self.handles).notifications.insert(characteristic.clone(), token) {
            previous.cancel();
        }
        Ok(())
    }

    async fn stop_notify(&self, characteristic: &ObjectPath) -> Result<(), BusError> {
        match lock(&self.handles).notifications.remove(characteristic) {
            Some(token) => {
                token.cancel();
                Ok(())
            }
            None => Err(BusError::failed(format!(
                "No notifications active on {}",
                characteristic
            ))),
        }
    }
}

impl Drop for BluestBus {
    fn drop(&mut self) {
        let handles = lock(&self.handles);
        if let Some(scan) = &handles.scan {
            scan.cancel();
        }
        for token in handles.notifications.values() {
            token.cancel();
        }
    }
}
