//! Scan lifecycle: `Idle -> Scanning -> Stopped`.
//! Device add/remove events feed the registry while the scan window is
//! open; the window timer stops the scan and the registry snapshot
//! becomes the device list the operator picks from.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::core::bluetooth::bus::DeviceBus;
use crate::core::bluetooth::device::DiscoveredDevice;
use crate::core::bluetooth::events::{EventFilter, EventHub, EventKind, Subscription, Timer};
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::types::{BusEvent, Entity, EntityKind, LoopEvent, TimerKind};
use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Idle,
    Scanning,
    Stopped,
}

/// What a handled event meant for the scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanProgress {
    /// Nothing for the scan in this event.
    Ignored,
    /// The registry absorbed a device event.
    Updated,
    /// The scan window closed with this event.
    Finished,
}

pub struct DiscoveryController {
    bus: Arc<dyn DeviceBus>,
    hub: EventHub,
    registry: DeviceRegistry,
    state: ScanState,
    added: Option<Subscription>,
    removed: Option<Subscription>,
    window: Option<Timer>,
}

impl DiscoveryController {
    pub fn new(bus: Arc<dyn DeviceBus>, hub: EventHub) -> Self {
        Self {
            bus,
            hub,
            registry: DeviceRegistry::new(),
            state: ScanState::Idle,
            added: None,
            removed: None,
            window: None,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Loads the devices the bus already knows about into the registry.
    pub async fn seed_known_devices(&mut self) -> Result<usize, SessionError> {
        info!("Listing devices already known to the adapter:");
        let objects = self.bus.managed_objects().await.map_err(|e| {
            error!("Failed to list managed objects: {}", e);
            SessionError::AdapterUnavailable(e)
        })?;
        let known = objects.into_iter().filter_map(|(path, entity)| match entity {
            Entity::Device(attributes) => Some((path, attributes)),
            _ => None,
        });
        let count = self.registry.seed(known);
        info!("Found {} managed device objects", count);
        Ok(count)
    }

    /// Opens the scan window for `duration`.
    pub async fn start(&mut self, duration: Duration) -> Result<(), SessionError> {
        if self.state != ScanState::Idle {
            warn!("Scan already {:?}, refusing to start another", self.state);
            return Err(SessionError::DiscoveryNotIdle(self.state));
        }

        self.added = Some(self.hub.subscribe(
            EventFilter::new(EventKind::EntityAdded).entity(EntityKind::Device),
        ));
        self.removed = Some(self.hub.subscribe(
            EventFilter::new(EventKind::EntityRemoved).entity(EntityKind::Device),
        ));

        if let Err(e) = self.bus.start_discovery().await {
            error!("Failed to start discovery: {}", e);
            self.release();
            return Err(SessionError::AdapterUnavailable(e));
        }

        self.window = Some(self.hub.schedule(TimerKind::ScanWindow, duration));
        self.state = ScanState::Scanning;
        info!("Scanning devices for {:?}....", duration);
        Ok(())
    }

    /// Applies one dispatcher event.
    ///
    /// Device events are applied in any state: an event that was queued
    /// before the scan stopped still belongs in the final list.
    pub async fn handle(&mut self, event: &LoopEvent) -> ScanProgress {
        match event {
            LoopEvent::Timer(..) => {
                let ours = self.window.as_ref().is_some_and(|w| w.fired(event));
                if ours && self.stop().await {
                    ScanProgress::Finished
                } else {
                    debug!("Ignoring {:?}, not the open scan window", event);
                    ScanProgress::Ignored
                }
            }
            LoopEvent::Bus(BusEvent::EntityAdded {
                path,
                entity: Entity::Device(attributes),
            }) => {
                self.registry.upsert(path, attributes);
                ScanProgress::Updated
            }
            LoopEvent::Bus(BusEvent::EntityRemoved { path, kinds }) if kinds.contains(&EntityKind::Device) => {
                self.registry.remove(path);
                ScanProgress::Updated
            }
            _ => ScanProgress::Ignored,
        }
    }

    /// Ends the scan. Returns true only for the call that actually stopped
    /// it; later calls (or a late window timer) do nothing.
    ///
    /// The transport is stopped before the subscriptions are released, so
    /// devices it reports while stopping are still queued.
    pub async fn stop(&mut self) -> bool {
        if self.state != ScanState::Scanning {
            return false;
        }
        self.state = ScanState::Stopped;
        if self.registry.is_empty() {
            warn!("Discovery done, no devices seen");
        } else {
            info!("Discovery done, {} devices seen", self.registry.len());
        }

        if let Some(window) = self.window.take() {
            window.cancel();
        }
        if let Err(e) = self.bus.stop_discovery().await {
            warn!("Failed to stop discovery: {}", e);
        }
        self.release();
        true
    }

    /// Current device list in first-seen order.
    pub fn snapshot(&self) -> Vec<DiscoveredDevice> {
        self.registry.list()
    }

    fn release(&mut self) {
        if let Some(mut added) = self.added.take() {
            added.release();
        }
        if let Some(mut removed) = self.removed.take() {
            removed.release();
        }
    }
}
