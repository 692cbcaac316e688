//! Bluetooth side of the bridge
//! This module handles scanning, connecting to the selected device,
//! resolving its services and receiving notifications from it.

pub mod bus;
pub mod connection;
pub mod constants;
pub mod device;
pub mod events;
pub mod matcher;
pub mod memory;
pub mod notification;
pub mod registry;
pub mod resolver;
pub mod scanner;
pub mod types;

#[cfg(feature = "bluetooth")]
mod bluest_bus;

// Re-export types that should be publicly accessible
pub use bus::{BusError, DeviceBus};
pub use connection::ConnectionManager;
pub use device::DiscoveredDevice;
pub use events::{EventFilter, EventHub, EventKind, PathScope, Subscription};
pub use matcher::CapabilityId;
pub use memory::MemoryBus;
pub use notification::{BridgeStats, NotificationBridge};
pub use registry::DeviceRegistry;
pub use resolver::{Resolution, ResolutionPhase, Resolver};
pub use scanner::{DiscoveryController, ScanState};
pub use types::{BusEvent, DeviceAttributes, Entity, EntityKind, LoopEvent, ObjectPath};

#[cfg(feature = "bluetooth")]
pub use bluest_bus::BluestBus;
