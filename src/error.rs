//! Error types for a discovery/streaming session.

use std::time::Duration;

use thiserror::Error;

use crate::core::bluetooth::scanner::ScanState;
use crate::core::bluetooth::{BusError, ObjectPath};
use crate::sink::SinkError;

/// Failures that end a session step. Per-sample decode and publish
/// failures are logged by the bridge instead and never surface here.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The transport could not be reached when scanning began.
    #[error("Bluetooth adapter unavailable: {0}")]
    AdapterUnavailable(#[source] BusError),

    /// A controller scans once; its device list outlives the scan.
    #[error("Discovery cannot start, scan is already {0:?}")]
    DiscoveryNotIdle(ScanState),

    #[error("Invalid Bluetooth address: {0:?}")]
    InvalidAddress(String),

    #[error("Failed to connect to {device}: {source}")]
    ConnectFailed {
        device: ObjectPath,
        #[source]
        source: BusError,
    },

    /// The bus has no object for the device; it has to be scanned first.
    #[error("Unknown device {device}, try scanning first: {source}")]
    UnknownDevice {
        device: ObjectPath,
        #[source]
        source: BusError,
    },

    /// The tree-stable signal arrived without both required entities.
    #[error(
        "Required capability not found (service found: {service_found}, characteristic found: {characteristic_found})"
    )]
    CapabilityNotFound {
        service_found: bool,
        characteristic_found: bool,
    },

    #[error("Service discovery on {device} did not complete within {timeout:?}")]
    EnumerationTimedOut { device: ObjectPath, timeout: Duration },

    #[error("Failed to start notifications on {characteristic}: {source}")]
    NotifyStartFailed {
        characteristic: ObjectPath,
        #[source]
        source: BusError,
    },

    #[error("Message sink unavailable: {0}")]
    SinkUnavailable(#[source] SinkError),

    #[error("Event queue closed")]
    QueueClosed,
}
