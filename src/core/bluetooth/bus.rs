//! The device bus seam: the imperative calls the core makes into the
//! Bluetooth transport. Signals travel the other way through the
//! [`EventHub`](crate::core::bluetooth::events::EventHub) the transport
//! was built with.

use async_trait::async_trait;
use thiserror::Error;

use crate::core::bluetooth::types::{DeviceAttributes, Entity, ObjectPath};

pub const ERROR_FAILED: &str = "org.bluez.Error.Failed";
pub const ERROR_NOT_READY: &str = "org.bluez.Error.NotReady";
pub const ERROR_UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";

/// Transport diagnostic: an error name plus a human readable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct BusError {
    pub code: String,
    pub message: String,
}

impl BusError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ERROR_FAILED, message)
    }

    pub fn unknown_object(path: &ObjectPath) -> Self {
        Self::new(ERROR_UNKNOWN_OBJECT, format!("No such object: {}", path))
    }

    pub fn is_unknown_object(&self) -> bool {
        self.code.contains("UnknownObject")
    }
}

/// Bluetooth transport operations used by the session.
#[async_trait]
pub trait DeviceBus: Send + Sync {
    /// Every object the transport currently knows about.
    async fn managed_objects(&self) -> Result<Vec<(ObjectPath, Entity)>, BusError>;

    async fn start_discovery(&self) -> Result<(), BusError>;

    async fn stop_discovery(&self) -> Result<(), BusError>;

    async fn connect(&self, device: &ObjectPath) -> Result<(), BusError>;

    async fn disconnect(&self, device: &ObjectPath) -> Result<(), BusError>;

    async fn device_attributes(&self, device: &ObjectPath) -> Result<DeviceAttributes, BusError>;

    /// Asks the peripheral to begin pushing value changes for `characteristic`.
    async fn start_notify(&self, characteristic: &ObjectPath) -> Result<(), BusError>;

    async fn stop_notify(&self, characteristic: &ObjectPath) -> Result<(), BusError>;
}
