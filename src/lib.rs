//! Thingy bridge library
//! Finds a BLE sensor, resolves the characteristic it streams from and
//! republishes its notifications to an MQTT broker.

// Module declarations
pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod sink;
