//! Core functionality for the sensor bridge
//! Discovery, service resolution and notification streaming.

pub mod bluetooth;
pub mod sensor;
pub mod session;

// Re-export commonly used types
pub use session::{ResolvedDevice, Session, StreamEnd};
