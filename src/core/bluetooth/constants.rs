//! Constants used throughout the application
//! This module contains all the constant values used in the application,
//! such as UUIDs, bus paths, and default timings.

use uuid::Uuid;

/// Root path under which BlueZ exposes adapters.
pub const BLUEZ_ROOT: &str = "/org/bluez";

/// Adapter used when none is configured.
pub const DEFAULT_ADAPTER: &str = "hci0";

/// The 16-bit UUIDs below are offsets into this base.
pub const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Standard Bluetooth Service UUIDs
pub const UUID_GENERIC_ACCESS_SERVICE: Uuid = Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb);
pub const UUID_GENERIC_ATTRIBUTE_SERVICE: Uuid = Uuid::from_u128(0x00001801_0000_1000_8000_00805f9b34fb);
pub const UUID_DEVICE_INFORMATION_SERVICE: Uuid = Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

/// Standard Bluetooth Characteristic UUIDs
pub const UUID_DEVICE_NAME: Uuid = Uuid::from_u128(0x00002a00_0000_1000_8000_00805f9b34fb);
pub const UUID_APPEARANCE: Uuid = Uuid::from_u128(0x00002a01_0000_1000_8000_00805f9b34fb);
pub const UUID_SERVICE_CHANGED: Uuid = Uuid::from_u128(0x00002a05_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_LEVEL: Uuid = Uuid::from_u128(0x00002a19_0000_1000_8000_00805f9b34fb);
pub const UUID_MODEL_NUMBER: Uuid = Uuid::from_u128(0x00002a24_0000_1000_8000_00805f9b34fb);
pub const UUID_FIRMWARE_REVISION: Uuid = Uuid::from_u128(0x00002a26_0000_1000_8000_00805f9b34fb);
pub const UUID_MANUFACTURER_NAME: Uuid = Uuid::from_u128(0x00002a29_0000_1000_8000_00805f9b34fb);

/// Standard Bluetooth Descriptor UUIDs
pub const UUID_CHARACTERISTIC_USER_DESCRIPTION: Uuid = Uuid::from_u128(0x00002901_0000_1000_8000_00805f9b34fb);
pub const UUID_CLIENT_CHARACTERISTIC_CONFIG: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// Nordic Thingy:52 configuration service
pub const UUID_THINGY_CONFIGURATION_SERVICE: Uuid = Uuid::from_u128(0xef680100_9b35_4933_9b10_52ffa9740042);

/// Nordic Thingy:52 weather station service
pub const UUID_THINGY_WEATHER_SERVICE: Uuid = Uuid::from_u128(0xef680200_9b35_4933_9b10_52ffa9740042);

/// Temperature characteristic inside the weather service
pub const UUID_THINGY_TEMPERATURE_CHAR: Uuid = Uuid::from_u128(0xef680201_9b35_4933_9b10_52ffa9740042);
pub const UUID_THINGY_PRESSURE_CHAR: Uuid = Uuid::from_u128(0xef680202_9b35_4933_9b10_52ffa9740042);
pub const UUID_THINGY_HUMIDITY_CHAR: Uuid = Uuid::from_u128(0xef680203_9b35_4933_9b10_52ffa9740042);

/// Nordic Thingy:52 motion service
pub const UUID_THINGY_MOTION_SERVICE: Uuid = Uuid::from_u128(0xef680400_9b35_4933_9b10_52ffa9740042);

/// Scan duration in seconds
pub const DEFAULT_SCAN_DURATION_SECS: u64 = 20;

/// Time allowed for a connected device to report a resolved service tree
pub const DEFAULT_ENUMERATION_TIMEOUT_SECS: u64 = 30;

/// Topic the decoded temperature is published on
pub const DEFAULT_TOPIC: &str = "thingy52";

/// Measurement name used by the JSON payload format
pub const DEFAULT_MEASUREMENT: &str = "temperature";
