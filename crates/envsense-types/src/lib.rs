//! Platform-agnostic types for BLE environmental sensing peripherals.
//!
//! This crate holds everything that does not need a Bluetooth stack:
//!
//! - GATT UUID constants for the Environmental Sensing service
//! - The data model shared by the scanner, connection manager and UI shells
//! - The characteristic codec turning raw payloads into [`SensorReading`]s
//!
//! # Example
//!
//! ```
//! use envsense_types::{codec, uuid, SensorReading};
//!
//! let reading = codec::decode(uuid::PRESSURE, &[0x94, 0x27, 0x00, 0x00]).unwrap();
//! assert_eq!(reading, SensorReading::Pressure { deci_hpa: 10132 });
//! ```

pub mod codec;
pub mod error;
pub mod types;
pub mod uuid;

pub use codec::{SensorKind, decode};
pub use error::{DecodeError, DecodeResult};
pub use types::{
    AdapterState, CharacteristicEvent, EventSource, PeripheralHandle, SensorReading,
    normalize_address,
};
pub use uuid as uuids;
