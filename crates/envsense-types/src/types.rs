//! Core types for environmental sensing data.

use core::fmt;
use std::hash::{Hash, Hasher};

use bytes::Bytes;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::uuid::{PRESSURE, TEMPERATURE};

/// Readiness of the platform Bluetooth radio.
///
/// Anything other than [`AdapterState::Ready`] blocks scanning and connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AdapterState {
    /// Radio powered, permissions granted, location services on.
    Ready,
    /// Radio present but switched off.
    PoweredOff,
    /// Runtime permissions were not granted.
    PermissionDenied,
    /// Location services are disabled (required for scanning on some platforms).
    LocationServicesDisabled,
    /// No BLE radio on this host.
    Unsupported,
}

impl AdapterState {
    /// Whether scan and connect operations may proceed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, AdapterState::Ready)
    }
}

impl fmt::Display for AdapterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AdapterState::Ready => "ready",
            AdapterState::PoweredOff => "powered off",
            AdapterState::PermissionDenied => "permission denied",
            AdapterState::LocationServicesDisabled => "location services disabled",
            AdapterState::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

/// A peripheral discovered during one scan session.
///
/// Identity is the hardware address: two handles with the same address are
/// equal regardless of name or discovery time.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PeripheralHandle {
    /// Hardware address (MAC on Linux/Windows/Android, CoreBluetooth UUID on macOS).
    pub address: String,
    /// Advertised local name, if any.
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub name: Option<String>,
    /// When the first advertisement for this address arrived.
    #[cfg_attr(feature = "serde", serde(with = "time::serde::rfc3339"))]
    pub discovered_at: OffsetDateTime,
}

impl PeripheralHandle {
    /// Create a handle discovered now.
    ///
    /// The address is normalized to upper case so that de-duplication does
    /// not depend on how the platform formats it.
    pub fn new(address: impl AsRef<str>, name: Option<String>) -> Self {
        Self {
            address: normalize_address(address.as_ref()),
            name,
            discovered_at: OffsetDateTime::now_utc(),
        }
    }

    /// Override the discovery timestamp.
    #[must_use]
    pub fn with_discovered_at(mut self, at: OffsetDateTime) -> Self {
        self.discovered_at = at;
        self
    }

    /// Name for display, falling back to the address.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

impl PartialEq for PeripheralHandle {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for PeripheralHandle {}

impl Hash for PeripheralHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

/// Normalize a peripheral address for comparison.
#[must_use]
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_uppercase()
}

/// How a characteristic value reached the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventSource {
    /// Pushed by the peripheral after notifications were enabled.
    Notification,
    /// Response to an explicit read request.
    Read,
}

/// A raw characteristic value as delivered by the hardware layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicEvent {
    /// Characteristic the value belongs to.
    pub characteristic: Uuid,
    /// Raw payload.
    pub value: Bytes,
    /// Wall-clock time the value was received.
    pub received_at: OffsetDateTime,
    /// Notification or read response.
    pub source: EventSource,
}

impl CharacteristicEvent {
    /// Create an event stamped with the current time.
    pub fn new(characteristic: Uuid, value: impl Into<Bytes>, source: EventSource) -> Self {
        Self {
            characteristic,
            value: value.into(),
            received_at: OffsetDateTime::now_utc(),
            source,
        }
    }

    /// Create a notification event.
    pub fn notification(characteristic: Uuid, value: impl Into<Bytes>) -> Self {
        Self::new(characteristic, value, EventSource::Notification)
    }

    /// Create a read-response event.
    pub fn read(characteristic: Uuid, value: impl Into<Bytes>) -> Self {
        Self::new(characteristic, value, EventSource::Read)
    }
}

/// A decoded sensor value.
///
/// Values are kept in the peripheral's fixed-point representation so no
/// precision is lost; use [`SensorReading::value`] for a floating-point view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
pub enum SensorReading {
    /// Temperature in hundredths of a degree Celsius.
    Temperature {
        /// Raw signed fixed-point value.
        centi_celsius: i16,
    },
    /// Pressure in tenths of a hectopascal.
    Pressure {
        /// Raw unsigned fixed-point value.
        deci_hpa: u32,
    },
}

impl SensorReading {
    /// Temperature in °C, if this is a temperature reading.
    #[must_use]
    pub fn celsius(&self) -> Option<f64> {
        match self {
            SensorReading::Temperature { centi_celsius } => Some(f64::from(*centi_celsius) / 100.0),
            SensorReading::Pressure { .. } => None,
        }
    }

    /// Pressure in hPa, if this is a pressure reading.
    #[must_use]
    pub fn hpa(&self) -> Option<f64> {
        match self {
            SensorReading::Pressure { deci_hpa } => Some(f64::from(*deci_hpa) / 10.0),
            SensorReading::Temperature { .. } => None,
        }
    }

    /// Value in the reading's display unit.
    #[must_use]
    pub fn value(&self) -> f64 {
        match self {
            SensorReading::Temperature { centi_celsius } => f64::from(*centi_celsius) / 100.0,
            SensorReading::Pressure { deci_hpa } => f64::from(*deci_hpa) / 10.0,
        }
    }

    /// Display unit symbol.
    #[must_use]
    pub fn unit(&self) -> &'static str {
        match self {
            SensorReading::Temperature { .. } => "°C",
            SensorReading::Pressure { .. } => "hPa",
        }
    }

    /// Characteristic this reading is decoded from.
    #[must_use]
    pub fn characteristic(&self) -> Uuid {
        match self {
            SensorReading::Temperature { .. } => TEMPERATURE,
            SensorReading::Pressure { .. } => PRESSURE,
        }
    }
}

impl fmt::Display for SensorReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorReading::Temperature { .. } => write!(f, "{:.2} {}", self.value(), self.unit()),
            SensorReading::Pressure { .. } => write!(f, "{:.1} {}", self.value(), self.unit()),
        }
    }
}
