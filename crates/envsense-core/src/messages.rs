//! User-facing message mapping.
//!
//! Preflight and transport errors end up in a toast or a terminal line. The
//! mapping from error variant to text is fixed here so every shell shows the
//! same wording. Decode errors have no entry: they never leave the pipeline.

use envsense_types::AdapterState;

use crate::error::{ConnectError, ScanError};

/// Short, human-readable text for presenting a value to the user.
pub trait UserMessage {
    /// The message.
    fn user_message(&self) -> String;
}

impl UserMessage for AdapterState {
    fn user_message(&self) -> String {
        match self {
            AdapterState::Ready => "Bluetooth ready",
            AdapterState::PoweredOff => "Bluetooth not enabled",
            AdapterState::PermissionDenied => "Location permissions not granted",
            AdapterState::LocationServicesDisabled => "Location services not enabled",
            AdapterState::Unsupported => "No BLE on your device",
        }
        .to_string()
    }
}

impl UserMessage for ScanError {
    fn user_message(&self) -> String {
        match self {
            ScanError::AdapterNotReady(state) => state.user_message(),
            ScanError::HardwareFailure(code) => format!("Scan failed (error {code})"),
            ScanError::ScanInProgress => "A scan is already running".to_string(),
            ScanError::Radio(_) => "Could not start scanning".to_string(),
            ScanError::InvalidOptions(_) => "Invalid scan settings".to_string(),
        }
    }
}

impl UserMessage for ConnectError {
    fn user_message(&self) -> String {
        match self {
            ConnectError::AdapterNotReady(state) => state.user_message(),
            ConnectError::LinkFailed { .. } | ConnectError::Radio(_) => {
                "Could not connect to the sensor".to_string()
            }
            ConnectError::LinkLost => "Connection to the sensor was lost".to_string(),
            ConnectError::ServiceNotFound { .. } => {
                "Sensor does not expose environmental sensing".to_string()
            }
            ConnectError::NoCharacteristicsAvailable => {
                "Sensor has no readable temperature or pressure".to_string()
            }
            ConnectError::GattFailure { .. } => "Communication with the sensor failed".to_string(),
            ConnectError::Timeout { .. } => "Sensor did not respond in time".to_string(),
            ConnectError::NotStreaming => "Not connected to a sensor".to_string(),
            ConnectError::Superseded => "Connection attempt cancelled".to_string(),
            ConnectError::ManagerClosed => "Bluetooth service stopped".to_string(),
        }
    }
}
