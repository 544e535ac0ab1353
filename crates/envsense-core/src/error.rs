//! Error types for envsense-core.
//!
//! Errors fall into four groups with different recovery paths:
//!
//! | Group | Variants | Recovery |
//! |-------|----------|----------|
//! | Preflight | [`ScanError::AdapterNotReady`], [`ConnectError::AdapterNotReady`] | User enables Bluetooth/location or grants permission, then re-issues the call |
//! | Transport | [`ConnectError::LinkFailed`], [`ConnectError::ServiceNotFound`], [`ConnectError::NoCharacteristicsAvailable`], [`ScanError::HardwareFailure`], ... | Session or scan is aborted and released; a fresh attempt is needed. Never retried automatically |
//! | Decode | [`envsense_types::DecodeError`] | Logged and dropped inside the notification pipeline |
//! | Release | failures of disconnect/close | Logged only |
//!
//! Preflight and transport errors reach the UI shell as user-facing strings,
//! see [`crate::messages`].

use std::time::Duration;

use thiserror::Error;

use envsense_types::AdapterState;

use crate::radio::GattStatus;
use crate::session::SessionState;

/// Errors raised by the radio capability itself.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RadioError {
    /// Bluetooth Low Energy stack error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No Bluetooth adapter is present.
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    /// The peripheral is not known to the adapter.
    #[error("Unknown peripheral: {0}")]
    UnknownPeripheral(String),

    /// The characteristic is not present on the connected peripheral.
    #[error("Unknown characteristic: {0}")]
    UnknownCharacteristic(uuid::Uuid),

    /// The radio refused to start the request.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// A radio operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },
}

impl RadioError {
    /// Create a rejected-request error.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }
}

/// Errors from [`crate::Scanner`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ScanError {
    /// The adapter is not ready; the scan never started.
    #[error("Adapter not ready: {0}")]
    AdapterNotReady(AdapterState),

    /// The platform reported a scan failure.
    #[error("Scan failed with hardware code {0}")]
    HardwareFailure(i32),

    /// Another scan from this scanner is still active.
    #[error("A scan is already in progress")]
    ScanInProgress,

    /// The radio could not start the scan.
    #[error("Radio error: {0}")]
    Radio(String),

    /// The scan options failed validation; the radio was not touched.
    #[error("Invalid scan options: {0}")]
    InvalidOptions(String),
}

impl From<RadioError> for ScanError {
    fn from(err: RadioError) -> Self {
        ScanError::Radio(err.to_string())
    }
}

/// Errors from [`crate::ConnectionManager`].
///
/// `Clone` so that one failure can be delivered to every pending caller and
/// to the error stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConnectError {
    /// The adapter is not ready; no session was created.
    #[error("Adapter not ready: {0}")]
    AdapterNotReady(AdapterState),

    /// The link could not be established.
    #[error("Link failed with GATT status {status}")]
    LinkFailed {
        /// Status reported by the hardware layer.
        status: GattStatus,
    },

    /// The link dropped after it was established.
    #[error("Link lost")]
    LinkLost,

    /// The peripheral has no Environmental Sensing service.
    #[error("Environmental Sensing service not found ({service_count} services)")]
    ServiceNotFound {
        /// Number of services the peripheral exposed.
        service_count: usize,
    },

    /// No target characteristic could be armed for notifications.
    #[error("No characteristics available for notifications")]
    NoCharacteristicsAvailable,

    /// A GATT operation reported a non-success status.
    #[error("GATT operation '{operation}' failed with status {status}")]
    GattFailure {
        /// The operation that failed.
        operation: &'static str,
        /// Status reported by the hardware layer.
        status: GattStatus,
    },

    /// A connection stage did not complete in time.
    #[error("Timed out in state {stage} after {duration:?}")]
    Timeout {
        /// The stage that timed out.
        stage: SessionState,
        /// The configured deadline.
        duration: Duration,
    },

    /// The radio rejected a request.
    #[error("Radio error: {0}")]
    Radio(String),

    /// The request needs a streaming session.
    #[error("No streaming session")]
    NotStreaming,

    /// A pending connect was abandoned because another request replaced it.
    #[error("Connect attempt superseded")]
    Superseded,

    /// The manager's worker has stopped.
    #[error("Connection manager closed")]
    ManagerClosed,
}

impl From<RadioError> for ConnectError {
    fn from(err: RadioError) -> Self {
        ConnectError::Radio(err.to_string())
    }
}

impl ConnectError {
    /// Create a GATT failure error.
    pub fn gatt(operation: &'static str, status: GattStatus) -> Self {
        Self::GattFailure { operation, status }
    }

    /// Whether this is a preflight error (operation never started).
    pub fn is_preflight(&self) -> bool {
        matches!(self, ConnectError::AdapterNotReady(_))
    }
}

/// Errors that can occur anywhere in envsense-core.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Radio capability error.
    #[error(transparent)]
    Radio(#[from] RadioError),

    /// Scan error.
    #[error(transparent)]
    Scan(#[from] ScanError),

    /// Connection error.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Payload decode error.
    #[error(transparent)]
    Decode(#[from] envsense_types::DecodeError),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Result type alias using envsense-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for radio operations.
pub type RadioResult<T> = std::result::Result<T, RadioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ConnectError::ServiceNotFound { service_count: 3 };
        assert!(err.to_string().contains("3 services"));

        let err = ConnectError::gatt("discover services", GattStatus::GATT_ERROR);
        assert!(err.to_string().contains("discover services"));
        assert!(err.to_string().contains("133"));

        let err = ScanError::HardwareFailure(2);
        assert_eq!(err.to_string(), "Scan failed with hardware code 2");

        let err = RadioError::timeout("connect", Duration::from_secs(10));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("10s"));
    }

    #[test]
    fn test_preflight_classification() {
        assert!(ConnectError::AdapterNotReady(AdapterState::PoweredOff).is_preflight());
        assert!(!ConnectError::LinkLost.is_preflight());
    }

    #[test]
    fn test_radio_error_conversion() {
        let err: ConnectError = RadioError::UnknownPeripheral("AA".into()).into();
        assert_eq!(err, ConnectError::Radio("Unknown peripheral: AA".into()));

        let err: ScanError = RadioError::NoAdapter.into();
        assert!(matches!(err, ScanError::Radio(_)));
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<RadioError>();
    }

    #[test]
    fn test_umbrella_conversion() {
        let err: Error = ScanError::ScanInProgress.into();
        assert!(matches!(err, Error::Scan(ScanError::ScanInProgress)));
        assert_eq!(err.to_string(), "A scan is already in progress");
    }
}
