//! Error types for characteristic decoding.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when decoding a characteristic payload.
///
/// Decode errors are local to a single event: the pipeline logs and drops
/// the event and keeps running.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// The payload is shorter than the characteristic's wire format.
    #[error("Truncated payload: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes received.
        actual: usize,
    },

    /// The characteristic is not in the decode table.
    #[error("Unsupported characteristic: {0}")]
    UnsupportedCharacteristic(Uuid),
}

impl DecodeError {
    /// Create a truncated payload error.
    pub fn truncated(expected: usize, actual: usize) -> Self {
        Self::Truncated { expected, actual }
    }
}

/// Result type alias using envsense-types' DecodeError type.
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_display() {
        let err = DecodeError::truncated(4, 3);
        assert_eq!(
            err.to_string(),
            "Truncated payload: expected at least 4 bytes, got 3"
        );
    }

    #[test]
    fn test_unsupported_display() {
        let err = DecodeError::UnsupportedCharacteristic(crate::uuid::CLIENT_CHARACTERISTIC_CONFIG);
        assert!(err.to_string().contains("00002902"));
    }
}
