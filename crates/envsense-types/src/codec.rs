//! Characteristic codec.
//!
//! Maps characteristic UUIDs to their wire formats through a fixed table and
//! decodes raw payloads into [`SensorReading`] values. Decoding is pure.
//!
//! | Characteristic | Wire format | Scale |
//! |----------------|-------------|-------|
//! | Temperature (0x2A6E) | sint16, little-endian | ÷ 100 → °C |
//! | Pressure (0x2A6D) | uint32, little-endian | ÷ 10 → hPa |
//!
//! Bytes past the wire format are ignored.

use bytes::Buf;
use uuid::Uuid;

use crate::error::{DecodeError, DecodeResult};
use crate::types::{CharacteristicEvent, SensorReading};
use crate::uuid::{PRESSURE, TEMPERATURE};

/// Minimum payload length for a temperature value.
pub const TEMPERATURE_PAYLOAD_BYTES: usize = 2;

/// Minimum payload length for a pressure value.
pub const PRESSURE_PAYLOAD_BYTES: usize = 4;

/// Kind of sensor value a characteristic carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// Temperature characteristic.
    Temperature,
    /// Pressure characteristic.
    Pressure,
}

/// Decode table, fixed at compile time.
pub const CHARACTERISTICS: [(Uuid, SensorKind); 2] = [
    (TEMPERATURE, SensorKind::Temperature),
    (PRESSURE, SensorKind::Pressure),
];

impl SensorKind {
    /// Look up the kind for a characteristic UUID.
    #[must_use]
    pub fn for_uuid(uuid: Uuid) -> Option<Self> {
        CHARACTERISTICS
            .iter()
            .find(|(id, _)| *id == uuid)
            .map(|(_, kind)| *kind)
    }

    /// Characteristic UUID carrying this kind.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        match self {
            SensorKind::Temperature => TEMPERATURE,
            SensorKind::Pressure => PRESSURE,
        }
    }

    /// Minimum payload length.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        match self {
            SensorKind::Temperature => TEMPERATURE_PAYLOAD_BYTES,
            SensorKind::Pressure => PRESSURE_PAYLOAD_BYTES,
        }
    }

    /// Decode a payload of this kind.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] if `data` is shorter than
    /// [`payload_len`](Self::payload_len).
    pub fn decode(&self, data: &[u8]) -> DecodeResult<SensorReading> {
        let expected = self.payload_len();
        if data.len() < expected {
            return Err(DecodeError::truncated(expected, data.len()));
        }

        let mut buf = data;
        Ok(match self {
            SensorKind::Temperature => SensorReading::Temperature {
                centi_celsius: buf.get_i16_le(),
            },
            SensorKind::Pressure => SensorReading::Pressure {
                deci_hpa: buf.get_u32_le(),
            },
        })
    }
}

/// Decode a raw payload for the given characteristic.
///
/// # Errors
///
/// - [`DecodeError::UnsupportedCharacteristic`] if `uuid` is not in [`CHARACTERISTICS`].
/// - [`DecodeError::Truncated`] if the payload is too short.
///
/// # Example
///
/// ```
/// use envsense_types::codec::decode;
/// use envsense_types::uuid::TEMPERATURE;
///
/// let reading = decode(TEMPERATURE, &[0xE8, 0x03]).unwrap();
/// assert_eq!(reading.celsius(), Some(10.0));
/// ```
pub fn decode(uuid: Uuid, data: &[u8]) -> DecodeResult<SensorReading> {
    SensorKind::for_uuid(uuid)
        .ok_or(DecodeError::UnsupportedCharacteristic(uuid))?
        .decode(data)
}

/// Decode a [`CharacteristicEvent`].
///
/// # Errors
///
/// See [`decode`].
pub fn decode_event(event: &CharacteristicEvent) -> DecodeResult<SensorReading> {
    decode(event.characteristic, &event.value)
}

/// Whether `uuid` has an entry in the decode table.
#[must_use]
pub fn is_supported(uuid: Uuid) -> bool {
    SensorKind::for_uuid(uuid).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uuid::CLIENT_CHARACTERISTIC_CONFIG;

    #[test]
    fn test_decode_temperature() {
        // 1000 LE -> 10.00 °C
        let reading = decode(TEMPERATURE, &[0xE8, 0x03]).unwrap();
        assert_eq!(reading, SensorReading::Temperature { centi_celsius: 1000 });
        assert_eq!(reading.celsius(), Some(10.0));
    }

    #[test]
    fn test_decode_negative_temperature() {
        // -1000 LE = 0xFC18
        let reading = decode(TEMPERATURE, &[0x18, 0xFC]).unwrap();
        assert_eq!(reading.celsius(), Some(-10.0));
    }

    #[test]
    fn test_decode_temperature_ignores_trailing_bytes() {
        let reading = decode(TEMPERATURE, &[0x01, 0x00, 0xFF, 0xFF]).unwrap();
        assert_eq!(reading, SensorReading::Temperature { centi_celsius: 1 });
    }

    #[test]
    fn test_decode_temperature_truncated() {
        assert_eq!(
            decode(TEMPERATURE, &[0xE8]),
            Err(DecodeError::Truncated {
                expected: 2,
                actual: 1
            })
        );
        assert_eq!(
            decode(TEMPERATURE, &[]),
            Err(DecodeError::Truncated {
                expected: 2,
                actual: 0
            })
        );
    }

    #[test]
    fn test_decode_pressure() {
        // 10132 LE -> 1013.2 hPa
        let reading = decode(PRESSURE, &[0x94, 0x27, 0x00, 0x00]).unwrap();
        assert_eq!(reading, SensorReading::Pressure { deci_hpa: 10132 });
        assert_eq!(reading.hpa(), Some(1013.2));
    }

    #[test]
    fn test_decode_pressure_max() {
        let reading = decode(PRESSURE, &[0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        assert_eq!(reading, SensorReading::Pressure { deci_hpa: u32::MAX });
    }

    #[test]
    fn test_decode_pressure_truncated() {
        assert_eq!(
            decode(PRESSURE, &[0x94, 0x27, 0x00]),
            Err(DecodeError::Truncated {
                expected: 4,
                actual: 3
            })
        );
    }

    #[test]
    fn test_decode_unknown_uuid() {
        assert_eq!(
            decode(CLIENT_CHARACTERISTIC_CONFIG, &[0x01, 0x00]),
            Err(DecodeError::UnsupportedCharacteristic(
                CLIENT_CHARACTERISTIC_CONFIG
            ))
        );
    }

    #[test]
    fn test_decode_event() {
        let event = CharacteristicEvent::notification(TEMPERATURE, vec![0xE8, 0x03]);
        assert_eq!(
            decode_event(&event),
            Ok(SensorReading::Temperature { centi_celsius: 1000 })
        );
    }

    #[test]
    fn test_table_lookup() {
        assert_eq!(SensorKind::for_uuid(TEMPERATURE), Some(SensorKind::Temperature));
        assert_eq!(SensorKind::for_uuid(PRESSURE), Some(SensorKind::Pressure));
        assert_eq!(SensorKind::for_uuid(CLIENT_CHARACTERISTIC_CONFIG), None);
        for (uuid, kind) in CHARACTERISTICS {
            assert_eq!(kind.uuid(), uuid);
            assert!(is_supported(uuid));
        }
    }
}

/// Property-based tests for the codec.
///
/// # Running Tests
///
/// ```bash
/// cargo test -p envsense-types codec::proptests
/// ```
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Temperature decodes to the sint16 LE of the first two bytes.
        #[test]
        fn temperature_matches_le_interpretation(data in proptest::collection::vec(any::<u8>(), 2..16)) {
            let expected = i16::from_le_bytes([data[0], data[1]]);
            let reading = decode(TEMPERATURE, &data).unwrap();
            prop_assert_eq!(reading, SensorReading::Temperature { centi_celsius: expected });
            prop_assert_eq!(reading.celsius(), Some(f64::from(expected) / 100.0));
        }

        /// Short temperature payloads are truncated.
        #[test]
        fn temperature_short_payload_truncated(data in proptest::collection::vec(any::<u8>(), 0..2)) {
            prop_assert_eq!(
                decode(TEMPERATURE, &data),
                Err(DecodeError::Truncated { expected: 2, actual: data.len() })
            );
        }

        /// Pressure decodes to the uint32 LE of the first four bytes.
        #[test]
        fn pressure_matches_le_interpretation(data in proptest::collection::vec(any::<u8>(), 4..16)) {
            let expected = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            let reading = decode(PRESSURE, &data).unwrap();
            prop_assert_eq!(reading, SensorReading::Pressure { deci_hpa: expected });
            prop_assert_eq!(reading.hpa(), Some(f64::from(expected) / 10.0));
        }

        /// Short pressure payloads are truncated.
        #[test]
        fn pressure_short_payload_truncated(data in proptest::collection::vec(any::<u8>(), 0..4)) {
            prop_assert_eq!(
                decode(PRESSURE, &data),
                Err(DecodeError::Truncated { expected: 4, actual: data.len() })
            );
        }

        /// Decoding arbitrary input under any UUID never panics.
        #[test]
        fn decode_never_panics(bytes in any::<[u8; 16]>(), data: Vec<u8>) {
            let _ = decode(Uuid::from_bytes(bytes), &data);
        }
    }
}
