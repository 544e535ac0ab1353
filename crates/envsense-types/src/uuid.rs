//! Bluetooth UUIDs for environmental sensing peripherals.
//!
//! All values are assigned numbers from the Bluetooth SIG, expanded onto the
//! standard base UUID `0000xxxx-0000-1000-8000-00805f9b34fb`.

use uuid::{Uuid, uuid};

// --- Service UUIDs ---

/// GATT Environmental Sensing service (0x181A).
pub const ENVIRONMENTAL_SENSING_SERVICE: Uuid = uuid!("0000181a-0000-1000-8000-00805f9b34fb");

// --- Characteristic UUIDs ---

/// Temperature characteristic (0x2A6E), sint16 in 0.01 °C.
pub const TEMPERATURE: Uuid = uuid!("00002a6e-0000-1000-8000-00805f9b34fb");

/// Pressure characteristic (0x2A6D), uint32 with one implied decimal place.
pub const PRESSURE: Uuid = uuid!("00002a6d-0000-1000-8000-00805f9b34fb");

// --- Descriptor UUIDs ---

/// Client Characteristic Configuration descriptor (0x2902).
pub const CLIENT_CHARACTERISTIC_CONFIG: Uuid = uuid!("00002902-0000-1000-8000-00805f9b34fb");

/// Value written to the client configuration descriptor to enable notifications.
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Value written to the client configuration descriptor to disable notifications.
pub const DISABLE_NOTIFICATION_VALUE: [u8; 2] = [0x00, 0x00];

/// Returns the 16-bit assigned number when `uuid` sits on the Bluetooth base UUID.
#[must_use]
pub fn short_form(uuid: Uuid) -> Option<u16> {
    const BASE_SUFFIX: [u8; 12] = [
        0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0x80, 0x5f, 0x9b, 0x34, 0xfb,
    ];
    let bytes = uuid.as_bytes();
    if bytes[0] != 0 || bytes[1] != 0 || bytes[4..] != BASE_SUFFIX {
        return None;
    }
    Some(u16::from_be_bytes([bytes[2], bytes[3]]))
}
