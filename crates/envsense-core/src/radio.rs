//! Radio capability abstraction.
//!
//! The platform Bluetooth stack is callback-driven: requests return at once
//! and their outcome arrives later through a callback. This module models that
//! shape explicitly:
//!
//! - [`Radio`] is the injected adapter handle. It reports power, runs scans and
//!   opens GATT links.
//! - [`GattLink`] issues requests on one link. Requests only *initiate* work.
//! - Every completion is delivered as a [`GattEvent`] on the link's event
//!   stream, with one variant per callback kind.
//!
//! [`crate::BtleRadio`] implements this over btleplug and [`crate::MockRadio`]
//! provides a scripted fake for tests.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::RadioResult;

/// Boxed stream of radio power changes.
pub type PowerStream = Pin<Box<dyn Stream<Item = RadioPower> + Send>>;

/// Boxed stream of scan callbacks.
pub type ScanEventStream = Pin<Box<dyn Stream<Item = ScanEvent> + Send>>;

/// Boxed stream of GATT callbacks for one link.
pub type GattEventStream = Pin<Box<dyn Stream<Item = GattEvent> + Send>>;

/// Power state of the radio hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RadioPower {
    /// Radio is on.
    On,
    /// Radio is present but off (or in an unknown transitional state).
    Off,
    /// Host has no BLE radio.
    Unsupported,
}

/// One advertisement as reported by the platform scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Hardware address of the advertiser.
    pub address: String,
    /// Advertised local name.
    pub name: Option<String>,
    /// Service UUIDs present in the advertisement.
    pub services: Vec<Uuid>,
}

impl Advertisement {
    /// Create an advertisement with no name and no services.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: None,
            services: Vec::new(),
        }
    }

    /// Set the advertised name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Add an advertised service.
    #[must_use]
    pub fn with_service(mut self, service: Uuid) -> Self {
        self.services.push(service);
        self
    }

    /// Whether the advertisement carries any of `filter`. An empty filter matches everything.
    pub fn matches(&self, filter: &[Uuid]) -> bool {
        filter.is_empty() || self.services.iter().any(|s| filter.contains(s))
    }
}

/// Scan callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// An advertisement was received.
    Advertisement(Advertisement),
    /// The platform reported a scan failure with the given code.
    Failed(i32),
}

/// Link transport requested when opening a GATT link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Transport {
    /// Let the platform choose. Some stacks fall back to classic Bluetooth.
    #[default]
    Auto,
    /// Force the low-energy transport.
    LowEnergy,
}

/// Status code reported with a GATT completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GattStatus(pub u8);

impl GattStatus {
    /// Operation completed successfully.
    pub const SUCCESS: GattStatus = GattStatus(0);
    /// Generic failure, reported by most stacks for link-layer errors.
    pub const GATT_ERROR: GattStatus = GattStatus(133);

    /// Whether the status signals success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::SUCCESS => write!(f, "{} (success)", self.0),
            Self::GATT_ERROR => write!(f, "{} (GATT error)", self.0),
            GattStatus(code) => write!(f, "{code}"),
        }
    }
}

/// Link-layer connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// Link is up.
    Connected,
    /// Link is down.
    Disconnected,
}

/// A characteristic found during service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Descriptor UUIDs attached to the characteristic.
    pub descriptors: Vec<Uuid>,
}

impl GattCharacteristic {
    /// Characteristic carrying a client configuration descriptor.
    pub fn notifiable(uuid: Uuid) -> Self {
        Self {
            uuid,
            descriptors: vec![envsense_types::uuid::CLIENT_CHARACTERISTIC_CONFIG],
        }
    }
}

/// A service found during service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    /// Service UUID.
    pub uuid: Uuid,
    /// Characteristics under the service.
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    /// Create a service with the given characteristics.
    pub fn new(uuid: Uuid, characteristics: Vec<GattCharacteristic>) -> Self {
        Self {
            uuid,
            characteristics,
        }
    }
}

/// GATT callback, one variant per callback kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattEvent {
    /// Link state changed, or a connect attempt completed.
    ConnectionStateChanged {
        /// Status of the operation that caused the change.
        status: GattStatus,
        /// New link state.
        state: LinkState,
    },
    /// Service discovery completed.
    ServicesDiscovered {
        /// Discovery status.
        status: GattStatus,
        /// Services found (empty on failure).
        services: Vec<GattService>,
    },
    /// A descriptor write completed.
    DescriptorWritten {
        /// Owning characteristic.
        characteristic: Uuid,
        /// Descriptor that was written.
        descriptor: Uuid,
        /// Write status.
        status: GattStatus,
    },
    /// The peripheral pushed a new characteristic value.
    CharacteristicChanged {
        /// Characteristic UUID.
        characteristic: Uuid,
        /// Raw value.
        value: Bytes,
    },
    /// A characteristic read completed.
    CharacteristicRead {
        /// Characteristic UUID.
        characteristic: Uuid,
        /// Raw value (empty on failure).
        value: Bytes,
        /// Read status.
        status: GattStatus,
    },
}

/// A freshly opened link together with its callback stream.
pub struct LinkChannel {
    /// Request side of the link.
    pub link: Arc<dyn GattLink>,
    /// Completion side of the link.
    pub events: GattEventStream,
}

impl fmt::Debug for LinkChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkChannel")
            .field("address", &self.link.address())
            .finish_non_exhaustive()
    }
}

/// The platform radio, injected into every component that needs it.
#[async_trait]
pub trait Radio: Send + Sync + 'static {
    /// Current power state.
    async fn power(&self) -> RadioResult<RadioPower>;

    /// Stream of power changes.
    async fn power_events(&self) -> RadioResult<PowerStream>;

    /// Start a scan filtered by service UUID.
    ///
    /// The returned stream carries advertisements until [`stop_scan`](Self::stop_scan)
    /// is called or the platform reports a failure.
    async fn start_scan(&self, services: &[Uuid]) -> RadioResult<ScanEventStream>;

    /// Stop the running scan and release the platform scanner.
    async fn stop_scan(&self) -> RadioResult<()>;

    /// Open a GATT link to `address` over the given transport. Does not connect.
    async fn open_link(&self, address: &str, transport: Transport) -> RadioResult<LinkChannel>;
}

/// Request side of one GATT link.
///
/// Every method returns once the request has been handed to the stack. A
/// returned error means the request was rejected outright; otherwise the
/// outcome arrives as a [`GattEvent`].
#[async_trait]
pub trait GattLink: Send + Sync {
    /// Address of the remote peripheral.
    fn address(&self) -> &str;

    /// Establish the link. Completes with [`GattEvent::ConnectionStateChanged`].
    async fn connect(&self) -> RadioResult<()>;

    /// Enumerate services. Completes with [`GattEvent::ServicesDiscovered`].
    async fn discover_services(&self) -> RadioResult<()>;

    /// Register or remove local interest in notifications. Completes synchronously.
    async fn set_notification_interest(&self, characteristic: Uuid, enabled: bool)
    -> RadioResult<()>;

    /// Write a descriptor. Completes with [`GattEvent::DescriptorWritten`].
    async fn write_descriptor(
        &self,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> RadioResult<()>;

    /// Read a characteristic. Completes with [`GattEvent::CharacteristicRead`].
    async fn read_characteristic(&self, characteristic: Uuid) -> RadioResult<()>;

    /// Drop the link.
    async fn disconnect(&self) -> RadioResult<()>;

    /// Release every resource held for the link. Must follow [`disconnect`](Self::disconnect).
    async fn close(&self);
}
