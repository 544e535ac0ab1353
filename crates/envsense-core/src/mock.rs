//! Mock radio implementation for testing.
//!
//! [`MockRadio`] implements [`Radio`] without BLE hardware. Peripherals are
//! scripted with [`MockPeripheral`]; by default every request completes with
//! success right away, and each stage can be switched to a failure status or
//! to "no reply" so tests can drive timeouts and late callbacks by hand.
//!
//! # Features
//!
//! - **Power control**: change radio power and watch the adapter state follow
//! - **Scan injection**: push advertisements and platform scan failures
//! - **Per-stage statuses**: connect, discovery, descriptor writes and reads
//! - **Event injection**: notifications, link drops and arbitrary GATT events
//! - **Call log**: ordered record of every link request for assertions

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{Notify, mpsc, watch};
use tokio_stream::wrappers::{UnboundedReceiverStream, WatchStream};
use uuid::Uuid;

use envsense_types::normalize_address;
use envsense_types::uuid::ENVIRONMENTAL_SENSING_SERVICE;

use crate::error::{RadioError, RadioResult};
use crate::radio::{
    Advertisement, GattCharacteristic, GattEvent, GattLink, GattService, GattStatus, LinkChannel,
    LinkState, PowerStream, Radio, RadioPower, ScanEvent, ScanEventStream, Transport,
};

/// A request recorded by a mock link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    /// [`GattLink::connect`].
    Connect,
    /// [`GattLink::discover_services`].
    DiscoverServices,
    /// [`GattLink::set_notification_interest`].
    SetNotification {
        /// Target characteristic.
        characteristic: Uuid,
        /// Requested interest.
        enabled: bool,
    },
    /// [`GattLink::write_descriptor`].
    WriteDescriptor {
        /// Owning characteristic.
        characteristic: Uuid,
        /// Written descriptor.
        descriptor: Uuid,
        /// Written value.
        value: Vec<u8>,
    },
    /// [`GattLink::read_characteristic`].
    Read(Uuid),
    /// [`GattLink::disconnect`].
    Disconnect,
    /// [`GattLink::close`].
    Close,
}

/// Scripted behaviour of one mock peripheral.
///
/// # Example
///
/// ```
/// use envsense_core::{GattStatus, MockPeripheral};
/// use envsense_types::uuid::{PRESSURE, TEMPERATURE};
///
/// let sensor = MockPeripheral::environmental("AA:BB:CC:DD:EE:FF", &[TEMPERATURE, PRESSURE])
///     .name("Sensor")
///     .descriptor_status(PRESSURE, GattStatus::GATT_ERROR);
/// ```
#[derive(Debug, Clone)]
pub struct MockPeripheral {
    address: String,
    name: Option<String>,
    services: Vec<GattService>,
    connect_status: GattStatus,
    discovery_status: GattStatus,
    descriptor_status: HashMap<Uuid, GattStatus>,
    silent_descriptors: HashSet<Uuid>,
    rejected_interest: HashSet<Uuid>,
    rejected_reads: HashSet<Uuid>,
    read_values: HashMap<Uuid, Bytes>,
    read_status: GattStatus,
    auto_connect: bool,
    auto_discover: bool,
}

impl MockPeripheral {
    /// A peripheral with no services.
    pub fn new(address: &str) -> Self {
        Self {
            address: normalize_address(address),
            name: None,
            services: Vec::new(),
            connect_status: GattStatus::SUCCESS,
            discovery_status: GattStatus::SUCCESS,
            descriptor_status: HashMap::new(),
            silent_descriptors: HashSet::new(),
            rejected_interest: HashSet::new(),
            rejected_reads: HashSet::new(),
            read_values: HashMap::new(),
            read_status: GattStatus::SUCCESS,
            auto_connect: true,
            auto_discover: true,
        }
    }

    /// A peripheral exposing the Environmental Sensing service with the given
    /// notifiable characteristics.
    pub fn environmental(address: &str, characteristics: &[Uuid]) -> Self {
        let characteristics = characteristics
            .iter()
            .map(|uuid| GattCharacteristic::notifiable(*uuid))
            .collect();
        Self::new(address).service(GattService::new(
            ENVIRONMENTAL_SENSING_SERVICE,
            characteristics,
        ))
    }

    /// Set the advertised name.
    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Add a service.
    #[must_use]
    pub fn service(mut self, service: GattService) -> Self {
        self.services.push(service);
        self
    }

    /// Status reported for the connect attempt.
    #[must_use]
    pub fn connect_status(mut self, status: GattStatus) -> Self {
        self.connect_status = status;
        self
    }

    /// Status reported for service discovery.
    #[must_use]
    pub fn discovery_status(mut self, status: GattStatus) -> Self {
        self.discovery_status = status;
        self
    }

    /// Status reported for the descriptor write on `characteristic`.
    #[must_use]
    pub fn descriptor_status(mut self, characteristic: Uuid, status: GattStatus) -> Self {
        self.descriptor_status.insert(characteristic, status);
        self
    }

    /// Never complete the descriptor write on `characteristic`.
    #[must_use]
    pub fn silent_descriptor(mut self, characteristic: Uuid) -> Self {
        self.silent_descriptors.insert(characteristic);
        self
    }

    /// Reject local notification interest for `characteristic`.
    #[must_use]
    pub fn reject_interest(mut self, characteristic: Uuid) -> Self {
        self.rejected_interest.insert(characteristic);
        self
    }

    /// Reject read requests for `characteristic` before they reach the peripheral.
    #[must_use]
    pub fn reject_read(mut self, characteristic: Uuid) -> Self {
        self.rejected_reads.insert(characteristic);
        self
    }

    /// Whether any service exposes `characteristic`.
    fn exposes(&self, characteristic: Uuid) -> bool {
        self.services
            .iter()
            .flat_map(|s| &s.characteristics)
            .any(|c| c.uuid == characteristic)
    }

    /// Value returned when `characteristic` is read.
    #[must_use]
    pub fn read_value(mut self, characteristic: Uuid, value: impl Into<Bytes>) -> Self {
        self.read_values.insert(characteristic, value.into());
        self
    }

    /// Status reported for reads.
    #[must_use]
    pub fn read_status(mut self, status: GattStatus) -> Self {
        self.read_status = status;
        self
    }

    /// Do not answer connect requests; the test emits the completion itself.
    #[must_use]
    pub fn manual_connect(mut self) -> Self {
        self.auto_connect = false;
        self
    }

    /// Do not answer discovery requests; the test emits the completion itself.
    #[must_use]
    pub fn manual_discovery(mut self) -> Self {
        self.auto_discover = false;
        self
    }

    /// Advertisement this peripheral would send.
    pub fn advertisement(&self) -> Advertisement {
        Advertisement {
            address: self.address.clone(),
            name: self.name.clone(),
            services: self.services.iter().map(|s| s.uuid).collect(),
        }
    }
}

struct LinkRecord {
    generation: u64,
    events: Option<mpsc::UnboundedSender<GattEvent>>,
}

#[derive(Default)]
struct MockState {
    scan: Option<mpsc::UnboundedSender<ScanEvent>>,
    scan_filter: Vec<Uuid>,
    scan_starts: u32,
    scan_stops: u32,
    reject_scan: bool,
    peripherals: HashMap<String, MockPeripheral>,
    links: HashMap<String, LinkRecord>,
    calls: HashMap<String, Vec<LinkCall>>,
    transports: HashMap<String, Vec<Transport>>,
    generation: u64,
}

struct MockInner {
    power: watch::Sender<RadioPower>,
    state: Mutex<MockState>,
    changed: Notify,
}

impl MockInner {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A fake radio for testing.
///
/// Cloning yields another handle to the same radio.
#[derive(Clone)]
pub struct MockRadio {
    inner: Arc<MockInner>,
}

impl std::fmt::Debug for MockRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("MockRadio")
            .field("power", &*self.inner.power.borrow())
            .field("scan_active", &state.scan.is_some())
            .field("peripherals", &state.peripherals.len())
            .finish()
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRadio {
    /// A powered-on radio with no peripherals.
    pub fn new() -> Self {
        Self::with_power(RadioPower::On)
    }

    /// A radio starting in the given power state.
    pub fn with_power(power: RadioPower) -> Self {
        let (power, _) = watch::channel(power);
        Self {
            inner: Arc::new(MockInner {
                power,
                state: Mutex::new(MockState::default()),
                changed: Notify::new(),
            }),
        }
    }

    /// Change radio power.
    pub fn set_power(&self, power: RadioPower) {
        self.inner.power.send_replace(power);
    }

    /// Register a peripheral that links can be opened to.
    pub fn add_peripheral(&self, peripheral: MockPeripheral) {
        let mut state = self.inner.lock();
        state
            .peripherals
            .insert(peripheral.address.clone(), peripheral);
    }

    /// Make the next `start_scan` calls fail (or succeed again).
    pub fn reject_scan_start(&self, reject: bool) {
        self.inner.lock().reject_scan = reject;
    }

    /// Deliver an advertisement to the running scan, as the platform would.
    ///
    /// The platform filter is not applied. Returns `false` if no scan is running.
    pub fn advertise(&self, advertisement: Advertisement) -> bool {
        self.send_scan(ScanEvent::Advertisement(advertisement))
    }

    /// Deliver a platform scan failure to the running scan.
    pub fn fail_scan(&self, code: i32) -> bool {
        self.send_scan(ScanEvent::Failed(code))
    }

    fn send_scan(&self, event: ScanEvent) -> bool {
        let state = self.inner.lock();
        state
            .scan
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Whether a scan is running.
    pub fn scan_active(&self) -> bool {
        self.inner.lock().scan.is_some()
    }

    /// Service filter of the most recent scan.
    pub fn scan_filter(&self) -> Vec<Uuid> {
        self.inner.lock().scan_filter.clone()
    }

    /// Number of `start_scan` calls.
    pub fn scan_starts(&self) -> u32 {
        self.inner.lock().scan_starts
    }

    /// Number of `stop_scan` calls.
    pub fn scan_stops(&self) -> u32 {
        self.inner.lock().scan_stops
    }

    /// Push a notification on the open link to `address`.
    pub fn notify(&self, address: &str, characteristic: Uuid, value: impl Into<Bytes>) -> bool {
        self.emit(
            address,
            GattEvent::CharacteristicChanged {
                characteristic,
                value: value.into(),
            },
        )
    }

    /// Report the link to `address` as dropped with `status`.
    pub fn drop_link(&self, address: &str, status: GattStatus) -> bool {
        self.emit(
            address,
            GattEvent::ConnectionStateChanged {
                status,
                state: LinkState::Disconnected,
            },
        )
    }

    /// Deliver an arbitrary GATT event on the open link to `address`.
    ///
    /// Returns `false` if no link is open or the link was closed.
    pub fn emit(&self, address: &str, event: GattEvent) -> bool {
        let state = self.inner.lock();
        state
            .links
            .get(&normalize_address(address))
            .and_then(|record| record.events.as_ref())
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    /// Every request issued on links to `address`, in order.
    pub fn link_calls(&self, address: &str) -> Vec<LinkCall> {
        self.inner
            .lock()
            .calls
            .get(&normalize_address(address))
            .cloned()
            .unwrap_or_default()
    }

    /// Transports requested for links to `address`, one per `open_link`.
    pub fn transports(&self, address: &str) -> Vec<Transport> {
        self.inner
            .lock()
            .transports
            .get(&normalize_address(address))
            .cloned()
            .unwrap_or_default()
    }

    /// Number of links opened to `address`.
    pub fn open_count(&self, address: &str) -> usize {
        self.transports(address).len()
    }

    /// Wait until `call` has been issued on a link to `address`.
    pub async fn wait_for_call(&self, address: &str, call: LinkCall) {
        let address = normalize_address(address);
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self
                .inner
                .lock()
                .calls
                .get(&address)
                .is_some_and(|calls| calls.contains(&call))
            {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Radio for MockRadio {
    async fn power(&self) -> RadioResult<RadioPower> {
        Ok(*self.inner.power.borrow())
    }

    async fn power_events(&self) -> RadioResult<PowerStream> {
        Ok(Box::pin(WatchStream::from_changes(
            self.inner.power.subscribe(),
        )))
    }

    async fn start_scan(&self, services: &[Uuid]) -> RadioResult<ScanEventStream> {
        let mut state = self.inner.lock();
        if state.reject_scan {
            return Err(RadioError::rejected("scan start rejected"));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.scan = Some(tx);
        state.scan_filter = services.to_vec();
        state.scan_starts += 1;
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn stop_scan(&self) -> RadioResult<()> {
        let mut state = self.inner.lock();
        state.scan = None;
        state.scan_stops += 1;
        Ok(())
    }

    async fn open_link(&self, address: &str, transport: Transport) -> RadioResult<LinkChannel> {
        let address = normalize_address(address);
        let mut state = self.inner.lock();
        if !state.peripherals.contains_key(&address) {
            return Err(RadioError::UnknownPeripheral(address));
        }

        state.generation += 1;
        let generation = state.generation;
        let (tx, rx) = mpsc::unbounded_channel();
        state.links.insert(
            address.clone(),
            LinkRecord {
                generation,
                events: Some(tx),
            },
        );
        state
            .transports
            .entry(address.clone())
            .or_default()
            .push(transport);
        drop(state);
        self.inner.changed.notify_waiters();

        Ok(LinkChannel {
            link: Arc::new(MockLink {
                inner: Arc::clone(&self.inner),
                address,
                generation,
            }),
            events: Box::pin(UnboundedReceiverStream::new(rx)),
        })
    }
}

/// Request side of a mock link.
struct MockLink {
    inner: Arc<MockInner>,
    address: String,
    generation: u64,
}

impl MockLink {
    /// Record `call` and, if the peripheral script says so, reply.
    fn handle(&self, call: LinkCall) -> RadioResult<()> {
        let mut state = self.inner.lock();
        state
            .calls
            .entry(self.address.clone())
            .or_default()
            .push(call.clone());

        let peripheral = state
            .peripherals
            .get(&self.address)
            .cloned()
            .ok_or_else(|| RadioError::UnknownPeripheral(self.address.clone()))?;

        let closes = call == LinkCall::Close;
        let mut result = Ok(());
        let reply = match call {
            LinkCall::Connect if peripheral.auto_connect => {
                let state = if peripheral.connect_status.is_success() {
                    LinkState::Connected
                } else {
                    LinkState::Disconnected
                };
                Some(GattEvent::ConnectionStateChanged {
                    status: peripheral.connect_status,
                    state,
                })
            }
            LinkCall::DiscoverServices if peripheral.auto_discover => {
                let services = if peripheral.discovery_status.is_success() {
                    peripheral.services.clone()
                } else {
                    Vec::new()
                };
                Some(GattEvent::ServicesDiscovered {
                    status: peripheral.discovery_status,
                    services,
                })
            }
            LinkCall::SetNotification {
                characteristic,
                enabled: true,
            } if peripheral.rejected_interest.contains(&characteristic) => {
                result = Err(RadioError::rejected(format!(
                    "notification interest for {characteristic}"
                )));
                None
            }
            LinkCall::WriteDescriptor {
                characteristic,
                descriptor,
                ..
            } if !peripheral.silent_descriptors.contains(&characteristic) => {
                Some(GattEvent::DescriptorWritten {
                    characteristic,
                    descriptor,
                    status: peripheral
                        .descriptor_status
                        .get(&characteristic)
                        .copied()
                        .unwrap_or(GattStatus::SUCCESS),
                })
            }
            LinkCall::Read(characteristic) if !peripheral.exposes(characteristic) => {
                result = Err(RadioError::UnknownCharacteristic(characteristic));
                None
            }
            LinkCall::Read(characteristic) if peripheral.rejected_reads.contains(&characteristic) => {
                result = Err(RadioError::rejected(format!("read of {characteristic}")));
                None
            }
            LinkCall::Read(characteristic) => Some(GattEvent::CharacteristicRead {
                characteristic,
                value: peripheral
                    .read_values
                    .get(&characteristic)
                    .cloned()
                    .unwrap_or_default(),
                status: peripheral.read_status,
            }),
            LinkCall::Disconnect => Some(GattEvent::ConnectionStateChanged {
                status: GattStatus::SUCCESS,
                state: LinkState::Disconnected,
            }),
            _ => None,
        };

        if let Some(record) = state.links.get_mut(&self.address)
            && record.generation == self.generation
        {
            if closes {
                record.events = None;
            } else if let (Some(event), Some(tx)) = (reply, record.events.as_ref()) {
                let _ = tx.send(event);
            }
        }
        drop(state);
        self.inner.changed.notify_waiters();
        result
    }
}

#[async_trait]
impl GattLink for MockLink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> RadioResult<()> {
        self.handle(LinkCall::Connect)
    }

    async fn discover_services(&self) -> RadioResult<()> {
        self.handle(LinkCall::DiscoverServices)
    }

    async fn set_notification_interest(
        &self,
        characteristic: Uuid,
        enabled: bool,
    ) -> RadioResult<()> {
        self.handle(LinkCall::SetNotification {
            characteristic,
            enabled,
        })
    }

    async fn write_descriptor(
        &self,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> RadioResult<()> {
        self.handle(LinkCall::WriteDescriptor {
            characteristic,
            descriptor,
            value: value.to_vec(),
        })
    }

    async fn read_characteristic(&self, characteristic: Uuid) -> RadioResult<()> {
        self.handle(LinkCall::Read(characteristic))
    }

    async fn disconnect(&self) -> RadioResult<()> {
        self.handle(LinkCall::Disconnect)
    }

    async fn close(&self) {
        let _ = self.handle(LinkCall::Close);
    }
}
