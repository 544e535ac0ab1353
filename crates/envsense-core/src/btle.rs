//! btleplug-backed [`Radio`].
//!
//! btleplug exposes async request/response calls, while the rest of the crate
//! expects requests that only initiate work and report back through
//! [`GattEvent`]s. [`BtleLink`] bridges the two by running each request on its
//! own task and pushing the completion into the link's event channel.
//!
//! Peripherals are identified by Bluetooth address on Linux and Windows. On
//! macOS CoreBluetooth hides addresses and reports `00:00:00:00:00:00`, so the
//! peripheral UUID assigned by the Mac is used instead.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, CharPropFlags, Characteristic, Manager as _,
    Peripheral as _, ScanFilter, Service,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use envsense_types::normalize_address;
use envsense_types::uuid::{
    CLIENT_CHARACTERISTIC_CONFIG, ENABLE_NOTIFICATION_VALUE, ENVIRONMENTAL_SENSING_SERVICE,
};

use crate::error::{RadioError, RadioResult};
use crate::radio::{
    Advertisement, GattCharacteristic, GattEvent, GattLink, GattService, GattStatus, LinkChannel,
    LinkState, PowerStream, Radio, RadioPower, ScanEvent, ScanEventStream, Transport,
};

/// Address CoreBluetooth reports for every peripheral.
const HIDDEN_ADDRESS: &str = "00:00:00:00:00:00";

/// How long `disconnect` may block the caller.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `open_link` scans for a peripheral the adapter has not seen yet.
const LOOKUP_SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> RadioResult<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters.into_iter().next().ok_or(RadioError::NoAdapter)
}

/// Format a peripheral ID as a string.
///
/// The `Debug` form wraps the platform identifier in `PeripheralId(...)`.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Address used to identify a peripheral: the Bluetooth address when the
/// platform exposes it, the peripheral ID otherwise.
pub fn peripheral_address(address: &str, peripheral_id: &PeripheralId) -> String {
    choose_identifier(address, || format_peripheral_id(peripheral_id))
}

fn choose_identifier(address: &str, fallback: impl FnOnce() -> String) -> String {
    if address == HIDDEN_ADDRESS {
        normalize_address(&fallback())
    } else {
        normalize_address(address)
    }
}

fn radio_power(state: CentralState) -> RadioPower {
    match state {
        CentralState::PoweredOn => RadioPower::On,
        // CoreBluetooth starts out as Unknown until its delegate settles.
        _ => RadioPower::Off,
    }
}

/// Convert a discovered btleplug service.
///
/// Some backends do not list the client configuration descriptor, so it is
/// added for every characteristic that can notify or indicate.
fn gatt_service(service: &Service) -> GattService {
    let characteristics = service
        .characteristics
        .iter()
        .map(|characteristic| {
            let mut descriptors: Vec<Uuid> =
                characteristic.descriptors.iter().map(|d| d.uuid).collect();
            let notifies = characteristic
                .properties
                .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE);
            if notifies && !descriptors.contains(&CLIENT_CHARACTERISTIC_CONFIG) {
                descriptors.push(CLIENT_CHARACTERISTIC_CONFIG);
            }
            GattCharacteristic {
                uuid: characteristic.uuid,
                descriptors,
            }
        })
        .collect();
    GattService::new(service.uuid, characteristics)
}

async fn advertisement(adapter: &Adapter, id: &PeripheralId) -> Option<Advertisement> {
    let peripheral = match adapter.peripheral(id).await {
        Ok(p) => p,
        Err(e) => {
            trace!("Failed to get peripheral: {}", e);
            return None;
        }
    };
    let props = peripheral.properties().await.ok().flatten()?;

    let mut advertisement =
        Advertisement::new(peripheral_address(&props.address.to_string(), &peripheral.id()));
    advertisement.name = props.local_name;
    advertisement.services = props.services;
    Some(advertisement)
}

/// Search the adapter's known peripherals for `address`.
async fn find_peripheral(adapter: &Adapter, address: &str) -> RadioResult<Option<Peripheral>> {
    let wanted = normalize_address(address);

    for peripheral in adapter.peripherals().await? {
        if let Ok(Some(props)) = peripheral.properties().await
            && peripheral_address(&props.address.to_string(), &peripheral.id()) == wanted
        {
            return Ok(Some(peripheral));
        }
    }

    Ok(None)
}

/// Scan for `address` until it advertises or `timeout` elapses.
///
/// CoreBluetooth and WinRT only know peripherals seen advertising in this
/// process, and BlueZ only those it has cached. When `scan_running` is set the
/// caller's scan is reused and left running.
async fn scan_for_peripheral(
    adapter: &Adapter,
    address: &str,
    scan_running: bool,
    timeout: Duration,
) -> RadioResult<Option<Peripheral>> {
    let wanted = normalize_address(address);
    let mut events = adapter.events().await?;
    if !scan_running {
        adapter
            .start_scan(ScanFilter {
                services: vec![ENVIRONMENTAL_SENSING_SERVICE],
            })
            .await?;
    }
    debug!(address = %wanted, ?timeout, "Peripheral not cached, scanning");

    let search = async {
        while let Some(event) = events.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };
            if let Ok(peripheral) = adapter.peripheral(&id).await
                && let Ok(Some(props)) = peripheral.properties().await
                && peripheral_address(&props.address.to_string(), &id) == wanted
            {
                return Some(peripheral);
            }
        }
        None
    };
    let found = tokio::time::timeout(timeout, search).await.unwrap_or(None);

    if !scan_running && let Err(e) = adapter.stop_scan().await {
        warn!("Failed to stop lookup scan: {}", e);
    }
    Ok(found)
}

/// [`Radio`] implementation over the first btleplug adapter.
pub struct BtleRadio {
    adapter: Adapter,
    scan_token: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for BtleRadio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleRadio").finish_non_exhaustive()
    }
}

impl BtleRadio {
    /// Open the first available adapter.
    pub async fn new() -> RadioResult<Self> {
        Ok(Self::from_adapter(get_adapter().await?))
    }

    /// Wrap an adapter obtained elsewhere.
    pub fn from_adapter(adapter: Adapter) -> Self {
        Self {
            adapter,
            scan_token: Mutex::new(None),
        }
    }

    fn scan_running(&self) -> bool {
        self.scan_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Find `address` in the adapter's cache, scanning briefly on a miss.
    async fn locate(&self, address: &str) -> RadioResult<Peripheral> {
        if let Some(peripheral) = find_peripheral(&self.adapter, address).await? {
            return Ok(peripheral);
        }
        scan_for_peripheral(
            &self.adapter,
            address,
            self.scan_running(),
            LOOKUP_SCAN_TIMEOUT,
        )
        .await?
        .ok_or_else(|| RadioError::UnknownPeripheral(address.to_string()))
    }

    fn replace_scan_token(&self, token: Option<CancellationToken>) -> Option<CancellationToken> {
        let mut slot = self.scan_token.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *slot, token)
    }
}

#[async_trait]
impl Radio for BtleRadio {
    async fn power(&self) -> RadioResult<RadioPower> {
        Ok(radio_power(self.adapter.adapter_state().await?))
    }

    async fn power_events(&self) -> RadioResult<PowerStream> {
        let events = self.adapter.events().await?;
        let stream = events.filter_map(|event| async move {
            match event {
                CentralEvent::StateUpdate(state) => Some(radio_power(state)),
                _ => None,
            }
        });
        Ok(Box::pin(stream))
    }

    async fn start_scan(&self, services: &[Uuid]) -> RadioResult<ScanEventStream> {
        let events = self.adapter.events().await?;
        self.adapter
            .start_scan(ScanFilter {
                services: services.to_vec(),
            })
            .await?;

        let token = CancellationToken::new();
        if let Some(previous) = self.replace_scan_token(Some(token.clone())) {
            previous.cancel();
        }
        info!(filter = ?services, "BLE scan started");

        let adapter = self.adapter.clone();
        let stream = events
            .take_until(token.cancelled_owned())
            .filter_map(move |event| {
                let adapter = adapter.clone();
                async move {
                    match event {
                        CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                            advertisement(&adapter, &id).await.map(ScanEvent::Advertisement)
                        }
                        _ => None,
                    }
                }
            });
        Ok(Box::pin(stream))
    }

    async fn stop_scan(&self) -> RadioResult<()> {
        if let Some(token) = self.replace_scan_token(None) {
            token.cancel();
        }
        self.adapter.stop_scan().await?;
        debug!("BLE scan stopped");
        Ok(())
    }

    async fn open_link(&self, address: &str, transport: Transport) -> RadioResult<LinkChannel> {
        // btleplug only speaks LE, so both transports behave the same.
        trace!(%address, ?transport, "Opening link");
        let peripheral = self.locate(address).await?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(LinkShared {
            peripheral,
            events: sender,
            characteristics: Mutex::new(HashMap::new()),
            interest: Mutex::new(HashSet::new()),
            cancel_token: CancellationToken::new(),
        });

        watch_link_loss(&self.adapter, &shared).await?;

        Ok(LinkChannel {
            link: Arc::new(BtleLink {
                address: normalize_address(address),
                shared,
            }),
            events: Box::pin(UnboundedReceiverStream::new(receiver)),
        })
    }
}

/// Report a link drop as [`GattEvent::ConnectionStateChanged`].
async fn watch_link_loss(adapter: &Adapter, shared: &Arc<LinkShared>) -> RadioResult<()> {
    let mut events = adapter.events().await?;
    let id = shared.peripheral.id();
    let link = Arc::clone(shared);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = link.cancel_token.cancelled() => break,
                event = events.next() => match event {
                    Some(CentralEvent::DeviceDisconnected(gone)) if gone == id => {
                        debug!(peripheral = %format_peripheral_id(&id), "Link dropped");
                        link.emit(GattEvent::ConnectionStateChanged {
                            status: GattStatus::GATT_ERROR,
                            state: LinkState::Disconnected,
                        });
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }
    });
    Ok(())
}

struct LinkShared {
    peripheral: Peripheral,
    events: mpsc::UnboundedSender<GattEvent>,
    characteristics: Mutex<HashMap<Uuid, Characteristic>>,
    interest: Mutex<HashSet<Uuid>>,
    cancel_token: CancellationToken,
}

impl LinkShared {
    fn emit(&self, event: GattEvent) {
        // Receiver is gone once the link has been closed.
        let _ = self.events.send(event);
    }

    fn characteristic(&self, uuid: Uuid) -> RadioResult<Characteristic> {
        self.characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&uuid)
            .cloned()
            .ok_or(RadioError::UnknownCharacteristic(uuid))
    }

    fn is_interested(&self, uuid: Uuid) -> bool {
        self.interest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&uuid)
    }

    /// Forward notifications for characteristics with registered interest.
    async fn forward_notifications(self: Arc<Self>) {
        let mut notifications = match self.peripheral.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("Notification stream unavailable: {}", e);
                return;
            }
        };
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => break,
                next = notifications.next() => match next {
                    Some(notification) if self.is_interested(notification.uuid) => {
                        self.emit(GattEvent::CharacteristicChanged {
                            characteristic: notification.uuid,
                            value: Bytes::from(notification.value),
                        });
                    }
                    Some(notification) => trace!(uuid = %notification.uuid, "Notification without interest"),
                    None => break,
                },
            }
        }
    }
}

/// One GATT link over btleplug.
pub struct BtleLink {
    address: String,
    shared: Arc<LinkShared>,
}

impl BtleLink {
    /// Run `request` in the background and deliver its completion event.
    fn spawn_request<F>(&self, operation: &'static str, request: F)
    where
        F: Future<Output = GattEvent> + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            tokio::select! {
                _ = shared.cancel_token.cancelled() => trace!(operation, "Request abandoned"),
                event = request => shared.emit(event),
            }
        });
    }
}

fn status_of<T>(operation: &str, result: &btleplug::Result<T>) -> GattStatus {
    match result {
        Ok(_) => GattStatus::SUCCESS,
        Err(e) => {
            warn!(operation, "GATT request failed: {}", e);
            GattStatus::GATT_ERROR
        }
    }
}

#[async_trait]
impl GattLink for BtleLink {
    fn address(&self) -> &str {
        &self.address
    }

    async fn connect(&self) -> RadioResult<()> {
        let shared = Arc::clone(&self.shared);
        self.spawn_request("connect", async move {
            let result = shared.peripheral.connect().await;
            let status = status_of("connect", &result);
            let state = if result.is_ok() {
                tokio::spawn(Arc::clone(&shared).forward_notifications());
                LinkState::Connected
            } else {
                LinkState::Disconnected
            };
            GattEvent::ConnectionStateChanged { status, state }
        });
        Ok(())
    }

    async fn discover_services(&self) -> RadioResult<()> {
        let shared = Arc::clone(&self.shared);
        self.spawn_request("discover services", async move {
            let result = shared.peripheral.discover_services().await;
            let status = status_of("discover services", &result);
            if !status.is_success() {
                return GattEvent::ServicesDiscovered {
                    status,
                    services: Vec::new(),
                };
            }

            let discovered = shared.peripheral.services();
            let mut characteristics = shared
                .characteristics
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for service in &discovered {
                for characteristic in &service.characteristics {
                    characteristics.insert(characteristic.uuid, characteristic.clone());
                }
            }
            GattEvent::ServicesDiscovered {
                status,
                services: discovered.iter().map(gatt_service).collect(),
            }
        });
        Ok(())
    }

    async fn set_notification_interest(
        &self,
        characteristic: Uuid,
        enabled: bool,
    ) -> RadioResult<()> {
        let found = self.shared.characteristic(characteristic)?;
        if enabled
            && !found
                .properties
                .intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
        {
            return Err(RadioError::rejected(format!(
                "{characteristic} does not support notifications"
            )));
        }

        let mut interest = self
            .shared
            .interest
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if enabled {
            interest.insert(characteristic);
        } else {
            interest.remove(&characteristic);
        }
        Ok(())
    }

    async fn write_descriptor(
        &self,
        characteristic: Uuid,
        descriptor: Uuid,
        value: &[u8],
    ) -> RadioResult<()> {
        let target = self.shared.characteristic(characteristic)?;
        let shared = Arc::clone(&self.shared);

        if descriptor == CLIENT_CHARACTERISTIC_CONFIG {
            // btleplug owns the configuration descriptor and writes it on (un)subscribe.
            let enable = value == ENABLE_NOTIFICATION_VALUE;
            self.spawn_request("write descriptor", async move {
                let result = if enable {
                    shared.peripheral.subscribe(&target).await
                } else {
                    shared.peripheral.unsubscribe(&target).await
                };
                GattEvent::DescriptorWritten {
                    characteristic,
                    descriptor,
                    status: status_of("write descriptor", &result),
                }
            });
            return Ok(());
        }

        let found = target
            .descriptors
            .iter()
            .find(|d| d.uuid == descriptor)
            .cloned()
            .ok_or_else(|| RadioError::rejected(format!("unknown descriptor {descriptor}")))?;
        let value = value.to_vec();
        self.spawn_request("write descriptor", async move {
            let result = shared.peripheral.write_descriptor(&found, &value).await;
            GattEvent::DescriptorWritten {
                characteristic,
                descriptor,
                status: status_of("write descriptor", &result),
            }
        });
        Ok(())
    }

    async fn read_characteristic(&self, characteristic: Uuid) -> RadioResult<()> {
        let target = self.shared.characteristic(characteristic)?;
        let shared = Arc::clone(&self.shared);
        self.spawn_request("read characteristic", async move {
            let result = shared.peripheral.read(&target).await;
            let status = status_of("read characteristic", &result);
            GattEvent::CharacteristicRead {
                characteristic,
                value: result.map(Bytes::from).unwrap_or_default(),
                status,
            }
        });
        Ok(())
    }

    async fn disconnect(&self) -> RadioResult<()> {
        tokio::time::timeout(DISCONNECT_TIMEOUT, self.shared.peripheral.disconnect())
            .await
            .map_err(|_| RadioError::timeout("disconnect", DISCONNECT_TIMEOUT))??;
        self.shared.emit(GattEvent::ConnectionStateChanged {
            status: GattStatus::SUCCESS,
            state: LinkState::Disconnected,
        });
        Ok(())
    }

    async fn close(&self) {
        self.shared.cancel_token.cancel();
        self.shared
            .interest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!(address = %self.address, "Link closed");
    }
}
