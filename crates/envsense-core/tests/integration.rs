//! Integration tests for envsense-core
//!
//! These tests drive the scanner, connection manager and notification
//! pipeline together against [`MockRadio`], so they run without hardware:
//! `cargo test --package envsense-core --test integration`

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::{Instant, sleep};
use uuid::Uuid;

use envsense_core::uuids::{ENVIRONMENTAL_SENSING_SERVICE, PRESSURE, TEMPERATURE};
use envsense_core::{
    AdapterState, AdapterStateMonitor, Advertisement, ConnectError, ConnectionConfig,
    ConnectionManager, GattEvent, GattService, GattStatus, LinkCall, LinkState, MemoryPreferences,
    MockPeripheral, MockRadio, PreferenceStore, Radio, ScanOptions, Scanner, SensorReading,
    SessionEvent, SessionState, TEMPERATURE_PREFERENCE,
};

const ADDR: &str = "AA:BB:CC:DD:EE:FF";

/// Battery service, a service the manager has no use for.
const BATTERY_SERVICE: Uuid = Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);

struct Harness {
    radio: MockRadio,
    monitor: AdapterStateMonitor,
    shared: Arc<dyn Radio>,
}

impl Harness {
    fn new(radio: MockRadio) -> Self {
        let shared: Arc<dyn Radio> = Arc::new(radio.clone());
        let monitor = AdapterStateMonitor::new(Arc::clone(&shared));
        Self {
            radio,
            monitor,
            shared,
        }
    }

    fn scanner(&self) -> Scanner {
        Scanner::new(Arc::clone(&self.shared), self.monitor.clone())
    }

    fn manager(&self) -> ConnectionManager {
        ConnectionManager::new(
            Arc::clone(&self.shared),
            self.monitor.clone(),
            ConnectionConfig::default(),
        )
        .unwrap()
    }
}

fn state_changes(events: &mut envsense_core::EventReceiver) -> Vec<SessionState> {
    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::StateChanged { to, .. } = event {
            states.push(to);
        }
    }
    states
}

#[tokio::test(start_paused = true)]
async fn test_scan_emits_each_address_once() {
    let harness = Harness::new(MockRadio::new());
    assert_eq!(harness.monitor.current().await, AdapterState::Ready);

    let scanner = harness.scanner();
    let started = Instant::now();
    let mut session = scanner
        .start_scan(ScanOptions::default().timeout(Duration::from_millis(5000)))
        .await
        .unwrap();
    assert_eq!(harness.radio.scan_filter(), vec![ENVIRONMENTAL_SENSING_SERVICE]);

    let radio = harness.radio.clone();
    tokio::spawn(async move {
        let sensor = Advertisement::new(ADDR)
            .with_name("Sensor")
            .with_service(ENVIRONMENTAL_SENSING_SERVICE);
        sleep(Duration::from_millis(200)).await;
        radio.advertise(sensor.clone());
        radio.advertise(Advertisement::new("11:22:33:44:55:66").with_service(BATTERY_SERVICE));
        sleep(Duration::from_millis(100)).await;
        radio.advertise(sensor);
    });

    let mut found = Vec::new();
    while let Some(result) = session.next().await {
        found.push(result.unwrap());
    }

    assert_eq!(found.len(), 1);
    assert_eq!(found[0].address, ADDR);
    assert_eq!(found[0].display_name(), "Sensor");
    assert!(started.elapsed() >= Duration::from_millis(5000));
    assert!(started.elapsed() < Duration::from_millis(5100));
    assert_eq!(harness.radio.scan_stops(), 1);

    // Already finished; this only joins the task.
    session.cancel().await;
    assert!(!scanner.is_scanning());
    assert_eq!(harness.radio.scan_stops(), 1);
}

#[tokio::test]
async fn test_connect_and_stream_temperature() {
    let harness = Harness::new(MockRadio::new());
    harness
        .radio
        .add_peripheral(MockPeripheral::environmental(ADDR, &[TEMPERATURE]));

    let preferences = Arc::new(MemoryPreferences::new());
    let mut widget = preferences.watch(TEMPERATURE_PREFERENCE);
    let manager = ConnectionManager::with_preferences(
        Arc::clone(&harness.shared),
        harness.monitor.clone(),
        ConnectionConfig::default(),
        preferences.clone(),
    )
    .unwrap();
    let mut readings = manager.subscribe_readings();
    let mut events = manager.subscribe_events();

    let handle = manager.connect(ADDR).await.unwrap();
    assert_eq!(handle.address, ADDR);
    assert_eq!(
        state_changes(&mut events),
        vec![
            SessionState::Connecting,
            SessionState::ServiceDiscovery,
            SessionState::EnablingNotifications,
            SessionState::Streaming,
        ]
    );

    assert!(harness.radio.notify(ADDR, TEMPERATURE, vec![0xE8, 0x03]));
    let reading = readings.recv().await.unwrap();
    assert_eq!(reading, SensorReading::Temperature { centi_celsius: 1000 });
    assert_eq!(reading.celsius(), Some(10.0));

    widget.wait_for(|value| value.is_some()).await.unwrap();
    assert_eq!(
        preferences.get_f32(TEMPERATURE_PREFERENCE).unwrap(),
        Some(10.0)
    );
}

#[tokio::test]
async fn test_missing_service_skips_enabling() {
    let harness = Harness::new(MockRadio::new());
    harness
        .radio
        .add_peripheral(MockPeripheral::new(ADDR).service(GattService::new(BATTERY_SERVICE, vec![])));
    let manager = harness.manager();
    let mut events = manager.subscribe_events();
    let mut errors = manager.subscribe_errors();

    let err = manager.connect(ADDR).await.unwrap_err();
    assert_eq!(err, ConnectError::ServiceNotFound { service_count: 1 });
    assert_eq!(
        state_changes(&mut events),
        vec![
            SessionState::Connecting,
            SessionState::ServiceDiscovery,
            SessionState::Disconnecting,
            SessionState::Disconnected,
        ]
    );
    assert_eq!(
        errors.recv().await.unwrap(),
        "Sensor does not expose environmental sensing"
    );

    let calls = harness.radio.link_calls(ADDR);
    assert!(
        !calls
            .iter()
            .any(|call| matches!(call, LinkCall::WriteDescriptor { .. }))
    );
    assert_eq!(&calls[calls.len() - 2..], &[LinkCall::Disconnect, LinkCall::Close]);
}

#[tokio::test]
async fn test_error_status_while_streaming_releases_link() {
    let harness = Harness::new(MockRadio::new());
    harness
        .radio
        .add_peripheral(MockPeripheral::environmental(ADDR, &[TEMPERATURE, PRESSURE]));
    let manager = harness.manager();
    let mut state = manager.state();

    manager.connect(ADDR).await.unwrap();
    harness.radio.emit(
        ADDR,
        GattEvent::ConnectionStateChanged {
            status: GattStatus::GATT_ERROR,
            state: LinkState::Connected,
        },
    );
    state
        .wait_for(|s| *s == SessionState::Disconnected)
        .await
        .unwrap();

    let calls = harness.radio.link_calls(ADDR);
    let disconnect = calls.iter().position(|c| *c == LinkCall::Disconnect);
    let close = calls.iter().position(|c| *c == LinkCall::Close);
    assert!(disconnect.is_some());
    assert!(disconnect < close);
    assert_eq!(close, Some(calls.len() - 1));
}

#[tokio::test(start_paused = true)]
async fn test_notification_burst_is_rate_limited() {
    let harness = Harness::new(MockRadio::new());
    harness
        .radio
        .add_peripheral(MockPeripheral::environmental(ADDR, &[PRESSURE]));
    let manager = harness.manager();
    let mut readings = manager.subscribe_readings();
    manager.connect(ADDR).await.unwrap();

    for i in 0..10u32 {
        let value = 10_000 + i;
        harness.radio.notify(ADDR, PRESSURE, value.to_le_bytes().to_vec());
        sleep(Duration::from_millis(40)).await;
    }
    assert_eq!(
        readings.recv().await.unwrap(),
        SensorReading::Pressure { deci_hpa: 10_000 }
    );

    // The burst ended 400ms after it started; nothing else gets through.
    sleep(Duration::from_millis(50)).await;
    assert!(readings.try_recv().is_err());
}

#[tokio::test]
async fn test_scan_then_connect() {
    let radio = MockRadio::new();
    let sensor = MockPeripheral::environmental(ADDR, &[TEMPERATURE]).name("Sensor");
    let advertisement = sensor.advertisement();
    radio.add_peripheral(sensor);
    let harness = Harness::new(radio);

    let scanner = harness.scanner();
    let mut scan = scanner.start_scan(ScanOptions::default()).await.unwrap();
    assert!(harness.radio.advertise(advertisement));
    let found = scan.next().await.unwrap().unwrap();
    scan.cancel().await;
    assert!(!harness.radio.scan_active());

    let manager = harness.manager();
    let handle = manager.connect(&found.address).await.unwrap();
    assert_eq!(handle.address, found.address);

    let snapshot = manager.snapshot().await.unwrap();
    assert_eq!(snapshot.state, SessionState::Streaming);
    assert!(snapshot.enabled.contains(&TEMPERATURE));
}

#[tokio::test]
async fn test_session_events_serialize() {
    let harness = Harness::new(MockRadio::new());
    harness
        .radio
        .add_peripheral(MockPeripheral::environmental(ADDR, &[TEMPERATURE]));
    let manager = harness.manager();
    let mut events = manager.subscribe_events();
    manager.connect(ADDR).await.unwrap();

    let first = events.recv().await.unwrap();
    let json = serde_json::to_value(&first).unwrap();
    assert_eq!(json["type"], "state_changed");
    assert_eq!(json["address"], ADDR);
    assert_eq!(json["to"], "connecting");
}
