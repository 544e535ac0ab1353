//! Hardware integration tests for envsense-core
//!
//! These tests require actual BLE hardware and should be run with:
//! ```
//! cargo test --package envsense-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Set the `ENVSENSE_DEVICE` environment variable to the address of a sensor
//! exposing the Environmental Sensing service. Tests that need a sensor are
//! skipped when it is not set.
//!
//! Example:
//! ```
//! ENVSENSE_DEVICE="AA:BB:CC:DD:EE:FF" cargo test --package envsense-core --test hardware_tests -- --ignored --nocapture
//! ```

use std::env;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::timeout;

use envsense_core::{
    AdapterState, AdapterStateMonitor, BtleRadio, ConnectionConfig, ConnectionManager, Radio,
    ScanOptions, Scanner, SessionState,
};

/// Default timeout for BLE operations
const BLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Get device address from environment
fn get_device() -> Option<String> {
    env::var("ENVSENSE_DEVICE").ok().filter(|s| !s.is_empty())
}

async fn setup() -> (Arc<dyn Radio>, AdapterStateMonitor) {
    let radio: Arc<dyn Radio> = Arc::new(BtleRadio::new().await.expect("No Bluetooth adapter"));
    let monitor = AdapterStateMonitor::new(Arc::clone(&radio));
    (radio, monitor)
}

// =============================================================================
// Adapter Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_adapter_ready() {
    let (_radio, monitor) = setup().await;
    let state = monitor.current().await;
    println!("Adapter state: {}", state);
    assert_eq!(state, AdapterState::Ready, "Enable Bluetooth to run hardware tests");
}

// =============================================================================
// Scan Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_scan_terminates() {
    let (radio, monitor) = setup().await;
    let scanner = Scanner::new(radio, monitor);

    let session = scanner
        .start_scan(ScanOptions::default().timeout_secs(10))
        .await
        .expect("Scan failed to start");

    let found: Vec<_> = timeout(BLE_TIMEOUT, session.collect::<Vec<_>>())
        .await
        .expect("Scan did not terminate");

    println!("Found {} sensor(s)", found.len());
    for result in found {
        match result {
            Ok(peripheral) => println!("  {} ({})", peripheral.display_name(), peripheral.address),
            Err(e) => println!("  scan error: {}", e),
        }
    }
}

// =============================================================================
// Connection Tests
// =============================================================================

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_connect_and_receive_reading() {
    let Some(address) = get_device() else {
        println!("ENVSENSE_DEVICE not set, skipping");
        return;
    };
    let (radio, monitor) = setup().await;

    // The peripheral must be known to the adapter before connecting.
    let scanner = Scanner::new(Arc::clone(&radio), monitor.clone());
    let session = scanner
        .start_scan(ScanOptions::default().timeout_secs(10))
        .await
        .expect("Scan failed to start");
    let _ = timeout(BLE_TIMEOUT, session.collect::<Vec<_>>()).await;

    let manager = ConnectionManager::new(radio, monitor, ConnectionConfig::default())
        .expect("Invalid config");
    let mut readings = manager.subscribe_readings();

    let handle = timeout(BLE_TIMEOUT, manager.connect(&address))
        .await
        .expect("Connect timed out")
        .expect("Connect failed");
    println!("Connected: session {}", handle.id);

    let snapshot = manager.snapshot().await.expect("Manager stopped");
    println!("Enabled characteristics: {:?}", snapshot.enabled);
    assert_eq!(snapshot.state, SessionState::Streaming);

    match timeout(Duration::from_secs(60), readings.recv()).await {
        Ok(Ok(reading)) => println!("Reading: {}", reading),
        Ok(Err(e)) => panic!("Reading stream failed: {}", e),
        Err(_) => println!("No notification within 60s (sensor may update slowly)"),
    }

    manager.disconnect().await.expect("Manager stopped");
    assert_eq!(*manager.state().borrow(), SessionState::Disconnected);
}
