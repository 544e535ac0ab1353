//! Example: Scanning for Environmental Sensors
//!
//! This example scans for peripherals advertising the Environmental Sensing
//! service and prints each one once.
//!
//! Run with: `cargo run --example scan_devices`

use std::sync::Arc;

use envsense_core::{AdapterStateMonitor, BtleRadio, Radio, ScanOptions, Scanner, UserMessage};
use futures::StreamExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let radio: Arc<dyn Radio> = Arc::new(BtleRadio::new().await?);
    let monitor = AdapterStateMonitor::new(Arc::clone(&radio));
    let scanner = Scanner::new(radio, monitor);

    println!("Scanning for environmental sensors...");
    println!();

    let mut session = match scanner.start_scan(ScanOptions::default().timeout_secs(10)).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{}", e.user_message());
            return Ok(());
        }
    };

    let mut found = 0;
    while let Some(result) = session.next().await {
        match result {
            Ok(peripheral) => {
                found += 1;
                println!("  {}", peripheral.display_name());
                println!("    Address: {}", peripheral.address);
                println!();
            }
            Err(e) => eprintln!("{}", e.user_message()),
        }
    }

    if found == 0 {
        println!("No sensors found.");
        println!();
        println!("Make sure:");
        println!("  - The sensor is powered on");
        println!("  - Bluetooth is enabled on this computer");
        println!("  - The sensor is within range");
    }

    Ok(())
}
