//! Example: Streaming Temperature and Pressure
//!
//! This example connects to one sensor, enables notifications and prints
//! every reading that passes the rate limiter.
//!
//! Run with: `cargo run --example stream_readings -- <DEVICE_ADDRESS>`

use std::env;
use std::sync::Arc;
use std::time::Duration;

use envsense_core::{
    AdapterStateMonitor, BtleRadio, ConnectionConfig, ConnectionManager, Radio, UserMessage,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Get device address from command line
    let args: Vec<String> = env::args().collect();
    let address = if args.len() > 1 {
        &args[1]
    } else {
        eprintln!("Usage: {} <DEVICE_ADDRESS>", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} AA:BB:CC:DD:EE:FF", args[0]);
        std::process::exit(1);
    };

    let radio: Arc<dyn Radio> = Arc::new(BtleRadio::new().await?);
    let monitor = AdapterStateMonitor::new(Arc::clone(&radio));
    let manager = ConnectionManager::new(radio, monitor, ConnectionConfig::default())?;
    let mut readings = manager.subscribe_readings();

    println!("Connecting to {}...", address);
    let session = match manager.connect(address).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("{}", e.user_message());
            std::process::exit(1);
        }
    };
    let snapshot = manager.snapshot().await?;
    println!(
        "Streaming session {} ({} characteristic(s))",
        session.id,
        snapshot.enabled.len()
    );
    println!();

    // Stream for one minute
    let deadline = tokio::time::sleep(Duration::from_secs(60));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            reading = readings.recv() => match reading {
                Ok(reading) => println!("  {}", reading),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("  (skipped {} readings)", n);
                }
                Err(_) => break,
            },
        }
    }

    manager.disconnect().await?;
    println!("Disconnected.");
    Ok(())
}
