//! Core BLE library for environmental sensing peripherals.
//!
//! This crate connects to peripherals exposing the GATT Environmental Sensing
//! service (0x181A), keeps one session alive and turns temperature and
//! pressure notifications into a stream of decoded readings.
//!
//! # Features
//!
//! - **Adapter monitoring**: one readiness state built from radio power and permissions
//! - **Scanning**: time-boxed, service-filtered and deduplicated discovery
//! - **Connection management**: an actor-driven state machine with per-stage deadlines
//! - **Notification pipeline**: decode, rate-limit and publish readings
//! - **Preferences**: the latest temperature persisted through a pluggable store
//! - **Mock radio**: scripted peripherals for tests without hardware
//!
//! # Architecture
//!
//! The platform stack sits behind the [`Radio`] and [`GattLink`] traits. Requests
//! only initiate work; completions come back as [`GattEvent`]s on the link's
//! event stream. [`BtleRadio`] implements the traits over btleplug and
//! [`MockRadio`] over a script.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use envsense_core::{
//!     AdapterStateMonitor, BtleRadio, ConnectionConfig, ConnectionManager, Radio, ScanOptions,
//!     Scanner,
//! };
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let radio: Arc<dyn Radio> = Arc::new(BtleRadio::new().await?);
//!     let monitor = AdapterStateMonitor::new(Arc::clone(&radio));
//!
//!     // Find a sensor
//!     let scanner = Scanner::new(Arc::clone(&radio), monitor.clone());
//!     let mut scan = scanner.start_scan(ScanOptions::default()).await?;
//!     let Some(Ok(sensor)) = scan.next().await else {
//!         return Ok(());
//!     };
//!     scan.cancel().await;
//!
//!     // Stream its readings
//!     let manager = ConnectionManager::new(radio, monitor, ConnectionConfig::default())?;
//!     let mut readings = manager.subscribe_readings();
//!     manager.connect(&sensor.address).await?;
//!     while let Ok(reading) = readings.recv().await {
//!         println!("{reading}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod btle;
pub mod connection;
pub mod error;
pub mod events;
pub mod messages;
pub mod mock;
pub mod pipeline;
pub mod preferences;
pub mod radio;
pub mod scan;
pub mod session;
mod util;

// Core exports
pub use adapter::{AdapterStateMonitor, PermissionStatus};
pub use btle::{BtleLink, BtleRadio, format_peripheral_id, get_adapter, peripheral_address};
pub use connection::{ConnectionConfig, ConnectionManager};
pub use error::{ConnectError, Error, RadioError, RadioResult, Result, ScanError};
pub use events::{EventDispatcher, EventReceiver, EventSender, SessionEvent};
pub use messages::UserMessage;
pub use mock::{LinkCall, MockPeripheral, MockRadio};
pub use pipeline::{NotificationPipeline, PipelineConfig, PipelineStats, RateLimiter};
pub use preferences::{MemoryPreferences, PreferenceError, PreferenceStore, TEMPERATURE_PREFERENCE};
pub use radio::{
    Advertisement, GattCharacteristic, GattEvent, GattEventStream, GattLink, GattService,
    GattStatus, LinkChannel, LinkState, PowerStream, Radio, RadioPower, ScanEvent,
    ScanEventStream, Transport,
};
pub use scan::{ScanOptions, ScanSession, Scanner};
pub use session::{SessionHandle, SessionSnapshot, SessionState};

// Re-export from envsense-types
pub use envsense_types::uuid as uuids;
pub use envsense_types::{
    AdapterState, CharacteristicEvent, DecodeError, EventSource, PeripheralHandle, SensorReading,
};
