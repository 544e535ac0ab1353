//! Stream command implementation.

use std::future::{Future, pending};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use time::OffsetDateTime;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use envsense_core::{
    AdapterStateMonitor, ConnectionConfig, ConnectionManager, PreferenceStore, Radio,
};

use super::user_error;
use crate::format::{format_reading_json, format_reading_text};

/// Options for one streaming run.
#[derive(Debug, Clone)]
pub struct StreamArgs {
    /// Sensor address.
    pub address: String,
    /// Connection manager settings.
    pub config: ConnectionConfig,
    /// Stop after this long; `None` streams until `shutdown` resolves.
    pub duration: Option<Duration>,
    /// Print JSON lines instead of text.
    pub json: bool,
}

/// Connect, print readings until `shutdown`, the duration elapses or the
/// session fails, then disconnect. Returns the number of readings printed.
pub async fn cmd_stream<W, F>(
    radio: Arc<dyn Radio>,
    monitor: AdapterStateMonitor,
    preferences: Arc<dyn PreferenceStore>,
    args: StreamArgs,
    shutdown: F,
    out: &mut W,
) -> Result<u64>
where
    W: Write,
    F: Future<Output = ()>,
{
    let manager = ConnectionManager::with_preferences(radio, monitor, args.config, preferences)
        .context("Invalid connection settings")?;
    let mut readings = manager.subscribe_readings();
    let mut errors = manager.subscribe_errors();

    info!(address = %args.address, "Connecting...");
    let session = manager.connect(&args.address).await.map_err(user_error)?;
    info!(address = %session.address, id = session.id, "Streaming readings");

    let deadline = async {
        match args.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => pending().await,
        }
    };
    tokio::pin!(deadline);
    tokio::pin!(shutdown);

    let mut printed = 0;
    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => break Ok(()),
            _ = &mut deadline => break Ok(()),
            reading = readings.recv() => match reading {
                Ok(reading) => {
                    let at = OffsetDateTime::now_utc();
                    let line = if args.json {
                        format_reading_json(&reading, at)?
                    } else {
                        format_reading_text(&reading, at)
                    };
                    write!(out, "{}", line)?;
                    out.flush()?;
                    printed += 1;
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Output fell behind"),
                Err(RecvError::Closed) => break Ok(()),
            },
            message = errors.recv() => match message {
                Ok(message) => break Err(anyhow!(message)),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    manager.disconnect().await.map_err(user_error)?;
    info!(printed, "Disconnected");
    outcome.map(|()| printed)
}
