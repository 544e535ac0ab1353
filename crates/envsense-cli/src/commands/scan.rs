//! Scan command implementation.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;

use envsense_core::{AdapterStateMonitor, Radio, ScanOptions, Scanner};

use super::user_error;
use crate::format::{format_handle, scan_header};

/// Scan and print each sensor as soon as it is found. Returns the number found.
pub async fn cmd_scan<W: Write>(
    radio: Arc<dyn Radio>,
    monitor: AdapterStateMonitor,
    options: ScanOptions,
    quiet: bool,
    out: &mut W,
) -> Result<usize> {
    let scanner = Scanner::new(radio, monitor);
    if !quiet {
        tracing::info!("Scanning for sensors ({}s)...", options.timeout.as_secs());
    }
    let mut session = scanner.start_scan(options).await.map_err(user_error)?;

    let mut found = 0;
    while let Some(result) = session.next().await {
        let handle = result.map_err(user_error)?;
        if found == 0 && !quiet {
            write!(out, "{}", scan_header())?;
        }
        found += 1;
        write!(out, "{}", format_handle(&handle))?;
        out.flush()?;
    }

    if found == 0 && !quiet {
        writeln!(out, "No sensors found.")?;
    }
    Ok(found)
}
