//! Status command implementation.

use std::io::Write;

use anyhow::Result;

use envsense_core::{AdapterState, AdapterStateMonitor};

use crate::format::format_adapter_state;

/// Print the adapter state and its user message.
pub async fn cmd_status<W: Write>(monitor: &AdapterStateMonitor, out: &mut W) -> Result<AdapterState> {
    let state = monitor.current().await;
    write!(out, "{}", format_adapter_state(state))?;
    Ok(state)
}
