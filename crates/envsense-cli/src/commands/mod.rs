//! Command implementations for the CLI.
//!
//! Commands take the radio and an output writer as parameters, so the same
//! code runs against the btleplug adapter in `main` and the mock radio in
//! tests.

mod last;
mod scan;
mod status;
mod stream;

use std::sync::Arc;

use anyhow::{Context, Result};
use envsense_core::{AdapterStateMonitor, BtleRadio, PermissionStatus, Radio, UserMessage};

pub use last::cmd_last;
pub use scan::cmd_scan;
pub use status::cmd_status;
pub use stream::{StreamArgs, cmd_stream};

/// Open the first Bluetooth adapter and its readiness monitor.
///
/// Desktop stacks have no runtime permission or location gate, so both are
/// reported as granted.
pub async fn open_radio() -> Result<(Arc<dyn Radio>, AdapterStateMonitor)> {
    let radio: Arc<dyn Radio> = Arc::new(
        BtleRadio::new()
            .await
            .context("Failed to open Bluetooth adapter")?,
    );
    let monitor =
        AdapterStateMonitor::with_permissions(Arc::clone(&radio), PermissionStatus::granted());
    Ok((radio, monitor))
}

/// Wrap a library error so that its user-facing text is what gets printed.
fn user_error<E>(error: E) -> anyhow::Error
where
    E: UserMessage + std::error::Error + Send + Sync + 'static,
{
    let message = error.user_message();
    anyhow::Error::new(error).context(message)
}
