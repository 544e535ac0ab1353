//! Peripheral discovery.
//!
//! [`Scanner::start_scan`] runs one time-bounded, service-filtered scan and
//! hands back a [`ScanSession`], a finite stream of de-duplicated
//! [`PeripheralHandle`]s. The platform scanner is a scarce shared resource:
//! each session stops it exactly once, whether the scan ends by timeout,
//! cancellation, drop or hardware failure.

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use envsense_types::uuid::ENVIRONMENTAL_SENSING_SERVICE;
use envsense_types::{PeripheralHandle, normalize_address};

use crate::adapter::AdapterStateMonitor;
use crate::error::{Error, Result, ScanError};
use crate::radio::{Radio, ScanEvent};
use crate::util::deadline_after;

/// Default scan duration.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for scanning.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Hard upper bound on the scan duration.
    pub timeout: Duration,
    /// Service UUIDs a peripheral must advertise to be reported.
    pub service_filter: Vec<Uuid>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SCAN_TIMEOUT,
            service_filter: vec![ENVIRONMENTAL_SENSING_SERVICE],
        }
    }
}

impl ScanOptions {
    /// Create new scan options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the scan timeout in seconds.
    #[must_use]
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Replace the service filter.
    #[must_use]
    pub fn service_filter(mut self, services: Vec<Uuid>) -> Self {
        self.service_filter = services;
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::invalid_config("scan timeout must be > 0"));
        }
        if self.service_filter.is_empty() {
            return Err(Error::invalid_config("service_filter must not be empty"));
        }
        Ok(())
    }
}

/// Why a scan session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanEnd {
    TimedOut,
    Cancelled,
    HardwareFailure(i32),
    RadioStopped,
}

/// Clears the scanner's busy flag when the scan task finishes.
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs scans, one at a time.
#[derive(Clone)]
pub struct Scanner {
    radio: Arc<dyn Radio>,
    monitor: AdapterStateMonitor,
    active: Arc<AtomicBool>,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("active", &self.active.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Scanner {
    /// Create a scanner over `radio`, gated by `monitor`.
    pub fn new(radio: Arc<dyn Radio>, monitor: AdapterStateMonitor) -> Self {
        Self {
            radio,
            monitor,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether a scan session is live.
    pub fn is_scanning(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Start a scan.
    ///
    /// # Errors
    ///
    /// - [`ScanError::InvalidOptions`] if `options` fail validation.
    /// - [`ScanError::AdapterNotReady`] if the adapter is not ready.
    /// - [`ScanError::ScanInProgress`] if a session from this scanner is still live.
    /// - [`ScanError::Radio`] if the radio refused to start scanning.
    #[tracing::instrument(level = "info", skip_all, fields(timeout_ms = options.timeout.as_millis() as u64))]
    pub async fn start_scan(&self, options: ScanOptions) -> std::result::Result<ScanSession, ScanError> {
        options
            .validate()
            .map_err(|e| ScanError::InvalidOptions(e.to_string()))?;

        let state = self.monitor.current().await;
        if !state.is_ready() {
            warn!(%state, "Scan blocked");
            return Err(ScanError::AdapterNotReady(state));
        }

        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ScanError::ScanInProgress);
        }
        let guard = ActiveGuard(Arc::clone(&self.active));

        let deadline = deadline_after(options.timeout);
        let mut events = self.radio.start_scan(&options.service_filter).await?;
        info!("Scan started");

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();
        let radio = Arc::clone(&self.radio);
        let filter = options.service_filter;

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let mut seen: HashSet<String> = HashSet::new();

            let end = loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break ScanEnd::Cancelled,
                    _ = sleep_until(deadline) => break ScanEnd::TimedOut,
                    event = events.next() => match event {
                        Some(ScanEvent::Advertisement(ad)) => {
                            if !ad.matches(&filter) {
                                continue;
                            }
                            let address = normalize_address(&ad.address);
                            if !seen.insert(address.clone()) {
                                continue;
                            }
                            let handle = PeripheralHandle::new(&address, ad.name);
                            debug!(address = %handle.address, name = ?handle.name, "Peripheral discovered");
                            if tx.send(Ok(handle)).is_err() {
                                break ScanEnd::Cancelled;
                            }
                        }
                        Some(ScanEvent::Failed(code)) => {
                            let _ = tx.send(Err(ScanError::HardwareFailure(code)));
                            break ScanEnd::HardwareFailure(code);
                        }
                        None => break ScanEnd::RadioStopped,
                    },
                }
            };

            if let Err(e) = radio.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
            match end {
                ScanEnd::HardwareFailure(code) => warn!(code, "Scan failed"),
                end => info!(found = seen.len(), ?end, "Scan finished"),
            }
        });

        Ok(ScanSession {
            receiver: rx,
            handle: Some(handle),
            cancel_token,
        })
    }
}

/// A live scan.
///
/// Yields each matching peripheral once, then ends after the timeout, after
/// [`cancel`](Self::cancel), or after a terminal [`ScanError::HardwareFailure`].
/// Dropping the session cancels it.
#[derive(Debug)]
pub struct ScanSession {
    receiver: mpsc::UnboundedReceiver<std::result::Result<PeripheralHandle, ScanError>>,
    handle: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
}

impl ScanSession {
    /// Stop the scan and wait until the radio scanner is released.
    ///
    /// Calling this more than once is a no-op.
    pub async fn cancel(&mut self) {
        self.cancel_token.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            warn!("Scan task failed: {}", e);
        }
    }

    /// Whether the scan task has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl Stream for ScanSession {
    type Item = std::result::Result<PeripheralHandle, ScanError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for ScanSession {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
