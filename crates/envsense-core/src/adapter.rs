//! Adapter state monitoring.
//!
//! [`AdapterStateMonitor`] folds radio power and the permission status handed
//! in by the UI shell into one [`AdapterState`]. The state is computed lazily:
//! the radio is first queried when someone asks for it, after which power
//! changes are pushed by a background task.
//!
//! When several inputs block at once the reported reason follows a fixed
//! precedence, radio first and permissions second:
//!
//! `Unsupported` > `PoweredOff` > `PermissionDenied` > `LocationServicesDisabled` > `Ready`

use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use tokio::sync::{OnceCell, watch};
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use envsense_types::AdapterState;

use crate::radio::{Radio, RadioPower};

/// Runtime permission status, supplied by the permission collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PermissionStatus {
    /// Bluetooth/location runtime permissions were granted.
    pub granted: bool,
    /// Location services are switched on.
    pub location_services_enabled: bool,
}

impl PermissionStatus {
    /// Everything granted. Desktop stacks have no permission gate, so this is the default.
    pub const fn granted() -> Self {
        Self {
            granted: true,
            location_services_enabled: true,
        }
    }

    /// Permissions refused.
    pub const fn denied() -> Self {
        Self {
            granted: false,
            location_services_enabled: true,
        }
    }
}

impl Default for PermissionStatus {
    fn default() -> Self {
        Self::granted()
    }
}

#[derive(Debug, Clone, Copy)]
struct Inputs {
    power: Option<RadioPower>,
    permissions: PermissionStatus,
}

impl Inputs {
    fn compute(&self) -> AdapterState {
        match self.power {
            Some(RadioPower::Unsupported) => AdapterState::Unsupported,
            Some(RadioPower::Off) | None => AdapterState::PoweredOff,
            Some(RadioPower::On) if !self.permissions.granted => AdapterState::PermissionDenied,
            Some(RadioPower::On) if !self.permissions.location_services_enabled => {
                AdapterState::LocationServicesDisabled
            }
            Some(RadioPower::On) => AdapterState::Ready,
        }
    }
}

struct Shared {
    inputs: Mutex<Inputs>,
    state: watch::Sender<AdapterState>,
}

impl Shared {
    fn apply(&self, update: impl FnOnce(&mut Inputs)) {
        let next = {
            let mut inputs = self.inputs.lock().unwrap_or_else(PoisonError::into_inner);
            update(&mut inputs);
            inputs.compute()
        };
        let mut previous = next;
        let changed = self.state.send_if_modified(|current| {
            previous = *current;
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            info!(from = %previous, to = %next, "Adapter state changed");
        }
    }
}

struct MonitorInner {
    radio: Arc<dyn Radio>,
    shared: Arc<Shared>,
    started: OnceCell<()>,
    cancel_token: CancellationToken,
}

impl Drop for MonitorInner {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Observes radio readiness.
///
/// Cheap to clone; all clones share one state. The power forwarding task
/// stops when the last clone is dropped.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use envsense_core::{AdapterStateMonitor, MockRadio, RadioPower};
/// use envsense_types::AdapterState;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let radio = MockRadio::with_power(RadioPower::Off);
/// let monitor = AdapterStateMonitor::new(Arc::new(radio.clone()));
/// assert_eq!(monitor.current().await, AdapterState::PoweredOff);
/// # }
/// ```
#[derive(Clone)]
pub struct AdapterStateMonitor {
    inner: Arc<MonitorInner>,
}

impl std::fmt::Debug for AdapterStateMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterStateMonitor")
            .field("state", &*self.inner.shared.state.borrow())
            .field("started", &self.inner.started.initialized())
            .finish()
    }
}

impl AdapterStateMonitor {
    /// Create a monitor with permissions granted.
    pub fn new(radio: Arc<dyn Radio>) -> Self {
        Self::with_permissions(radio, PermissionStatus::default())
    }

    /// Create a monitor with an initial permission status.
    pub fn with_permissions(radio: Arc<dyn Radio>, permissions: PermissionStatus) -> Self {
        let inputs = Inputs {
            power: None,
            permissions,
        };
        let (state, _) = watch::channel(inputs.compute());
        Self {
            inner: Arc::new(MonitorInner {
                radio,
                shared: Arc::new(Shared {
                    inputs: Mutex::new(inputs),
                    state,
                }),
                started: OnceCell::new(),
                cancel_token: CancellationToken::new(),
            }),
        }
    }

    /// Current adapter state. The first call queries the radio.
    pub async fn current(&self) -> AdapterState {
        self.ensure_started().await;
        *self.inner.shared.state.borrow()
    }

    /// Subscribe to state changes. The receiver starts at the current value.
    pub async fn subscribe(&self) -> watch::Receiver<AdapterState> {
        self.ensure_started().await;
        self.inner.shared.state.subscribe()
    }

    /// Stream of states: the current one, then every change.
    pub async fn changes(&self) -> WatchStream<AdapterState> {
        WatchStream::new(self.subscribe().await)
    }

    /// Update the permission status reported by the UI shell.
    pub fn set_permissions(&self, permissions: PermissionStatus) {
        debug!(?permissions, "Permission status updated");
        self.inner
            .shared
            .apply(|inputs| inputs.permissions = permissions);
    }

    async fn ensure_started(&self) {
        self.inner
            .started
            .get_or_init(|| async {
                let inner = &self.inner;

                // Subscribe before querying so no change slips in between.
                match inner.radio.power_events().await {
                    Ok(mut events) => {
                        let shared = Arc::clone(&inner.shared);
                        let token = inner.cancel_token.clone();
                        tokio::spawn(async move {
                            loop {
                                tokio::select! {
                                    _ = token.cancelled() => break,
                                    next = events.next() => match next {
                                        Some(power) => shared.apply(|inputs| inputs.power = Some(power)),
                                        None => break,
                                    },
                                }
                            }
                            debug!("Adapter power forwarding stopped");
                        });
                    }
                    Err(e) => warn!("Radio power events unavailable: {}", e),
                }

                let power = match inner.radio.power().await {
                    Ok(power) => power,
                    Err(e) => {
                        warn!("Failed to query radio power: {}", e);
                        RadioPower::Unsupported
                    }
                };
                inner.shared.apply(|inputs| inputs.power = Some(power));
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRadio;

    fn monitor(radio: &MockRadio) -> AdapterStateMonitor {
        AdapterStateMonitor::new(Arc::new(radio.clone()))
    }

    #[test]
    fn test_precedence() {
        let mut inputs = Inputs {
            power: Some(RadioPower::Unsupported),
            permissions: PermissionStatus {
                granted: false,
                location_services_enabled: false,
            },
        };
        assert_eq!(inputs.compute(), AdapterState::Unsupported);

        inputs.power = Some(RadioPower::Off);
        assert_eq!(inputs.compute(), AdapterState::PoweredOff);

        inputs.power = Some(RadioPower::On);
        assert_eq!(inputs.compute(), AdapterState::PermissionDenied);

        inputs.permissions.granted = true;
        assert_eq!(inputs.compute(), AdapterState::LocationServicesDisabled);

        inputs.permissions.location_services_enabled = true;
        assert_eq!(inputs.compute(), AdapterState::Ready);
    }

    #[tokio::test]
    async fn test_lazy_current() {
        let radio = MockRadio::new();
        let monitor = monitor(&radio);
        assert!(!monitor.inner.started.initialized());
        assert_eq!(monitor.current().await, AdapterState::Ready);
        assert!(monitor.inner.started.initialized());
    }

    #[tokio::test]
    async fn test_power_changes_are_pushed() {
        let radio = MockRadio::new();
        let monitor = monitor(&radio);
        let mut rx = monitor.subscribe().await;
        assert_eq!(*rx.borrow_and_update(), AdapterState::Ready);

        radio.set_power(RadioPower::Off);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), AdapterState::PoweredOff);

        radio.set_power(RadioPower::On);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), AdapterState::Ready);
    }

    #[tokio::test]
    async fn test_permission_changes_are_pushed() {
        let radio = MockRadio::new();
        let monitor = monitor(&radio);
        let mut changes = monitor.changes().await;
        assert_eq!(changes.next().await, Some(AdapterState::Ready));

        monitor.set_permissions(PermissionStatus::denied());
        assert_eq!(changes.next().await, Some(AdapterState::PermissionDenied));

        monitor.set_permissions(PermissionStatus {
            granted: true,
            location_services_enabled: false,
        });
        assert_eq!(
            changes.next().await,
            Some(AdapterState::LocationServicesDisabled)
        );
    }

    #[tokio::test]
    async fn test_unchanged_state_not_pushed() {
        let radio = MockRadio::new();
        let monitor = monitor(&radio);
        let mut rx = monitor.subscribe().await;
        rx.borrow_and_update();

        monitor.set_permissions(PermissionStatus::granted());
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_unsupported_radio() {
        let radio = MockRadio::with_power(RadioPower::Unsupported);
        let monitor = AdapterStateMonitor::with_permissions(
            Arc::new(radio),
            PermissionStatus::denied(),
        );
        assert_eq!(monitor.current().await, AdapterState::Unsupported);
    }
}
