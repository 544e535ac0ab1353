//! Connection session state.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConnectError;

/// Stage of a connection session.
///
/// ```text
/// Disconnected -> Connecting -> ServiceDiscovery -> EnablingNotifications -> Streaming
///                     |               |                      |                  |
///                     +---------------+----------------------+------------------+--> Disconnecting -> Disconnected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No link.
    #[default]
    Disconnected,
    /// Link requested, waiting for it to come up.
    Connecting,
    /// Link up, enumerating services.
    ServiceDiscovery,
    /// Arming notifications on target characteristics.
    EnablingNotifications,
    /// Notifications armed; events are flowing.
    Streaming,
    /// Releasing the link.
    Disconnecting,
}

impl SessionState {
    /// Whether a session in this state is still being set up.
    #[must_use]
    pub fn is_establishing(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::ServiceDiscovery
                | SessionState::EnablingNotifications
        )
    }

    /// Whether a link is held in this state.
    #[must_use]
    pub fn holds_link(&self) -> bool {
        !matches!(self, SessionState::Disconnected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::ServiceDiscovery => "service discovery",
            SessionState::EnablingNotifications => "enabling notifications",
            SessionState::Streaming => "streaming",
            SessionState::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Identifies one streaming session, returned by [`crate::ConnectionManager::connect`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle {
    /// Monotonic session id, unique per manager.
    pub id: u64,
    /// Peripheral address.
    pub address: String,
}

/// Point-in-time view of the manager's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Session id, if a session exists.
    pub id: Option<u64>,
    /// Target address, if a session exists.
    pub address: Option<String>,
    /// Current state.
    pub state: SessionState,
    /// Characteristics with notifications armed.
    pub enabled: BTreeSet<Uuid>,
    /// Error that ended the most recent session, if any.
    pub last_error: Option<ConnectError>,
}

impl SessionSnapshot {
    /// Snapshot of a manager with no session.
    pub fn idle(last_error: Option<ConnectError>) -> Self {
        Self {
            id: None,
            address: None,
            state: SessionState::Disconnected,
            enabled: BTreeSet::new(),
            last_error,
        }
    }
}
