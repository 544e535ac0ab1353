//! Session event system.
//!
//! The connection manager publishes one [`SessionEvent`] per state transition
//! and per terminal failure. UI shells subscribe through [`EventDispatcher`].

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::session::SessionState;

/// Events emitted by the connection manager.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new event types
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum SessionEvent {
    /// The session moved between states.
    StateChanged {
        address: String,
        from: SessionState,
        to: SessionState,
    },
    /// A characteristic was armed for notifications.
    NotificationsEnabled { address: String, characteristic: uuid::Uuid },
    /// A characteristic was skipped while arming notifications.
    CharacteristicSkipped {
        address: String,
        characteristic: uuid::Uuid,
        reason: String,
    },
    /// The session ended with an error.
    Failed { address: String, error: String },
}

impl SessionEvent {
    /// Address of the peripheral the event concerns.
    pub fn address(&self) -> &str {
        match self {
            SessionEvent::StateChanged { address, .. }
            | SessionEvent::NotificationsEnabled { address, .. }
            | SessionEvent::CharacteristicSkipped { address, .. }
            | SessionEvent::Failed { address, .. } => address,
        }
    }
}

/// Sender for session events.
pub type EventSender = broadcast::Sender<SessionEvent>;

/// Receiver for session events.
pub type EventReceiver = broadcast::Receiver<SessionEvent>;

/// Default broadcast capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 100;

/// Event dispatcher for sending events to multiple receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: SessionEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
