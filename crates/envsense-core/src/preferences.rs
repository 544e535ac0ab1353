//! Persisted-preference collaborator.
//!
//! The notification pipeline writes the latest temperature under
//! [`TEMPERATURE_PREFERENCE`]; a widget-style consumer reads the same key and
//! watches it for changes. Writes are fire-and-forget from the pipeline's
//! point of view.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::watch;

/// Key under which the latest temperature (°C) is stored.
pub const TEMPERATURE_PREFERENCE: &str = "pref_temperature";

/// Errors from a preference store.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PreferenceError {
    /// Backing storage could not be read or written.
    #[error("Preference storage error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be encoded or decoded.
    #[error("Preference encoding error: {0}")]
    Encoding(String),
}

/// Key/value store for persisted preferences.
pub trait PreferenceStore: Send + Sync {
    /// Store a float under `key`, replacing any previous value.
    fn put_f32(&self, key: &str, value: f32) -> Result<(), PreferenceError>;

    /// Read the float stored under `key`.
    fn get_f32(&self, key: &str) -> Result<Option<f32>, PreferenceError>;
}

/// In-memory preference store with per-key change subscriptions.
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    entries: Mutex<HashMap<String, watch::Sender<Option<f32>>>>,
}

impl MemoryPreferences {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch `key` for changes. The receiver starts with the current value.
    pub fn watch(&self, key: &str) -> watch::Receiver<Option<f32>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn put_f32(&self, key: &str, value: f32) -> Result<(), PreferenceError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .send_replace(Some(value));
        Ok(())
    }

    fn get_f32(&self, key: &str) -> Result<Option<f32>, PreferenceError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).and_then(|tx| *tx.borrow()))
    }
}
