//! Notification pipeline.
//!
//! Sits between the connection manager and the UI shell for the lifetime of
//! one streaming session:
//!
//! 1. Raw [`CharacteristicEvent`]s are stamped on arrival and queued.
//! 2. A leading-edge [`RateLimiter`] admits the first event of each window and
//!    drops the rest of the burst.
//! 3. Admitted events are decoded with [`envsense_types::codec`]. Decode errors
//!    are logged and dropped.
//! 4. Temperatures are written to the [`PreferenceStore`] on the blocking
//!    pool, then readings are broadcast in arrival order.
//!
//! The pipeline is cancelled and joined when its session leaves streaming.
//! Events still queued at that point are discarded, never published.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::{self, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use envsense_types::codec;
use envsense_types::{CharacteristicEvent, SensorReading};

use crate::error::{Error, Result};
use crate::preferences::{PreferenceStore, TEMPERATURE_PREFERENCE};

/// Default rate-limit window.
pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::from_millis(500);

/// Options for the notification pipeline.
///
/// ```
/// use std::time::Duration;
/// use envsense_core::PipelineConfig;
///
/// let config = PipelineConfig::default().window(Duration::from_millis(250));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Leading-edge rate-limit window. Zero admits every event.
    pub window: Duration,
    /// Preference key for the latest temperature.
    pub preference_key: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_RATE_LIMIT_WINDOW,
            preference_key: TEMPERATURE_PREFERENCE.to_string(),
        }
    }
}

impl PipelineConfig {
    /// Set the rate-limit window.
    #[must_use]
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the preference key for temperature readings.
    #[must_use]
    pub fn preference_key(mut self, key: impl Into<String>) -> Self {
        self.preference_key = key.into();
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> Result<()> {
        if self.preference_key.trim().is_empty() {
            return Err(Error::invalid_config("preference_key must not be empty"));
        }
        Ok(())
    }
}

/// Leading-edge rate limiter.
///
/// Admits an event if no event was admitted within the last `window`.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    window: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    /// Create a limiter with the given window.
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Decide whether an event arriving at `now` is admitted.
    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Counters reported when a pipeline shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Events received from the session.
    pub received: u64,
    /// Events dropped by the rate limiter.
    pub throttled: u64,
    /// Events dropped because they failed to decode.
    pub decode_errors: u64,
    /// Readings published.
    pub published: u64,
    /// Events still queued when the pipeline was stopped.
    pub discarded: u64,
}

/// A running notification pipeline bound to one session.
pub struct NotificationPipeline {
    sender: Option<mpsc::UnboundedSender<(Instant, CharacteristicEvent)>>,
    handle: Option<JoinHandle<PipelineStats>>,
    cancel_token: CancellationToken,
}

impl NotificationPipeline {
    /// Spawn a pipeline publishing to `readings`.
    pub fn spawn(
        config: PipelineConfig,
        readings: broadcast::Sender<SensorReading>,
        preferences: Option<Arc<dyn PreferenceStore>>,
    ) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<(Instant, CharacteristicEvent)>();
        let cancel_token = CancellationToken::new();
        let task_token = cancel_token.clone();

        let handle = tokio::spawn(async move {
            let mut limiter = RateLimiter::new(config.window);
            let mut stats = PipelineStats::default();

            loop {
                let (arrived, event) = tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    next = receiver.recv() => match next {
                        Some(item) => item,
                        None => break,
                    },
                };
                stats.received += 1;

                if !limiter.admit(arrived) {
                    stats.throttled += 1;
                    trace!(uuid = %event.characteristic, "Event throttled");
                    continue;
                }

                let reading = match codec::decode_event(&event) {
                    Ok(reading) => reading,
                    Err(e) => {
                        stats.decode_errors += 1;
                        warn!(uuid = %event.characteristic, "Dropping undecodable event: {}", e);
                        continue;
                    }
                };

                if let (Some(celsius), Some(store)) = (reading.celsius(), preferences.as_ref()) {
                    let store = Arc::clone(store);
                    let key = config.preference_key.clone();
                    let write = task::spawn_blocking(move || store.put_f32(&key, celsius as f32));
                    match write.await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            warn!(key = %config.preference_key, "Failed to persist temperature: {}", e)
                        }
                        Err(e) => warn!("Preference write task failed: {}", e),
                    }
                }

                // Ignore error if no receivers
                let _ = readings.send(reading);
                stats.published += 1;
                debug!(%reading, "Reading published");
            }

            receiver.close();
            while receiver.try_recv().is_ok() {
                stats.discarded += 1;
            }
            debug!(?stats, "Notification pipeline stopped");
            stats
        });

        Self {
            sender: Some(sender),
            handle: Some(handle),
            cancel_token,
        }
    }

    /// Queue an event. Returns `false` once the pipeline has stopped.
    pub fn push(&self, event: CharacteristicEvent) -> bool {
        self.sender
            .as_ref()
            .is_some_and(|tx| tx.send((Instant::now(), event)).is_ok())
    }

    /// Stop accepting events, cancel the task and wait for it.
    ///
    /// Queued events are discarded. An event already being processed
    /// finishes first.
    pub async fn shutdown(mut self) -> PipelineStats {
        self.sender.take();
        self.cancel_token.cancel();
        match self.handle.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => PipelineStats::default(),
        }
    }
}

impl Drop for NotificationPipeline {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}
