//! Connection lifecycle management.
//!
//! [`ConnectionManager`] drives one GATT session at a time through
//! connect → discover services → enable notifications → stream → release.
//!
//! All transition logic lives in a single long-lived worker task. Callers talk
//! to it through a command channel, and GATT callbacks arrive on the link's
//! event stream; the worker consumes both in order, so a connect issued while
//! a teardown is running simply waits behind it.
//!
//! ```text
//!   connect(addr)                                  ConnectionStateChanged / ServicesDiscovered /
//!        |                                         DescriptorWritten / CharacteristicChanged / Read
//!        v                                                          |
//! +--------------+   Command    +------------------------+   GattEvent   +-----------+
//! | Manager      | -----------> |  Worker (state machine) | <------------ | GattLink  |
//! | (clonable)   | <- oneshot - |                        | ------------> |           |
//! +--------------+              +------------------------+   requests    +-----------+
//!                                   | Streaming only
//!                                   v
//!                           NotificationPipeline --> readings broadcast
//! ```
//!
//! Teardown always runs in the same order: `Disconnecting`, stop the
//! pipeline, `disconnect()`, `close()`, drop the event stream, `Disconnected`.
//! Callbacks that arrive later have nowhere to go.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use envsense_types::codec;
use envsense_types::uuid::{
    CLIENT_CHARACTERISTIC_CONFIG, ENABLE_NOTIFICATION_VALUE, ENVIRONMENTAL_SENSING_SERVICE,
};
use envsense_types::{CharacteristicEvent, SensorReading, normalize_address};

use crate::adapter::AdapterStateMonitor;
use crate::error::{ConnectError, Error, Result};
use crate::events::{DEFAULT_EVENT_CAPACITY, EventDispatcher, EventReceiver, SessionEvent};
use crate::messages::UserMessage;
use crate::pipeline::{NotificationPipeline, PipelineConfig};
use crate::preferences::PreferenceStore;
use crate::radio::{GattEvent, GattEventStream, GattLink, LinkState, Radio, Transport};
use crate::session::{SessionHandle, SessionSnapshot, SessionState};
use crate::util::deadline_after;

/// Default timeout for establishing the link.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for one descriptor write.
const DEFAULT_ENABLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for connection timeouts and behavior.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use envsense_core::ConnectionConfig;
///
/// // Arm one characteristic per second, for peripherals that drop
/// // back-to-back descriptor writes.
/// let config = ConnectionConfig::default()
///     .connection_timeout(Duration::from_secs(20))
///     .enable_stagger(Duration::from_secs(1));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Deadline for the link to come up.
    pub connection_timeout: Duration,
    /// Deadline for service discovery.
    pub discovery_timeout: Duration,
    /// Deadline for each descriptor write. A timed-out write skips that characteristic.
    pub enable_timeout: Duration,
    /// Delay between consecutive descriptor writes. `None` writes back to back.
    pub enable_stagger: Option<Duration>,
    /// Capacity of the command channel.
    pub command_capacity: usize,
    /// Capacity of the event, reading and error broadcasts.
    pub event_capacity: usize,
    /// Notification pipeline options.
    pub pipeline: PipelineConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            enable_timeout: DEFAULT_ENABLE_TIMEOUT,
            enable_stagger: None,
            command_capacity: 16,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl ConnectionConfig {
    /// Create a new connection config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the per-characteristic enable timeout.
    #[must_use]
    pub fn enable_timeout(mut self, timeout: Duration) -> Self {
        self.enable_timeout = timeout;
        self
    }

    /// Stagger descriptor writes by `delay`.
    #[must_use]
    pub fn enable_stagger(mut self, delay: Duration) -> Self {
        self.enable_stagger = Some(delay);
        self
    }

    /// Set the broadcast capacity.
    #[must_use]
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set the notification pipeline options.
    #[must_use]
    pub fn pipeline(mut self, pipeline: PipelineConfig) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("connection_timeout", self.connection_timeout),
            ("discovery_timeout", self.discovery_timeout),
            ("enable_timeout", self.enable_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                return Err(Error::invalid_config(format!("{name} must be > 0")));
            }
        }
        if self.command_capacity == 0 {
            return Err(Error::invalid_config("command_capacity must be > 0"));
        }
        if self.event_capacity == 0 {
            return Err(Error::invalid_config("event_capacity must be > 0"));
        }
        self.pipeline.validate()
    }
}

type Reply<T> = oneshot::Sender<T>;
type ConnectReply = Reply<std::result::Result<SessionHandle, ConnectError>>;

enum Command {
    Connect {
        address: String,
        reply: ConnectReply,
    },
    Disconnect {
        reply: Reply<()>,
    },
    Read {
        characteristic: Uuid,
        reply: Reply<std::result::Result<(), ConnectError>>,
    },
    Snapshot {
        reply: Reply<SessionSnapshot>,
    },
}

/// Handle to the connection worker.
///
/// Cloning is cheap; the worker stops, releasing any session, when the last
/// clone is dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    commands: mpsc::Sender<Command>,
    monitor: AdapterStateMonitor,
    state: watch::Receiver<SessionState>,
    events: EventDispatcher,
    readings: broadcast::Sender<SensorReading>,
    errors: broadcast::Sender<String>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    /// Spawn a manager over `radio`, gated by `monitor`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        radio: Arc<dyn Radio>,
        monitor: AdapterStateMonitor,
        config: ConnectionConfig,
    ) -> Result<Self> {
        Self::spawn(radio, monitor, config, None)
    }

    /// Spawn a manager that also persists temperatures to `preferences`.
    pub fn with_preferences(
        radio: Arc<dyn Radio>,
        monitor: AdapterStateMonitor,
        config: ConnectionConfig,
        preferences: Arc<dyn PreferenceStore>,
    ) -> Result<Self> {
        Self::spawn(radio, monitor, config, Some(preferences))
    }

    fn spawn(
        radio: Arc<dyn Radio>,
        monitor: AdapterStateMonitor,
        config: ConnectionConfig,
        preferences: Option<Arc<dyn PreferenceStore>>,
    ) -> Result<Self> {
        config.validate()?;

        let (commands, command_rx) = mpsc::channel(config.command_capacity);
        let (state_tx, state) = watch::channel(SessionState::Disconnected);
        let events = EventDispatcher::new(config.event_capacity);
        let (readings, _) = broadcast::channel(config.event_capacity);
        let (errors, _) = broadcast::channel(config.event_capacity);

        let worker = Worker {
            ctx: Context {
                radio,
                config,
                preferences,
                state_tx,
                events: events.clone(),
                readings: readings.clone(),
                errors: errors.clone(),
                next_id: 0,
                last_error: None,
            },
            session: None,
        };
        tokio::spawn(worker.run(command_rx));

        Ok(Self {
            commands,
            monitor,
            state,
            events,
            readings,
            errors,
        })
    }

    /// Connect to `address` and wait until the session is streaming.
    ///
    /// Connecting to the address of the live session returns its handle (or
    /// joins the pending attempt). Connecting elsewhere first tears the live
    /// session down.
    ///
    /// # Errors
    ///
    /// [`ConnectError::AdapterNotReady`] before anything starts; otherwise the
    /// transport error that ended the attempt.
    #[tracing::instrument(level = "info", skip_all, fields(address = %address))]
    pub async fn connect(&self, address: &str) -> std::result::Result<SessionHandle, ConnectError> {
        let state = self.monitor.current().await;
        if !state.is_ready() {
            let error = ConnectError::AdapterNotReady(state);
            warn!(%state, "Connect blocked");
            let _ = self.errors.send(error.user_message());
            return Err(error);
        }

        let (reply, response) = oneshot::channel();
        self.send(Command::Connect {
            address: address.to_string(),
            reply,
        })
        .await?;
        response.await.map_err(|_| ConnectError::ManagerClosed)?
    }

    /// Tear down the session, if any. Idempotent.
    pub async fn disconnect(&self) -> std::result::Result<(), ConnectError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Disconnect { reply }).await?;
        response.await.map_err(|_| ConnectError::ManagerClosed)
    }

    /// Request an explicit read of `characteristic`.
    ///
    /// Resolves once the request is issued; the value reaches the readings
    /// stream through the same pipeline as notifications. A request the link
    /// rejects is returned here and leaves the session streaming.
    pub async fn read(&self, characteristic: Uuid) -> std::result::Result<(), ConnectError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Read {
            characteristic,
            reply,
        })
        .await?;
        response.await.map_err(|_| ConnectError::ManagerClosed)?
    }

    /// Point-in-time view of the session.
    pub async fn snapshot(&self) -> std::result::Result<SessionSnapshot, ConnectError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Snapshot { reply }).await?;
        response.await.map_err(|_| ConnectError::ManagerClosed)
    }

    /// Watch the session state.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Subscribe to session events.
    pub fn subscribe_events(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Subscribe to decoded readings.
    pub fn subscribe_readings(&self) -> broadcast::Receiver<SensorReading> {
        self.readings.subscribe()
    }

    /// Subscribe to user-facing error messages.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<String> {
        self.errors.subscribe()
    }

    async fn send(&self, command: Command) -> std::result::Result<(), ConnectError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ConnectError::ManagerClosed)
    }
}

/// Pending timer of the live session.
#[derive(Debug, Clone, Copy)]
enum Timer {
    /// Deadline of the current stage.
    Stage(Duration),
    /// Deadline of the in-flight descriptor write.
    Enable(Uuid),
    /// Next descriptor write is due.
    Stagger,
}

struct Session {
    id: u64,
    address: String,
    state: SessionState,
    link: Arc<dyn GattLink>,
    events: GattEventStream,
    armed: BTreeSet<Uuid>,
    pending: VecDeque<Uuid>,
    in_flight: Option<Uuid>,
    deadline: Option<(Instant, Timer)>,
    waiters: Vec<ConnectReply>,
    pipeline: Option<NotificationPipeline>,
}

impl Session {
    fn handle(&self) -> SessionHandle {
        SessionHandle {
            id: self.id,
            address: self.address.clone(),
        }
    }
}

enum Input {
    Command(Option<Command>),
    Gatt(Option<GattEvent>),
    Timer,
}

/// Everything the worker owns besides the session.
struct Context {
    radio: Arc<dyn Radio>,
    config: ConnectionConfig,
    preferences: Option<Arc<dyn PreferenceStore>>,
    state_tx: watch::Sender<SessionState>,
    events: EventDispatcher,
    readings: broadcast::Sender<SensorReading>,
    errors: broadcast::Sender<String>,
    next_id: u64,
    last_error: Option<ConnectError>,
}

impl Context {
    fn transition(&self, session: &mut Session, to: SessionState) {
        let from = session.state;
        if from == to {
            return;
        }
        session.state = to;
        debug!(address = %session.address, %from, %to, "Session state changed");
        self.state_tx.send_replace(to);
        self.events.send(SessionEvent::StateChanged {
            address: session.address.clone(),
            from,
            to,
        });
    }

    fn skip(&self, session: &Session, characteristic: Uuid, reason: String) {
        warn!(address = %session.address, uuid = %characteristic, "Skipping characteristic: {}", reason);
        self.events.send(SessionEvent::CharacteristicSkipped {
            address: session.address.clone(),
            characteristic,
            reason,
        });
    }

    fn arm_deadline(&self, session: &mut Session, timer: Timer, after: Duration) {
        session.deadline = Some((deadline_after(after), timer));
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn release_interest(link: &Arc<dyn GattLink>, characteristic: Uuid) {
    if let Err(e) = link.set_notification_interest(characteristic, false).await {
        debug!(uuid = %characteristic, "Failed to drop notification interest: {}", e);
    }
}

struct Worker {
    ctx: Context,
    session: Option<Session>,
}

impl Worker {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let result = match self.next_input(&mut commands).await {
                Input::Command(Some(command)) => {
                    self.on_command(command).await;
                    Ok(())
                }
                Input::Command(None) => break,
                Input::Gatt(Some(event)) => self.on_gatt(event).await,
                Input::Gatt(None) => Err(ConnectError::LinkLost),
                Input::Timer => self.on_timer().await,
            };
            if let Err(error) = result {
                self.fail(error).await;
            }
        }

        self.teardown(ConnectError::ManagerClosed).await;
        debug!("Connection worker stopped");
    }

    async fn next_input(&mut self, commands: &mut mpsc::Receiver<Command>) -> Input {
        let Some(session) = self.session.as_mut() else {
            return Input::Command(commands.recv().await);
        };
        let deadline = session.deadline.map(|(at, _)| at);

        tokio::select! {
            biased;
            event = session.events.next() => Input::Gatt(event),
            _ = sleep_until_deadline(deadline) => Input::Timer,
            command = commands.recv() => Input::Command(command),
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Connect { address, reply } => self.on_connect(address, reply).await,
            Command::Disconnect { reply } => {
                if let Some(address) = self.session.as_ref().map(|s| s.address.clone()) {
                    info!(%address, "Disconnect requested");
                    self.teardown(ConnectError::Superseded).await;
                }
                let _ = reply.send(());
            }
            Command::Read {
                characteristic,
                reply,
            } => {
                // A rejected request never reached the peripheral, so the
                // session stays up. Hardware failures arrive as a
                // `CharacteristicRead` with a non-success status.
                let result = self.on_read(characteristic).await;
                if let Err(error) = &result {
                    debug!(uuid = %characteristic, "Read rejected: {}", error);
                }
                let _ = reply.send(result);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn on_connect(&mut self, address: String, reply: ConnectReply) {
        let address = normalize_address(&address);

        if let Some(session) = self.session.as_mut()
            && session.address == address
        {
            if session.state == SessionState::Streaming {
                let _ = reply.send(Ok(session.handle()));
                return;
            }
            if session.state.is_establishing() {
                debug!(%address, state = %session.state, "Joining pending connect");
                session.waiters.push(reply);
                return;
            }
        }

        if let Some(from) = self.session.as_ref().map(|s| s.address.clone()) {
            info!(%from, to = %address, "Replacing session");
            self.teardown(ConnectError::Superseded).await;
        }

        self.ctx.next_id += 1;
        self.ctx.last_error = None;

        let channel = match self
            .ctx
            .radio
            .open_link(&address, Transport::LowEnergy)
            .await
        {
            Ok(channel) => channel,
            Err(e) => {
                let error = ConnectError::from(e);
                warn!(%address, "Failed to open link: {}", error);
                let _ = self.ctx.errors.send(error.user_message());
                self.ctx.last_error = Some(error.clone());
                let _ = reply.send(Err(error));
                return;
            }
        };

        let mut session = Session {
            id: self.ctx.next_id,
            address,
            state: SessionState::Disconnected,
            link: channel.link,
            events: channel.events,
            armed: BTreeSet::new(),
            pending: VecDeque::new(),
            in_flight: None,
            deadline: None,
            waiters: vec![reply],
            pipeline: None,
        };
        self.ctx.transition(&mut session, SessionState::Connecting);
        let timeout = self.ctx.config.connection_timeout;
        self.ctx
            .arm_deadline(&mut session, Timer::Stage(timeout), timeout);

        let link = Arc::clone(&session.link);
        self.session = Some(session);
        if let Err(e) = link.connect().await {
            self.fail(e.into()).await;
        }
    }

    async fn on_read(&mut self, characteristic: Uuid) -> std::result::Result<(), ConnectError> {
        let Some(link) = self
            .session
            .as_ref()
            .filter(|s| s.state == SessionState::Streaming)
            .map(|s| Arc::clone(&s.link))
        else {
            return Err(ConnectError::NotStreaming);
        };
        trace!(address = %link.address(), uuid = %characteristic, "Read requested");
        link.read_characteristic(characteristic)
            .await
            .map_err(ConnectError::from)
    }

    async fn on_gatt(&mut self, event: GattEvent) -> std::result::Result<(), ConnectError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let link = Arc::clone(&session.link);

        match (session.state, event) {
            (stage, GattEvent::ConnectionStateChanged { status, state }) => {
                match (stage, state, status.is_success()) {
                    (SessionState::Connecting, LinkState::Connected, true) => {
                        let timeout = self.ctx.config.discovery_timeout;
                        self.ctx.transition(session, SessionState::ServiceDiscovery);
                        self.ctx.arm_deadline(session, Timer::Stage(timeout), timeout);
                        link.discover_services().await?;
                        Ok(())
                    }
                    (SessionState::Connecting, _, _) => Err(ConnectError::LinkFailed { status }),
                    (_, LinkState::Disconnected, _) => Err(ConnectError::LinkLost),
                    (_, LinkState::Connected, false) => Err(ConnectError::gatt("connection", status)),
                    (_, LinkState::Connected, true) => {
                        debug!(address = %session.address, "Ignoring repeated link-up");
                        Ok(())
                    }
                }
            }

            (SessionState::ServiceDiscovery, GattEvent::ServicesDiscovered { status, services }) => {
                if !status.is_success() {
                    return Err(ConnectError::gatt("discover services", status));
                }
                let Some(service) = services
                    .iter()
                    .find(|s| s.uuid == ENVIRONMENTAL_SENSING_SERVICE)
                else {
                    return Err(ConnectError::ServiceNotFound {
                        service_count: services.len(),
                    });
                };

                session.deadline = None;
                self.ctx
                    .transition(session, SessionState::EnablingNotifications);
                for characteristic in &service.characteristics {
                    if !codec::is_supported(characteristic.uuid) {
                        trace!(uuid = %characteristic.uuid, "Not a target characteristic");
                        continue;
                    }
                    if !characteristic
                        .descriptors
                        .contains(&CLIENT_CHARACTERISTIC_CONFIG)
                    {
                        self.ctx.skip(
                            session,
                            characteristic.uuid,
                            "no client configuration descriptor".to_string(),
                        );
                        continue;
                    }
                    session.pending.push_back(characteristic.uuid);
                }
                self.arm_next().await
            }

            (
                SessionState::EnablingNotifications,
                GattEvent::DescriptorWritten {
                    characteristic,
                    status,
                    ..
                },
            ) if session.in_flight == Some(characteristic) => {
                session.in_flight = None;
                session.deadline = None;
                if status.is_success() {
                    debug!(address = %session.address, uuid = %characteristic, "Notifications enabled");
                    session.armed.insert(characteristic);
                    self.ctx.events.send(SessionEvent::NotificationsEnabled {
                        address: session.address.clone(),
                        characteristic,
                    });
                } else {
                    release_interest(&link, characteristic).await;
                    self.ctx.skip(
                        session,
                        characteristic,
                        format!("descriptor write failed with status {status}"),
                    );
                }
                self.advance_enabling().await
            }

            (SessionState::Streaming, GattEvent::CharacteristicChanged { characteristic, value }) => {
                if let Some(pipeline) = &session.pipeline {
                    pipeline.push(CharacteristicEvent::notification(characteristic, value));
                }
                Ok(())
            }

            (
                SessionState::Streaming,
                GattEvent::CharacteristicRead {
                    characteristic,
                    value,
                    status,
                },
            ) => {
                if !status.is_success() {
                    return Err(ConnectError::gatt("read characteristic", status));
                }
                if let Some(pipeline) = &session.pipeline {
                    pipeline.push(CharacteristicEvent::read(characteristic, value));
                }
                Ok(())
            }

            (stage, event) => {
                debug!(address = %session.address, %stage, ?event, "Ignoring unexpected event");
                Ok(())
            }
        }
    }

    async fn on_timer(&mut self) -> std::result::Result<(), ConnectError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let Some((_, timer)) = session.deadline.take() else {
            return Ok(());
        };

        match timer {
            Timer::Stage(duration) => Err(ConnectError::Timeout {
                stage: session.state,
                duration,
            }),
            Timer::Enable(characteristic) => {
                session.in_flight = None;
                let link = Arc::clone(&session.link);
                release_interest(&link, characteristic).await;
                self.ctx.skip(
                    session,
                    characteristic,
                    format!(
                        "descriptor write timed out after {:?}",
                        self.ctx.config.enable_timeout
                    ),
                );
                self.advance_enabling().await
            }
            Timer::Stagger => self.arm_next().await,
        }
    }

    /// Arm the next pending characteristic, or finish enabling.
    async fn arm_next(&mut self) -> std::result::Result<(), ConnectError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let link = Arc::clone(&session.link);

        while let Some(characteristic) = session.pending.pop_front() {
            if let Err(e) = link.set_notification_interest(characteristic, true).await {
                self.ctx.skip(session, characteristic, e.to_string());
                continue;
            }
            if let Err(e) = link
                .write_descriptor(
                    characteristic,
                    CLIENT_CHARACTERISTIC_CONFIG,
                    &ENABLE_NOTIFICATION_VALUE,
                )
                .await
            {
                release_interest(&link, characteristic).await;
                self.ctx.skip(session, characteristic, e.to_string());
                continue;
            }

            session.in_flight = Some(characteristic);
            let timeout = self.ctx.config.enable_timeout;
            self.ctx
                .arm_deadline(session, Timer::Enable(characteristic), timeout);
            return Ok(());
        }

        self.start_streaming()
    }

    async fn advance_enabling(&mut self) -> std::result::Result<(), ConnectError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        match self.ctx.config.enable_stagger {
            Some(delay) if !session.pending.is_empty() => {
                self.ctx.arm_deadline(session, Timer::Stagger, delay);
                Ok(())
            }
            _ => self.arm_next().await,
        }
    }

    fn start_streaming(&mut self) -> std::result::Result<(), ConnectError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        session.deadline = None;
        if session.armed.is_empty() {
            return Err(ConnectError::NoCharacteristicsAvailable);
        }

        self.ctx.transition(session, SessionState::Streaming);
        session.pipeline = Some(NotificationPipeline::spawn(
            self.ctx.config.pipeline.clone(),
            self.ctx.readings.clone(),
            self.ctx.preferences.clone(),
        ));

        let handle = session.handle();
        for waiter in session.waiters.drain(..) {
            let _ = waiter.send(Ok(handle.clone()));
        }
        info!(address = %session.address, armed = session.armed.len(), "Streaming");
        Ok(())
    }

    async fn fail(&mut self, error: ConnectError) {
        let Some((address, state)) = self.session.as_ref().map(|s| (s.address.clone(), s.state))
        else {
            return;
        };
        warn!(%address, %state, "Session failed: {}", error);
        self.ctx.events.send(SessionEvent::Failed {
            address,
            error: error.to_string(),
        });
        let _ = self.ctx.errors.send(error.user_message());
        self.ctx.last_error = Some(error.clone());
        self.teardown(error).await;
    }

    /// Release the session. Pending connect callers receive `waiter_error`.
    async fn teardown(&mut self, waiter_error: ConnectError) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        self.ctx
            .transition(&mut session, SessionState::Disconnecting);
        session.deadline = None;

        if let Some(pipeline) = session.pipeline.take() {
            let stats = pipeline.shutdown().await;
            debug!(address = %session.address, ?stats, "Pipeline stopped");
        }

        if let Err(e) = session.link.disconnect().await {
            warn!(address = %session.address, "Failed to disconnect: {}", e);
        }
        session.link.close().await;

        self.ctx
            .transition(&mut session, SessionState::Disconnected);
        for waiter in session.waiters.drain(..) {
            let _ = waiter.send(Err(waiter_error.clone()));
        }
        info!(address = %session.address, "Session released");
    }

    fn snapshot(&self) -> SessionSnapshot {
        match &self.session {
            Some(session) => SessionSnapshot {
                id: Some(session.id),
                address: Some(session.address.clone()),
                state: session.state,
                enabled: session.armed.clone(),
                last_error: self.ctx.last_error.clone(),
            },
            None => SessionSnapshot::idle(self.ctx.last_error.clone()),
        }
    }
}
