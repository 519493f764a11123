//! Client Resilience Layer
//!
//! A single task owns the session channel, the [`PlaybackSynchronizer`], every
//! timer, and the keep-alive audio context. Socket frames, timers and commands
//! are handled one at a time from one `select!` loop, so no two handlers ever
//! run concurrently.
//!
//! Client states:
//! ```text
//! Idle -> Connecting -> Synced <-> WaitingForOperator
//!                          \           /
//!                           Disconnected -> Connecting | Idle
//! ```
//!
//! The layer remembers a desired session separately from the live connection.
//! While a desired session is set, a lost channel is retried after a fixed
//! delay and the listener re-joins for a fresh snapshot. [`ClientHandle::leave`]
//! clears the desired session first, so a pending reconnect becomes a no-op.

use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;

use sdsync_common::time::{Clock, SystemClock};
use sdsync_common::wire::{ErrorCode, PingRequest, Role};
use sdsync_common::{ClientMessage, ServerMessage, SyncEvent};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, error, info, warn};

use crate::clock::ClockSync;
use crate::config::ClientConfig;
use crate::engine::{AudioContext, AudioEngine, AudioPlatform, EngineEvent};
use crate::error::{ClientError, ClientResult};
use crate::synchronizer::{Directive, PlaybackSynchronizer};
use crate::transport::{ConnectFuture, Connection, Connector};

/// Unlock tone and keep-alive frequency (below hearing range)
const TONE_HZ: f64 = 1.0;

/// UI-facing client state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    /// Joined and the program is playing
    Synced,
    /// Joined but nothing is playing right now
    WaitingForOperator,
    Disconnected,
}

/// Snapshot published on every change
#[derive(Debug, Clone, PartialEq)]
pub struct ClientStatus {
    pub state: ClientState,
    pub session_id: Option<String>,
    pub display_name: Option<String>,
    pub participant_count: usize,
    pub slow_load: bool,
    pub last_error: Option<ClientError>,
}

impl Default for ClientStatus {
    fn default() -> Self {
        Self {
            state: ClientState::Idle,
            session_id: None,
            display_name: None,
            participant_count: 0,
            slow_load: false,
            last_error: None,
        }
    }
}

enum Command {
    Join(String),
    Leave,
    Engine(EngineEvent),
    Shutdown,
}

/// Cloneable control handle for a running layer
#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ClientStatus>,
}

impl ClientHandle {
    /// Join a session (leaving any other first)
    pub fn join(&self, session_id: impl Into<String>) -> ClientResult<()> {
        self.send(Command::Join(session_id.into()))
    }

    pub fn leave(&self) -> ClientResult<()> {
        self.send(Command::Leave)
    }

    /// Forward a notification from the program-audio engine
    pub fn engine_event(&self, event: EngineEvent) -> ClientResult<()> {
        self.send(Command::Engine(event))
    }

    /// Leave and stop the layer's task
    pub fn shutdown(&self) -> ClientResult<()> {
        self.send(Command::Shutdown)
    }

    pub fn status(&self) -> ClientStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientStatus> {
        self.status.clone()
    }

    fn send(&self, command: Command) -> ClientResult<()> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::Transport("client task has stopped".to_string()))
    }
}

/// Keep-alive emitter; closes its context when dropped
struct KeepAlive {
    context: Box<dyn AudioContext>,
    ticks: Interval,
}

impl Drop for KeepAlive {
    fn drop(&mut self) {
        self.context.close();
        debug!("Keep-alive stopped");
    }
}

pub struct ResilienceLayer<E> {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    platform: Arc<dyn AudioPlatform>,
    clock: Arc<dyn Clock>,
    sync: PlaybackSynchronizer<E>,
    clock_sync: ClockSync,

    desired: Option<String>,
    connecting: Option<ConnectFuture>,
    connection: Option<Connection>,
    unlocked: bool,

    reconnect_at: Option<Pin<Box<Sleep>>>,
    retry_at: Option<Pin<Box<Sleep>>>,
    deadline_at: Option<Pin<Box<Sleep>>>,
    keepalive: Option<KeepAlive>,

    status: watch::Sender<ClientStatus>,
}

impl<E: AudioEngine> ResilienceLayer<E> {
    pub fn new(
        config: ClientConfig,
        engine: E,
        connector: Arc<dyn Connector>,
        platform: Arc<dyn AudioPlatform>,
    ) -> Self {
        let sync = PlaybackSynchronizer::new(
            engine,
            config.play_retry_delay(),
            config.load_deadline(),
        );
        let (status, _) = watch::channel(ClientStatus::default());
        Self {
            config,
            connector,
            platform,
            clock: Arc::new(SystemClock),
            sync,
            clock_sync: ClockSync::new(),
            desired: None,
            connecting: None,
            connection: None,
            unlocked: false,
            reconnect_at: None,
            retry_at: None,
            deadline_at: None,
            keepalive: None,
            status,
        }
    }

    /// Replace the wall clock used for latency compensation
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run the layer on its own task
    ///
    /// The task leaves and stops on [`ClientHandle::shutdown`] or once every
    /// handle has been dropped.
    pub fn spawn(self) -> (ClientHandle, JoinHandle<()>) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let handle = ClientHandle {
            commands: commands_tx,
            status: self.status.subscribe(),
        };
        (handle, tokio::spawn(self.run(commands)))
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        self.leave();
                        break;
                    }
                    Some(command) => self.on_command(command),
                },
                result = await_connect(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(result);
                }
                frame = await_frame(&mut self.connection) => match frame {
                    Some(msg) => self.on_frame(msg),
                    None => self.on_connection_lost(),
                },
                _ = await_timer(&mut self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.begin_connect();
                }
                _ = await_timer(&mut self.retry_at) => {
                    self.retry_at = None;
                    if let Err(e) = self.sync.retry_play() {
                        error!("Playback failed after retry: {}", e);
                        self.publish(|s| s.last_error = Some(e));
                    }
                }
                _ = await_timer(&mut self.deadline_at) => {
                    self.deadline_at = None;
                    if let Some(e) = self.sync.load_deadline_elapsed() {
                        self.publish(|s| {
                            s.slow_load = true;
                            s.last_error = Some(e);
                        });
                    }
                }
                _ = await_tick(&mut self.keepalive) => self.emit_keepalive(),
            }
        }
        debug!("Resilience layer stopped");
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Join(session_id) => self.join(session_id),
            Command::Leave => self.leave(),
            Command::Engine(event) => {
                if matches!(event, EngineEvent::PlaybackStarted)
                    || matches!(event, EngineEvent::ReadinessChanged(r) if r.is_smooth())
                {
                    self.publish(|s| s.slow_load = false);
                }
                let result = self.sync.on_engine_event(event);
                self.after_apply(result);
            }
            Command::Shutdown => {}
        }
    }

    fn join(&mut self, session_id: String) {
        if self.desired.as_deref() == Some(session_id.as_str()) {
            debug!("Already following session {}", session_id);
            return;
        }
        if self.desired.is_some() {
            self.leave();
        }

        info!("Joining session {}", session_id);
        self.desired = Some(session_id.clone());
        self.publish(|s| {
            s.session_id = Some(session_id);
            s.last_error = None;
        });

        if !self.unlocked {
            self.unlocked = true;
            self.unlock_audio();
        }
        self.begin_connect();
    }

    /// Clear the desired session, cancel every timer, release audio
    fn leave(&mut self) {
        if let Some(session_id) = self.desired.take() {
            info!("Leaving session {}", session_id);
        }
        self.connecting = None;
        self.connection = None;
        self.reconnect_at = None;
        self.retry_at = None;
        self.deadline_at = None;
        self.keepalive = None;
        self.sync.teardown();
        self.clock_sync.reset();
        self.publish(|s| {
            s.state = ClientState::Idle;
            s.session_id = None;
            s.display_name = None;
            s.participant_count = 0;
            s.slow_load = false;
        });
    }

    /// One inaudible tone plus a muted play/pause cycle, best effort
    fn unlock_audio(&mut self) {
        if !self.config.mobile {
            return;
        }
        let result = self.platform.open_context().and_then(|mut context| {
            let tone = context.resume().and_then(|_| {
                context.emit_tone(TONE_HZ, self.config.unlock_gain, self.config.unlock_tone())
            });
            context.close();
            tone
        });
        match result.and_then(|_| self.sync.engine_mut().prime()) {
            Ok(()) => debug!("Audio unlock done"),
            Err(e) => warn!("Audio unlock failed: {}", e),
        }
    }

    fn begin_connect(&mut self) {
        let Some(session_id) = self.desired.clone() else {
            return;
        };
        debug!("Connecting to session {}", session_id);
        self.connection = None;
        self.connecting = Some(self.connector.connect(&session_id));
        self.publish(|s| s.state = ClientState::Connecting);
    }

    fn on_connect_result(&mut self, result: ClientResult<Connection>) {
        match result {
            Ok(connection) => {
                if self.desired.is_none() {
                    return;
                }
                self.connection = Some(connection);
                self.clock_sync.reset();
                // Frames are answered in order, so the PONGs land before the snapshot
                for _ in 0..self.config.ping_count {
                    self.send(ClientMessage::Ping(PingRequest {
                        client_time: self.clock.now(),
                    }));
                }
                self.send(ClientMessage::join(Role::Listener));
            }
            Err(e) => {
                warn!("Connect failed: {}", e);
                self.publish(|s| s.last_error = Some(e));
                self.schedule_reconnect();
            }
        }
    }

    fn on_connection_lost(&mut self) {
        self.connection = None;
        if self.desired.is_some() {
            info!("Session channel closed");
            self.schedule_reconnect();
        } else {
            self.publish(|s| s.state = ClientState::Idle);
        }
    }

    fn schedule_reconnect(&mut self) {
        if self.desired.is_none() {
            return;
        }
        let delay = self.config.reconnect_delay();
        debug!("Reconnecting in {} ms", delay.as_millis());
        self.reconnect_at = Some(Box::pin(sleep(delay)));
        self.publish(|s| s.state = ClientState::Disconnected);
    }

    fn send(&mut self, msg: ClientMessage) {
        let Some(connection) = &self.connection else {
            return;
        };
        if let Err(e) = connection.outbound.try_send(msg) {
            warn!("Dropped outbound frame: {}", e);
        }
    }

    fn on_frame(&mut self, msg: ServerMessage) {
        debug!("Received {}", msg.kind());
        match msg {
            ServerMessage::Pong(pong) => {
                let received = self.clock.now();
                if let Some(sample) =
                    self.clock_sync
                        .record(pong.client_time, pong.server_time, received)
                {
                    debug!(
                        "Clock sample rtt {} ms, offset {} ms",
                        sample.rtt.num_milliseconds(),
                        self.clock_sync.offset().num_milliseconds()
                    );
                }
            }
            ServerMessage::Error(err) => match err.code {
                ErrorCode::SessionNotFound => {
                    warn!("Session not found: {}", err.message);
                    self.leave();
                    self.publish(|s| {
                        s.last_error = Some(ClientError::SessionNotFound(err.message))
                    });
                }
                _ => {
                    warn!("Hub error {:?}: {}", err.code, err.message);
                    self.publish(|s| s.last_error = Some(ClientError::Protocol(err.message)));
                }
            },
            other => {
                if let Some(event) = other.into_sync_event() {
                    self.on_event(event);
                }
            }
        }
    }

    fn on_event(&mut self, event: SyncEvent) {
        match &event {
            SyncEvent::Joined(snapshot) | SyncEvent::SessionStarted(snapshot) => {
                let count = snapshot.participant_count;
                let name = snapshot.display_name.clone();
                self.publish(|s| {
                    s.participant_count = count;
                    s.display_name = name;
                });
                self.start_keepalive();
            }
            SyncEvent::ParticipantCount(count) => {
                let count = *count;
                self.publish(|s| s.participant_count = count);
            }
            SyncEvent::SessionEnded => {
                info!("Session ended by operator");
                self.leave();
                return;
            }
            _ => {}
        }

        let hub_now = self.clock_sync.hub_now(self.clock.now());
        let result = self.sync.apply(&event, hub_now);
        if !self.after_apply(result) {
            return;
        }

        if let Some(playing) = event.implies_playing() {
            let state = if playing {
                ClientState::Synced
            } else {
                ClientState::WaitingForOperator
            };
            self.publish(|s| s.state = state);
        }
    }

    /// Returns false when the event could not be applied
    fn after_apply(&mut self, result: ClientResult<Vec<Directive>>) -> bool {
        match result {
            Ok(directives) => {
                for directive in directives {
                    match directive {
                        Directive::RetryPlayAfter(delay) => {
                            self.retry_at = Some(Box::pin(sleep(delay)));
                        }
                        Directive::ArmLoadDeadline(deadline) => {
                            self.deadline_at = Some(Box::pin(sleep(deadline)));
                            self.publish(|s| s.slow_load = false);
                        }
                        Directive::DisarmLoadDeadline => {
                            self.deadline_at = None;
                            self.publish(|s| s.slow_load = false);
                        }
                    }
                }
                true
            }
            Err(e) => {
                warn!("Could not apply event: {}", e);
                self.publish(|s| s.last_error = Some(e));
                false
            }
        }
    }

    /// Acquire the keep-alive context on first join
    fn start_keepalive(&mut self) {
        if self.keepalive.is_some() {
            return;
        }
        let context = match self.platform.open_context() {
            Ok(context) => context,
            Err(e) => {
                warn!("Keep-alive unavailable: {}", e);
                return;
            }
        };
        let mut ticks = interval(self.config.keepalive_interval());
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.keepalive = Some(KeepAlive { context, ticks });
        debug!("Keep-alive started");
    }

    fn emit_keepalive(&mut self) {
        let gain = self.config.keepalive_gain;
        let unit = self.config.keepalive_unit();
        if let Some(keepalive) = self.keepalive.as_mut() {
            if let Err(e) = keepalive.context.emit_tone(TONE_HZ, gain, unit) {
                debug!("Keep-alive tone failed: {}", e);
            }
        }
    }

    fn publish(&self, update: impl FnOnce(&mut ClientStatus)) {
        self.status.send_if_modified(|status| {
            let before = status.clone();
            update(status);
            *status != before
        });
    }
}

async fn await_connect(slot: &mut Option<ConnectFuture>) -> ClientResult<Connection> {
    match slot {
        Some(fut) => fut.await,
        None => pending().await,
    }
}

async fn await_frame(slot: &mut Option<Connection>) -> Option<ServerMessage> {
    match slot {
        Some(connection) => connection.inbound.recv().await,
        None => pending().await,
    }
}

async fn await_timer(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot {
        Some(timer) => timer.as_mut().await,
        None => pending().await,
    }
}

async fn await_tick(slot: &mut Option<KeepAlive>) {
    match slot {
        Some(keepalive) => {
            keepalive.ticks.tick().await;
        }
        None => pending().await,
    }
}
