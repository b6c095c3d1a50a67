use super::protocol::{parse_inbound, Command, Event, EventKind, Inbound, OutboundMessage, SystemSignal};
use super::reconnect::{CloseOutcome, Link, LinkState};
use super::transport::{StreamTransport, Transport};
use super::view::{Applied, DerivedView, SessionStatus};
use super::StreamError;
use crate::config::StreamConfig;
use serde_json::{Map, Value};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Notification produced while driving a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    Signal(SystemSignal),
    Event {
        event: Event,
        status_change: Option<SessionStatus>,
    },
    RemoteError(String),
    Reconnecting {
        attempt: u32,
        delay: Duration,
    },
    Reconnected {
        attempt: u32,
        connection_id: Uuid,
    },
    ReconnectExhausted {
        attempts: u32,
    },
    Closed,
}

impl SessionUpdate {
    /// The failure this update reports, if any.
    pub fn error(&self) -> Option<StreamError> {
        match self {
            SessionUpdate::RemoteError(message) => Some(StreamError::Remote(message.clone())),
            SessionUpdate::ReconnectExhausted { attempts } => {
                Some(StreamError::ReconnectExhausted { attempts: *attempts })
            }
            _ => None,
        }
    }
}

enum Wake {
    Frame(Option<Result<String, StreamError>>),
    Heartbeat,
}

/// Live view of one generation run.
///
/// Owns its transport exclusively. All methods take `&mut self`, so inbound
/// messages are folded one at a time in arrival order.
pub struct StreamSession<T: StreamTransport = Transport> {
    transport: T,
    config: StreamConfig,
    session_id: Option<String>,
    view: DerivedView,
    link: Link,
    connection_id: Option<Uuid>,
    heartbeat: Option<Interval>,
    reconnect_at: Option<Instant>,
    last_error: Option<String>,
}

impl<T: StreamTransport> StreamSession<T> {
    pub fn new(transport: T, config: StreamConfig) -> Self {
        let link = Link::new(config.reconnect_policy());
        Self {
            transport,
            config,
            session_id: None,
            view: DerivedView::new(),
            link,
            connection_id: None,
            heartbeat: None,
            reconnect_at: None,
            last_error: None,
        }
    }

    pub fn view(&self) -> &DerivedView {
        &self.view
    }

    pub fn status(&self) -> SessionStatus {
        self.view.status()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn active_stage(&self) -> Option<&str> {
        self.view.active_stage()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn link_state(&self) -> LinkState {
        self.link.state()
    }

    /// Id of the currently open transport connection.
    pub fn connection_id(&self) -> Option<Uuid> {
        self.connection_id
    }

    /// Whether a heartbeat or a scheduled reconnect is still armed.
    pub fn has_pending_timers(&self) -> bool {
        self.heartbeat.is_some() || self.reconnect_at.is_some()
    }

    pub async fn connect(&mut self, session_id: &str) -> Result<(), StreamError> {
        if session_id.is_empty() {
            return Err(StreamError::Connection("session id must not be empty".to_string()));
        }

        self.release_transport().await;

        if self.view.session_id() != Some(session_id) {
            debug!(session_id, "Starting a new run view");
            self.view = DerivedView::for_run(session_id);
        }

        let channel = self.transport.channel();
        let address = self.config.address(channel, session_id)?;
        self.session_id = Some(session_id.to_string());
        self.link.begin_connect();

        if let Err(err) = self.transport.connect(&address).await {
            error!(session_id, error = %err, "❌ Failed to connect");
            self.link.on_connect_failed();
            self.session_id = None;
            self.last_error = Some(err.user_message());
            return Err(match err {
                StreamError::Connection(_) => err,
                other => StreamError::Connection(other.to_string()),
            });
        }

        self.on_transport_open();
        self.view.advance_status(SessionStatus::Connecting);
        info!(session_id, %channel, "✅ Connected");
        Ok(())
    }

    pub async fn start(&mut self) -> Result<(), StreamError> {
        if !self.link.is_open() {
            warn!("Cannot start: transport is not open");
            return Err(StreamError::NotConnected);
        }

        if self.transport.channel().accepts_commands() {
            self.send(Command::Start, Map::new()).await?;
        } else {
            debug!("Event stream runs are started by the backend");
        }

        self.view.advance_status(SessionStatus::Running);
        Ok(())
    }

    pub async fn send(&mut self, command: Command, payload: Map<String, Value>) -> Result<(), StreamError> {
        if !self.link.is_open() || !self.transport.is_open() {
            warn!(?command, "Dropping command: not connected");
            return Err(StreamError::NotConnected);
        }

        let text = OutboundMessage::new(command, payload).to_json()?;
        self.transport.send_text(text).await.map_err(|err| {
            warn!(?command, error = %err, "Failed to send command");
            err
        })
    }

    /// Intentional close. Safe to call repeatedly.
    pub async fn disconnect(&mut self) {
        self.link.close_intentionally();
        self.release_transport().await;
        if let Some(session_id) = self.session_id.take() {
            info!(%session_id, "Disconnected");
        }
        self.view.settle_idle();
    }

    /// Drops the transport and every piece of run state.
    pub async fn reset(&mut self) {
        self.link.close_intentionally();
        self.release_transport().await;
        self.session_id = None;
        self.view = DerivedView::new();
        self.last_error = None;
    }

    /// Fold one raw inbound payload. Malformed payloads are logged and dropped.
    pub async fn handle_message(&mut self, raw: &str) -> Option<SessionUpdate> {
        let inbound = match parse_inbound(raw) {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!(error = %err, "Dropping malformed message");
                return None;
            }
        };

        match inbound {
            Inbound::Signal(SystemSignal::Error(message)) => {
                if self.view.status().is_terminal() {
                    debug!(reason = %message, "Ignoring error after the run finished");
                    return None;
                }
                error!(reason = %message, "Backend reported an error");
                self.view.advance_status(SessionStatus::Error);
                self.last_error = Some(message.clone());
                self.finish().await;
                Some(SessionUpdate::RemoteError(message))
            }
            Inbound::Signal(signal) => {
                debug!(?signal, "Lifecycle signal");
                Some(SessionUpdate::Signal(signal))
            }
            Inbound::Event(incoming) => {
                let connection_id = self.connection_id.unwrap_or_else(Uuid::nil);
                match self.view.apply(incoming, connection_id) {
                    Applied::Rejected => {
                        debug!("Run already finished, ignoring event");
                        None
                    }
                    Applied::Appended { event, status_change } => {
                        debug!(seq = event.seq, agent = %event.agent, kind = %event.kind, "Event applied");
                        if event.kind == EventKind::Error && status_change.is_some() {
                            self.last_error = Some(event.content.clone());
                        }
                        if status_change.is_some_and(SessionStatus::is_terminal) {
                            info!(status = %self.view.status(), "Run finished");
                            self.finish().await;
                        }
                        Some(SessionUpdate::Event { event, status_change })
                    }
                }
            }
        }
    }

    /// Wait for the next notification: an inbound message, a reconnect outcome
    /// or a close. Heartbeats are sent along the way. Returns `None` once the
    /// link is down with nothing scheduled.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            match self.link.state() {
                LinkState::Disconnected | LinkState::Connecting => return None,
                LinkState::ReconnectScheduled { .. } => return Some(self.reconnect().await),
                LinkState::Open => {}
            }

            let wake = tokio::select! {
                frame = self.transport.next_frame() => Wake::Frame(frame),
                _ = next_tick(&mut self.heartbeat) => Wake::Heartbeat,
            };

            match wake {
                Wake::Heartbeat => self.send_heartbeat().await,
                Wake::Frame(Some(Ok(raw))) => {
                    if let Some(update) = self.handle_message(&raw).await {
                        return Some(update);
                    }
                }
                Wake::Frame(Some(Err(StreamError::Parse(message)))) => {
                    warn!(reason = %message, "Dropping undecodable frame");
                }
                Wake::Frame(Some(Err(err))) => {
                    warn!(error = %err, "Transport error");
                    self.last_error = Some(err.user_message());
                    return Some(self.on_transport_closed().await);
                }
                Wake::Frame(None) => return Some(self.on_transport_closed().await),
            }
        }
    }

    /// Drive the session until it goes idle, forwarding every update.
    pub async fn run(&mut self, updates: UnboundedSender<SessionUpdate>) {
        while let Some(update) = self.next_update().await {
            if updates.send(update).is_err() {
                debug!("Update receiver dropped");
                break;
            }
        }
    }

    fn on_transport_open(&mut self) {
        self.link.on_open();
        self.reconnect_at = None;
        self.connection_id = Some(Uuid::new_v4());

        self.heartbeat = if self.transport.channel().accepts_commands() {
            let period = self.config.heartbeat_interval();
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(interval)
        } else {
            None
        };
    }

    async fn release_transport(&mut self) {
        self.heartbeat = None;
        self.reconnect_at = None;
        self.connection_id = None;
        if let Err(err) = self.transport.disconnect().await {
            debug!(error = %err, "Error while closing transport");
        }
    }

    async fn finish(&mut self) {
        self.link.close_intentionally();
        self.release_transport().await;
    }

    async fn send_heartbeat(&mut self) {
        if let Err(err) = self.send(Command::Ping, Map::new()).await {
            debug!(error = %err, "Heartbeat not sent");
        }
    }

    async fn on_transport_closed(&mut self) -> SessionUpdate {
        self.release_transport().await;

        match self.link.on_close() {
            CloseOutcome::Intentional => SessionUpdate::Closed,
            CloseOutcome::Retry { attempt, delay } => {
                warn!(attempt, ?delay, "⚠️ Connection lost, reconnecting");
                self.reconnect_at = Some(Instant::now() + delay);
                SessionUpdate::Reconnecting { attempt, delay }
            }
            CloseOutcome::Exhausted { attempts } => {
                let err = StreamError::ReconnectExhausted { attempts };
                error!(error = %err, "❌ Giving up on connection");
                self.last_error = Some(err.user_message());
                SessionUpdate::ReconnectExhausted { attempts }
            }
        }
    }

    /// Dials the scheduled retry. Cancel-safe: the link stays
    /// `ReconnectScheduled` and `reconnect_at` stays armed until the dial
    /// resolves, so a dropped call is simply retried by the next one.
    async fn reconnect(&mut self) -> SessionUpdate {
        if let Some(at) = self.reconnect_at {
            time::sleep_until(at).await;
        }

        let Some(attempt) = self.link.scheduled_attempt() else {
            return SessionUpdate::Closed;
        };
        let Some(session_id) = self.session_id.clone() else {
            self.reconnect_at = None;
            self.link.on_connect_failed();
            return SessionUpdate::Closed;
        };

        let connected = match self.config.address(self.transport.channel(), &session_id) {
            Ok(address) => self.transport.connect(&address).await,
            Err(err) => Err(err),
        };
        self.reconnect_at = None;

        match connected {
            Ok(()) => {
                self.on_transport_open();
                let connection_id = self.connection_id.unwrap_or_else(Uuid::nil);
                info!(%session_id, attempt, "✅ Reconnected");
                SessionUpdate::Reconnected { attempt, connection_id }
            }
            Err(err) => {
                warn!(%session_id, attempt, error = %err, "Reconnect attempt failed");
                self.on_transport_closed().await
            }
        }
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
