//! Keeps the persistent session alive.
//!
//! Driven once per tick in two steps: [`ConnectionSupervisor::service`]
//! drains session events (connection results, control messages), then
//! [`ConnectionSupervisor::maintain`] starts a new connection attempt when
//! needed. Every attempt is authenticated with a freshly generated
//! credential. Back-off between failed attempts is a deadline checked on
//! each tick, never a sleep.

use super::{HubIdentity, InboundMessage, Session, SessionEvent};
use crate::auth::{CredentialManager, WallClock};
use crate::delivery::{DeliveryError, DeliveryPath};
use crate::error::AgentError;
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};
use strum::Display;

/// Events drained from the session per tick.
const MAX_EVENTS_PER_TICK: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub type ControlHandler = Box<dyn FnMut(&InboundMessage)>;

#[derive(Debug, Clone, Copy)]
pub struct SupervisorTiming {
    pub token_duration_secs: u64,
    pub retry_backoff: Duration,
    /// Give up on an attempt the broker has not answered within this time.
    pub connect_timeout: Duration,
}

pub struct ConnectionSupervisor<S: Session> {
    session: S,
    credentials: CredentialManager,
    timing: SupervisorTiming,
    state: ConnectionState,
    telemetry_topic: String,
    control_topic: String,
    control_subscribed: bool,
    /// Set while an attempt waits for the broker's answer.
    awaiting_ack_since: Option<Instant>,
    next_attempt_at: Option<Instant>,
    /// Earliest time the control subscription is re-sent after a failure.
    next_subscribe_at: Option<Instant>,
    handler: Option<ControlHandler>,
    announcement: Option<Vec<u8>>,
}

impl<S: Session> ConnectionSupervisor<S> {
    pub fn new(
        session: S,
        credentials: CredentialManager,
        identity: &HubIdentity,
        timing: SupervisorTiming,
    ) -> Self {
        Self {
            session,
            credentials,
            timing,
            state: ConnectionState::Disconnected,
            telemetry_topic: identity.telemetry_topic(),
            control_topic: identity.control_topic(),
            control_subscribed: false,
            awaiting_ack_since: None,
            next_attempt_at: None,
            next_subscribe_at: None,
            handler: None,
            announcement: None,
        }
    }

    /// Publish `payload` to the telemetry topic after the first successful connection.
    pub fn with_announcement(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.announcement = Some(payload.into());
        self
    }

    /// Register the handler for control messages received while connected.
    pub fn on_control_message(&mut self, handler: impl FnMut(&InboundMessage) + 'static) {
        self.handler = Some(Box::new(handler));
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn control_subscribed(&self) -> bool {
        self.control_subscribed
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    /// Drain buffered session events and dispatch control messages.
    pub fn service(&mut self, now: Instant) {
        for _ in 0..MAX_EVENTS_PER_TICK {
            let Some(event) = self.session.poll_event() else {
                break;
            };

            match event {
                SessionEvent::Connected => self.on_connected(now),
                SessionEvent::Disconnected(reason) => self.on_disconnected(now, &reason),
                SessionEvent::SubscribeRejected(reason) => {
                    self.subscribe_failed(now, reason);
                }
                SessionEvent::Message(msg) => self.on_message(&msg),
            }
        }
    }

    /// Start a connection attempt if the session is down and back-off has elapsed.
    pub fn maintain(&mut self, now: Instant, clock: &impl WallClock) {
        match self.state {
            ConnectionState::Connected => {
                let due = self.next_subscribe_at.is_none_or(|at| now >= at);
                if !self.control_subscribed && due {
                    self.subscribe_control(now);
                }
                return;
            }
            ConnectionState::Connecting => {
                if let Some(started) = self.awaiting_ack_since {
                    if now.saturating_duration_since(started) >= self.timing.connect_timeout {
                        self.session.disconnect();
                        self.attempt_failed(now, "broker did not answer".to_string());
                    }
                    return;
                }
            }
            ConnectionState::Disconnected => {}
        }

        if let Some(at) = self.next_attempt_at
            && now < at
        {
            return;
        }

        self.state = ConnectionState::Connecting;
        info!("[MQTT] Attempting connection...");

        let credential = match self
            .credentials
            .ensure_fresh_credential(clock, self.timing.token_duration_secs)
        {
            Ok(credential) => credential,
            Err(e) => {
                error!("[Auth] {}", AgentError::from(e));
                self.defer(now);
                return;
            }
        };

        match self.session.connect(&credential) {
            Ok(()) => self.awaiting_ack_since = Some(now),
            Err(e) => self.attempt_failed(now, e.to_string()),
        }
    }

    /// Drop the session; the next `maintain` reconnects without back-off.
    pub fn force_disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            info!("[MQTT] Disconnecting ({})", self.state);
        }
        self.session.disconnect();
        self.state = ConnectionState::Disconnected;
        self.control_subscribed = false;
        self.awaiting_ack_since = None;
        self.next_attempt_at = None;
        self.next_subscribe_at = None;
    }

    fn on_connected(&mut self, now: Instant) {
        if self.state != ConnectionState::Connecting {
            debug!("[MQTT] Ignoring connect acknowledgement in state {}", self.state);
            return;
        }

        info!("[MQTT] Connected");
        self.state = ConnectionState::Connected;
        self.awaiting_ack_since = None;
        self.next_attempt_at = None;
        self.next_subscribe_at = None;
        self.subscribe_control(now);

        if let Some(payload) = self.announcement.take()
            && let Err(e) = self.session.publish(&self.telemetry_topic, &payload)
        {
            warn!("[MQTT] Startup announcement failed: {}", e);
        }
    }

    fn on_disconnected(&mut self, now: Instant, reason: &str) {
        match self.state {
            ConnectionState::Connecting => {
                if self.awaiting_ack_since.is_some() {
                    self.attempt_failed(now, reason.to_string());
                }
            }
            ConnectionState::Connected => {
                warn!("[MQTT] Connection lost: {}", reason);
                self.state = ConnectionState::Disconnected;
                self.control_subscribed = false;
            }
            ConnectionState::Disconnected => {}
        }
    }

    fn on_message(&mut self, msg: &InboundMessage) {
        if self.state != ConnectionState::Connected {
            debug!("[MQTT] Dropping message on {} while {}", msg.topic(), self.state);
            return;
        }

        info!("[MQTT] Callback: {}: {}", msg.topic(), msg.text());
        if let Some(handler) = self.handler.as_mut() {
            handler(msg);
        }
    }

    fn subscribe_control(&mut self, now: Instant) {
        match self.session.subscribe(&self.control_topic) {
            Ok(()) => {
                info!("[MQTT] Subscribed to {}", self.control_topic);
                self.control_subscribed = true;
                self.next_subscribe_at = None;
            }
            Err(e) => self.subscribe_failed(now, e.to_string()),
        }
    }

    /// Stay connected; the subscription is retried once the back-off passes.
    fn subscribe_failed(&mut self, now: Instant, reason: String) {
        error!("[MQTT] {}", AgentError::SubscribeFailure(reason));
        self.control_subscribed = false;
        self.next_subscribe_at = Some(now + self.timing.retry_backoff);
    }

    fn attempt_failed(&mut self, now: Instant, reason: String) {
        error!("[MQTT] {}", AgentError::ConnectFailure(reason));
        info!(
            "[MQTT] Trying again in {} ms",
            self.timing.retry_backoff.as_millis()
        );
        self.awaiting_ack_since = None;
        self.defer(now);
    }

    /// Stay in Connecting until the back-off deadline passes.
    fn defer(&mut self, now: Instant) {
        self.state = ConnectionState::Connecting;
        self.next_attempt_at = Some(now + self.timing.retry_backoff);
    }
}

impl<S: Session> DeliveryPath for ConnectionSupervisor<S> {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn deliver(&mut self, payload: &[u8]) -> Result<(), DeliveryError> {
        if self.state != ConnectionState::Connected {
            return Err(DeliveryError::NotConnected);
        }
        self.session
            .publish(&self.telemetry_topic, payload)
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }
}
