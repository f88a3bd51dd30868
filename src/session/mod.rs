//! Persistent publish/subscribe session with the IoT Hub.
//!
//! [`Session`] is the seam between the connection supervisor and the MQTT
//! client. The supervisor never blocks on it: connection attempts are
//! started, and their outcome arrives later as a [`SessionEvent`].

mod mqtt;
mod supervisor;

pub use mqtt::MqttSession;
pub use supervisor::{ConnectionState, ConnectionSupervisor, ControlHandler, SupervisorTiming};

use crate::auth::Credential;
use std::borrow::Cow;
use thiserror::Error;

/// Largest control payload handed to the handler. Longer payloads are cut.
pub const MAX_CONTROL_PAYLOAD: usize = 1024;

/// API version advertised in the MQTT username.
const HUB_API_VERSION: &str = "2021-04-12";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is not connected")]
    NotConnected,

    #[error("MQTT client error: {0}")]
    Client(String),
}

/// Something the session observed since the last poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The broker accepted the connection.
    Connected,
    /// The connection attempt failed or an established connection was lost.
    Disconnected(String),
    /// The broker refused a subscription.
    SubscribeRejected(String),
    Message(InboundMessage),
}

/// A cloud-to-device control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    topic: String,
    payload: Vec<u8>,
}

impl InboundMessage {
    /// Copy at most [`MAX_CONTROL_PAYLOAD`] bytes of `payload`.
    pub fn new(topic: impl Into<String>, payload: &[u8]) -> Self {
        let len = payload.len().min(MAX_CONTROL_PAYLOAD);
        Self {
            topic: topic.into(),
            payload: payload[..len].to_vec(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Payload bytes within the declared length, trailing NULs removed.
    pub fn payload(&self) -> &[u8] {
        let end = self
            .payload
            .iter()
            .rposition(|b| *b != 0)
            .map_or(0, |i| i + 1);
        &self.payload[..end]
    }

    /// Payload decoded for display; invalid UTF-8 is replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.payload())
    }
}

/// Client side of the persistent session.
pub trait Session {
    /// Start a connection attempt authenticated with `credential`.
    ///
    /// Returns once the attempt is under way; the result is reported as
    /// [`SessionEvent::Connected`] or [`SessionEvent::Disconnected`].
    fn connect(&mut self, credential: &Credential) -> Result<(), SessionError>;

    fn subscribe(&mut self, topic: &str) -> Result<(), SessionError>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError>;

    /// Next buffered event, without waiting.
    fn poll_event(&mut self) -> Option<SessionEvent>;

    fn disconnect(&mut self);
}

/// Names derived from the device identity on the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubIdentity {
    pub host: String,
    pub device_id: String,
}

impl HubIdentity {
    pub fn new(host: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            device_id: device_id.into(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.device_id
    }

    pub fn username(&self) -> String {
        format!(
            "{}/{}/?api-version={}",
            self.host, self.device_id, HUB_API_VERSION
        )
    }

    /// Device-to-cloud telemetry topic.
    pub fn telemetry_topic(&self) -> String {
        format!("devices/{}/messages/events/", self.device_id)
    }

    /// Cloud-to-device control topic filter.
    pub fn control_topic(&self) -> String {
        format!("devices/{}/messages/devicebound/#", self.device_id)
    }
}
