//! MQTT session with the IoT Hub on top of rumqttc.

use super::{HubIdentity, InboundMessage, Session, SessionError, SessionEvent, MAX_CONTROL_PAYLOAD};
use crate::auth::Credential;
use crate::config::HubConfig;
use log::{debug, info, warn};
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS,
    SubscribeReasonCode, Transport,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Outgoing packets are telemetry bodies and a subscription, both small.
const MAX_OUTGOING_PACKET: usize = 4096;

/// One MQTT connection per credential.
///
/// rumqttc reconnects on its own with the options it was built with, which
/// would replay an expired token. Each `connect` therefore builds a new
/// client whose event loop stops at the first error and reports it; the
/// supervisor decides when to try again.
pub struct MqttSession {
    identity: HubIdentity,
    port: u16,
    use_tls: bool,
    client: Option<AsyncClient>,
    events: Option<mpsc::Receiver<SessionEvent>>,
    event_loop: Option<JoinHandle<()>>,
}

impl MqttSession {
    pub fn new(identity: HubIdentity, config: &HubConfig) -> Self {
        Self {
            identity,
            port: config.port,
            use_tls: config.use_tls,
            client: None,
            events: None,
            event_loop: None,
        }
    }

    fn options(&self, credential: &Credential) -> MqttOptions {
        let mut options =
            MqttOptions::new(self.identity.client_id(), &self.identity.host, self.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_CONTROL_PAYLOAD + 512, MAX_OUTGOING_PACKET);
        options.set_credentials(self.identity.username(), credential.password());

        if self.use_tls {
            options.set_transport(Transport::tls_with_default_config());
        }

        options
    }

    fn stop(&mut self) {
        if let Some(client) = self.client.take()
            && let Err(e) = client.try_disconnect()
        {
            debug!("[MQTT] Disconnect request not sent: {}", e);
        }
        if let Some(task) = self.event_loop.take() {
            task.abort();
        }
        self.events = None;
    }
}

impl Session for MqttSession {
    fn connect(&mut self, credential: &Credential) -> Result<(), SessionError> {
        self.stop();

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SessionError::Client(e.to_string()))?;

        info!(
            "[MQTT] Connecting to {}:{} as {}",
            self.identity.host,
            self.port,
            self.identity.client_id()
        );

        let (client, event_loop) = AsyncClient::new(self.options(credential), 100);
        let (tx, rx) = mpsc::channel(64);

        self.event_loop = Some(runtime.spawn(run_event_loop(event_loop, tx)));
        self.client = Some(client);
        self.events = Some(rx);
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), SessionError> {
        let client = self.client.as_ref().ok_or(SessionError::NotConnected)?;
        info!("[MQTT] Subscribing to topic: {}", topic);
        client
            .try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| SessionError::Client(e.to_string()))
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), SessionError> {
        let client = self.client.as_ref().ok_or(SessionError::NotConnected)?;
        debug!("[MQTT] Publishing {} bytes to {}", payload.len(), topic);
        client
            .try_publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .map_err(|e| SessionError::Client(e.to_string()))
    }

    fn poll_event(&mut self) -> Option<SessionEvent> {
        self.events.as_mut()?.try_recv().ok()
    }

    fn disconnect(&mut self) {
        self.stop();
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Poll the event loop until the connection ends, forwarding what the
/// supervisor cares about.
async fn run_event_loop(mut event_loop: EventLoop, tx: mpsc::Sender<SessionEvent>) {
    loop {
        let event = match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    SessionEvent::Connected
                } else {
                    let _ = tx
                        .send(SessionEvent::Disconnected(format!("{:?}", ack.code)))
                        .await;
                    return;
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                if !ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure))
                {
                    continue;
                }
                SessionEvent::SubscribeRejected(format!("packet {} refused", ack.pkid))
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!(
                    "[MQTT] Received {} bytes on {}",
                    publish.payload.len(),
                    publish.topic
                );
                SessionEvent::Message(InboundMessage::new(publish.topic, &publish.payload))
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                let _ = tx
                    .send(SessionEvent::Disconnected("broker closed the session".into()))
                    .await;
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!("[MQTT] Connection error: {}", e);
                let _ = tx.send(SessionEvent::Disconnected(e.to_string())).await;
                return;
            }
        };

        if tx.send(event).await.is_err() {
            debug!("[MQTT] Session dropped, stopping event loop");
            return;
        }
    }
}
