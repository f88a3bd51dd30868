//! Fan-out of occupancy events to the cloud.
//!
//! An event is encoded once and offered to every delivery path. Paths are
//! independent: a failure on one is logged and never blocks, retries, or
//! reroutes through the other. Nothing is queued; a failed delivery is lost.

mod http;

pub use http::HttpPath;

use crate::error::AgentError;
use crate::occupancy::OccupancyEvent;
use log::{error, info};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("transport is disabled")]
    Disabled,

    #[error("too many requests in flight")]
    Busy,

    #[error("{0}")]
    Transport(String),
}

/// A way of getting an encoded event to the cloud.
pub trait DeliveryPath {
    fn name(&self) -> &'static str;

    /// Hand `payload` to the transport. Must not block the tick.
    fn deliver(&mut self, payload: &[u8]) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Skipped,
    Failed(String),
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// Per-transport result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub occupied: bool,
    pub publish: DeliveryOutcome,
    pub http: DeliveryOutcome,
}

#[derive(Debug, Default)]
pub struct DeliveryDispatcher {
    dispatched: u64,
}

impl DeliveryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events dispatched so far.
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    pub fn dispatch(
        &mut self,
        event: &OccupancyEvent,
        publish: &mut dyn DeliveryPath,
        http: &mut dyn DeliveryPath,
    ) -> DispatchReport {
        self.dispatched += 1;
        info!(
            "[Delivery] Sending occupied={} at {}",
            event.occupied(),
            event.timestamp()
        );

        let payload = match event.encode() {
            Ok(payload) => payload,
            Err(e) => {
                let reason = AgentError::from(e).to_string();
                error!("[Delivery] Encoding failed: {}", reason);
                return DispatchReport {
                    occupied: event.occupied(),
                    publish: DeliveryOutcome::Failed(reason.clone()),
                    http: DeliveryOutcome::Failed(reason),
                };
            }
        };

        DispatchReport {
            occupied: event.occupied(),
            publish: send(publish, &payload),
            http: send(http, &payload),
        }
    }
}

fn send(path: &mut dyn DeliveryPath, payload: &[u8]) -> DeliveryOutcome {
    match path.deliver(payload) {
        Ok(()) => DeliveryOutcome::Delivered,
        Err(DeliveryError::Disabled) => DeliveryOutcome::Skipped,
        Err(e) => {
            let err = AgentError::DeliveryFailure {
                transport: path.name(),
                reason: e.to_string(),
            };
            error!("[Delivery] {}", err);
            DeliveryOutcome::Failed(e.to_string())
        }
    }
}
