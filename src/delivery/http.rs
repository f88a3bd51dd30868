//! One-shot HTTP POST to the telemetry function.

use super::{DeliveryError, DeliveryPath};
use crate::config::HttpConfig;
use crate::error::{AgentError, Result};
use log::{error, info};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Requests allowed in flight before new events are dropped on this path.
const MAX_IN_FLIGHT: usize = 4;

/// Fire-and-forget delivery to the function endpoint.
///
/// Each event is posted from its own task so the tick never waits on the
/// network. The response is logged; non-2xx statuses are logged as errors.
/// Nothing is retried.
pub struct HttpPath {
    client: Client,
    url: Option<String>,
    in_flight: Arc<AtomicUsize>,
}

impl HttpPath {
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.function_url.clone(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.url.is_some()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

impl DeliveryPath for HttpPath {
    fn name(&self) -> &'static str {
        "http"
    }

    fn deliver(&mut self, payload: &[u8]) -> std::result::Result<(), DeliveryError> {
        let Some(url) = self.url.as_deref() else {
            return Err(DeliveryError::Disabled);
        };
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        if self.in_flight.fetch_add(1, Ordering::SeqCst) >= MAX_IN_FLIGHT {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(DeliveryError::Busy);
        }

        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_vec());
        let in_flight = self.in_flight.clone();

        runtime.spawn(async move {
            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    if status.is_success() {
                        info!("[HTTP] {}: {}", status, body);
                    } else {
                        let err = AgentError::DeliveryFailure {
                            transport: "http",
                            reason: format!("{}: {}", status, body),
                        };
                        error!("[HTTP] {}", err);
                    }
                }
                Err(e) => {
                    let err = AgentError::DeliveryFailure {
                        transport: "http",
                        reason: e.to_string(),
                    };
                    error!("[HTTP] {}", err);
                }
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(())
    }
}
