use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// One confirmed occupancy transition, in telemetry wire form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OccupancyEvent {
    #[serde(rename = "DeviceID")]
    device_id: String,
    #[serde(rename = "Status")]
    occupied: bool,
    /// ISO-8601, UTC, millisecond precision
    #[serde(rename = "Timestamp")]
    timestamp: String,
}

impl OccupancyEvent {
    pub fn new(device_id: impl Into<String>, occupied: bool, at: DateTime<Utc>) -> Self {
        Self {
            device_id: device_id.into(),
            occupied,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn occupied(&self) -> bool {
        self.occupied
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    /// Canonical JSON body shared by every transport.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}
