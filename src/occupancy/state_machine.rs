//! Free/Occupied state with a release-side hysteresis window.
//!
//! Motion onset is trusted immediately: the first motion sample while Free
//! switches to Occupied on the same tick. Release needs sustained absence of
//! motion for the whole hysteresis window, measured from the last motion
//! sample. Every realized transition yields at most one event, and two
//! consecutive events never carry the same `occupied` value.

use super::event::OccupancyEvent;
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::time::{Duration, Instant};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum OccupancyState {
    Free,
    Occupied,
}

impl OccupancyState {
    pub fn is_occupied(self) -> bool {
        self == OccupancyState::Occupied
    }
}

pub struct OccupancyStateMachine {
    device_id: String,
    hysteresis: Duration,
    state: OccupancyState,
    /// `occupied` of the last event handed out.
    last_sent: bool,
    last_motion_at: Option<Instant>,
    started_at: Instant,
    last_idle_report: Option<u64>,
}

impl OccupancyStateMachine {
    pub fn new(device_id: impl Into<String>, hysteresis: Duration, now: Instant) -> Self {
        Self {
            device_id: device_id.into(),
            hysteresis,
            state: OccupancyState::Free,
            last_sent: false,
            last_motion_at: None,
            started_at: now,
            last_idle_report: None,
        }
    }

    pub fn state(&self) -> OccupancyState {
        self.state
    }

    pub fn last_sent(&self) -> bool {
        self.last_sent
    }

    pub fn hysteresis(&self) -> Duration {
        self.hysteresis
    }

    /// Time since the last motion sample, or since start before any motion.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_motion_at.unwrap_or(self.started_at))
    }

    /// Evaluate one polling tick.
    ///
    /// `now` drives the hysteresis window; `wall` stamps the emitted event.
    pub fn on_sample(
        &mut self,
        motion: bool,
        now: Instant,
        wall: DateTime<Utc>,
    ) -> Option<OccupancyEvent> {
        let next = if motion {
            self.last_motion_at = Some(now);
            self.last_idle_report = None;
            OccupancyState::Occupied
        } else {
            self.report_idle(now);
            match self.state {
                OccupancyState::Occupied if self.idle_for(now) >= self.hysteresis => {
                    OccupancyState::Free
                }
                current => current,
            }
        };

        if next == self.state {
            return None;
        }

        info!("[Occupancy] {} -> {}", self.state, next);
        self.state = next;
        self.emit(wall)
    }

    fn emit(&mut self, wall: DateTime<Utc>) -> Option<OccupancyEvent> {
        let occupied = self.state.is_occupied();
        if occupied == self.last_sent {
            debug!("[Occupancy] Suppressing duplicate {} event", self.state);
            return None;
        }

        self.last_sent = occupied;
        Some(OccupancyEvent::new(self.device_id.clone(), occupied, wall))
    }

    fn report_idle(&mut self, now: Instant) {
        let secs = self.idle_for(now).as_secs();
        if self.last_idle_report != Some(secs) {
            self.last_idle_report = Some(secs);
            if self.last_motion_at.is_some() {
                debug!("[Occupancy] Seconds without motion: {}", secs);
            } else {
                debug!("[Occupancy] Seconds before first motion: {}", secs);
            }
        }
    }
}
