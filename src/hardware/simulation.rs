//! Simulated hardware for development without a PIR sensor.

use super::{Indicators, MotionSensor};
use crate::occupancy::OccupancyState;
use log::info;
use std::io;
use std::time::{Duration, Instant};

/// Square-wave motion: `on` of motion, then `off` of silence, repeating.
///
/// With `off` longer than the hysteresis window every cycle produces an
/// Occupied and a Free event.
pub struct SimulatedSensor {
    on: Duration,
    off: Duration,
    started_at: Instant,
}

impl SimulatedSensor {
    pub fn new(on: Duration, off: Duration) -> Self {
        info!(
            "[Sim] Motion for {} ms every {} ms",
            on.as_millis(),
            (on + off).as_millis()
        );
        Self {
            on,
            off,
            started_at: Instant::now(),
        }
    }

    pub fn motion_at(&self, now: Instant) -> bool {
        let period = (self.on + self.off).as_millis();
        if period == 0 {
            return false;
        }
        let phase = now.saturating_duration_since(self.started_at).as_millis() % period;
        phase < self.on.as_millis()
    }
}

impl MotionSensor for SimulatedSensor {
    fn read(&mut self) -> io::Result<bool> {
        Ok(self.motion_at(Instant::now()))
    }
}

/// Indicators that only log state changes.
#[derive(Debug, Default)]
pub struct LogIndicators {
    shown: Option<OccupancyState>,
}

impl Indicators for LogIndicators {
    fn show(&mut self, state: OccupancyState) {
        if self.shown != Some(state) {
            info!(
                "[Sim] Indicator: {}",
                if state.is_occupied() { "red (occupied)" } else { "green (free)" }
            );
            self.shown = Some(state);
        }
    }
}
