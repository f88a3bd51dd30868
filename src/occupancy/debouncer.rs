use log::debug;
use std::time::Instant;

/// Typed front end for the motion sensor.
///
/// The PIR output is electrically clean, so readings pass through
/// unchanged. Only edges are tracked, for logging.
#[derive(Debug, Default)]
pub struct Debouncer {
    last: bool,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample(&mut self, raw: bool, _now: Instant) -> bool {
        if raw != self.last {
            debug!("[Occupancy] Motion {}", if raw { "onset" } else { "ceased" });
            self.last = raw;
        }
        raw
    }
}
