//! Occupancy detection: raw motion samples in, state-change events out.

mod debouncer;
mod event;
mod state_machine;

pub use debouncer::Debouncer;
pub use event::OccupancyEvent;
pub use state_machine::{OccupancyState, OccupancyStateMachine};
