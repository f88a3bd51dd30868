//! Occupancy agent library.
//!
//! Samples a PIR motion sensor, derives a stable Free/Occupied state, and
//! reports every change to Azure IoT Hub over MQTT and to an HTTP function.

pub mod agent;
pub mod auth;
pub mod config;
pub mod delivery;
pub mod error;
pub mod hardware;
pub mod instance_lock;
pub mod occupancy;
pub mod session;

#[cfg(test)]
mod testing;
