//! Device authentication for the IoT Hub session.
//!
//! The hub accepts a shared access signature as the MQTT password. Tokens
//! are short-lived and signed against the wall clock, so a fresh one is
//! generated for every connection attempt.

mod clock;
mod credential;

pub use clock::{SYNC_THRESHOLD_UNIX, SystemClock, WallClock};
pub use credential::{Credential, CredentialManager};

use thiserror::Error;

/// Failures while producing a credential.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The wall clock has not been synchronized; signing would produce a
    /// token the hub rejects.
    #[error("wall clock is not synchronized")]
    ClockNotReady,

    #[error("Signature computation failed: {0}")]
    SignatureError(String),

    /// The signed token would not be valid at the moment it is handed out.
    #[error("credential expired before use (expires at {0})")]
    Expired(i64),
}
