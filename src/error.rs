use crate::auth::AuthError;
use std::time::Duration;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum AgentError {
    #[error("Network attachment timed out after {0:?}")]
    NetworkAttachTimeout(Duration),

    #[error("Wall clock is not synchronized yet")]
    ClockNotReady,

    #[error("Credential generation failed: {0}")]
    CredentialGeneration(AuthError),

    #[error("MQTT connect failed: {0}")]
    ConnectFailure(String),

    #[error("Subscribe to control topic failed: {0}")]
    SubscribeFailure(String),

    #[error("Delivery via {transport} failed: {reason}")]
    DeliveryFailure {
        transport: &'static str,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),
}

impl From<AuthError> for AgentError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::ClockNotReady => AgentError::ClockNotReady,
            other => AgentError::CredentialGeneration(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
