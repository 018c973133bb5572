//! Error types for the telemetry link
//!
//! Connection-level failures are local: they are logged and returned to the
//! caller, never escalated into process termination.

use crate::connection::BackoffError;
use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for connection manager operations
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Transport unavailable: no connection handle was created")]
    TransportUnavailable,

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Transport rejected the request: {0}")]
    AsyncCallFailed(#[source] TransportError),

    #[error("Invalid backoff settings: {0}")]
    InvalidBackoff(#[from] BackoffError),

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl LinkError {
    /// True for failures that a later reconnect may clear
    pub fn is_connectivity(&self) -> bool {
        matches!(self, LinkError::NotConnected | LinkError::AsyncCallFailed(_))
    }
}

impl From<TransportError> for LinkError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::NotConnected => LinkError::NotConnected,
            other => LinkError::AsyncCallFailed(other),
        }
    }
}

/// Result type for link operations
pub type LinkResult<T> = Result<T, LinkError>;
