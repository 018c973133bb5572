//! Topic construction and client id validation
//!
//! Every topic a device publishes lives under `devices/`:
//!
//! - telemetry: `devices/<client_id>-<suffix>`
//! - status:    `devices/<client_id>/status`
//! - health:    `devices/<client_id>/health`

use thiserror::Error;

/// Topic construction functions
pub struct TopicBuilder;

impl TopicBuilder {
    /// Build metric topic: `devices/{client_id}-{suffix}`
    pub fn build_metric_topic(client_id: &str, suffix: &str) -> String {
        format!("devices/{client_id}-{suffix}")
    }

    /// Build retained status topic: `devices/{client_id}/status`
    pub fn build_status_topic(client_id: &str) -> String {
        format!("devices/{client_id}/status")
    }

    /// Build health topic: `devices/{client_id}/health`
    pub fn build_health_topic(client_id: &str) -> String {
        format!("devices/{client_id}/health")
    }
}

/// Client ids end up inside topic names, so they cannot contain wildcards or
/// level separators.
pub fn validate_client_id(client_id: &str) -> Result<(), ValidationError> {
    if client_id.is_empty() {
        return Err(ValidationError::EmptyClientId);
    }

    for ch in client_id.chars() {
        if matches!(ch, '+' | '#' | '/') || ch.is_control() || ch.is_whitespace() {
            return Err(ValidationError::InvalidClientIdChar(ch));
        }
    }

    Ok(())
}

/// Validation errors for topic components
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Client ID cannot be empty")]
    EmptyClientId,
    #[error("Client ID contains invalid character: '{0:?}'")]
    InvalidClientIdChar(char),
}
