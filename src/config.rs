//! Device configuration
//!
//! A single TOML file describes the broker endpoint, the device identity,
//! publish cadence and the simulated metrics. Every section except `client_id`
//! and `[[metrics]]` is optional and falls back to defaults.

use crate::protocol::{validate_client_id, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

/// Top-level device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// One of error|warn|info|debug|trace; anything else becomes "info"
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub client_id: String,
    /// Telemetry publish period in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Health report period in milliseconds
    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub metrics: Vec<MetricConfig>,
}

/// Broker endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keepalive in seconds
    #[serde(default = "default_keepalive")]
    pub keepalive: u16,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            keepalive: default_keepalive(),
        }
    }
}

/// Reconnect pacing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Upper bound of the random delay added to every backoff window
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
    #[serde(default = "default_in_flight_timeout_secs")]
    pub in_flight_timeout_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_secs: default_initial_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
            jitter_max_ms: default_jitter_max_ms(),
            in_flight_timeout_secs: default_in_flight_timeout_secs(),
        }
    }
}

/// One simulated metric stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricConfig {
    pub name: String,
    pub unit: String,
    pub start: f64,
    pub step: f64,
    /// Appended to the client id to form the metric topic
    pub topic_suffix: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_interval_ms() -> u64 {
    100
}

fn default_health_interval_ms() -> u64 {
    10_000
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keepalive() -> u16 {
    60
}

fn default_initial_backoff_secs() -> u64 {
    1
}

fn default_max_backoff_secs() -> u64 {
    60
}

fn default_jitter_max_ms() -> u64 {
    200
}

fn default_in_flight_timeout_secs() -> u64 {
    15
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Invalid client_id: {0}")]
    InvalidClientId(#[from] ValidationError),
}

impl AppConfig {
    /// Load, normalise and validate a TOML config file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse, normalise and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let mut config: AppConfig = toml::from_str(content)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    fn normalize(&mut self) {
        let level = self.log_level.to_lowercase();
        self.log_level = if LOG_LEVELS.contains(&level.as_str()) {
            level
        } else {
            default_log_level()
        };
    }

    /// Check value ranges and cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_client_id(&self.client_id)?;

        if self.interval_ms == 0 {
            return Err(invalid("interval_ms must be greater than 0"));
        }
        if self.health_interval_ms == 0 {
            return Err(invalid("health_interval_ms must be greater than 0"));
        }
        if self.qos > 2 {
            return Err(ConfigError::InvalidConfig(format!(
                "qos must be 0, 1 or 2, got {}",
                self.qos
            )));
        }
        if self.broker.host.trim().is_empty() {
            return Err(invalid("broker.host must not be empty"));
        }

        let reconnect = &self.reconnect;
        if reconnect.initial_backoff_secs == 0 {
            return Err(invalid("reconnect.initial_backoff_secs must be at least 1"));
        }
        if reconnect.max_backoff_secs < reconnect.initial_backoff_secs {
            return Err(ConfigError::InvalidConfig(format!(
                "reconnect.max_backoff_secs ({}) must be >= initial_backoff_secs ({})",
                reconnect.max_backoff_secs, reconnect.initial_backoff_secs
            )));
        }
        if reconnect.in_flight_timeout_secs == 0 {
            return Err(invalid("reconnect.in_flight_timeout_secs must be at least 1"));
        }

        if self.metrics.is_empty() {
            return Err(invalid("at least one [[metrics]] entry is required"));
        }
        for metric in &self.metrics {
            if metric.name.trim().is_empty() {
                return Err(invalid("metric name must not be empty"));
            }
            if metric.topic_suffix.trim().is_empty() {
                return Err(ConfigError::InvalidConfig(format!(
                    "metric '{}' has an empty topic_suffix",
                    metric.name
                )));
            }
            if !metric.start.is_finite() || !metric.step.is_finite() {
                return Err(ConfigError::InvalidConfig(format!(
                    "metric '{}' start and step must be finite",
                    metric.name
                )));
            }
        }

        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::InvalidConfig(message.to_string())
}
