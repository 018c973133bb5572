//! Transport layer for broker communication
//!
//! This module provides the transport abstraction the connection manager drives,
//! plus the rumqttc-backed MQTT implementation.

use rumqttc::v5::mqttbytes::QoS;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod mqtt;

/// Result code carried by connect/disconnect notifications (0 = success)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub i32);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(0);
    /// Broker refused the connection (bad credentials, unavailable, ...)
    pub const REFUSED: ResultCode = ResultCode(5);
    /// Broker closed the session with a non-normal reason
    pub const BROKER_DISCONNECT: ResultCode = ResultCode(6);
    /// Network or protocol failure on the socket
    pub const CONNECTION_LOST: ResultCode = ResultCode(7);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Notifications delivered by the transport's background loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Outcome of a connect or reconnect handshake
    Connected(ResultCode),
    /// Session ended, either requested or unexpected
    Disconnected(ResultCode),
}

/// Receiver for connection notifications
///
/// Registered with a transport once; invoked from the transport's background
/// task, potentially concurrently with calls made on other threads.
pub trait ConnectionListener: Send + Sync {
    fn on_event(&self, event: ConnectionEvent);
}

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Not connected to broker")]
    NotConnected,
    #[error("Invalid client id: {0}")]
    InvalidClientId(String),
    #[error("Invalid broker address: {0}")]
    InvalidBroker(String),
    #[error("Connection not configured - call async_connect first")]
    NotConfigured,
    #[error("Background network loop is not running")]
    LoopNotRunning,
    #[error("No async runtime available to drive the network loop")]
    NoRuntime,
    #[error("Request rejected by client")]
    Rejected(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Transport trait for broker communication
///
/// Every method only enqueues work or flips local state; none of them waits
/// for the network. Outcomes of connection attempts arrive later through the
/// registered [`ConnectionListener`].
pub trait Transport: Send + Sync {
    /// Configure the broker endpoint and arm the first connection attempt
    fn async_connect(&self, host: &str, port: u16, keepalive_secs: u16)
        -> Result<(), TransportError>;

    /// Arm another connection attempt after a failure or disconnect
    fn async_reconnect(&self) -> Result<(), TransportError>;

    /// Publish a message; fails with [`TransportError::NotConnected`] without a session
    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool)
        -> Result<(), TransportError>;

    /// Register the message the broker publishes on ungraceful loss of connection
    fn set_last_will(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool)
        -> Result<(), TransportError>;

    /// Request a graceful disconnect
    fn disconnect(&self) -> Result<(), TransportError>;

    /// Start the background network loop
    fn start_background_loop(&self) -> Result<(), TransportError>;

    /// Stop the background network loop
    fn stop_background_loop(&self) -> Result<(), TransportError>;

    /// Install the receiver for connect/disconnect notifications
    fn set_listener(&self, listener: Arc<dyn ConnectionListener>);
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::RumqttTransport;
