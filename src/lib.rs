//! telemetry-link
//!
//! A resilient MQTT connection manager for telemetry devices: one logical
//! broker connection, exponential reconnect backoff with jitter, in-flight
//! attempt timeouts and retained online/offline status with a last will.
//!
//! # Overview
//!
//! - [`connection`] - backoff scheduler, shared state, status announcer and the manager
//! - [`transport`] - the transport abstraction and its rumqttc implementation
//! - [`protocol`] - topic layout and JSON payloads
//! - [`telemetry`] - simulated metrics and the periodic publisher
//! - [`config`] - TOML configuration
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use telemetry_link::connection::{ConnectionManager, ManagerSettings, TickOutcome};
//! use telemetry_link::testing::MockTransport;
//! use telemetry_link::transport::{ConnectionEvent, ResultCode};
//!
//! let transport = Arc::new(MockTransport::new());
//! let manager = ConnectionManager::builder(ManagerSettings::new("localhost", 1883, "pi-sim-01"))
//!     .transport(transport.clone())
//!     .build()
//!     .unwrap();
//!
//! // Driven by an external timer in a real device
//! assert_eq!(manager.tick(), TickOutcome::AttemptIssued);
//!
//! // The transport reports the handshake outcome asynchronously
//! transport.emit(ConnectionEvent::Connected(ResultCode::SUCCESS));
//! assert!(manager.is_connected());
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod telemetry;
pub mod testing;
pub mod transport;

pub use config::{AppConfig, ConfigError};
pub use connection::{ConnectionManager, ConnectionStats, ManagerSettings, TickOutcome};
pub use error::{LinkError, LinkResult};
pub use transport::{ConnectionEvent, ResultCode, Transport, TransportError};
