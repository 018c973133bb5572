//! MQTT transport implementation over rumqttc
//!
//! The module is split into two focused sub-modules:
//!
//! - [`connection`] - Pure option building and event-loop routing decisions
//! - [`client`] - Impure I/O: the rumqttc client and its background task
//!
//! # Usage
//!
//! ```rust,no_run
//! use telemetry_link::transport::mqtt::RumqttTransport;
//! use telemetry_link::transport::Transport;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = RumqttTransport::new("pi-sim-01")?;
//! transport.async_connect("localhost", 1883, 60)?;
//! transport.start_background_loop()?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod connection;

pub use client::RumqttTransport;
pub use connection::{
    advance_session, classify_poll, configure_mqtt_options, qos_from_level, LoopStep,
    PollOutcome, SessionPhase,
};
