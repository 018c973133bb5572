//! Topic layout and payload types for device telemetry
//!
//! This module implements the topic conventions and JSON payload structures
//! a device publishes: telemetry samples, health reports and retained status.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
