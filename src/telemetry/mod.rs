//! Simulated telemetry: metric generators and the periodic publisher

pub mod generator;
pub mod publisher;

pub use generator::MetricGenerator;
pub use publisher::{CycleReport, TelemetryPublisher};
