//! Observability: structured logging setup and publish counters

pub mod logging;
pub mod metrics;

pub use logging::{build_filter, init_logging, init_logging_from_env, parse_level, LogFormat};
pub use metrics::PublishCounters;
