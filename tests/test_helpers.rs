//! Test helpers and utilities for integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use telemetry_link::config::AppConfig;
use telemetry_link::connection::{no_jitter, ConnectionManager, ManagerSettings};
use telemetry_link::testing::{ManualClock, MockTransport};
use telemetry_link::transport::TransportError;

/// Minimal valid config with one metric
#[allow(dead_code)]
pub const MINIMAL_CONFIG: &str = r#"
client_id = "pi-sim-01"

[[metrics]]
name = "temperature"
unit = "C"
start = 20.0
step = 0.25
topic_suffix = "temp"
"#;

#[allow(dead_code)]
pub fn test_config() -> AppConfig {
    AppConfig::from_toml_str(MINIMAL_CONFIG).expect("minimal config should be valid")
}

/// Manager wired to a mock transport and a manual clock, with no jitter
#[allow(dead_code)]
pub struct Harness {
    pub transport: Arc<MockTransport>,
    pub clock: Arc<ManualClock>,
    pub manager: Arc<ConnectionManager>,
}

#[allow(dead_code)]
pub fn harness() -> Harness {
    let transport = Arc::new(MockTransport::new());
    let clock = Arc::new(ManualClock::new());
    let manager = ConnectionManager::builder(ManagerSettings::new("host", 1883, "client_id"))
        .transport(transport.clone())
        .clock(clock.clone())
        .jitter(no_jitter())
        .build()
        .expect("manager should build");

    Harness {
        transport,
        clock,
        manager,
    }
}

/// Like [`harness`] but with a counting reconnect strategy in place of the transport's
#[allow(dead_code)]
pub fn counting_harness(result: fn() -> Result<(), TransportError>) -> (Harness, Arc<AtomicUsize>) {
    let transport = Arc::new(MockTransport::new());
    let clock = Arc::new(ManualClock::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let manager = ConnectionManager::builder(ManagerSettings::new("host", 1883, "client_id"))
        .transport(transport.clone())
        .clock(clock.clone())
        .jitter(no_jitter())
        .reconnect_strategy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            result()
        })
        .build()
        .expect("manager should build");

    (
        Harness {
            transport,
            clock,
            manager,
        },
        calls,
    )
}
