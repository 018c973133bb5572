//! Connection manager over the real rumqttc transport, without a broker
//!
//! Nothing listens on port 1 of the loopback interface, so every attempt is
//! refused; the manager must keep scheduling retries and shut down cleanly.

use rumqttc::v5::mqttbytes::QoS;
use std::sync::Arc;
use std::time::Duration;
use telemetry_link::connection::{no_jitter, ConnectionManager, ManagerSettings, TickOutcome};
use telemetry_link::error::LinkError;
use telemetry_link::transport::{MqttTransport, Transport};

fn unreachable_manager() -> Arc<ConnectionManager> {
    let transport = MqttTransport::new("pi-sim-refused").unwrap();
    ConnectionManager::builder(ManagerSettings::new("127.0.0.1", 1, "pi-sim-refused"))
        .transport(Arc::new(transport) as Arc<dyn Transport>)
        .jitter(no_jitter())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_refused_broker_keeps_manager_disconnected() {
    let manager = unreachable_manager();

    manager.connect(5).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!manager.is_connected());

    // The loop is running, so the reconnect request is accepted
    assert_eq!(manager.tick(), TickOutcome::AttemptIssued);
    assert_eq!(manager.tick(), TickOutcome::InFlight);

    let result = manager.publish("devices/pi-sim-refused-temp", b"{}", QoS::AtMostOnce, false);
    assert!(matches!(result, Err(LinkError::NotConnected)));

    manager.stop();
    assert_eq!(manager.tick(), TickOutcome::Stopping);
    assert_eq!(manager.stats().reconnects, 1);
}

#[tokio::test]
async fn test_connect_twice_starts_one_loop() {
    let manager = unreachable_manager();

    manager.connect(5).unwrap();
    // Second connect re-arms the running loop instead of failing
    manager.connect(5).unwrap();

    manager.stop();
}

#[test]
fn test_connect_outside_runtime_fails_and_can_retry() {
    let manager = unreachable_manager();

    let result = manager.connect(5);
    assert!(matches!(result, Err(LinkError::AsyncCallFailed(_))));

    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        manager.connect(5).unwrap();
        manager.stop();
    });
}
