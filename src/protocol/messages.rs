//! Payload types published by a telemetry device
//!
//! All payloads are JSON objects carrying `schema_version` and a `device`
//! block so consumers can route and version them uniformly.

use serde::{Deserialize, Serialize};

/// Current payload schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Identity block embedded in every payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceInfo {
    pub client_id: String,
}

impl DeviceInfo {
    pub fn new(client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
        }
    }
}

/// Liveness state announced on the status topic
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Online,
    Offline,
}

/// Retained status message
///
/// # Examples
/// ```
/// use telemetry_link::protocol::{DeviceState, StatusPayload};
///
/// let offline = StatusPayload::new("pi-sim-01", DeviceState::Offline);
/// let json = serde_json::to_value(&offline).unwrap();
/// assert_eq!(json["state"], "offline");
/// assert_eq!(json["device"]["client_id"], "pi-sim-01");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusPayload {
    pub schema_version: u32,
    pub device: DeviceInfo,
    pub state: DeviceState,
}

impl StatusPayload {
    pub fn new(client_id: &str, state: DeviceState) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            device: DeviceInfo::new(client_id),
            state,
        }
    }
}

/// Measured value block of a telemetry sample
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricReading {
    pub name: String,
    pub unit: String,
    pub value: f64,
}

/// One telemetry sample
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryPayload {
    pub schema_version: u32,
    pub device: DeviceInfo,
    pub metric: MetricReading,
    /// Unix time in seconds at which the sample was taken
    pub timestamp_s: i64,
    /// Per-device sample sequence number
    pub seq: u64,
}

impl TelemetryPayload {
    pub fn new(
        client_id: &str,
        metric_name: &str,
        unit: &str,
        value: f64,
        seq: u64,
        timestamp_s: i64,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            device: DeviceInfo::new(client_id),
            metric: MetricReading {
                name: metric_name.to_string(),
                unit: unit.to_string(),
                value,
            },
            timestamp_s,
            seq,
        }
    }
}

/// Delivery counters reported in health messages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HealthCounters {
    pub publish_ok: u64,
    pub publish_fail: u64,
    pub reconnects: u64,
}

/// Periodic device health report
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthPayload {
    pub schema_version: u32,
    pub device: DeviceInfo,
    pub uptime_s: u64,
    pub seq: u64,
    pub counters: HealthCounters,
    pub timestamp_s: i64,
}

impl HealthPayload {
    pub fn new(
        client_id: &str,
        uptime_s: u64,
        seq: u64,
        counters: HealthCounters,
        timestamp_s: i64,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            device: DeviceInfo::new(client_id),
            uptime_s,
            seq,
            counters,
            timestamp_s,
        }
    }
}

/// Current Unix time in whole seconds
pub fn unix_time_s() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_status_payload_shape() {
        let online = serde_json::to_value(StatusPayload::new("pi-sim-01", DeviceState::Online))
            .unwrap();
        assert_eq!(
            online,
            json!({
                "schema_version": 1,
                "device": {"client_id": "pi-sim-01"},
                "state": "online"
            })
        );
    }

    #[test]
    fn test_telemetry_payload_has_version_and_fields() {
        let payload = TelemetryPayload::new("pi-sim-01", "temperature", "C", 25.5, 3, 1_700_000_000);
        let value: Value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["schema_version"], 1);
        assert_eq!(value["device"]["client_id"], "pi-sim-01");
        assert_eq!(value["metric"]["name"], "temperature");
        assert_eq!(value["metric"]["unit"], "C");
        assert_eq!(value["metric"]["value"], 25.5);
        assert_eq!(value["timestamp_s"], 1_700_000_000_i64);
        assert_eq!(value["seq"], 3);
    }

    #[test]
    fn test_health_payload_has_version_and_fields() {
        let counters = HealthCounters {
            publish_ok: 1,
            publish_fail: 0,
            reconnects: 77,
        };
        let payload = HealthPayload::new("pi-sim-01", 100, 7, counters, 77_777_777);
        let value: Value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["schema_version"], 1);
        assert_eq!(value["device"]["client_id"], "pi-sim-01");
        assert_eq!(value["uptime_s"], 100);
        assert_eq!(value["seq"], 7);
        assert_eq!(value["counters"]["publish_ok"], 1);
        assert_eq!(value["counters"]["publish_fail"], 0);
        assert_eq!(value["counters"]["reconnects"], 77);
        assert_eq!(value["timestamp_s"], 77_777_777);
    }

    #[test]
    fn test_device_state_parses_lowercase() {
        let state: DeviceState = serde_json::from_str("\"offline\"").unwrap();
        assert_eq!(state, DeviceState::Offline);
        assert!(serde_json::from_str::<DeviceState>("\"Offline\"").is_err());
    }

    #[test]
    fn test_unix_time_is_recent() {
        // 2023-11-14 or later
        assert!(unix_time_s() > 1_700_000_000);
    }
}
