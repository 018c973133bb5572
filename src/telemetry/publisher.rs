//! Periodic telemetry and health publishing through the connection manager
//!
//! Failed samples are counted and dropped. There is no queue: the next cycle
//! publishes fresh values once the manager has reconnected.

use super::generator::MetricGenerator;
use crate::config::AppConfig;
use crate::connection::ConnectionManager;
use crate::error::LinkResult;
use crate::observability::PublishCounters;
use crate::protocol::{HealthCounters, HealthPayload, TelemetryPayload, TopicBuilder};
use crate::transport::mqtt::qos_from_level;
use rumqttc::v5::mqttbytes::QoS;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Outcome of one sampling cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub published: usize,
    pub failed: usize,
}

pub struct TelemetryPublisher {
    manager: Arc<ConnectionManager>,
    client_id: String,
    health_topic: String,
    qos: QoS,
    retain: bool,
    generators: Vec<MetricGenerator>,
    counters: PublishCounters,
    next_seq: u64,
    next_health_seq: u64,
    started: Instant,
}

impl TelemetryPublisher {
    pub fn new(manager: Arc<ConnectionManager>, config: &AppConfig) -> Self {
        Self {
            manager,
            client_id: config.client_id.clone(),
            health_topic: TopicBuilder::build_health_topic(&config.client_id),
            qos: qos_from_level(config.qos).unwrap_or(QoS::AtMostOnce),
            retain: config.retain,
            generators: config
                .metrics
                .iter()
                .map(|metric| MetricGenerator::new(&config.client_id, metric))
                .collect(),
            counters: PublishCounters::new(),
            next_seq: 0,
            next_health_seq: 0,
            started: Instant::now(),
        }
    }

    pub fn generators(&self) -> &[MetricGenerator] {
        &self.generators
    }

    pub fn counters(&self) -> HealthCounters {
        self.counters.snapshot(self.manager.reconnect_count())
    }

    pub fn uptime_s(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Publish one sample per metric; each sample takes the next sequence number
    pub fn publish_samples(&mut self, timestamp_s: i64) -> CycleReport {
        let mut report = CycleReport::default();

        for generator in &mut self.generators {
            let seq = self.next_seq;
            self.next_seq += 1;

            let value = generator.next_value();
            let payload = TelemetryPayload::new(
                &self.client_id,
                generator.name(),
                generator.unit(),
                value,
                seq,
                timestamp_s,
            );

            let result = serde_json::to_vec(&payload)
                .map_err(Into::into)
                .and_then(|bytes| {
                    self.manager
                        .publish(generator.topic(), &bytes, self.qos, self.retain)
                });

            self.counters.record(result.is_ok());
            match result {
                Ok(()) => report.published += 1,
                Err(e) if e.is_connectivity() => {
                    report.failed += 1;
                    debug!(topic = generator.topic(), seq, error = %e, "Sample dropped while offline");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(topic = generator.topic(), seq, error = %e, "Sample dropped");
                }
            }
        }

        report
    }

    /// Publish a health report (never retained)
    pub fn publish_health(&mut self, timestamp_s: i64) -> LinkResult<()> {
        let seq = self.next_health_seq;
        self.next_health_seq += 1;

        let payload = HealthPayload::new(
            &self.client_id,
            self.uptime_s(),
            seq,
            self.counters(),
            timestamp_s,
        );
        let bytes = serde_json::to_vec(&payload)?;

        self.manager
            .publish(&self.health_topic, &bytes, self.qos, false)
            .map_err(|e| {
                warn!(seq, error = %e, "Health report not published");
                e
            })
    }
}
