//! Simulated metric streams

use crate::config::MetricConfig;
use crate::protocol::TopicBuilder;

/// Linear value source: `start`, `start + step`, `start + 2*step`, ...
#[derive(Debug, Clone)]
pub struct MetricGenerator {
    name: String,
    unit: String,
    topic: String,
    start: f64,
    step: f64,
    emitted: u64,
}

impl MetricGenerator {
    pub fn new(client_id: &str, metric: &MetricConfig) -> Self {
        Self {
            name: metric.name.clone(),
            unit: metric.unit.clone(),
            topic: TopicBuilder::build_metric_topic(client_id, &metric.topic_suffix),
            start: metric.start,
            step: metric.step,
            emitted: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next value in the stream
    pub fn next_value(&mut self) -> f64 {
        // Multiply rather than accumulate so long runs do not drift
        let value = self.start + self.step * self.emitted as f64;
        self.emitted += 1;
        value
    }
}
