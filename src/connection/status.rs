//! Retained online/offline announcements
//!
//! Both payloads are serialized once at construction. The offline one doubles
//! as the transport's last will, so the broker publishes it for us if the
//! process dies without a clean disconnect.

use crate::protocol::{DeviceState, StatusPayload, TopicBuilder};
use crate::transport::Transport;
use rumqttc::v5::mqttbytes::QoS;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct StatusAnnouncer {
    topic: String,
    online: Vec<u8>,
    offline: Vec<u8>,
    qos: QoS,
}

impl StatusAnnouncer {
    pub fn new(client_id: &str, qos: QoS) -> Result<Self, serde_json::Error> {
        Ok(Self {
            topic: TopicBuilder::build_status_topic(client_id),
            online: serde_json::to_vec(&StatusPayload::new(client_id, DeviceState::Online))?,
            offline: serde_json::to_vec(&StatusPayload::new(client_id, DeviceState::Offline))?,
            qos,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn online_payload(&self) -> &[u8] {
        &self.online
    }

    pub fn offline_payload(&self) -> &[u8] {
        &self.offline
    }

    /// Register the retained offline payload as the last will
    pub fn register_last_will(&self, transport: &dyn Transport) {
        if let Err(e) = transport.set_last_will(&self.topic, &self.offline, self.qos, true) {
            warn!(topic = %self.topic, error = %e, "Failed to register last will");
        }
    }

    /// Publish the retained online payload
    pub fn announce_online(&self, transport: &dyn Transport) -> bool {
        self.publish_retained(transport, DeviceState::Online, &self.online)
    }

    /// Publish the retained offline payload; skipped when there is no session
    pub fn announce_offline(&self, transport: &dyn Transport, connected: bool) -> bool {
        if !connected {
            return false;
        }
        self.publish_retained(transport, DeviceState::Offline, &self.offline)
    }

    fn publish_retained(&self, transport: &dyn Transport, state: DeviceState, payload: &[u8]) -> bool {
        match transport.publish(&self.topic, payload, self.qos, true) {
            Ok(()) => true,
            Err(e) => {
                debug!(topic = %self.topic, ?state, error = %e, "Status publish failed");
                false
            }
        }
    }
}
