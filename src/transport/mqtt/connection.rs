//! Pure connection configuration and event routing for the MQTT transport
//!
//! This module contains pure functions for building client options and for
//! turning event loop poll results into connection notifications.

use crate::transport::{ConnectionEvent, ResultCode, TransportError};
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, DisconnectReasonCode, LastWill, Packet};
use rumqttc::v5::{mqttbytes::QoS, ConnectionError, Event, MqttOptions};
use std::time::Duration;

/// Pure function to configure MQTT options for a connection attempt
pub fn configure_mqtt_options(
    client_id: &str,
    host: &str,
    port: u16,
    keepalive_secs: u16,
    last_will: Option<LastWill>,
) -> Result<MqttOptions, TransportError> {
    if client_id.is_empty() {
        return Err(TransportError::InvalidClientId(client_id.to_string()));
    }
    if host.trim().is_empty() {
        return Err(TransportError::InvalidBroker(format!("{host}:{port}")));
    }

    let mut mqtt_options = MqttOptions::new(client_id, host, port);
    mqtt_options.set_keep_alive(Duration::from_secs(u64::from(keepalive_secs)));
    mqtt_options.set_clean_start(true);

    if let Some(will) = last_will {
        mqtt_options.set_last_will(will);
    }

    Ok(mqtt_options)
}

/// Map a numeric QoS level (0-2) to the client's QoS type
pub fn qos_from_level(level: u8) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

/// Session phase tracked by the background loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// A connection attempt is underway (no CONNACK yet)
    Connecting,
    /// CONNACK accepted, session live
    Up,
    /// Broker or client closed the session; the socket is winding down
    Down,
}

/// Condensed view of one event loop poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    ConnAck { accepted: bool },
    BrokerDisconnect { normal: bool },
    Refused,
    Failed,
    Other,
}

/// What the loop does after a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopStep {
    pub next: SessionPhase,
    pub event: Option<ConnectionEvent>,
    /// Reported right after `event`
    pub follow_up: Option<ConnectionEvent>,
    /// Wait for a reconnect request before polling again
    pub park: bool,
}

impl LoopStep {
    /// Notifications to deliver, in order
    pub fn events(&self) -> impl Iterator<Item = ConnectionEvent> {
        self.event.into_iter().chain(self.follow_up)
    }
}

/// A failed handshake is reported as a failed connect followed by a disconnect
fn failed_attempt(code: ResultCode) -> LoopStep {
    LoopStep {
        next: SessionPhase::Connecting,
        event: Some(ConnectionEvent::Connected(code)),
        follow_up: Some(ConnectionEvent::Disconnected(code)),
        park: true,
    }
}

/// Classify a poll result (pure function)
pub fn classify_poll(result: &Result<Event, ConnectionError>) -> PollOutcome {
    match result {
        Ok(Event::Incoming(Packet::ConnAck(ack))) => PollOutcome::ConnAck {
            accepted: ack.code == ConnectReturnCode::Success,
        },
        Ok(Event::Incoming(Packet::Disconnect(disconnect))) => PollOutcome::BrokerDisconnect {
            normal: disconnect.reason_code == DisconnectReasonCode::NormalDisconnection,
        },
        Ok(_) => PollOutcome::Other,
        Err(ConnectionError::ConnectionRefused(_)) => PollOutcome::Refused,
        Err(_) => PollOutcome::Failed,
    }
}

/// Decide the next loop step from the current phase and poll outcome (pure function)
pub fn advance_session(phase: SessionPhase, outcome: PollOutcome) -> LoopStep {
    let stay = |event| LoopStep {
        next: phase,
        event,
        follow_up: None,
        park: false,
    };

    match (phase, outcome) {
        (_, PollOutcome::ConnAck { accepted: true }) => LoopStep {
            next: SessionPhase::Up,
            event: Some(ConnectionEvent::Connected(ResultCode::SUCCESS)),
            follow_up: None,
            park: false,
        },
        (_, PollOutcome::ConnAck { accepted: false }) | (_, PollOutcome::Refused) => {
            failed_attempt(ResultCode::REFUSED)
        }
        (SessionPhase::Up, PollOutcome::BrokerDisconnect { normal }) => {
            let code = if normal {
                ResultCode::SUCCESS
            } else {
                ResultCode::BROKER_DISCONNECT
            };
            LoopStep {
                next: SessionPhase::Down,
                event: Some(ConnectionEvent::Disconnected(code)),
                follow_up: None,
                park: false,
            }
        }
        (SessionPhase::Up, PollOutcome::Failed) => LoopStep {
            next: SessionPhase::Connecting,
            event: Some(ConnectionEvent::Disconnected(ResultCode::CONNECTION_LOST)),
            follow_up: None,
            park: true,
        },
        (SessionPhase::Connecting, PollOutcome::Failed) => {
            failed_attempt(ResultCode::CONNECTION_LOST)
        }
        // Already reported when the broker said goodbye
        (SessionPhase::Down, PollOutcome::Failed) => LoopStep {
            next: SessionPhase::Connecting,
            event: None,
            follow_up: None,
            park: true,
        },
        (_, PollOutcome::BrokerDisconnect { .. }) | (_, PollOutcome::Other) => stay(None),
    }
}
