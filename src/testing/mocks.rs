//! Mock implementations for testing
//!
//! `MockTransport` records every call and can replay connect/disconnect
//! notifications to its registered listener; `ManualClock` only moves when told.

use crate::connection::Clock;
use crate::transport::{ConnectionEvent, ConnectionListener, Transport, TransportError};
use rumqttc::v5::mqttbytes::QoS;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// A message handed to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub retain: bool,
}

impl PublishedMessage {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.payload).unwrap_or(serde_json::Value::Null)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory transport
///
/// Publishing succeeds only while the simulated session is up. Emitting
/// `Connected(0)` brings the session up, any `Disconnected` brings it down.
#[derive(Default)]
pub struct MockTransport {
    connects: Mutex<Vec<(String, u16, u16)>>,
    reconnects: AtomicUsize,
    published: Mutex<Vec<PublishedMessage>>,
    last_will: Mutex<Option<PublishedMessage>>,
    disconnects: AtomicUsize,
    loop_starts: AtomicUsize,
    loop_stops: AtomicUsize,
    listener: Mutex<Option<Arc<dyn ConnectionListener>>>,
    session_up: AtomicBool,
    fail_connect: AtomicBool,
    fail_reconnect: AtomicBool,
    fail_loop_start: AtomicBool,
    fail_publish_rejected: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_reconnect(&self, fail: bool) {
        self.fail_reconnect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_loop_start(&self, fail: bool) {
        self.fail_loop_start.store(fail, Ordering::SeqCst);
    }

    /// Reject publishes with an error other than `NotConnected`
    pub fn fail_publish_rejected(&self, fail: bool) {
        self.fail_publish_rejected.store(fail, Ordering::SeqCst);
    }

    pub fn set_session_up(&self, up: bool) {
        self.session_up.store(up, Ordering::SeqCst);
    }

    pub fn is_session_up(&self) -> bool {
        self.session_up.load(Ordering::SeqCst)
    }

    /// Deliver a notification to the registered listener, as the network loop would
    pub fn emit(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected(rc) => self.set_session_up(rc.is_success()),
            ConnectionEvent::Disconnected(_) => self.set_session_up(false),
        }

        // Clone out so the listener can call back into the mock
        let listener = lock(&self.listener).clone();
        if let Some(listener) = listener {
            listener.on_event(event);
        }
    }

    pub fn has_listener(&self) -> bool {
        lock(&self.listener).is_some()
    }

    pub fn connect_calls(&self) -> Vec<(String, u16, u16)> {
        lock(&self.connects).clone()
    }

    pub fn reconnect_calls(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.published).clone()
    }

    /// Published messages on one topic
    pub fn published_on(&self, topic: &str) -> Vec<PublishedMessage> {
        lock(&self.published)
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }

    pub fn last_will(&self) -> Option<PublishedMessage> {
        lock(&self.last_will).clone()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn loop_starts(&self) -> usize {
        self.loop_starts.load(Ordering::SeqCst)
    }

    pub fn loop_stops(&self) -> usize {
        self.loop_stops.load(Ordering::SeqCst)
    }

    pub fn clear_published(&self) {
        lock(&self.published).clear();
    }
}

impl Transport for MockTransport {
    fn async_connect(&self, host: &str, port: u16, keepalive_secs: u16) -> Result<(), TransportError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::InvalidBroker(host.to_string()));
        }
        lock(&self.connects).push((host.to_string(), port, keepalive_secs));
        Ok(())
    }

    fn async_reconnect(&self) -> Result<(), TransportError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        if self.fail_reconnect.load(Ordering::SeqCst) {
            return Err(TransportError::LoopNotRunning);
        }
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), TransportError> {
        if !self.is_session_up() {
            return Err(TransportError::NotConnected);
        }
        if self.fail_publish_rejected.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected("mock queue full".into()));
        }
        lock(&self.published).push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        Ok(())
    }

    fn set_last_will(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> Result<(), TransportError> {
        *lock(&self.last_will) = Some(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            qos,
            retain,
        });
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start_background_loop(&self) -> Result<(), TransportError> {
        if self.fail_loop_start.load(Ordering::SeqCst) {
            return Err(TransportError::NoRuntime);
        }
        self.loop_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop_background_loop(&self) -> Result<(), TransportError> {
        self.loop_stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_listener(&self, listener: Arc<dyn ConnectionListener>) {
        *lock(&self.listener) = Some(listener);
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *lock(&self.now) += by;
    }

    pub fn set(&self, to: Instant) {
        *lock(&self.now) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *lock(&self.now)
    }
}
