//! Connection lifecycle and reconnect scheduling
//!
//! The manager never spawns a scheduler of its own. An external timer calls
//! [`ConnectionManager::tick`], which decides from the shared state and the
//! backoff window whether to ask the transport for another attempt. The
//! transport reports outcomes back through [`ConnectionManager::handle_event`],
//! possibly from its own background task while a tick is running.
//!
//! ```text
//! Disconnected --tick issues reconnect--> Connecting (in flight)
//! Connecting   --Connected(0)-----------> Connected
//! Connecting   --failed / timed out-----> Disconnected
//! Connected    --Disconnected(rc)-------> Disconnected
//! any          --stop()-----------------> Stopped
//! ```

use super::backoff::{uniform_jitter, BackoffScheduler, JitterFn};
use super::clock::{Clock, SystemClock};
use super::state::{ConnectionState, ConnectionStats};
use super::status::StatusAnnouncer;
use crate::config::AppConfig;
use crate::error::{LinkError, LinkResult};
use crate::transport::mqtt::qos_from_level;
use crate::transport::{
    ConnectionEvent, ConnectionListener, ResultCode, Transport, TransportError,
};
use rumqttc::v5::mqttbytes::QoS;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How long an issued reconnect may stay unanswered before it counts as failed
pub const RECONNECT_IN_FLIGHT_TIMEOUT: Duration = Duration::from_secs(15);

/// Everything the manager needs to know about its endpoint and pacing
#[derive(Debug, Clone, PartialEq)]
pub struct ManagerSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// QoS used for status announcements
    pub qos: QoS,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub jitter_max_ms: u64,
    pub in_flight_timeout: Duration,
}

impl ManagerSettings {
    pub fn new(host: &str, port: u16, client_id: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            client_id: client_id.to_string(),
            qos: QoS::AtMostOnce,
            initial_backoff_secs: 1,
            max_backoff_secs: 60,
            jitter_max_ms: 200,
            in_flight_timeout: RECONNECT_IN_FLIGHT_TIMEOUT,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            host: config.broker.host.clone(),
            port: config.broker.port,
            client_id: config.client_id.clone(),
            qos: qos_from_level(config.qos).unwrap_or(QoS::AtMostOnce),
            initial_backoff_secs: config.reconnect.initial_backoff_secs,
            max_backoff_secs: config.reconnect.max_backoff_secs,
            jitter_max_ms: config.reconnect.jitter_max_ms,
            in_flight_timeout: Duration::from_secs(config.reconnect.in_flight_timeout_secs),
        }
    }
}

/// The primitive that issues one asynchronous reconnect
///
/// Defaults to [`Transport::async_reconnect`]; tests swap in closures to count
/// calls or force failures.
pub trait ReconnectStrategy: Send + Sync {
    fn reconnect(&self) -> Result<(), TransportError>;
}

impl<F> ReconnectStrategy for F
where
    F: Fn() -> Result<(), TransportError> + Send + Sync,
{
    fn reconnect(&self) -> Result<(), TransportError> {
        self()
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// `stop()` has been called
    Stopping,
    AlreadyConnected,
    /// No transport handle exists
    TransportUnavailable,
    /// Another tick was running; this one did nothing
    Busy,
    /// An earlier attempt is still awaiting its outcome
    InFlight,
    /// The backoff window has not elapsed
    BackingOff,
    /// A reconnect was issued and is now in flight
    AttemptIssued,
    /// The reconnect primitive returned an error
    AttemptFailed,
}

/// Listener registered with the transport; holds only a weak reference so the
/// transport never keeps its owner alive
struct ManagerListener {
    manager: Weak<ConnectionManager>,
}

impl ConnectionListener for ManagerListener {
    fn on_event(&self, event: ConnectionEvent) {
        match self.manager.upgrade() {
            Some(manager) => manager.handle_event(event),
            None => debug!(?event, "Connection manager gone, dropping event"),
        }
    }
}

/// Builder for [`ConnectionManager`]
pub struct ConnectionManagerBuilder {
    settings: ManagerSettings,
    transport: Option<Arc<dyn Transport>>,
    clock: Option<Arc<dyn Clock>>,
    reconnect: Option<Box<dyn ReconnectStrategy>>,
    jitter: Option<JitterFn>,
}

impl ConnectionManagerBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn reconnect_strategy(mut self, strategy: impl ReconnectStrategy + 'static) -> Self {
        self.reconnect = Some(Box::new(strategy));
        self
    }

    pub fn jitter(mut self, jitter: JitterFn) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Validate the backoff bounds, pre-build the status payloads and wire the
    /// manager into its transport
    pub fn build(self) -> LinkResult<Arc<ConnectionManager>> {
        let settings = self.settings;
        let jitter = self
            .jitter
            .unwrap_or_else(|| uniform_jitter(settings.jitter_max_ms));
        let backoff = BackoffScheduler::new(
            settings.initial_backoff_secs,
            settings.max_backoff_secs,
            jitter,
        )?;
        let status = StatusAnnouncer::new(&settings.client_id, settings.qos)?;

        if self.transport.is_none() {
            error!(
                client_id = %settings.client_id,
                "No transport handle; every connection operation will fail fast"
            );
        }

        let manager = Arc::new(ConnectionManager {
            settings,
            transport: self.transport,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            reconnect: self.reconnect,
            backoff: Mutex::new(backoff),
            state: ConnectionState::new(),
            status,
            tick_guard: Mutex::new(()),
        });

        if let Some(transport) = &manager.transport {
            transport.set_listener(Arc::new(ManagerListener {
                manager: Arc::downgrade(&manager),
            }));
            manager.status.register_last_will(transport.as_ref());
        }

        Ok(manager)
    }
}

/// Owns the connection state, the backoff schedule and the transport handle
pub struct ConnectionManager {
    settings: ManagerSettings,
    transport: Option<Arc<dyn Transport>>,
    clock: Arc<dyn Clock>,
    reconnect: Option<Box<dyn ReconnectStrategy>>,
    backoff: Mutex<BackoffScheduler>,
    state: ConnectionState,
    status: StatusAnnouncer,
    /// Serializes ticks; a tick that cannot take it returns `Busy`
    tick_guard: Mutex<()>,
}

impl ConnectionManager {
    pub fn builder(settings: ManagerSettings) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            settings,
            transport: None,
            clock: None,
            reconnect: None,
            jitter: None,
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    fn transport(&self) -> LinkResult<&Arc<dyn Transport>> {
        self.transport.as_ref().ok_or(LinkError::TransportUnavailable)
    }

    fn backoff(&self) -> MutexGuard<'_, BackoffScheduler> {
        self.backoff.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    pub fn is_stopping(&self) -> bool {
        self.state.is_stopping()
    }

    pub fn reconnect_count(&self) -> u64 {
        self.state.reconnect_count()
    }

    pub fn status(&self) -> &StatusAnnouncer {
        &self.status
    }

    /// Issue the initial asynchronous connect and start the network loop once
    ///
    /// Does not wait for the broker handshake; the outcome arrives later as a
    /// [`ConnectionEvent`].
    pub fn connect(&self, keepalive_secs: u16) -> LinkResult<()> {
        let transport = self.transport()?;

        transport
            .async_connect(&self.settings.host, self.settings.port, keepalive_secs)
            .map_err(|e| {
                error!(
                    host = %self.settings.host,
                    port = self.settings.port,
                    error = %e,
                    "Async connect failed"
                );
                LinkError::AsyncCallFailed(e)
            })?;

        if self.state.claim_loop_start() {
            if let Err(e) = transport.start_background_loop() {
                error!(error = %e, "Failed to start network loop");
                self.state.release_loop_start();
                return Err(LinkError::AsyncCallFailed(e));
            }
        }

        info!(
            host = %self.settings.host,
            port = self.settings.port,
            keepalive_secs,
            "Connect issued"
        );
        Ok(())
    }

    /// One reconnect-scheduling pulse
    pub fn tick(&self) -> TickOutcome {
        if self.state.is_stopping() {
            return TickOutcome::Stopping;
        }
        if self.state.is_connected() {
            return TickOutcome::AlreadyConnected;
        }
        let Some(transport) = self.transport.as_ref() else {
            return TickOutcome::TransportUnavailable;
        };

        let _guard = match self.tick_guard.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return TickOutcome::Busy,
        };

        let now = self.clock.now();

        // A stuck attempt counts as a failure and opens a fresh window
        if self
            .state
            .clear_timed_out_reconnect(now, self.settings.in_flight_timeout)
        {
            warn!(
                timeout_secs = self.settings.in_flight_timeout.as_secs(),
                "Reconnect attempt timed out, allowing another attempt"
            );
            self.backoff().schedule_attempt(now);
        }

        if self.state.reconnect_in_flight() {
            return TickOutcome::InFlight;
        }
        if !self.backoff().can_attempt(now) {
            return TickOutcome::BackingOff;
        }
        // A concurrent stop() must not be followed by a fresh attempt
        if self.state.is_stopping() {
            return TickOutcome::Stopping;
        }

        let result = match &self.reconnect {
            Some(strategy) => strategy.reconnect(),
            None => transport.async_reconnect(),
        };

        let outcome = match result {
            Ok(()) => {
                self.state.record_reconnect_issued(now);
                info!(
                    attempt = self.state.reconnect_count(),
                    "Reconnect issued"
                );
                TickOutcome::AttemptIssued
            }
            Err(e) => {
                error!(error = %e, "Reconnect request failed");
                TickOutcome::AttemptFailed
            }
        };

        // Keep the cadence whether or not the request was accepted, unless the
        // connect already landed. on_connect marks connected before it resets,
        // so checking under the backoff lock cannot undo its reset.
        let mut backoff = self.backoff();
        if self.state.is_connected() {
            debug!("Connected while the reconnect was issued, backoff stays reset");
            return outcome;
        }
        backoff.schedule_attempt(now);
        debug!(
            next_delay_secs = backoff.current_delay_secs(),
            "Next reconnect window scheduled"
        );

        outcome
    }

    /// Run one tick if disconnected; true if connected afterwards
    pub fn ensure_connected(&self) -> bool {
        if self.state.is_connected() {
            return true;
        }
        self.tick();
        self.state.is_connected()
    }

    /// Publish through the transport, trying one reconnect first if needed
    ///
    /// Never queues or retries the message; the caller decides whether a
    /// failed sample is dropped.
    pub fn publish(&self, topic: &str, payload: &[u8], qos: QoS, retain: bool) -> LinkResult<()> {
        let transport = self.transport()?;

        if !self.ensure_connected() {
            return Err(LinkError::NotConnected);
        }

        match transport.publish(topic, payload, qos, retain) {
            Ok(()) => Ok(()),
            Err(TransportError::NotConnected) => {
                debug!(topic, "Publish found no connection, scheduling reconnect");
                self.state.mark_disconnected();
                self.tick();
                Err(LinkError::NotConnected)
            }
            Err(e) => {
                error!(topic, error = %e, "Publish failed");
                Err(LinkError::AsyncCallFailed(e))
            }
        }
    }

    /// Graceful, idempotent shutdown
    pub fn stop(&self) {
        if !self.state.begin_stopping() {
            return;
        }
        let Some(transport) = self.transport.as_ref() else {
            return;
        };

        self.status
            .announce_offline(transport.as_ref(), self.state.is_connected());

        if let Err(e) = transport.disconnect() {
            debug!(error = %e, "Disconnect request failed");
        }

        if self.state.take_loop_started() {
            if let Err(e) = transport.stop_background_loop() {
                warn!(error = %e, "Failed to stop network loop");
            }
        }

        info!(client_id = %self.settings.client_id, "Connection manager stopped");
    }

    /// Apply a transport notification
    pub fn handle_event(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Connected(rc) => self.on_connect(rc),
            ConnectionEvent::Disconnected(rc) => self.on_disconnect(rc),
        }
    }

    fn on_connect(&self, rc: ResultCode) {
        if !rc.is_success() {
            // The attempt stays in flight until a disconnect or the timeout
            self.state.mark_disconnected();
            error!(rc = %rc, "Connect failed");
            return;
        }

        self.state.mark_connected();
        self.backoff().reset();
        info!(client_id = %self.settings.client_id, "Connected to broker");

        if let Some(transport) = &self.transport {
            self.status.announce_online(transport.as_ref());
        }
    }

    fn on_disconnect(&self, rc: ResultCode) {
        self.state.mark_session_lost();

        if self.state.is_stopping() {
            info!(rc = %rc, "Disconnected cleanly");
        } else {
            warn!(rc = %rc, "Disconnected, will reconnect");
        }
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            connected: self.state.is_connected(),
            stopping: self.state.is_stopping(),
            reconnect_in_flight: self.state.reconnect_in_flight(),
            reconnects: self.state.reconnect_count(),
            in_flight_timeouts: self.state.in_flight_timeout_count(),
            current_backoff_secs: self.backoff().current_delay_secs(),
        }
    }

    /// Earliest instant the next reconnect may be issued, if a window is open
    pub fn next_allowed_attempt(&self) -> Option<std::time::Instant> {
        self.backoff().next_allowed_attempt()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("settings", &self.settings)
            .field("has_transport", &self.transport.is_some())
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::backoff::no_jitter;
    use crate::testing::{ManualClock, MockTransport};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings() -> ManagerSettings {
        ManagerSettings::new("localhost", 1883, "pi-sim-01")
    }

    fn manager_with(
        transport: Arc<MockTransport>,
        clock: Arc<ManualClock>,
    ) -> Arc<ConnectionManager> {
        ConnectionManager::builder(settings())
            .transport(transport)
            .clock(clock)
            .jitter(no_jitter())
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_rejects_inverted_backoff() {
        let mut settings = settings();
        settings.initial_backoff_secs = 30;
        settings.max_backoff_secs = 10;

        let result = ConnectionManager::builder(settings).build();
        assert!(matches!(result, Err(LinkError::InvalidBackoff(_))));
    }

    #[test]
    fn test_build_registers_listener_and_last_will() {
        let transport = Arc::new(MockTransport::new());
        let _manager = manager_with(transport.clone(), Arc::new(ManualClock::new()));

        assert!(transport.has_listener());
        let will = transport.last_will().unwrap();
        assert_eq!(will.topic, "devices/pi-sim-01/status");
        assert!(will.retain);
    }

    #[test]
    fn test_connect_starts_loop_once() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager_with(transport.clone(), Arc::new(ManualClock::new()));

        manager.connect(60).unwrap();
        manager.connect(60).unwrap();

        assert_eq!(transport.connect_calls().len(), 2);
        assert_eq!(transport.connect_calls()[0], ("localhost".to_string(), 1883, 60));
        assert_eq!(transport.loop_starts(), 1);
    }

    #[test]
    fn test_connect_failure_does_not_start_loop() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_connect(true);
        let manager = manager_with(transport.clone(), Arc::new(ManualClock::new()));

        let result = manager.connect(60);
        assert!(matches!(result, Err(LinkError::AsyncCallFailed(_))));
        assert_eq!(transport.loop_starts(), 0);
    }

    #[test]
    fn test_failed_loop_start_can_be_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_loop_start(true);
        let manager = manager_with(transport.clone(), Arc::new(ManualClock::new()));

        assert!(manager.connect(60).is_err());

        transport.fail_loop_start(false);
        manager.connect(60).unwrap();
        assert_eq!(transport.loop_starts(), 1);
    }

    #[test]
    fn test_tick_outcomes_follow_state() {
        let transport = Arc::new(MockTransport::new());
        let clock = Arc::new(ManualClock::new());
        let manager = manager_with(transport.clone(), clock.clone());

        assert_eq!(manager.tick(), TickOutcome::AttemptIssued);
        assert_eq!(manager.tick(), TickOutcome::InFlight);

        manager.handle_event(ConnectionEvent::Connected(ResultCode::SUCCESS));
        assert_eq!(manager.tick(), TickOutcome::AlreadyConnected);

        manager.handle_event(ConnectionEvent::Disconnected(ResultCode::CONNECTION_LOST));
        assert_eq!(manager.tick(), TickOutcome::AttemptIssued);

        manager.stop();
        assert_eq!(manager.tick(), TickOutcome::Stopping);
        assert_eq!(transport.reconnect_calls(), 2);
    }

    #[test]
    fn test_failed_reconnect_is_not_in_flight_but_backs_off() {
        let transport = Arc::new(MockTransport::new());
        let clock = Arc::new(ManualClock::new());
        transport.fail_reconnect(true);
        let manager = manager_with(transport.clone(), clock.clone());

        assert_eq!(manager.tick(), TickOutcome::AttemptFailed);
        assert!(!manager.stats().reconnect_in_flight);
        assert_eq!(manager.stats().reconnects, 0);
        assert_eq!(manager.tick(), TickOutcome::BackingOff);

        clock.advance(Duration::from_secs(1));
        assert_eq!(manager.tick(), TickOutcome::AttemptFailed);
        assert_eq!(manager.stats().current_backoff_secs, 4);
    }

    #[test]
    fn test_injected_strategy_replaces_transport_reconnect() {
        let transport = Arc::new(MockTransport::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let manager = ConnectionManager::builder(settings())
            .transport(transport.clone())
            .clock(Arc::new(ManualClock::new()))
            .jitter(no_jitter())
            .reconnect_strategy(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .build()
            .unwrap();

        manager.tick();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.reconnect_calls(), 0);
    }

    #[test]
    fn test_connect_failure_event_keeps_attempt_in_flight() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager_with(transport, Arc::new(ManualClock::new()));

        manager.tick();
        manager.handle_event(ConnectionEvent::Connected(ResultCode::REFUSED));

        let stats = manager.stats();
        assert!(!stats.connected);
        assert!(stats.reconnect_in_flight);

        // The disconnect that follows a failed handshake releases the attempt
        manager.handle_event(ConnectionEvent::Disconnected(ResultCode::REFUSED));
        assert!(!manager.stats().reconnect_in_flight);
    }

    #[test]
    fn test_online_announced_on_connect() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager_with(transport.clone(), Arc::new(ManualClock::new()));

        transport.emit(ConnectionEvent::Connected(ResultCode::SUCCESS));

        assert!(manager.is_connected());
        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "devices/pi-sim-01/status");
        assert_eq!(published[0].payload, manager.status().online_payload());
        assert!(published[0].retain);
    }

    #[test]
    fn test_non_connection_publish_error_keeps_state() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager_with(transport.clone(), Arc::new(ManualClock::new()));
        transport.emit(ConnectionEvent::Connected(ResultCode::SUCCESS));
        transport.fail_publish_rejected(true);

        let result = manager.publish("devices/pi-sim-01-temp", b"{}", QoS::AtMostOnce, false);

        assert!(matches!(result, Err(LinkError::AsyncCallFailed(_))));
        assert!(manager.is_connected());
        assert_eq!(transport.reconnect_calls(), 0);
    }

    #[test]
    fn test_publish_not_connected_demotes_and_ticks() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager_with(transport.clone(), Arc::new(ManualClock::new()));
        transport.emit(ConnectionEvent::Connected(ResultCode::SUCCESS));

        // Session dropped without a notification yet
        transport.set_session_up(false);
        let result = manager.publish("devices/pi-sim-01-temp", b"{}", QoS::AtMostOnce, false);

        assert!(matches!(result, Err(LinkError::NotConnected)));
        assert!(!manager.is_connected());
        assert_eq!(transport.reconnect_calls(), 1);
    }

    #[test]
    fn test_drop_stops_manager() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager_with(transport.clone(), Arc::new(ManualClock::new()));
        manager.connect(60).unwrap();

        drop(manager);

        assert_eq!(transport.disconnect_calls(), 1);
        assert_eq!(transport.loop_stops(), 1);
    }

    #[test]
    fn test_events_after_drop_are_ignored() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager_with(transport.clone(), Arc::new(ManualClock::new()));
        drop(manager);

        transport.emit(ConnectionEvent::Connected(ResultCode::SUCCESS));
        assert!(transport.published().is_empty());
    }
}
