//! Impure I/O operations for the MQTT transport
//!
//! This module owns the rumqttc client and the tokio task that polls its
//! event loop. Every public operation only enqueues work; connection outcomes
//! are reported asynchronously through the registered listener.

use super::connection::{advance_session, classify_poll, configure_mqtt_options, SessionPhase};
use crate::transport::{ConnectionEvent, ConnectionListener, Transport, TransportError};
use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, Event, EventLoop};
use rumqttc::Outgoing;
use std::sync::atomic::{AtomicBool, Ordering};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::futures::Notified;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the client's outgoing request queue
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long a stopping loop keeps polling to flush the final DISCONNECT
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Slot holding the single registered listener
#[derive(Default)]
struct ListenerSlot {
    listener: RwLock<Option<Arc<dyn ConnectionListener>>>,
}

impl ListenerSlot {
    fn set(&self, listener: Arc<dyn ConnectionListener>) {
        let mut slot = self
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(listener);
    }

    fn notify(&self, event: ConnectionEvent) {
        let listener = self
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match listener {
            Some(listener) => listener.on_event(event),
            None => debug!(target: "mqtt_transport", ?event, "No listener registered, dropping event"),
        }
    }
}

/// MQTT transport backed by rumqttc
pub struct RumqttTransport {
    client_id: String,
    last_will: Mutex<Option<LastWill>>,
    client: Mutex<Option<AsyncClient>>,
    pending_event_loop: Mutex<Option<EventLoop>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    reconnect: Arc<Notify>,
    session_up: Arc<AtomicBool>,
    listeners: Arc<ListenerSlot>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RumqttTransport {
    pub fn new(client_id: &str) -> Result<Self, TransportError> {
        if client_id.is_empty() {
            return Err(TransportError::InvalidClientId(client_id.to_string()));
        }

        let (shutdown_tx, _) = watch::channel(false);

        Ok(RumqttTransport {
            client_id: client_id.to_string(),
            last_will: Mutex::new(None),
            client: Mutex::new(None),
            pending_event_loop: Mutex::new(None),
            loop_handle: Mutex::new(None),
            shutdown_tx,
            reconnect: Arc::new(Notify::new()),
            session_up: Arc::new(AtomicBool::new(false)),
            listeners: Arc::new(ListenerSlot::default()),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Check whether a broker session is currently live
    pub fn is_session_up(&self) -> bool {
        self.session_up.load(Ordering::Acquire)
    }

    fn is_loop_running(&self) -> bool {
        lock(&self.loop_handle)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for a reconnect request; returns false if shutdown was requested
    async fn park_until_rearmed(
        rearmed: Pin<&mut Notified<'_>>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        tokio::select! {
            _ = rearmed => true,
            changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
        }
    }

    /// Poll the event loop until shutdown, reporting connection transitions
    async fn drive_event_loop(
        mut event_loop: EventLoop,
        mut shutdown_rx: watch::Receiver<bool>,
        reconnect: Arc<Notify>,
        session_up: Arc<AtomicBool>,
        listeners: Arc<ListenerSlot>,
        client_id: String,
    ) {
        info!(target: "mqtt_transport", client_id = %client_id, "Starting MQTT network loop");
        let mut phase = SessionPhase::Connecting;

        loop {
            let polled = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                    continue;
                }
                polled = event_loop.poll() => polled,
            };

            if let Err(e) = &polled {
                debug!(target: "mqtt_transport", error = %e, "Event loop poll failed");
            }

            let step = advance_session(phase, classify_poll(&polled));
            phase = step.next;
            session_up.store(phase == SessionPhase::Up, Ordering::Release);

            // Registered before the listener runs so a reconnect requested
            // from inside the notification is not lost
            let rearmed = reconnect.notified();
            tokio::pin!(rearmed);
            if step.park {
                rearmed.as_mut().enable();
            }

            for event in step.events() {
                listeners.notify(event);
            }

            if step.park && !Self::park_until_rearmed(rearmed, &mut shutdown_rx).await {
                break;
            }
        }

        let was_up = phase == SessionPhase::Up;
        session_up.store(false, Ordering::Release);
        if was_up {
            Self::flush_disconnect(&mut event_loop).await;
        }
        info!(target: "mqtt_transport", client_id = %client_id, "MQTT network loop stopped");
    }

    /// Keep polling briefly so a queued DISCONNECT reaches the broker
    async fn flush_disconnect(event_loop: &mut EventLoop) {
        let drain = async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            debug!(target: "mqtt_transport", "Disconnect not flushed within grace period");
        }
    }
}

impl Transport for RumqttTransport {
    fn async_connect(
        &self,
        host: &str,
        port: u16,
        keepalive_secs: u16,
    ) -> Result<(), TransportError> {
        if self.is_loop_running() {
            // The running loop keeps its options; re-arm it instead
            self.reconnect.notify_waiters();
            return Ok(());
        }

        let last_will = lock(&self.last_will).clone();
        let options =
            configure_mqtt_options(&self.client_id, host, port, keepalive_secs, last_will)?;
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);

        *lock(&self.client) = Some(client);
        *lock(&self.pending_event_loop) = Some(event_loop);

        debug!(target: "mqtt_transport", host, port, keepalive_secs, "Connection configured");
        Ok(())
    }

    fn async_reconnect(&self) -> Result<(), TransportError> {
        if !self.is_loop_running() {
            return Err(TransportError::LoopNotRunning);
        }
        // Only wakes a parked loop; a loop mid-attempt is already reconnecting
        self.reconnect.notify_waiters();
        Ok(())
    }

    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        let client = lock(&self.client)
            .clone()
            .ok_or(TransportError::NotConnected)?;
        if !self.is_session_up() {
            return Err(TransportError::NotConnected);
        }

        client
            .try_publish(topic, qos, retain, Bytes::copy_from_slice(payload))
            .map_err(|e| TransportError::Rejected(Box::new(e)))
    }

    fn set_last_will(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        let will = LastWill::new(topic, Bytes::copy_from_slice(payload), qos, retain, None);
        *lock(&self.last_will) = Some(will);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), TransportError> {
        let client = lock(&self.client)
            .clone()
            .ok_or(TransportError::NotConnected)?;
        client
            .try_disconnect()
            .map_err(|e| TransportError::Rejected(Box::new(e)))
    }

    fn start_background_loop(&self) -> Result<(), TransportError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        let event_loop = lock(&self.pending_event_loop)
            .take()
            .ok_or(TransportError::NotConfigured)?;

        // A fresh start clears any earlier shutdown request
        self.shutdown_tx.send_replace(false);

        let handle = runtime.spawn(Self::drive_event_loop(
            event_loop,
            self.shutdown_tx.subscribe(),
            self.reconnect.clone(),
            self.session_up.clone(),
            self.listeners.clone(),
            self.client_id.clone(),
        ));

        if let Some(previous) = lock(&self.loop_handle).replace(handle) {
            warn!(target: "mqtt_transport", "Replacing a previous network loop");
            previous.abort();
        }
        Ok(())
    }

    fn stop_background_loop(&self) -> Result<(), TransportError> {
        let handle = lock(&self.loop_handle)
            .take()
            .ok_or(TransportError::LoopNotRunning)?;

        // The task exits on its own after flushing; it is detached here
        self.shutdown_tx.send_replace(true);
        drop(handle);
        self.session_up.store(false, Ordering::Release);
        Ok(())
    }

    fn set_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.listeners.set(listener);
    }
}

impl Drop for RumqttTransport {
    fn drop(&mut self) {
        // No awaiting in Drop; the task is aborted, graceful shutdown is the owner's job
        self.shutdown_tx.send_replace(true);
        if let Some(handle) = lock(&self.loop_handle).take() {
            handle.abort();
        }
    }
}
