//! Shared connection flags
//!
//! Mutated by the manager's tick path and by transport notifications, which
//! may run on different threads. Plain flags are atomics. The in-flight marker
//! and its start time are one `Option<Instant>` behind a mutex, so "in flight"
//! can never exist without a start time, and the connected flag is flipped
//! under that same mutex whenever the in-flight marker is involved.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct ConnectionState {
    connected: AtomicBool,
    stopping: AtomicBool,
    loop_started: AtomicBool,
    /// `Some(start)` while a reconnect is in flight
    reconnect_started_at: Mutex<Option<Instant>>,
    reconnects: AtomicU64,
    in_flight_timeouts: AtomicU64,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    fn in_flight(&self) -> MutexGuard<'_, Option<Instant>> {
        self.reconnect_started_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    pub fn is_loop_started(&self) -> bool {
        self.loop_started.load(Ordering::Acquire)
    }

    pub fn reconnect_in_flight(&self) -> bool {
        self.in_flight().is_some()
    }

    pub fn reconnect_started_at(&self) -> Option<Instant> {
        *self.in_flight()
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub fn in_flight_timeout_count(&self) -> u64 {
        self.in_flight_timeouts.load(Ordering::Relaxed)
    }

    /// Successful handshake: connected, nothing in flight
    pub fn mark_connected(&self) {
        let mut in_flight = self.in_flight();
        *in_flight = None;
        self.connected.store(true, Ordering::Release);
    }

    /// Session gone: not connected, nothing in flight
    pub fn mark_session_lost(&self) {
        let mut in_flight = self.in_flight();
        *in_flight = None;
        self.connected.store(false, Ordering::Release);
    }

    /// Clear only the connected flag (failed handshake, publish-time detection)
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Record an issued reconnect. Counts it, and marks it in flight unless a
    /// connect notification already landed.
    pub fn record_reconnect_issued(&self, now: Instant) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
        let mut in_flight = self.in_flight();
        if !self.connected.load(Ordering::Acquire) {
            *in_flight = Some(now);
        }
    }

    /// Drop an in-flight attempt older than `timeout`; true if one was dropped
    pub fn clear_timed_out_reconnect(&self, now: Instant, timeout: Duration) -> bool {
        let mut in_flight = self.in_flight();
        match *in_flight {
            Some(started) if now.saturating_duration_since(started) >= timeout => {
                *in_flight = None;
                self.in_flight_timeouts.fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => false,
        }
    }

    /// Set the stopping flag; true only for the first caller
    pub fn begin_stopping(&self) -> bool {
        !self.stopping.swap(true, Ordering::AcqRel)
    }

    /// Claim the right to start the background loop; true only for the first caller
    pub fn claim_loop_start(&self) -> bool {
        self.loop_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Give back a loop-start claim whose start failed
    pub fn release_loop_start(&self) {
        self.loop_started.store(false, Ordering::Release);
    }

    /// Take the started flag for shutdown; true if the loop was running
    pub fn take_loop_started(&self) -> bool {
        self.loop_started.swap(false, Ordering::AcqRel)
    }
}

/// Point-in-time view of a manager's connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionStats {
    pub connected: bool,
    pub stopping: bool,
    pub reconnect_in_flight: bool,
    pub reconnects: u64,
    pub in_flight_timeouts: u64,
    pub current_backoff_secs: u64,
}
