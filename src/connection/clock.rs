//! Monotonic time source for reconnect scheduling

use std::time::Instant;

/// Clock provider injected into the connection manager
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock provider backed by [`Instant::now`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
