//! Exponential reconnect backoff with additive jitter
//!
//! The scheduler answers one question: may a reconnect be attempted now?
//! Each scheduled attempt pushes the next allowed instant out by the current
//! delay plus jitter, then doubles the delay up to the ceiling:
//!
//! ```text
//! next_allowed = now + delay + jitter()
//! delay        = min(delay * 2, max)
//! ```
//!
//! Jitter is only ever added, so attempts are never closer together than the
//! deterministic delay.

use rand::Rng;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Source of the random extra delay added to each window
pub type JitterFn = Box<dyn Fn() -> Duration + Send + Sync>;

/// Backoff construction errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackoffError {
    #[error("Initial backoff {initial}s exceeds maximum backoff {max}s")]
    InitialExceedsMax { initial: u64, max: u64 },
}

/// Jitter drawn uniformly from `0..=max_ms` milliseconds
pub fn uniform_jitter(max_ms: u64) -> JitterFn {
    Box::new(move || {
        if max_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
        }
    })
}

/// Jitter that always returns zero, for deterministic schedules
pub fn no_jitter() -> JitterFn {
    Box::new(|| Duration::ZERO)
}

/// Time-based reconnect policy
pub struct BackoffScheduler {
    initial_secs: u64,
    max_secs: u64,
    current_secs: u64,
    next_allowed: Option<Instant>,
    jitter: JitterFn,
}

impl BackoffScheduler {
    pub fn new(initial_secs: u64, max_secs: u64, jitter: JitterFn) -> Result<Self, BackoffError> {
        if initial_secs > max_secs {
            return Err(BackoffError::InitialExceedsMax {
                initial: initial_secs,
                max: max_secs,
            });
        }

        Ok(Self {
            initial_secs,
            max_secs,
            current_secs: initial_secs,
            next_allowed: None,
            jitter,
        })
    }

    /// True if nothing was ever scheduled, or the window has elapsed
    pub fn can_attempt(&self, now: Instant) -> bool {
        self.next_allowed.map_or(true, |next| now >= next)
    }

    /// Open the next backoff window starting at `now`
    pub fn schedule_attempt(&mut self, now: Instant) {
        let delay = Duration::from_secs(self.current_secs).saturating_add((self.jitter)());
        self.next_allowed = Some(saturating_deadline(now, delay));
        self.current_secs = self.current_secs.saturating_mul(2).min(self.max_secs);
    }

    /// Return to the initial delay with no pending window
    pub fn reset(&mut self) {
        self.current_secs = self.initial_secs;
        self.next_allowed = None;
    }

    /// Delay used by the next `schedule_attempt`
    pub fn current_delay_secs(&self) -> u64 {
        self.current_secs
    }

    pub fn next_allowed_attempt(&self) -> Option<Instant> {
        self.next_allowed
    }
}

impl std::fmt::Debug for BackoffScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackoffScheduler")
            .field("initial_secs", &self.initial_secs)
            .field("max_secs", &self.max_secs)
            .field("current_secs", &self.current_secs)
            .field("next_allowed", &self.next_allowed)
            .finish_non_exhaustive()
    }
}

/// `now + delay`, shrinking the delay until the instant is representable
fn saturating_deadline(now: Instant, mut delay: Duration) -> Instant {
    loop {
        if let Some(deadline) = now.checked_add(delay) {
            return deadline;
        }
        delay /= 2;
    }
}
