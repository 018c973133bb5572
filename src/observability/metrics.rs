//! Publish delivery counters
//!
//! Atomics only: counters are bumped from the publish path and read when a
//! health report is assembled, possibly on different threads.

use crate::protocol::HealthCounters;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct PublishCounters {
    publish_ok: AtomicU64,
    publish_fail: AtomicU64,
}

impl PublishCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_ok(&self) {
        self.publish_ok.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fail(&self) {
        self.publish_fail.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one publish
    pub fn record(&self, ok: bool) {
        if ok {
            self.record_ok();
        } else {
            self.record_fail();
        }
    }

    pub fn publish_ok(&self) -> u64 {
        self.publish_ok.load(Ordering::Relaxed)
    }

    pub fn publish_fail(&self) -> u64 {
        self.publish_fail.load(Ordering::Relaxed)
    }

    /// Snapshot for a health report, combined with the manager's reconnect count
    pub fn snapshot(&self, reconnects: u64) -> HealthCounters {
        HealthCounters {
            publish_ok: self.publish_ok(),
            publish_fail: self.publish_fail(),
            reconnects,
        }
    }
}
