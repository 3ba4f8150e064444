use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Item counters for one scheduler, across all of its runs.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    enqueued: AtomicU64,
    started: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    cancelled: AtomicU64,
}

fn increment(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl SchedulerMetrics {
    pub fn record_enqueued(&self) {
        increment(&self.enqueued);
    }

    pub fn record_started(&self) {
        increment(&self.started);
    }

    pub fn record_succeeded(&self) {
        increment(&self.succeeded);
    }

    pub fn record_failed(&self) {
        increment(&self.failed);
    }

    pub fn record_retried(&self) {
        increment(&self.retried);
    }

    pub fn record_cancelled(&self) {
        increment(&self.cancelled);
    }

    pub fn snapshot(&self) -> SchedulerMetricsSnapshot {
        SchedulerMetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerMetricsSnapshot {
    pub enqueued: u64,
    /// Attempts started, retries included
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub cancelled: u64,
}
