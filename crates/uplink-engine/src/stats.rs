//! Process-wide counters and the operator-visible last error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use chrono::Utc;

use uplink_common::models::{Counters, ErrorKind, LastError};

/// Shared monotonic counters plus the `last_error` cell the control API
/// surfaces. Constructed once at startup and passed by handle.
pub struct RuntimeStats {
    started_at: Instant,
    switches: AtomicU64,
    collector_errors: AtomicU64,
    decision_cycles: AtomicU64,
    skipped_ticks: AtomicU64,
    last_error: Mutex<Option<LastError>>,
}

impl RuntimeStats {
    pub fn new() -> Self {
        RuntimeStats {
            started_at: Instant::now(),
            switches: AtomicU64::new(0),
            collector_errors: AtomicU64::new(0),
            decision_cycles: AtomicU64::new(0),
            skipped_ticks: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    pub fn inc_switches(&self) {
        self.switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_collector_errors(&self) {
        self.collector_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_decision_cycles(&self) {
        self.decision_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_skipped_ticks(&self) {
        self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counters(&self) -> Counters {
        Counters {
            switches_total: self.switches.load(Ordering::Relaxed),
            collector_errors_total: self.collector_errors.load(Ordering::Relaxed),
            decision_cycles_total: self.decision_cycles.load(Ordering::Relaxed),
            skipped_ticks_total: self.skipped_ticks.load(Ordering::Relaxed),
        }
    }

    pub fn uptime_s(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Record a failure for the status endpoint. Overwrites any previous one.
    pub fn set_last_error(&self, kind: ErrorKind, component: &str, message: impl Into<String>) {
        *self.last_error.lock().unwrap() = Some(LastError {
            kind,
            component: component.to_string(),
            message: message.into(),
            ts: Utc::now(),
        });
    }

    /// Clear the error once the condition resolves.
    pub fn clear_last_error(&self) {
        *self.last_error.lock().unwrap() = None;
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.last_error.lock().unwrap().clone()
    }
}

impl Default for RuntimeStats {
    fn default() -> Self {
        Self::new()
    }
}
