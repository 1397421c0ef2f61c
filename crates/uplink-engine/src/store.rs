//! # Telemetry Store
//!
//! Bounded in-memory history: one sample ring per member plus a global
//! event ring. Two eviction triggers run on every append: records older
//! than the retention window are dropped, and when the running byte
//! estimate exceeds the configured cap the globally-oldest records are
//! dropped until the store is back under it.
//!
//! Memory accounting uses a fixed per-record cost estimate; the store
//! never walks the heap. The estimates are deliberately generous so the
//! cap errs toward evicting early.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use uplink_common::models::{Event, Metrics, Score};

/// Estimated in-memory cost of one sample record.
pub const SAMPLE_COST_BYTES: usize = 256;
/// Estimated in-memory cost of one event record.
pub const EVENT_COST_BYTES: usize = 192;

/// One stored observation: the metrics record and the score annotating it.
#[derive(Debug, Clone)]
pub struct Sample {
    pub metrics: Metrics,
    pub score: Score,
}

impl Sample {
    pub fn ts(&self) -> DateTime<Utc> {
        self.metrics.ts
    }
}

/// Store limits, derived from `retention_hours` / `max_ram_mb`.
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub retention: chrono::Duration,
    pub max_bytes: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        StoreLimits {
            retention: chrono::Duration::hours(24),
            max_bytes: 64 * 1024 * 1024,
        }
    }
}

struct StoreInner {
    rings: HashMap<String, VecDeque<Sample>>,
    events: VecDeque<Event>,
    bytes: usize,
    closed: bool,
}

/// Internally-synchronized telemetry store. Appends never fail; readers
/// get copied snapshots.
pub struct TelemetryStore {
    limits: StoreLimits,
    inner: Mutex<StoreInner>,
}

impl TelemetryStore {
    pub fn new(limits: StoreLimits) -> Self {
        TelemetryStore {
            limits,
            inner: Mutex::new(StoreInner {
                rings: HashMap::new(),
                events: VecDeque::new(),
                bytes: 0,
                closed: false,
            }),
        }
    }

    /// Append a sample for a member. O(1) amortized; runs both eviction
    /// triggers before returning.
    pub fn add_sample(&self, member: &str, metrics: Metrics, score: Score) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        inner
            .rings
            .entry(member.to_string())
            .or_default()
            .push_back(Sample { metrics, score });
        inner.bytes += SAMPLE_COST_BYTES;
        self.evict(&mut inner, Utc::now());
    }

    /// Append an event to the global ring.
    pub fn record_event(&self, event: Event) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        inner.events.push_back(event);
        inner.bytes += EVENT_COST_BYTES;
        self.evict(&mut inner, Utc::now());
    }

    /// Samples for `member` with timestamps >= `since`, oldest first.
    /// Empty when the member is unknown or has no samples in the window.
    pub fn samples_since(&self, member: &str, since: DateTime<Utc>) -> Vec<Sample> {
        let inner = self.inner.lock().unwrap();
        match inner.rings.get(member) {
            Some(ring) => ring.iter().filter(|s| s.ts() >= since).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// The most recent sample for `member`, if any.
    pub fn latest_sample(&self, member: &str) -> Option<Sample> {
        let inner = self.inner.lock().unwrap();
        inner.rings.get(member).and_then(|r| r.back().cloned())
    }

    /// Events with timestamps >= `since`, most recent first, capped at `max`.
    pub fn events_since(&self, since: DateTime<Utc>, max: usize) -> Vec<Event> {
        let inner = self.inner.lock().unwrap();
        inner
            .events
            .iter()
            .rev()
            .filter(|e| e.ts >= since)
            .take(max)
            .cloned()
            .collect()
    }

    /// Current byte estimate (for tests and the status endpoint).
    pub fn memory_bytes(&self) -> usize {
        self.inner.lock().unwrap().bytes
    }

    /// Flush and release. Idempotent; appends after close are dropped.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        inner.rings.clear();
        inner.events.clear();
        inner.bytes = 0;
        inner.closed = true;
    }

    fn evict(&self, inner: &mut StoreInner, now: DateTime<Utc>) {
        // Trigger (a): retention window.
        let cutoff = now - self.limits.retention;
        for ring in inner.rings.values_mut() {
            while ring.front().is_some_and(|s| s.ts() < cutoff) {
                ring.pop_front();
                inner.bytes -= SAMPLE_COST_BYTES;
            }
        }
        while inner.events.front().is_some_and(|e| e.ts < cutoff) {
            inner.events.pop_front();
            inner.bytes -= EVENT_COST_BYTES;
        }

        // Trigger (b): byte cap. Drop the globally-oldest record until
        // back under the limit.
        while inner.bytes > self.limits.max_bytes {
            let oldest_sample = inner
                .rings
                .iter()
                .filter_map(|(name, ring)| ring.front().map(|s| (s.ts(), name.clone())))
                .min();
            let oldest_event_ts = inner.events.front().map(|e| e.ts);

            let event_is_oldest = match (&oldest_sample, oldest_event_ts) {
                (Some((sample_ts, _)), Some(event_ts)) => event_ts <= *sample_ts,
                (None, Some(_)) => true,
                (_, None) => false,
            };

            if event_is_oldest {
                inner.events.pop_front();
                inner.bytes -= EVENT_COST_BYTES;
            } else if let Some((_, name)) = oldest_sample {
                if let Some(ring) = inner.rings.get_mut(&name) {
                    ring.pop_front();
                    inner.bytes -= SAMPLE_COST_BYTES;
                }
            } else {
                break;
            }
        }

        inner.rings.retain(|_, ring| !ring.is_empty());
    }
}
