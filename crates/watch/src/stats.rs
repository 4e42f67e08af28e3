//! Counters that make a silently reconnecting watcher observable.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use metrics::counter;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct WatchStats {
    streams_opened: AtomicU64,
    stream_faults: AtomicU64,
    events_dispatched: AtomicU64,
    events_filtered: AtomicU64,
    decode_failures: AtomicU64,
    last_event_ms: AtomicI64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchStatsSnapshot {
    pub streams_opened: u64,
    pub stream_faults: u64,
    pub events_dispatched: u64,
    pub events_filtered: u64,
    pub decode_failures: u64,
    /// Unix millis of the last event received, 0 before the first.
    pub last_event_ms: i64,
}

impl WatchStats {
    pub fn snapshot(&self) -> WatchStatsSnapshot {
        WatchStatsSnapshot {
            streams_opened: self.streams_opened.load(Ordering::Relaxed),
            stream_faults: self.stream_faults.load(Ordering::Relaxed),
            events_dispatched: self.events_dispatched.load(Ordering::Relaxed),
            events_filtered: self.events_filtered.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            last_event_ms: self.last_event_ms.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn stream_opened(&self) {
        self.streams_opened.fetch_add(1, Ordering::Relaxed);
        counter!("watch_streams_opened_total", 1u64);
    }

    pub(crate) fn stream_fault(&self) {
        self.stream_faults.fetch_add(1, Ordering::Relaxed);
        counter!("watch_stream_faults_total", 1u64);
    }

    pub(crate) fn received(&self) {
        self.last_event_ms.store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub(crate) fn dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
        counter!("watch_events_total", 1u64);
    }

    pub(crate) fn filtered(&self) {
        self.events_filtered.fetch_add(1, Ordering::Relaxed);
        counter!("watch_events_filtered_total", 1u64);
    }

    pub(crate) fn decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
        counter!("watch_decode_failures_total", 1u64);
    }
}
