//! Atomic pipeline counters.
//!
//! Lock-free counters for request volume and pipeline outcomes.
//! All atomics use `Relaxed` ordering: these are monotonic display counters
//! with no synchronization requirements.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

#[derive(Default)]
struct StatsInner {
    requests: AtomicU64,
    recorded: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    long_callbacks_deferred: AtomicU64,
    layout_fetches: AtomicU64,
    tracked: AtomicU64,
    track_failures: AtomicU64,
}

/// Thread-safe pipeline statistics. Cheap to clone (Arc).
#[derive(Clone, Default)]
pub struct ProxyStats {
    inner: Arc<StatsInner>,
}

/// Snapshot of current stats values, serializable to JSON.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub recorded: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub long_callbacks_deferred: u64,
    pub layout_fetches: u64,
    pub tracked: u64,
    pub track_failures: u64,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_requests(&self) {
        self.inner.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_recorded(&self) {
        self.inner.recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_hits(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_cache_misses(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_long_callbacks_deferred(&self) {
        self.inner
            .long_callbacks_deferred
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_layout_fetches(&self) {
        self.inner.layout_fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_tracked(&self) {
        self.inner.tracked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_track_failures(&self) {
        self.inner.track_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = &self.inner;
        StatsSnapshot {
            requests: inner.requests.load(Ordering::Relaxed),
            recorded: inner.recorded.load(Ordering::Relaxed),
            cache_hits: inner.cache_hits.load(Ordering::Relaxed),
            cache_misses: inner.cache_misses.load(Ordering::Relaxed),
            long_callbacks_deferred: inner.long_callbacks_deferred.load(Ordering::Relaxed),
            layout_fetches: inner.layout_fetches.load(Ordering::Relaxed),
            tracked: inner.tracked.load(Ordering::Relaxed),
            track_failures: inner.track_failures.load(Ordering::Relaxed),
        }
    }
}
