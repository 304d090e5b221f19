use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters kept by a [`crate::ViewportScheduler`].
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    requests_issued: AtomicU64,
    fetches_started: AtomicU64,
    fetches_completed: AtomicU64,
    fetches_failed: AtomicU64,
    fetches_cancelled: AtomicU64,
    fetches_dropped: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    pages_evicted: AtomicU64,
    in_flight: AtomicU64,
    latency_total_us: AtomicU64,
    latency_max_us: AtomicU64,
}

/// A point-in-time copy of [`SchedulerMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    pub requests_issued: u64,
    pub fetches_started: u64,
    pub fetches_completed: u64,
    pub fetches_failed: u64,
    pub fetches_cancelled: u64,
    /// Fetches refused by back-pressure.
    pub fetches_dropped: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub pages_evicted: u64,
    pub in_flight: u64,
    pub latency_total_us: u64,
    pub latency_max_us: u64,
}

impl MetricsSnapshot {
    /// Mean latency of completed fetches, in microseconds.
    pub fn mean_latency_us(&self) -> u64 {
        self.latency_total_us
            .checked_div(self.fetches_completed)
            .unwrap_or(0)
    }
}

impl SchedulerMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            requests_issued: get(&self.requests_issued),
            fetches_started: get(&self.fetches_started),
            fetches_completed: get(&self.fetches_completed),
            fetches_failed: get(&self.fetches_failed),
            fetches_cancelled: get(&self.fetches_cancelled),
            fetches_dropped: get(&self.fetches_dropped),
            cache_hits: get(&self.cache_hits),
            cache_misses: get(&self.cache_misses),
            pages_evicted: get(&self.pages_evicted),
            in_flight: get(&self.in_flight),
            latency_total_us: get(&self.latency_total_us),
            latency_max_us: get(&self.latency_max_us),
        }
    }

    pub(crate) fn request_issued(&self) {
        self.requests_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fetch_started(&self) {
        self.fetches_started.fetch_add(1, Ordering::Relaxed);
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// A fetch left the in-flight set without completing.
    pub(crate) fn fetch_cancelled(&self) {
        self.fetches_cancelled.fetch_add(1, Ordering::Relaxed);
        self.leave_in_flight();
    }

    pub(crate) fn fetch_failed(&self) {
        self.fetches_failed.fetch_add(1, Ordering::Relaxed);
        self.leave_in_flight();
    }

    pub(crate) fn fetch_completed(&self, latency: Duration) {
        let us = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.fetches_completed.fetch_add(1, Ordering::Relaxed);
        self.latency_total_us.fetch_add(us, Ordering::Relaxed);
        self.latency_max_us.fetch_max(us, Ordering::Relaxed);
        self.leave_in_flight();
    }

    pub(crate) fn fetch_dropped(&self) {
        self.fetches_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn pages_evicted(&self, n: usize) {
        self.pages_evicted.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn leave_in_flight(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }
}
