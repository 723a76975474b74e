//! Request outcome counters and latency percentiles.
//!
//! Counters use `Ordering::Relaxed`: each is independent and monotonically
//! increasing, and a snapshot reading them one after another may see them at
//! slightly different instants. `total` is not a counter of its own: it is the
//! sum of the outcome counts in the same snapshot, so it is always consistent
//! with them.
//!
//! Latency percentiles (p50, p95, p99) come from a bounded window of the most
//! recent 1024 request latencies, in microseconds. The window is a circular
//! buffer behind a [`parking_lot::Mutex`] held only for one push; sorting
//! happens at snapshot time.
//!
//! # Usage
//!
//! ```
//! use std::time::Duration;
//! use vendorsim_harness::metrics::{HarnessMetrics, Outcome};
//!
//! let metrics = HarnessMetrics::new();
//! metrics.record(Some("login"), Outcome::Accepted, Duration::from_micros(120));
//! metrics.record(None, Outcome::SchemaRejected, Duration::from_micros(40));
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.total, 2);
//! assert_eq!(snapshot.accepted, 1);
//! assert_eq!(snapshot.operations["login"], 1);
//! ```

use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde::Serialize;

const DEFAULT_HISTOGRAM_WINDOW_SIZE: usize = 1024;

/// Final outcome of one vendor request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The backend produced a contract-conforming response.
    Accepted,
    /// The request failed contract validation.
    SchemaRejected,
    /// Authentication or authorization failed.
    AuthRejected,
    /// The backend failed.
    BackendFault,
    /// The backend response broke the contract.
    ResponseViolation,
}

/// Latency percentiles in microseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencyPercentiles {
    /// Median.
    pub p50: u64,
    /// 95th percentile.
    pub p95: u64,
    /// 99th percentile.
    pub p99: u64,
}

/// Circular buffer of recent latency samples.
struct LatencyHistogram {
    inner: Mutex<HistogramInner>,
}

struct HistogramInner {
    buf: Vec<u64>,
    pos: usize,
    capacity: usize,
}

impl LatencyHistogram {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HistogramInner {
                buf: Vec::with_capacity(capacity),
                pos: 0,
                capacity,
            }),
        }
    }

    fn record(&self, value_us: u64) {
        let mut inner = self.inner.lock();
        let pos = inner.pos;
        if inner.buf.len() < inner.capacity {
            inner.buf.push(value_us);
        } else {
            inner.buf[pos] = value_us;
        }
        inner.pos = (pos + 1) % inner.capacity;
    }

    fn percentiles(&self) -> LatencyPercentiles {
        let mut sorted = self.inner.lock().buf.clone();
        if sorted.is_empty() {
            return LatencyPercentiles::default();
        }
        sorted.sort_unstable();
        let len = sorted.len();
        LatencyPercentiles {
            p50: sorted[percentile_index(len, 50)],
            p95: sorted[percentile_index(len, 95)],
            p99: sorted[percentile_index(len, 99)],
        }
    }
}

/// Nearest-rank index: `ceil(percentile/100 * len) - 1`, clamped.
fn percentile_index(len: usize, percentile: u32) -> usize {
    if len == 0 {
        return 0;
    }
    let rank = (u64::from(percentile) * len as u64).div_ceil(100) as usize;
    rank.saturating_sub(1).min(len - 1)
}

/// Point-in-time view of [`HarnessMetrics`], served at `/_harness/metrics`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Requests seen.
    pub total: u64,
    /// Requests answered by the backend within the contract.
    pub accepted: u64,
    /// Requests rejected by the contract gate.
    pub schema_rejected: u64,
    /// Requests rejected by authentication or authorization.
    pub auth_rejected: u64,
    /// Backend faults.
    pub backend_faults: u64,
    /// Backend responses that broke the contract.
    pub response_violations: u64,
    /// Latency percentiles over the recent window.
    pub latency: LatencyPercentiles,
    /// Requests per matched operation id.
    pub operations: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    /// Share of requests that were not accepted (0.0 - 1.0).
    #[must_use]
    pub fn rejection_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.total.saturating_sub(self.accepted) as f64 / self.total as f64
        }
    }
}

/// Collects request outcomes for the harness.
#[derive(Clone)]
pub struct HarnessMetrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    accepted: AtomicU64,
    schema_rejected: AtomicU64,
    auth_rejected: AtomicU64,
    backend_faults: AtomicU64,
    response_violations: AtomicU64,
    histogram: LatencyHistogram,
    operations: Mutex<BTreeMap<String, u64>>,
}

impl HarnessMetrics {
    /// Creates a zeroed collector.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                accepted: AtomicU64::new(0),
                schema_rejected: AtomicU64::new(0),
                auth_rejected: AtomicU64::new(0),
                backend_faults: AtomicU64::new(0),
                response_violations: AtomicU64::new(0),
                histogram: LatencyHistogram::new(DEFAULT_HISTOGRAM_WINDOW_SIZE),
                operations: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Records one request. `operation` is `None` when no operation matched.
    pub fn record(&self, operation: Option<&str>, outcome: Outcome, duration: Duration) {
        let inner = &self.inner;
        let counter = match outcome {
            Outcome::Accepted => &inner.accepted,
            Outcome::SchemaRejected => &inner.schema_rejected,
            Outcome::AuthRejected => &inner.auth_rejected,
            Outcome::BackendFault => &inner.backend_faults,
            Outcome::ResponseViolation => &inner.response_violations,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        inner.histogram.record(duration.as_micros() as u64);

        // Bounded by the number of contract operations.
        if let Some(operation) = operation {
            *inner.operations.lock().entry(operation.to_owned()).or_default() += 1;
        }
    }

    /// Takes a snapshot of all counters.
    ///
    /// `total` is the sum of the outcome counters read here, so it never
    /// trails any of them under concurrent recording.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        let accepted = inner.accepted.load(Ordering::Relaxed);
        let schema_rejected = inner.schema_rejected.load(Ordering::Relaxed);
        let auth_rejected = inner.auth_rejected.load(Ordering::Relaxed);
        let backend_faults = inner.backend_faults.load(Ordering::Relaxed);
        let response_violations = inner.response_violations.load(Ordering::Relaxed);
        MetricsSnapshot {
            total: accepted
                + schema_rejected
                + auth_rejected
                + backend_faults
                + response_violations,
            accepted,
            schema_rejected,
            auth_rejected,
            backend_faults,
            response_violations,
            latency: inner.histogram.percentiles(),
            operations: inner.operations.lock().clone(),
        }
    }

    /// Logs current counters at INFO level.
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        if snapshot.total == 0 {
            return;
        }
        tracing::info!(
            total = snapshot.total,
            accepted = snapshot.accepted,
            schema_rejected = snapshot.schema_rejected,
            auth_rejected = snapshot.auth_rejected,
            backend_faults = snapshot.backend_faults,
            response_violations = snapshot.response_violations,
            p50_us = snapshot.latency.p50,
            p95_us = snapshot.latency.p95,
            p99_us = snapshot.latency.p99,
            "Harness metrics snapshot"
        );
    }
}

impl Default for HarnessMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HarnessMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HarnessMetrics").field("snapshot", &self.snapshot()).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_empty_percentiles() {
        let h = LatencyHistogram::new(16);
        assert_eq!(h.percentiles(), LatencyPercentiles::default());
    }

    #[test]
    fn test_histogram_known_distribution() {
        let h = LatencyHistogram::new(1024);
        for v in 1..=100 {
            h.record(v);
        }
        let p = h.percentiles();
        assert_eq!((p.p50, p.p95, p.p99), (50, 95, 99));
    }

    #[test]
    fn test_histogram_circular_eviction() {
        let h = LatencyHistogram::new(10);
        for v in 1..=20 {
            h.record(v);
        }
        // Only 11..=20 remain.
        let p = h.percentiles();
        assert_eq!(p.p50, 15);
        assert_eq!(p.p99, 20);
    }

    #[test]
    fn test_percentile_index_bounds() {
        assert_eq!(percentile_index(0, 50), 0);
        assert_eq!(percentile_index(1, 99), 0);
        assert_eq!(percentile_index(10, 100), 9);
    }

    #[test]
    fn test_outcomes_counted_separately() {
        let metrics = HarnessMetrics::new();
        let d = Duration::from_micros(10);
        metrics.record(Some("login"), Outcome::Accepted, d);
        metrics.record(Some("login"), Outcome::AuthRejected, d);
        metrics.record(Some("getUsers"), Outcome::BackendFault, d);
        metrics.record(Some("getUsers"), Outcome::ResponseViolation, d);
        metrics.record(None, Outcome::SchemaRejected, d);

        let s = metrics.snapshot();
        assert_eq!(s.total, 5);
        assert_eq!(s.accepted, 1);
        assert_eq!(s.schema_rejected, 1);
        assert_eq!(s.auth_rejected, 1);
        assert_eq!(s.backend_faults, 1);
        assert_eq!(s.response_violations, 1);
        assert_eq!(s.operations.len(), 2);
        assert_eq!(s.operations["getUsers"], 2);
        assert!((s.rejection_rate() - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = HarnessMetrics::new();
        let clone = metrics.clone();
        clone.record(None, Outcome::SchemaRejected, Duration::ZERO);
        assert_eq!(metrics.snapshot().schema_rejected, 1);
    }

    #[test]
    fn test_rejection_rate_empty() {
        assert_eq!(MetricsSnapshot::default().rejection_rate(), 0.0);
    }

    #[test]
    fn test_snapshot_consistent_under_concurrent_recording() {
        let metrics = HarnessMetrics::new();
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));

        let writer = {
            let metrics = metrics.clone();
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    metrics.record(Some("login"), Outcome::Accepted, Duration::ZERO);
                    metrics.record(None, Outcome::AuthRejected, Duration::ZERO);
                }
            })
        };

        for _ in 0..10_000 {
            let s = metrics.snapshot();
            assert!(s.accepted <= s.total, "accepted {} > total {}", s.accepted, s.total);
            assert_eq!(s.total, s.accepted + s.auth_rejected);
            let rate = s.rejection_rate();
            assert!((0.0..=1.0).contains(&rate), "rate {rate}");
        }

        stop.store(true, Ordering::Relaxed);
        writer.join().unwrap();
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            /// Percentiles are ordered and always one of the windowed samples.
            #[test]
            fn percentiles_ordered_and_sampled(
                samples in proptest::collection::vec(0..1_000_000u64, 1..200),
                capacity in 1..64usize,
            ) {
                let h = LatencyHistogram::new(capacity);
                for sample in &samples {
                    h.record(*sample);
                }
                let window = &samples[samples.len().saturating_sub(capacity)..];
                let p = h.percentiles();
                prop_assert!(p.p50 <= p.p95 && p.p95 <= p.p99);
                for value in [p.p50, p.p95, p.p99] {
                    prop_assert!(window.contains(&value));
                }
            }

            #[test]
            fn percentile_index_in_bounds(len in 1..10_000usize, percentile in 0..=100u32) {
                prop_assert!(percentile_index(len, percentile) < len);
            }
        }
    }
}
