//! Sink observability.
//!
//! Counters are kept as atomics for cheap snapshots and mirrored to the
//! `metrics` facade so any installed exporter (Prometheus, statsd, ...)
//! picks them up. The exporter itself is process-wide and installed by the
//! embedding application, not by this crate.

use crate::model::ChangefeedId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Per-changefeed sink metrics, cheap to clone and share.
#[derive(Debug, Clone)]
pub struct SinkMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    namespace: String,
    changefeed: String,
    rows_appended: AtomicU64,
    events_flushed: AtomicU64,
    batches_flushed: AtomicU64,
    probe_writes: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub rows_appended: u64,
    pub events_flushed: u64,
    pub batches_flushed: u64,
    pub probe_writes: u64,
}

impl SinkMetrics {
    pub fn new(changefeed_id: &ChangefeedId) -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                namespace: changefeed_id.namespace.clone(),
                changefeed: changefeed_id.id.clone(),
                rows_appended: AtomicU64::new(0),
                events_flushed: AtomicU64::new(0),
                batches_flushed: AtomicU64::new(0),
                probe_writes: AtomicU64::new(0),
            }),
        }
    }

    /// Record rows accepted by `append`.
    #[inline]
    pub fn record_appended_rows(&self, n: usize) {
        self.inner.rows_appended.fetch_add(n as u64, Ordering::Relaxed);
        metrics::counter!(
            "spansink_rows_appended_total",
            "namespace" => self.inner.namespace.clone(),
            "changefeed" => self.inner.changefeed.clone()
        )
        .increment(n as u64);
    }

    /// Record a batch of events handed to the backend.
    #[inline]
    pub fn record_flushed_batch(&self, events: usize) {
        self.inner
            .events_flushed
            .fetch_add(events as u64, Ordering::Relaxed);
        self.inner.batches_flushed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "spansink_events_flushed_total",
            "namespace" => self.inner.namespace.clone(),
            "changefeed" => self.inner.changefeed.clone()
        )
        .increment(events as u64);
    }

    /// Record an empty-batch liveness probe.
    #[inline]
    pub fn record_probe_write(&self) {
        self.inner.probe_writes.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(
            "spansink_probe_writes_total",
            "namespace" => self.inner.namespace.clone(),
            "changefeed" => self.inner.changefeed.clone()
        )
        .increment(1);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_appended: self.inner.rows_appended.load(Ordering::Relaxed),
            events_flushed: self.inner.events_flushed.load(Ordering::Relaxed),
            batches_flushed: self.inner.batches_flushed.load(Ordering::Relaxed),
            probe_writes: self.inner.probe_writes.load(Ordering::Relaxed),
        }
    }
}
