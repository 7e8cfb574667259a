//! In-process gateway counters.
//!
//! No HTTP surface; a periodic task logs a snapshot and tests read it
//! directly. Drop counters are keyed by the stable reason strings from
//! the error taxonomy.

use std::sync::atomic::{AtomicU64, Ordering};

use rtk_mqtt_channel::ChannelStats;

/// Atomic counters shared across workers.
///
/// Channel-side counters (inbox overflow, telemetry drop-oldest) live
/// in the session; `absorb_channel` folds them in before a snapshot.
#[derive(Debug, Default)]
pub struct Metrics {
    pub uplink_published: AtomicU64,
    pub downlink_published: AtomicU64,
    pub correlated: AtomicU64,
    pub dropped_no_adapter: AtomicU64,
    pub dropped_bad_payload: AtomicU64,
    pub dropped_bad_topic: AtomicU64,
    pub dropped_transform: AtomicU64,
    pub dropped_publish: AtomicU64,
    pub dropped_deadline: AtomicU64,
    pub transform_retries: AtomicU64,
    pub retained_telemetry: AtomicU64,
    pub uncorrelated_responses: AtomicU64,
    pub command_timeouts: AtomicU64,
    pub correlator_evictions: AtomicU64,
    pub inbox_overflow: AtomicU64,
    pub telemetry_dropped: AtomicU64,
    latency_ms_sum: AtomicU64,
    latency_count: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub uplink_published: u64,
    pub downlink_published: u64,
    pub correlated: u64,
    pub dropped_no_adapter: u64,
    pub dropped_bad_payload: u64,
    pub dropped_bad_topic: u64,
    pub dropped_transform: u64,
    pub dropped_publish: u64,
    pub dropped_deadline: u64,
    pub transform_retries: u64,
    pub retained_telemetry: u64,
    pub uncorrelated_responses: u64,
    pub command_timeouts: u64,
    pub correlator_evictions: u64,
    pub inbox_overflow: u64,
    pub telemetry_dropped: u64,
    pub avg_latency_ms: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a drop by its stable reason string.
    pub fn record_drop(&self, reason: &str) {
        let counter = match reason {
            "no_adapter" => &self.dropped_no_adapter,
            "bad_payload" => &self.dropped_bad_payload,
            "bad_topic" => &self.dropped_bad_topic,
            "deadline" => &self.dropped_deadline,
            r if r.starts_with("transform.") => &self.dropped_transform,
            r if r.starts_with("publish.") => &self.dropped_publish,
            _ => &self.dropped_publish,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful publish with its processing latency.
    pub fn record_published(&self, uplink: bool, latency_ms: u64) {
        let counter = if uplink {
            &self.uplink_published
        } else {
            &self.downlink_published
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.latency_ms_sum.fetch_add(latency_ms, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold the session's drop counters into these metrics. Called
    /// before snapshots since the channel counts on its own side.
    pub fn absorb_channel(&self, stats: ChannelStats) {
        self.inbox_overflow.store(stats.inbox_overflow, Ordering::Relaxed);
        self.telemetry_dropped
            .store(stats.telemetry_dropped, Ordering::Relaxed);
    }

    pub fn total_dropped(&self) -> u64 {
        self.dropped_no_adapter.load(Ordering::Relaxed)
            + self.dropped_bad_payload.load(Ordering::Relaxed)
            + self.dropped_bad_topic.load(Ordering::Relaxed)
            + self.dropped_transform.load(Ordering::Relaxed)
            + self.dropped_publish.load(Ordering::Relaxed)
            + self.dropped_deadline.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let count = self.latency_count.load(Ordering::Relaxed);
        let sum = self.latency_ms_sum.load(Ordering::Relaxed);
        MetricsSnapshot {
            uplink_published: self.uplink_published.load(Ordering::Relaxed),
            downlink_published: self.downlink_published.load(Ordering::Relaxed),
            correlated: self.correlated.load(Ordering::Relaxed),
            dropped_no_adapter: self.dropped_no_adapter.load(Ordering::Relaxed),
            dropped_bad_payload: self.dropped_bad_payload.load(Ordering::Relaxed),
            dropped_bad_topic: self.dropped_bad_topic.load(Ordering::Relaxed),
            dropped_transform: self.dropped_transform.load(Ordering::Relaxed),
            dropped_publish: self.dropped_publish.load(Ordering::Relaxed),
            dropped_deadline: self.dropped_deadline.load(Ordering::Relaxed),
            transform_retries: self.transform_retries.load(Ordering::Relaxed),
            retained_telemetry: self.retained_telemetry.load(Ordering::Relaxed),
            uncorrelated_responses: self.uncorrelated_responses.load(Ordering::Relaxed),
            command_timeouts: self.command_timeouts.load(Ordering::Relaxed),
            correlator_evictions: self.correlator_evictions.load(Ordering::Relaxed),
            inbox_overflow: self.inbox_overflow.load(Ordering::Relaxed),
            telemetry_dropped: self.telemetry_dropped.load(Ordering::Relaxed),
            avg_latency_ms: if count == 0 { 0 } else { sum / count },
        }
    }

    /// Emit the snapshot as one structured log line.
    pub fn log_snapshot(&self) {
        let s = self.snapshot();
        tracing::info!(
            uplink_published = s.uplink_published,
            downlink_published = s.downlink_published,
            dropped_no_adapter = s.dropped_no_adapter,
            dropped_bad_payload = s.dropped_bad_payload,
            dropped_transform = s.dropped_transform,
            dropped_publish = s.dropped_publish,
            dropped_deadline = s.dropped_deadline,
            command_timeouts = s.command_timeouts,
            inbox_overflow = s.inbox_overflow,
            telemetry_dropped = s.telemetry_dropped,
            avg_latency_ms = s.avg_latency_ms,
            "gateway metrics"
        );
    }
}
