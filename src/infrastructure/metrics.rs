//! Metrics collection for pipeline monitoring
//!
//! Lock-free metrics counters using atomic operations.
//! Updated by the pipeline tasks, read by the status monitor.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Pipeline metrics collector
///
/// One instance is shared by a consumer's tasks and the producer task.
pub struct PipelineMetrics {
    /// Messages read from the broker and handed to processing
    consumed: AtomicU64,
    /// Broker reads that hit the wait bound
    read_timeouts: AtomicU64,
    /// Broker reads that failed for any other reason
    read_errors: AtomicU64,
    /// Times the reset policy flushed the history
    resets: AtomicU64,
    /// Records appended to the history
    stored: AtomicU64,
    /// Payloads accepted by the broker client
    dispatched: AtomicU64,
    /// Payloads dropped on queue-full, timeout or submit error
    dispatch_drops: AtomicU64,
    /// Delivery confirmations
    delivered: AtomicU64,
    /// Delivery failures reported after submission
    delivery_failures: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

/// Metrics snapshot for export
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub consumed: u64,
    pub read_timeouts: u64,
    pub read_errors: u64,
    pub resets: u64,
    pub stored: u64,
    pub dispatched: u64,
    pub dispatch_drops: u64,
    pub delivered: u64,
    pub delivery_failures: u64,
    pub uptime_seconds: u64,
}

impl PipelineMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            consumed: AtomicU64::new(0),
            read_timeouts: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            stored: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            dispatch_drops: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn record_consumed(&self) {
        self.consumed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_read_timeout(&self) {
        self.read_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_read_error(&self) {
        self.read_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dispatch_drop(&self) {
        self.dispatch_drops.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_delivery_failure(&self) {
        self.delivery_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current snapshot of metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            consumed: self.consumed.load(Ordering::Relaxed),
            read_timeouts: self.read_timeouts.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dispatch_drops: self.dispatch_drops.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let snapshot = PipelineMetrics::new().snapshot();
        assert_eq!(snapshot.consumed, 0);
        assert_eq!(snapshot.stored, 0);
        assert_eq!(snapshot.dispatched, 0);
        assert_eq!(snapshot.delivery_failures, 0);
    }

    #[test]
    fn test_record_counters() {
        let metrics = PipelineMetrics::new();

        metrics.record_consumed();
        metrics.record_consumed();
        metrics.record_read_timeout();
        metrics.record_reset();
        metrics.record_dispatch_drop();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.consumed, 2);
        assert_eq!(snapshot.read_timeouts, 1);
        assert_eq!(snapshot.resets, 1);
        assert_eq!(snapshot.dispatch_drops, 1);
        assert_eq!(snapshot.read_errors, 0);
    }
}
