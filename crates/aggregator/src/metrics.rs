//! Aggregator metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters shared between the aggregator loop and its handles
#[derive(Debug, Default)]
pub struct AggregatorMetrics {
    /// Messages waiting in the inbox (sampled by the loop)
    inbox_len: AtomicUsize,
    /// Updates applied
    accepted_count: AtomicU64,
    /// Updates rejected by a fault
    rejected_count: AtomicU64,
    /// Snapshots published
    emitted_count: AtomicU64,
    /// Subscriptions handed out
    subscriber_count: AtomicU64,
}

impl AggregatorMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Get sampled inbox length
    pub fn inbox_len(&self) -> usize {
        self.inbox_len.load(Ordering::Relaxed)
    }

    /// Set sampled inbox length
    pub fn set_inbox_len(&self, len: usize) {
        self.inbox_len.store(len, Ordering::Relaxed);
    }

    /// Get accepted count
    pub fn accepted_count(&self) -> u64 {
        self.accepted_count.load(Ordering::Relaxed)
    }

    /// Increment accepted count
    pub fn inc_accepted_count(&self) {
        self.accepted_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get rejected count
    pub fn rejected_count(&self) -> u64 {
        self.rejected_count.load(Ordering::Relaxed)
    }

    /// Increment rejected count
    pub fn inc_rejected_count(&self) {
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get emitted count
    pub fn emitted_count(&self) -> u64 {
        self.emitted_count.load(Ordering::Relaxed)
    }

    /// Increment emitted count
    pub fn inc_emitted_count(&self) {
        self.emitted_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get subscriber count
    pub fn subscriber_count(&self) -> u64 {
        self.subscriber_count.load(Ordering::Relaxed)
    }

    /// Increment subscriber count
    pub fn inc_subscriber_count(&self) {
        self.subscriber_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            inbox_len: self.inbox_len(),
            accepted_count: self.accepted_count(),
            rejected_count: self.rejected_count(),
            emitted_count: self.emitted_count(),
            subscriber_count: self.subscriber_count(),
        }
    }
}

/// Snapshot of aggregator metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub inbox_len: usize,
    pub accepted_count: u64,
    pub rejected_count: u64,
    pub emitted_count: u64,
    pub subscriber_count: u64,
}
