//! Source call metrics

use std::sync::atomic::{AtomicU64, Ordering};

/// Fetch call counters
#[derive(Debug, Default)]
pub struct SourceMetrics {
    /// Fetch calls received
    pub calls: AtomicU64,

    /// Calls answered with records
    pub served: AtomicU64,

    /// Calls answered with an error
    pub failures: AtomicU64,

    /// Calls that panicked
    pub panics: AtomicU64,
}

impl SourceMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call
    pub fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a served call
    pub fn record_served(&self) {
        self.served.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a panicking call
    pub fn record_panic(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> SourceMetricsSnapshot {
        SourceMetricsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            served: self.served.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceMetricsSnapshot {
    /// Fetch calls received
    pub calls: u64,

    /// Calls answered with records
    pub served: u64,

    /// Calls answered with an error
    pub failures: u64,

    /// Calls that panicked
    pub panics: u64,
}
