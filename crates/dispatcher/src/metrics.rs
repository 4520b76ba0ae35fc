//! Fetch round metrics for observability

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::round::WorkerOutcome;

/// Counters shared by every round of one dispatcher
#[derive(Debug, Default)]
pub struct RoundMetrics {
    /// Rounds launched
    rounds: AtomicU64,
    /// Fetches currently running
    in_flight: AtomicUsize,
    /// Highest concurrent fetch count observed
    peak_in_flight: AtomicUsize,
    /// Fetches that returned records
    fetched_count: AtomicU64,
    /// Fetches that returned an error
    failed_count: AtomicU64,
    /// Fetches that exceeded the timeout
    timed_out_count: AtomicU64,
    /// Fetches that panicked
    panicked_count: AtomicU64,
    /// Units abandoned by cancellation
    cancelled_count: AtomicU64,
    /// Updates the aggregator no longer accepted
    undelivered_count: AtomicU64,
}

impl RoundMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Get rounds launched
    pub fn rounds(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    pub(crate) fn inc_rounds(&self) -> u64 {
        self.rounds.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Get fetches currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Get peak concurrent fetch count
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }

    /// Mark a fetch as started; the guard marks it finished on drop
    pub(crate) fn fetch_started(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::Relaxed);
        InFlightGuard { metrics: self }
    }

    /// Record a finished unit
    pub(crate) fn record(&self, outcome: WorkerOutcome) {
        let counter = match outcome {
            WorkerOutcome::Fetched { .. } => &self.fetched_count,
            WorkerOutcome::Failed => &self.failed_count,
            WorkerOutcome::TimedOut => &self.timed_out_count,
            WorkerOutcome::Panicked => &self.panicked_count,
            WorkerOutcome::Cancelled => &self.cancelled_count,
            WorkerOutcome::Undelivered => &self.undelivered_count,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> RoundMetricsSnapshot {
        RoundMetricsSnapshot {
            rounds: self.rounds(),
            in_flight: self.in_flight(),
            peak_in_flight: self.peak_in_flight(),
            fetched_count: self.fetched_count.load(Ordering::Relaxed),
            failed_count: self.failed_count.load(Ordering::Relaxed),
            timed_out_count: self.timed_out_count.load(Ordering::Relaxed),
            panicked_count: self.panicked_count.load(Ordering::Relaxed),
            cancelled_count: self.cancelled_count.load(Ordering::Relaxed),
            undelivered_count: self.undelivered_count.load(Ordering::Relaxed),
        }
    }
}

/// Decrements the in-flight count when the fetch ends, however it ends
pub(crate) struct InFlightGuard<'a> {
    metrics: &'a RoundMetrics,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.metrics.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Snapshot of round metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundMetricsSnapshot {
    pub rounds: u64,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub fetched_count: u64,
    pub failed_count: u64,
    pub timed_out_count: u64,
    pub panicked_count: u64,
    pub cancelled_count: u64,
    pub undelivered_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_guard_tracks_peak() {
        let metrics = RoundMetrics::new();

        let first = metrics.fetch_started();
        let second = metrics.fetch_started();
        assert_eq!(metrics.in_flight(), 2);
        drop(first);
        drop(second);
        let _third = metrics.fetch_started();

        assert_eq!(metrics.in_flight(), 1);
        assert_eq!(metrics.peak_in_flight(), 2);
    }

    #[test]
    fn test_record_outcomes() {
        let metrics = RoundMetrics::new();
        metrics.record(WorkerOutcome::Fetched { records: 3 });
        metrics.record(WorkerOutcome::Failed);
        metrics.record(WorkerOutcome::Cancelled);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.fetched_count, 1);
        assert_eq!(snapshot.failed_count, 1);
        assert_eq!(snapshot.cancelled_count, 1);
        assert_eq!(snapshot.timed_out_count, 0);
    }
}
