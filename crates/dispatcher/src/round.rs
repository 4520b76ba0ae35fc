//! FetchRound - handle to the units of one fetch round

use std::time::Duration;

use contracts::ResourceKey;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// How one fetch unit ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerOutcome {
    /// Fetch succeeded, update delivered
    Fetched { records: usize },
    /// Fetch returned an error, empty update delivered
    Failed,
    /// Fetch exceeded the timeout, empty update delivered
    TimedOut,
    /// Fetch panicked, empty update delivered
    Panicked,
    /// Round cancelled before the update was delivered
    Cancelled,
    /// Aggregator stopped before accepting the update
    Undelivered,
}

impl WorkerOutcome {
    /// Metric label
    pub fn status(&self) -> &'static str {
        match self {
            Self::Fetched { .. } => "fetched",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Panicked => "panicked",
            Self::Cancelled => "cancelled",
            Self::Undelivered => "undelivered",
        }
    }

    /// Whether an update for the key reached the aggregator inbox
    pub fn is_delivered(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::Undelivered)
    }
}

/// Result of one unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport<K> {
    pub key: K,
    pub outcome: WorkerOutcome,
    /// Time spent inside the fetch (None if it never started)
    pub fetch_time: Option<Duration>,
}

impl<K> UnitReport<K> {
    pub(crate) fn new(key: K, outcome: WorkerOutcome, fetch_time: Option<Duration>) -> Self {
        Self {
            key,
            outcome,
            fetch_time,
        }
    }
}

/// Summary of a finished round
#[derive(Debug, Clone)]
pub struct RoundReport<K> {
    /// Round number (1-based, per dispatcher)
    pub round: u64,
    /// One entry per key, in the order the keys were given
    pub units: Vec<UnitReport<K>>,
    /// Wall time from launch to the last unit finishing
    pub elapsed: Duration,
}

impl<K: PartialEq> RoundReport<K> {
    /// Outcome for `key`
    pub fn outcome(&self, key: &K) -> Option<WorkerOutcome> {
        self.units
            .iter()
            .find(|u| &u.key == key)
            .map(|u| u.outcome)
    }
}

impl<K> RoundReport<K> {
    /// Number of units
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Whether the round had no units
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Units whose update reached the aggregator
    pub fn delivered(&self) -> usize {
        self.count(|o| o.is_delivered())
    }

    /// Units that fetched successfully
    pub fn fetched(&self) -> usize {
        self.count(|o| matches!(o, WorkerOutcome::Fetched { .. }))
    }

    /// Units that degraded to an empty list (error, timeout or panic)
    pub fn degraded(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                WorkerOutcome::Failed | WorkerOutcome::TimedOut | WorkerOutcome::Panicked
            )
        })
    }

    /// Units abandoned by cancellation
    pub fn cancelled(&self) -> usize {
        self.count(|o| o == WorkerOutcome::Cancelled)
    }

    /// Records fetched across all units
    pub fn total_records(&self) -> usize {
        self.units
            .iter()
            .map(|u| match u.outcome {
                WorkerOutcome::Fetched { records } => records,
                _ => 0,
            })
            .sum()
    }

    /// Fetch times of the units that ran a fetch
    pub fn fetch_times(&self) -> impl Iterator<Item = Duration> + '_ {
        self.units.iter().filter_map(|u| u.fetch_time)
    }

    fn count(&self, pred: impl Fn(WorkerOutcome) -> bool) -> usize {
        self.units.iter().filter(|u| pred(u.outcome)).count()
    }
}

/// Handle to a launched round
///
/// Dropping the handle detaches the units: they keep running and still
/// deliver their updates. Use [`FetchRound::cancel`] to abandon them.
pub struct FetchRound<K> {
    round: u64,
    pending: Vec<(K, JoinHandle<UnitReport<K>>)>,
    finished: Vec<UnitReport<K>>,
    cancel: CancellationToken,
    started: Instant,
}

impl<K: ResourceKey> FetchRound<K> {
    pub(crate) fn new(
        round: u64,
        pending: Vec<(K, JoinHandle<UnitReport<K>>)>,
        cancel: CancellationToken,
        started: Instant,
    ) -> Self {
        Self {
            finished: Vec::with_capacity(pending.len()),
            round,
            pending,
            cancel,
            started,
        }
    }

    /// Round number
    pub fn round(&self) -> u64 {
        self.round
    }

    /// Number of units in the round
    pub fn len(&self) -> usize {
        self.pending.len() + self.finished.len()
    }

    /// Whether the round has no units (never true for a launched round)
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every unit has finished
    pub fn is_finished(&self) -> bool {
        self.pending.iter().all(|(_, task)| task.is_finished())
    }

    /// Abandon the round
    ///
    /// Units that have not started fetching will not start, running fetches
    /// are aborted without an update, and units waiting on a full inbox give
    /// up. Updates already delivered stay applied.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the round was cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token observed by every unit of this round
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for every unit to finish
    ///
    /// Units react to cancellation at every await point, so this returns
    /// promptly after [`FetchRound::cancel`].
    pub(crate) async fn settle(&mut self) {
        for (key, task) in self.pending.drain(..) {
            let report = match task.await {
                Ok(report) => report,
                Err(e) if e.is_panic() => {
                    error!(key = ?key, error = ?e, "Fetch unit panicked");
                    UnitReport::new(key, WorkerOutcome::Panicked, None)
                }
                Err(_) => UnitReport::new(key, WorkerOutcome::Cancelled, None),
            };
            self.finished.push(report);
        }
    }

    /// Wait for every unit and summarize the round
    #[instrument(name = "fetch_round_wait_all", skip(self), fields(round = self.round))]
    pub async fn wait_all(mut self) -> RoundReport<K> {
        self.settle().await;

        let elapsed = self.started.elapsed();
        let report = RoundReport {
            round: self.round,
            units: self.finished,
            elapsed,
        };

        metrics::histogram!("fanin_round_duration_ms").record(elapsed.as_secs_f64() * 1000.0);
        info!(
            round = report.round,
            units = report.len(),
            fetched = report.fetched(),
            degraded = report.degraded(),
            cancelled = report.cancelled(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Fetch round complete"
        );

        report
    }
}

impl<K> std::fmt::Debug for FetchRound<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchRound")
            .field("round", &self.round)
            .field("pending", &self.pending.len())
            .field("finished", &self.finished.len())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}
