//! Subscriber side of the aggregator: snapshot and fault streams.

use contracts::{AggregationFault, Snapshot};
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::{debug, warn};

/// Push-based sequence of snapshots for one subscriber
///
/// Yields every snapshot the aggregator emits after the subscription was
/// registered, in emission order. When replay is enabled the first item is
/// the snapshot that was current at subscription time.
///
/// The buffer is shared and bounded: a subscriber that falls behind skips
/// the oldest snapshots instead of slowing the aggregator down. Snapshots
/// are cumulative, so the newest one is always the complete state.
pub struct SnapshotStream<K, R> {
    replay: Option<Snapshot<K, R>>,
    rx: broadcast::Receiver<Snapshot<K, R>>,
    skipped: u64,
}

impl<K, R> SnapshotStream<K, R> {
    pub(crate) fn new(
        replay: Option<Snapshot<K, R>>,
        rx: broadcast::Receiver<Snapshot<K, R>>,
    ) -> Self {
        Self {
            replay,
            rx,
            skipped: 0,
        }
    }

    /// Wait for the next snapshot
    ///
    /// Returns `None` once the aggregator stopped and every buffered
    /// snapshot has been delivered.
    pub async fn next(&mut self) -> Option<Snapshot<K, R>> {
        if let Some(snapshot) = self.replay.take() {
            return Some(snapshot);
        }

        loop {
            match self.rx.recv().await {
                Ok(snapshot) => return Some(snapshot),
                Err(RecvError::Lagged(n)) => self.record_skipped(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Coalesce to the newest snapshot available right now
    ///
    /// Drains everything buffered for this subscriber and returns only the
    /// newest item, or `None` if nothing new arrived. Never waits.
    pub fn latest(&mut self) -> Option<Snapshot<K, R>> {
        let mut newest = self.replay.take();

        loop {
            match self.rx.try_recv() {
                Ok(snapshot) => {
                    if newest.replace(snapshot).is_some() {
                        self.skipped += 1;
                    }
                }
                Err(TryRecvError::Lagged(n)) => self.record_skipped(n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        newest
    }

    /// Wait for the first snapshot matching `predicate`
    pub async fn wait_for<P>(&mut self, mut predicate: P) -> Option<Snapshot<K, R>>
    where
        P: FnMut(&Snapshot<K, R>) -> bool,
    {
        while let Some(snapshot) = self.next().await {
            if predicate(&snapshot) {
                return Some(snapshot);
            }
        }
        None
    }

    /// Consume the stream until completion and return the final snapshot
    pub async fn last(mut self) -> Option<Snapshot<K, R>> {
        let mut last = None;
        while let Some(snapshot) = self.next().await {
            last = Some(snapshot);
        }
        last
    }

    /// Snapshots this subscriber skipped because it fell behind
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn record_skipped(&mut self, n: u64) {
        self.skipped += n;
        debug!(skipped = n, total = self.skipped, "Subscriber lagged, oldest snapshots skipped");
        metrics::counter!("fanin_snapshots_skipped_total").increment(n);
    }
}

/// Stream of rejected-update reports
///
/// Shares the drop-oldest policy of [`SnapshotStream`]; lost reports are
/// counted in `skipped()`.
pub struct FaultStream<K> {
    rx: broadcast::Receiver<AggregationFault<K>>,
    skipped: u64,
}

impl<K: Clone> FaultStream<K> {
    pub(crate) fn new(rx: broadcast::Receiver<AggregationFault<K>>) -> Self {
        Self { rx, skipped: 0 }
    }

    /// Wait for the next fault; `None` once the aggregator stopped
    pub async fn next(&mut self) -> Option<AggregationFault<K>> {
        loop {
            match self.rx.recv().await {
                Ok(fault) => return Some(fault),
                Err(RecvError::Lagged(n)) => self.record_skipped(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Fault already reported, if any, without waiting
    pub fn try_next(&mut self) -> Option<AggregationFault<K>> {
        loop {
            match self.rx.try_recv() {
                Ok(fault) => return Some(fault),
                Err(TryRecvError::Lagged(n)) => self.record_skipped(n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Fault reports lost because this subscriber fell behind
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn record_skipped(&mut self, n: u64) {
        self.skipped += n;
        warn!(skipped = n, total = self.skipped, "Fault subscriber lagged, fault reports lost");
        metrics::counter!("fanin_faults_skipped_total").increment(n);
    }
}
