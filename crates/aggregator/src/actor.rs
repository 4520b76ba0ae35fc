//! Aggregator actor: single processing task fed by one inbox.

use std::sync::Arc;

use contracts::{
    validate_key_set, AggregationFault, AggregatorConfig, ContractError, ResourceKey, ResultList,
    Snapshot, UpdateMessage,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

use crate::engine::SnapshotAccumulator;
use crate::metrics::AggregatorMetrics;
use crate::stream::{FaultStream, SnapshotStream};

/// Inbox message
enum Command<K, R> {
    Update(UpdateMessage<K, R>),
    Subscribe(oneshot::Sender<SnapshotStream<K, R>>),
    SubscribeFaults(oneshot::Sender<FaultStream<K>>),
    Current(oneshot::Sender<Snapshot<K, R>>),
    Stop,
}

/// Entry point for starting aggregators
pub struct Aggregator;

impl Aggregator {
    /// Start an aggregator over `keys`
    ///
    /// Spawns the processing task on the current tokio runtime.
    ///
    /// # Errors
    /// - `ContractError::EmptyKeySet` / `ContractError::DuplicateKey` for an invalid key set
    /// - `ContractError::ConfigValidation` for zero capacities
    pub fn start<K, R>(
        keys: impl IntoIterator<Item = K>,
        config: AggregatorConfig,
    ) -> Result<AggregatorHandle<K, R>, ContractError>
    where
        K: ResourceKey,
        R: Send + Sync + 'static,
    {
        Self::start_with_shutdown(keys, config, CancellationToken::new())
    }

    /// Start an aggregator that also stops when `shutdown` is cancelled
    ///
    /// Messages already in the inbox are processed before the cancellation
    /// is observed.
    pub fn start_with_shutdown<K, R>(
        keys: impl IntoIterator<Item = K>,
        config: AggregatorConfig,
        shutdown: CancellationToken,
    ) -> Result<AggregatorHandle<K, R>, ContractError>
    where
        K: ResourceKey,
        R: Send + Sync + 'static,
    {
        let keys: Vec<K> = keys.into_iter().collect();
        let key_set = validate_key_set(&keys)?;
        config
            .validate()
            .map_err(|e| ContractError::config_validation("aggregator", e.to_string()))?;

        let (tx, rx) = mpsc::channel(config.inbox_capacity);
        let metrics = Arc::new(AggregatorMetrics::new());

        let worker = AggregatorLoop {
            accumulator: SnapshotAccumulator::new(key_set),
            rx,
            snapshots: broadcast::channel(config.subscriber_buffer).0,
            faults: broadcast::channel(config.fault_buffer).0,
            metrics: Arc::clone(&metrics),
            replay_latest: config.replay_latest,
            shutdown,
        };

        let task = tokio::spawn(worker.run());

        info!(
            keys = keys.len(),
            inbox_capacity = config.inbox_capacity,
            subscriber_buffer = config.subscriber_buffer,
            replay_latest = config.replay_latest,
            "Aggregator started"
        );

        Ok(AggregatorHandle {
            sender: UpdateSender { tx },
            metrics,
            task,
        })
    }
}

/// Cloneable entry point into the aggregator inbox
///
/// Handed to fetch workers; also usable for subscribing.
pub struct UpdateSender<K, R> {
    tx: mpsc::Sender<Command<K, R>>,
}

impl<K, R> Clone for UpdateSender<K, R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<K: ResourceKey, R: Send + Sync + 'static> UpdateSender<K, R> {
    /// Enqueue an update
    ///
    /// Suspends only while the inbox is full. Returns once the update is
    /// enqueued, not once it is applied.
    pub async fn send(&self, update: UpdateMessage<K, R>) -> Result<(), ContractError> {
        self.tx
            .send(Command::Update(update))
            .await
            .map_err(|_| ContractError::AggregatorStopped)
    }

    /// Enqueue an update without waiting
    ///
    /// # Errors
    /// `ContractError::InboxFull` if the inbox is at capacity.
    pub fn try_send(&self, update: UpdateMessage<K, R>) -> Result<(), ContractError> {
        self.tx.try_send(Command::Update(update)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ContractError::InboxFull,
            mpsc::error::TrySendError::Closed(_) => ContractError::AggregatorStopped,
        })
    }

    /// Enqueue `results` for `key` (manual injection, bypassing the dispatcher)
    pub async fn send_update(
        &self,
        key: K,
        results: impl Into<ResultList<R>>,
    ) -> Result<(), ContractError> {
        self.send(UpdateMessage::new(key, results)).await
    }

    /// Subscribe to the snapshot stream
    ///
    /// The subscription is registered by the processing loop, in inbox
    /// order: it observes exactly the emissions of updates enqueued after
    /// this call.
    pub async fn subscribe(&self) -> Result<SnapshotStream<K, R>, ContractError> {
        self.request(Command::Subscribe).await
    }

    /// Subscribe to rejected-update reports
    pub async fn subscribe_faults(&self) -> Result<FaultStream<K>, ContractError> {
        self.request(Command::SubscribeFaults).await
    }

    /// Latest snapshot, reflecting every update enqueued before this call
    pub async fn current(&self) -> Result<Snapshot<K, R>, ContractError> {
        self.request(Command::Current).await
    }

    /// Whether the aggregator loop has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command<K, R>,
    ) -> Result<T, ContractError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| ContractError::AggregatorStopped)?;
        reply_rx.await.map_err(|_| ContractError::AggregatorStopped)
    }
}

/// Owner handle of a running aggregator
pub struct AggregatorHandle<K, R> {
    sender: UpdateSender<K, R>,
    metrics: Arc<AggregatorMetrics>,
    task: JoinHandle<()>,
}

impl<K: ResourceKey, R: Send + Sync + 'static> AggregatorHandle<K, R> {
    /// Cloneable sender for workers and observers
    pub fn sender(&self) -> UpdateSender<K, R> {
        self.sender.clone()
    }

    /// Get shared metrics
    pub fn metrics(&self) -> &Arc<AggregatorMetrics> {
        &self.metrics
    }

    /// See [`UpdateSender::send`]
    pub async fn send(&self, update: UpdateMessage<K, R>) -> Result<(), ContractError> {
        self.sender.send(update).await
    }

    /// See [`UpdateSender::try_send`]
    pub fn try_send(&self, update: UpdateMessage<K, R>) -> Result<(), ContractError> {
        self.sender.try_send(update)
    }

    /// See [`UpdateSender::send_update`]
    pub async fn send_update(
        &self,
        key: K,
        results: impl Into<ResultList<R>>,
    ) -> Result<(), ContractError> {
        self.sender.send_update(key, results).await
    }

    /// See [`UpdateSender::subscribe`]
    pub async fn subscribe(&self) -> Result<SnapshotStream<K, R>, ContractError> {
        self.sender.subscribe().await
    }

    /// See [`UpdateSender::subscribe_faults`]
    pub async fn subscribe_faults(&self) -> Result<FaultStream<K>, ContractError> {
        self.sender.subscribe_faults().await
    }

    /// See [`UpdateSender::current`]
    pub async fn current(&self) -> Result<Snapshot<K, R>, ContractError> {
        self.sender.current().await
    }

    /// Whether the processing task has finished
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the aggregator
    ///
    /// Updates enqueued before the stop request are still applied. Afterwards
    /// the inbox is closed, every snapshot stream completes and further sends
    /// fail with `ContractError::AggregatorStopped`.
    #[instrument(name = "aggregator_handle_stop", skip(self))]
    pub async fn stop(self) {
        // Loop may already be gone (cancelled): nothing to signal then
        let _ = self.sender.tx.send(Command::Stop).await;
        drop(self.sender);

        if let Err(e) = self.task.await {
            error!(error = ?e, "Aggregator task panicked");
        }
        debug!("AggregatorHandle stop complete");
    }
}

/// State owned by the processing task
struct AggregatorLoop<K, R> {
    accumulator: SnapshotAccumulator<K, R>,
    rx: mpsc::Receiver<Command<K, R>>,
    snapshots: broadcast::Sender<Snapshot<K, R>>,
    faults: broadcast::Sender<AggregationFault<K>>,
    metrics: Arc<AggregatorMetrics>,
    replay_latest: bool,
    shutdown: CancellationToken,
}

impl<K: ResourceKey, R: Send + Sync + 'static> AggregatorLoop<K, R> {
    #[instrument(
        name = "aggregator_loop",
        skip(self),
        fields(keys = self.accumulator.key_count())
    )]
    async fn run(mut self) {
        loop {
            let command = tokio::select! {
                biased;
                command = self.rx.recv() => command,
                _ = self.shutdown.cancelled() => {
                    info!("Aggregator shutdown requested");
                    None
                }
            };

            match command {
                Some(Command::Update(update)) => self.handle_update(update),
                Some(Command::Subscribe(reply)) => {
                    let replay = self
                        .replay_latest
                        .then(|| self.accumulator.current().clone());
                    let stream = SnapshotStream::new(replay, self.snapshots.subscribe());
                    self.metrics.inc_subscriber_count();
                    // Requester may have given up
                    let _ = reply.send(stream);
                }
                Some(Command::SubscribeFaults(reply)) => {
                    let _ = reply.send(FaultStream::new(self.faults.subscribe()));
                }
                Some(Command::Current(reply)) => {
                    let _ = reply.send(self.accumulator.current().clone());
                }
                Some(Command::Stop) | None => break,
            }
        }

        self.rx.close();

        info!(
            accepted = self.accumulator.accepted_count(),
            rejected = self.accumulator.rejected_count(),
            complete = self.accumulator.is_complete(),
            "Aggregator stopped"
        );
        // Dropping the broadcast senders completes every stream
    }

    fn handle_update(&mut self, update: UpdateMessage<K, R>) {
        self.metrics.set_inbox_len(self.rx.len());

        match self.accumulator.apply(update) {
            Ok(snapshot) => {
                self.metrics.inc_accepted_count();
                metrics::counter!("fanin_updates_accepted_total").increment(1);
                metrics::gauge!("fanin_snapshot_keys").set(snapshot.len() as f64);

                let version = snapshot.version();
                let keys = snapshot.len();
                // No receivers is not an error: the emission still happened
                let receivers = self.snapshots.send(snapshot.clone()).unwrap_or(0);
                self.metrics.inc_emitted_count();
                metrics::counter!("fanin_snapshots_emitted_total").increment(1);

                debug!(version, keys, receivers, "Snapshot published");
            }
            Err(fault) => {
                self.metrics.inc_rejected_count();
                metrics::counter!(
                    "fanin_updates_rejected_total",
                    "reason" => fault.reason()
                )
                .increment(1);
                warn!(
                    key = ?fault.key(),
                    reason = fault.reason(),
                    fault = %fault,
                    "Update rejected"
                );
                let _ = self.faults.send(fault);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn start(keys: &[&'static str]) -> AggregatorHandle<&'static str, u32> {
        Aggregator::start(keys.to_vec(), AggregatorConfig::default()).unwrap()
    }

    type Started = Result<AggregatorHandle<&'static str, u32>, ContractError>;

    #[tokio::test]
    async fn test_start_rejects_invalid_key_sets() {
        let empty: Started = Aggregator::start(Vec::new(), AggregatorConfig::default());
        assert!(matches!(empty, Err(ContractError::EmptyKeySet)));

        let duplicate: Started = Aggregator::start(vec!["a", "a"], AggregatorConfig::default());
        assert!(matches!(duplicate, Err(ContractError::DuplicateKey { .. })));
    }

    #[tokio::test]
    async fn test_start_rejects_zero_capacity() {
        let config = AggregatorConfig {
            subscriber_buffer: 0,
            ..Default::default()
        };
        let started: Started = Aggregator::start(vec!["a"], config);
        assert!(matches!(
            started,
            Err(ContractError::ConfigValidation { .. })
        ));
    }

    #[tokio::test]
    async fn test_one_emission_per_accepted_update() {
        let handle = start(&["a", "b"]);
        let mut stream = handle.subscribe().await.unwrap();

        // Replayed empty snapshot
        assert_eq!(stream.next().await.unwrap().version(), 0);

        handle.send_update("a", vec![1]).await.unwrap();
        handle.send_update("a", vec![1, 2]).await.unwrap(); // rejected
        handle.send_update("b", Vec::<u32>::new()).await.unwrap();
        handle.send_update("a", vec![3]).await.unwrap();

        let versions: Vec<u64> = [
            stream.next().await.unwrap(),
            stream.next().await.unwrap(),
            stream.next().await.unwrap(),
        ]
        .iter()
        .map(|s| s.version())
        .collect();
        assert_eq!(versions, vec![1, 2, 3]);

        let metrics = handle.metrics().snapshot();
        assert_eq!(metrics.accepted_count, 3);
        assert_eq!(metrics.rejected_count, 1);
        assert_eq!(metrics.emitted_count, 3);

        handle.stop().await;
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_fault_reported_and_entry_unchanged() {
        let handle = start(&["a"]);
        let mut faults = handle.subscribe_faults().await.unwrap();

        handle.send_update("a", vec![1, 2]).await.unwrap();
        handle.send_update("a", vec![7]).await.unwrap();

        let fault = faults.next().await.unwrap();
        assert_eq!(
            fault,
            AggregationFault::LengthMismatch {
                key: "a",
                existing: 2,
                incoming: 1,
            }
        );

        let current = handle.current().await.unwrap();
        assert_eq!(current.get(&"a"), Some(&[1, 2][..]));
        assert_eq!(current.version(), 1);

        handle.stop().await;
        assert!(faults.next().await.is_none());
    }

    #[tokio::test]
    async fn test_lagging_fault_subscriber_counts_lost_reports() {
        let config = AggregatorConfig {
            fault_buffer: 2,
            ..Default::default()
        };
        let handle: AggregatorHandle<&'static str, u32> =
            Aggregator::start(vec!["a"], config).unwrap();
        let mut faults = handle.subscribe_faults().await.unwrap();

        for _ in 0..5 {
            handle.send_update("zz", vec![1]).await.unwrap();
        }
        handle.current().await.unwrap();

        assert_eq!(
            faults.try_next(),
            Some(AggregationFault::UnknownKey { key: "zz" })
        );
        assert_eq!(faults.skipped(), 3);
        assert!(faults.try_next().is_some());
        assert!(faults.try_next().is_none());
        assert_eq!(handle.metrics().snapshot().rejected_count, 5);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_final_state() {
        let handle = start(&["a", "b"]);
        handle.send_update("a", vec![1]).await.unwrap();
        handle.send_update("b", vec![2, 3]).await.unwrap();

        let mut late = handle.subscribe().await.unwrap();
        let first = late.next().await.unwrap();

        assert_eq!(first.get(&"a"), Some(&[1][..]));
        assert_eq!(first.get(&"b"), Some(&[2, 3][..]));
        assert_eq!(first.version(), 2);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_no_replay_when_disabled() {
        let config = AggregatorConfig {
            replay_latest: false,
            ..Default::default()
        };
        let handle: AggregatorHandle<&str, u32> = Aggregator::start(vec!["a"], config).unwrap();
        let mut stream = handle.subscribe().await.unwrap();

        assert!(stream.latest().is_none());

        handle.send_update("a", vec![1]).await.unwrap();
        assert_eq!(stream.next().await.unwrap().version(), 1);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_ordering_seen_by_every_subscriber() {
        let handle = start(&["a", "b", "c"]);
        let mut first = handle.subscribe().await.unwrap();
        let mut second = handle.subscribe().await.unwrap();

        for key in ["a", "b", "c"] {
            handle.send_update(key, vec![1]).await.unwrap();
        }
        handle.stop().await;

        for stream in [&mut first, &mut second] {
            let mut versions = Vec::new();
            while let Some(snapshot) = stream.next().await {
                versions.push(snapshot.version());
            }
            assert_eq!(versions, vec![0, 1, 2, 3]);
        }
    }

    #[tokio::test]
    async fn test_slow_subscriber_skips_but_converges() {
        let config = AggregatorConfig {
            subscriber_buffer: 2,
            ..Default::default()
        };
        let keys: Vec<u32> = (0..64).collect();
        let handle: AggregatorHandle<u32, u32> = Aggregator::start(keys.clone(), config).unwrap();
        let mut slow = handle.subscribe().await.unwrap();

        for key in keys {
            handle.send_update(key, vec![key]).await.unwrap();
        }
        let expected = handle.current().await.unwrap();

        let newest = slow.latest().unwrap();
        assert_eq!(newest, expected);
        assert_eq!(newest.len(), 64);
        assert!(slow.skipped() > 0);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_send_after_stop_fails() {
        let handle = start(&["a"]);
        let sender = handle.sender();
        handle.stop().await;

        assert!(matches!(
            sender.send_update("a", vec![1]).await,
            Err(ContractError::AggregatorStopped)
        ));
        assert!(matches!(
            sender.subscribe().await,
            Err(ContractError::AggregatorStopped)
        ));
        assert!(sender.is_closed());
    }

    #[tokio::test]
    async fn test_updates_before_stop_are_applied() {
        let handle = start(&["a", "b"]);
        let mut stream = handle.subscribe().await.unwrap();

        handle.send_update("a", vec![1]).await.unwrap();
        handle.send_update("b", vec![2]).await.unwrap();
        handle.stop().await;

        let last = stream.last().await.unwrap();
        assert_eq!(last.len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_token_stops_loop() {
        let token = CancellationToken::new();
        let handle: AggregatorHandle<&str, u32> =
            Aggregator::start_with_shutdown(vec!["a"], AggregatorConfig::default(), token.clone())
                .unwrap();
        let mut stream = handle.subscribe().await.unwrap();
        stream.next().await.unwrap();

        token.cancel();

        let ended = tokio::time::timeout(Duration::from_secs(1), stream.next()).await;
        assert!(matches!(ended, Ok(None)));
        handle.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_loss_free() {
        use rand::Rng;

        let keys: Vec<u32> = (0..8).collect();
        let handle: AggregatorHandle<u32, u32> =
            Aggregator::start(keys.clone(), AggregatorConfig::default()).unwrap();

        let producers: Vec<_> = keys
            .iter()
            .map(|&key| {
                let sender = handle.sender();
                tokio::spawn(async move {
                    for i in 0..10 {
                        let pause = rand::rng().random_range(0..3);
                        tokio::time::sleep(Duration::from_millis(pause)).await;
                        sender.send_update(key, vec![i]).await.unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.await.unwrap();
        }

        let current = handle.current().await.unwrap();
        assert_eq!(current.version(), 80);
        for key in keys {
            // 同一 producer 的更新按发送顺序应用
            assert_eq!(current.get(&key), Some(&[9][..]));
        }
        assert_eq!(handle.metrics().snapshot().accepted_count, 80);

        handle.stop().await;
    }

    #[tokio::test]
    async fn test_try_send_reports_full_inbox() {
        let config = AggregatorConfig {
            inbox_capacity: 1,
            ..Default::default()
        };
        let handle: AggregatorHandle<&str, u32> = Aggregator::start(vec!["a"], config).unwrap();

        // Fill faster than the loop drains; at least one must bounce
        let results: Vec<_> = (0..32)
            .map(|_| handle.try_send(UpdateMessage::new("a", vec![1])))
            .collect();
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ContractError::InboxFull))));

        handle.stop().await;
    }
}
