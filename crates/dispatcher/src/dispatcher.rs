//! Dispatcher - fans a fetch round out to one unit per key

use std::sync::Arc;

use aggregator::UpdateSender;
use contracts::{
    validate_key_set, ContractError, DispatchConfig, DispatchMode, ResourceFetcher, ResourceKey,
};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use validator::Validate;

use crate::error::DispatcherError;
use crate::metrics::RoundMetrics;
use crate::round::FetchRound;
use crate::worker::{fetch_worker, WorkerContext};

/// Launches fetch rounds against one aggregator
///
/// The dispatcher itself holds no per-round state; rounds may overlap and
/// each round reports through its own [`FetchRound`].
pub struct Dispatcher<K, R> {
    sender: UpdateSender<K, R>,
    config: DispatchConfig,
    metrics: Arc<RoundMetrics>,
}

impl<K: ResourceKey, R: Send + Sync + 'static> Dispatcher<K, R> {
    /// Create a dispatcher feeding `sender`
    ///
    /// # Errors
    /// `DispatcherError::Contract` if the config fails validation.
    pub fn new(sender: UpdateSender<K, R>, config: DispatchConfig) -> Result<Self, DispatcherError> {
        config
            .validate()
            .map_err(|e| ContractError::config_validation("dispatch", e.to_string()))?;

        Ok(Self {
            sender,
            config,
            metrics: Arc::new(RoundMetrics::new()),
        })
    }

    /// Get dispatch config
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Get shared metrics
    pub fn metrics(&self) -> &Arc<RoundMetrics> {
        &self.metrics
    }

    /// Run a round in the configured mode
    pub async fn run_round<F>(
        &self,
        keys: impl IntoIterator<Item = K>,
        fetcher: Arc<F>,
    ) -> Result<FetchRound<K>, DispatcherError>
    where
        F: ResourceFetcher<K, R> + Sync + 'static,
    {
        self.run_fetch_round(keys, fetcher, self.config.mode).await
    }

    /// Fetch every key concurrently and deliver one update per key
    ///
    /// In [`DispatchMode::Batch`] this returns once every unit finished and
    /// its update was accepted into the aggregator inbox. In
    /// [`DispatchMode::Streaming`] it returns right after launching; progress
    /// shows up on the snapshot stream.
    ///
    /// # Errors
    /// - `DispatcherError::EmptyRound` for an empty key list
    /// - `DispatcherError::DuplicateKey` if a key is listed twice
    /// - `DispatcherError::Contract` if the aggregator already stopped
    pub async fn run_fetch_round<F>(
        &self,
        keys: impl IntoIterator<Item = K>,
        fetcher: Arc<F>,
        mode: DispatchMode,
    ) -> Result<FetchRound<K>, DispatcherError>
    where
        F: ResourceFetcher<K, R> + Sync + 'static,
    {
        self.launch(keys.into_iter().collect(), fetcher, mode, CancellationToken::new())
            .await
    }

    /// Like [`Dispatcher::run_fetch_round`], cancelled together with `parent`
    pub async fn run_fetch_round_with_cancel<F>(
        &self,
        keys: impl IntoIterator<Item = K>,
        fetcher: Arc<F>,
        mode: DispatchMode,
        parent: &CancellationToken,
    ) -> Result<FetchRound<K>, DispatcherError>
    where
        F: ResourceFetcher<K, R> + Sync + 'static,
    {
        self.launch(keys.into_iter().collect(), fetcher, mode, parent.child_token())
            .await
    }

    #[instrument(
        name = "dispatcher_run_fetch_round",
        skip(self, keys, fetcher, cancel),
        fields(keys = keys.len())
    )]
    async fn launch<F>(
        &self,
        keys: Vec<K>,
        fetcher: Arc<F>,
        mode: DispatchMode,
        cancel: CancellationToken,
    ) -> Result<FetchRound<K>, DispatcherError>
    where
        F: ResourceFetcher<K, R> + Sync + 'static,
    {
        validate_key_set(&keys).map_err(DispatcherError::from_key_set)?;
        if self.sender.is_closed() {
            return Err(ContractError::AggregatorStopped.into());
        }

        let round = self.metrics.inc_rounds();
        let ctx = Arc::new(WorkerContext {
            round,
            sender: self.sender.clone(),
            fetcher,
            permits: self
                .config
                .max_concurrency
                .map(|n| Arc::new(Semaphore::new(n.min(Semaphore::MAX_PERMITS)))),
            timeout: self.config.fetch_timeout(),
            cancel: cancel.clone(),
            metrics: Arc::clone(&self.metrics),
        });

        let started = Instant::now();
        let pending = keys
            .into_iter()
            .map(|key| {
                let task = tokio::spawn(fetch_worker(key.clone(), Arc::clone(&ctx)));
                (key, task)
            })
            .collect::<Vec<_>>();

        info!(
            round,
            units = pending.len(),
            max_concurrency = ?self.config.max_concurrency,
            timeout_ms = ?self.config.fetch_timeout_ms,
            "Fetch round launched"
        );

        let mut handle = FetchRound::new(round, pending, cancel, started);
        if mode == DispatchMode::Batch {
            handle.settle().await;
            debug!(round, "Batch round settled");
        }

        Ok(handle)
    }
}
