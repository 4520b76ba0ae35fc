//! Fetch worker - one unit of a fetch round

use std::sync::Arc;
use std::time::Duration;

use aggregator::UpdateSender;
use contracts::{FetchError, ResourceFetcher, ResourceKey, UpdateMessage};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::metrics::RoundMetrics;
use crate::round::{UnitReport, WorkerOutcome};

/// State shared by every unit of a round
pub(crate) struct WorkerContext<K, R, F> {
    pub(crate) round: u64,
    pub(crate) sender: UpdateSender<K, R>,
    pub(crate) fetcher: Arc<F>,
    pub(crate) permits: Option<Arc<Semaphore>>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) cancel: CancellationToken,
    pub(crate) metrics: Arc<RoundMetrics>,
}

type Joined<R> = Option<Result<Result<Vec<R>, FetchError>, JoinError>>;

/// Fetch one key and deliver the result to the aggregator
///
/// Never fails: errors, panics and timeouts degrade to an empty update.
#[instrument(name = "fetch_worker", skip(key, ctx), fields(round = ctx.round, key = ?key))]
pub(crate) async fn fetch_worker<K, R, F>(key: K, ctx: Arc<WorkerContext<K, R, F>>) -> UnitReport<K>
where
    K: ResourceKey,
    R: Send + Sync + 'static,
    F: ResourceFetcher<K, R> + Sync + 'static,
{
    let report = run_unit(key, &ctx).await;

    ctx.metrics.record(report.outcome);
    metrics::counter!("fanin_fetch_total", "status" => report.outcome.status()).increment(1);
    trace!(outcome = report.outcome.status(), "Fetch unit finished");

    report
}

async fn run_unit<K, R, F>(key: K, ctx: &WorkerContext<K, R, F>) -> UnitReport<K>
where
    K: ResourceKey,
    R: Send + Sync + 'static,
    F: ResourceFetcher<K, R> + Sync + 'static,
{
    let permit = match &ctx.permits {
        Some(permits) => tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                trace!("Round cancelled while waiting for a fetch slot");
                return UnitReport::new(key, WorkerOutcome::Cancelled, None);
            }
            permit = Arc::clone(permits).acquire_owned() => match permit {
                Ok(permit) => Some(permit),
                Err(_) => return UnitReport::new(key, WorkerOutcome::Cancelled, None),
            },
        },
        None => None,
    };

    if ctx.cancel.is_cancelled() {
        trace!("Round cancelled before fetch started");
        return UnitReport::new(key, WorkerOutcome::Cancelled, None);
    }

    let started = Instant::now();
    let (results, outcome) = {
        let _in_flight = ctx.metrics.fetch_started();

        // Nested task: a panicking fetcher surfaces as a JoinError here
        let fetcher = Arc::clone(&ctx.fetcher);
        let fetch_key = key.clone();
        let mut fetch = tokio::spawn(async move { fetcher.fetch(&fetch_key).await });
        let abort = fetch.abort_handle();

        let joined = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                abort.abort();
                debug!("Round cancelled, in-flight fetch abandoned");
                return UnitReport::new(key, WorkerOutcome::Cancelled, Some(started.elapsed()));
            }
            joined = wait_fetch(&mut fetch, ctx.timeout) => joined,
        };

        if joined.is_none() {
            abort.abort();
        }
        degrade(&key, joined, ctx.timeout)
    };
    drop(permit);

    let fetch_time = started.elapsed();
    metrics::histogram!("fanin_fetch_latency_ms").record(fetch_time.as_secs_f64() * 1000.0);

    let update = UpdateMessage::new(key.clone(), results);
    tokio::select! {
        biased;
        sent = ctx.sender.send(update) => match sent {
            Ok(()) => {
                debug!(
                    outcome = outcome.status(),
                    fetch_ms = fetch_time.as_millis() as u64,
                    "Update delivered"
                );
                UnitReport::new(key, outcome, Some(fetch_time))
            }
            Err(e) => {
                warn!(key = ?key, error = %e, "Aggregator no longer accepts updates, result dropped");
                UnitReport::new(key, WorkerOutcome::Undelivered, Some(fetch_time))
            }
        },
        _ = ctx.cancel.cancelled() => {
            debug!("Round cancelled while waiting for inbox capacity");
            UnitReport::new(key, WorkerOutcome::Cancelled, Some(fetch_time))
        }
    }
}

async fn wait_fetch<R>(
    fetch: &mut JoinHandle<Result<Vec<R>, FetchError>>,
    timeout: Option<Duration>,
) -> Joined<R> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fetch).await.ok(),
        None => Some(fetch.await),
    }
}

/// Map the fetch result to the records to deliver
fn degrade<K: ResourceKey, R>(
    key: &K,
    joined: Joined<R>,
    timeout: Option<Duration>,
) -> (Vec<R>, WorkerOutcome) {
    match joined {
        Some(Ok(Ok(records))) => {
            let records_len = records.len();
            (records, WorkerOutcome::Fetched { records: records_len })
        }
        Some(Ok(Err(e))) => {
            warn!(key = ?key, error = %e, "Fetch failed, delivering empty result");
            (Vec::new(), WorkerOutcome::Failed)
        }
        Some(Err(e)) if e.is_panic() => {
            warn!(key = ?key, "Fetch panicked, delivering empty result");
            (Vec::new(), WorkerOutcome::Panicked)
        }
        Some(Err(e)) => {
            warn!(key = ?key, error = %e, "Fetch task aborted, delivering empty result");
            (Vec::new(), WorkerOutcome::Failed)
        }
        None => {
            warn!(
                key = ?key,
                timeout_ms = timeout.map(|t| t.as_millis() as u64),
                "Fetch timed out, delivering empty result"
            );
            (Vec::new(), WorkerOutcome::TimedOut)
        }
    }
}
