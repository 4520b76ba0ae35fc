//! Pipeline orchestrator - wires aggregator, dispatcher and snapshot printer.
//!
//! 一个 aggregator 贯穿整个 run，多轮抓取复用同一个 aggregator（相当于下拉刷新）。

use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use aggregator::{Aggregator, AggregatorHandle, FaultStream, SnapshotStream};
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use contracts::{AggregationBlueprint, Snapshot};
use dispatcher::Dispatcher;
use observability::{
    record_aggregator_metrics, record_round_report, record_snapshot_received,
    record_subscriber_skipped,
};
use serde::Serialize;
use serde_json::Value;
use sources::ScriptedFetcher;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::RunStats;
use crate::error::CliError;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parsed and validated configuration (CLI overrides applied)
    pub blueprint: AggregationBlueprint,

    /// Metrics server port (None = disabled)
    pub metrics_port: Option<u16>,

    /// Pretty-print snapshot JSON
    pub pretty: bool,
}

/// One printed line
#[derive(Serialize)]
struct SnapshotEvent<'a> {
    version: u64,
    emitted_at: String,
    keys: usize,
    records: usize,
    snapshot: &'a Snapshot<String, Value>,
}

/// Render a snapshot as one JSON document
pub fn render_snapshot(
    snapshot: &Snapshot<String, Value>,
    emitted_at: chrono::DateTime<Utc>,
    pretty: bool,
) -> serde_json::Result<String> {
    let event = SnapshotEvent {
        version: snapshot.version(),
        emitted_at: emitted_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        keys: snapshot.len(),
        records: snapshot.total_records(),
        snapshot,
    };

    if pretty {
        serde_json::to_string_pretty(&event)
    } else {
        serde_json::to_string(&event)
    }
}

/// What the printer task saw before the stream completed
#[derive(Debug, Default)]
struct PrinterReport {
    received: u64,
    skipped: u64,
}

/// Main pipeline orchestrator
pub struct Pipeline {
    config: PipelineConfig,
    shutdown: CancellationToken,
}

impl Pipeline {
    /// Create a new pipeline with the given configuration
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that cancels the round in progress and skips the remaining ones
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run every configured round, printing snapshots to stdout
    pub async fn run(self) -> Result<RunStats> {
        self.run_with_output(std::io::stdout()).await
    }

    /// Run every configured round, printing snapshots to `out`
    pub async fn run_with_output<W>(self, out: W) -> Result<RunStats>
    where
        W: Write + Send + 'static,
    {
        let start_time = Instant::now();
        let blueprint = &self.config.blueprint;

        if let Some(port) = self.config.metrics_port {
            observability::init_metrics_only(port)?;
            info!("Metrics endpoint available on port {}", port);
        }

        let keys = blueprint.keys();
        let handle: AggregatorHandle<String, Value> =
            Aggregator::start(keys.clone(), blueprint.aggregator.clone())
                .map_err(CliError::from)
                .context("Failed to start aggregator")?;

        let stream = handle
            .subscribe()
            .await
            .context("Failed to subscribe to snapshots")?;
        let mut faults = handle
            .subscribe_faults()
            .await
            .context("Failed to subscribe to faults")?;
        let printer = spawn_printer(stream, out, self.config.pretty);

        let dispatcher = Dispatcher::new(handle.sender(), blueprint.dispatch.clone())
            .context("Failed to create dispatcher")?;
        let fetcher = Arc::new(ScriptedFetcher::from_blueprint(blueprint));
        let mode = dispatcher.config().mode;

        info!(
            keys = keys.len(),
            rounds = blueprint.rounds,
            mode = ?mode,
            "Pipeline running"
        );

        let mut stats = RunStats::default();
        for round in 1..=blueprint.rounds {
            if self.shutdown.is_cancelled() {
                break;
            }

            let fetch_round = dispatcher
                .run_fetch_round_with_cancel(keys.clone(), Arc::clone(&fetcher), mode, &self.shutdown)
                .await
                .map_err(|e| CliError::round(round, e))?;

            let report = fetch_round.wait_all().await;
            record_round_report(&report);
            stats.rounds.update(&report);

            info!(
                round,
                fetched = report.fetched(),
                degraded = report.degraded(),
                cancelled = report.cancelled(),
                records = report.total_records(),
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Fetch round finished"
            );
        }
        stats.interrupted = self.shutdown.is_cancelled();
        if stats.interrupted {
            warn!("Shutdown requested, remaining rounds skipped");
        }

        drain_faults(&mut faults);

        let final_snapshot = handle
            .current()
            .await
            .context("Failed to read final snapshot")?;
        stats.final_keys = final_snapshot.len();
        stats.final_records = final_snapshot.total_records();
        stats.final_version = final_snapshot.version();

        let aggregator_metrics = handle.metrics().snapshot();
        record_aggregator_metrics(&aggregator_metrics);
        stats.updates_accepted = aggregator_metrics.accepted_count;
        stats.updates_rejected = aggregator_metrics.rejected_count;

        // stop 之后 stream 返回 None，printer 自然退出
        handle.stop().await;
        let printed = printer
            .await
            .map_err(|e| CliError::printer(e.to_string()))?
            .map_err(|e| CliError::printer(e.to_string()))?;
        stats.snapshots_received = printed.received;
        stats.snapshots_skipped = printed.skipped;

        stats.duration = start_time.elapsed();
        info!(
            duration_secs = stats.duration.as_secs_f64(),
            snapshots = stats.snapshots_received,
            version = stats.final_version,
            "Pipeline shutdown complete"
        );

        Ok(stats)
    }
}

fn spawn_printer<W>(
    stream: SnapshotStream<String, Value>,
    out: W,
    pretty: bool,
) -> JoinHandle<std::io::Result<PrinterReport>>
where
    W: Write + Send + 'static,
{
    tokio::spawn(print_snapshots(stream, out, pretty))
}

async fn print_snapshots<W: Write>(
    mut stream: SnapshotStream<String, Value>,
    mut out: W,
    pretty: bool,
) -> std::io::Result<PrinterReport> {
    let mut report = PrinterReport::default();

    while let Some(snapshot) = stream.next().await {
        record_snapshot_received(&snapshot);
        let line = render_snapshot(&snapshot, Utc::now(), pretty)?;
        writeln!(out, "{line}")?;
        report.received += 1;
    }
    out.flush()?;

    report.skipped = stream.skipped();
    record_subscriber_skipped(report.skipped);
    debug!(
        received = report.received,
        skipped = report.skipped,
        "Snapshot stream completed"
    );

    Ok(report)
}

fn drain_faults(faults: &mut FaultStream<String>) {
    while let Some(fault) = faults.try_next() {
        warn!(fault = %fault, "Aggregation fault reported");
    }
}
