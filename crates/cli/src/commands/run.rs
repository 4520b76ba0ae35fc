//! `run` command implementation.

use anyhow::{Context, Result};
use contracts::{AggregationBlueprint, DispatchMode};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;
use crate::pipeline::{Pipeline, PipelineConfig};

/// Execute the `run` command
pub async fn run_pipeline(args: &RunArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let mut blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    apply_overrides(&mut blueprint, args);
    config_loader::ConfigLoader::validate(&blueprint)
        .map_err(CliError::from)
        .context("Configuration invalid after CLI overrides")?;

    info!(
        resources = blueprint.resources.len(),
        rounds = blueprint.rounds,
        mode = ?blueprint.dispatch.mode,
        max_concurrency = ?blueprint.dispatch.max_concurrency,
        fetch_timeout_ms = ?blueprint.dispatch.fetch_timeout_ms,
        "Configuration loaded"
    );

    let pipeline = Pipeline::new(PipelineConfig {
        blueprint,
        metrics_port: if args.metrics_port == 0 {
            None
        } else {
            Some(args.metrics_port)
        },
        pretty: args.pretty,
    });

    // 收到信号后取消当前轮次，剩余轮次跳过，快照流正常收尾
    let signal_task = tokio::spawn(cancel_on_signal(pipeline.shutdown_token()));

    info!("Starting pipeline...");
    let result = pipeline.run().await;
    signal_task.abort();

    let stats = result.context("Pipeline execution failed")?;
    info!(
        rounds = stats.rounds.total_rounds,
        snapshots = stats.snapshots_received,
        interrupted = stats.interrupted,
        duration_secs = stats.duration.as_secs_f64(),
        "Pipeline completed"
    );
    stats.print_summary();

    Ok(())
}

/// Apply CLI overrides on top of the loaded configuration
fn apply_overrides(blueprint: &mut AggregationBlueprint, args: &RunArgs) {
    if let Some(mode) = args.mode {
        info!(mode = ?mode, "Overriding dispatch mode from CLI");
        blueprint.dispatch.mode = DispatchMode::from(mode);
    }
    if let Some(rounds) = args.rounds {
        info!(rounds, "Overriding rounds from CLI");
        blueprint.rounds = rounds;
    }
    if let Some(max_concurrency) = args.max_concurrency {
        info!(max_concurrency, "Overriding max concurrency from CLI");
        blueprint.dispatch.max_concurrency = Some(max_concurrency);
    }
    if let Some(timeout_ms) = args.fetch_timeout_ms {
        info!(timeout_ms, "Overriding fetch timeout from CLI");
        blueprint.dispatch.fetch_timeout_ms = Some(timeout_ms);
    }
    if args.no_replay {
        blueprint.aggregator.replay_latest = false;
    }
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn cancel_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("Received shutdown signal, cancelling current round...");
    token.cancel();
}
