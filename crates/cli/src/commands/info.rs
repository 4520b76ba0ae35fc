//! `info` command implementation.

use anyhow::{Context, Result};
use contracts::AggregationBlueprint;
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;
use crate::error::CliError;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    rounds: u32,
    aggregator: AggregatorInfo,
    dispatch: DispatchInfo,
    resources: Vec<ResourceInfo>,
}

#[derive(Serialize)]
struct AggregatorInfo {
    inbox_capacity: usize,
    subscriber_buffer: usize,
    fault_buffer: usize,
    replay_latest: bool,
}

#[derive(Serialize)]
struct DispatchInfo {
    mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fetch_timeout_ms: Option<u64>,
}

#[derive(Serialize)]
struct ResourceInfo {
    key: String,
    records: usize,
    delay_ms: u64,
    behavior: &'static str,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    let blueprint = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&blueprint);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint);
    }

    Ok(())
}

fn behavior(fail: bool, panic: bool) -> &'static str {
    match (fail, panic) {
        (_, true) => "panic",
        (true, false) => "fail",
        (false, false) => "ok",
    }
}

fn build_config_info(blueprint: &AggregationBlueprint) -> ConfigInfo {
    let resources = blueprint
        .resources
        .iter()
        .map(|r| ResourceInfo {
            key: r.key.clone(),
            records: r.records.len(),
            delay_ms: r.delay_ms,
            behavior: behavior(r.fail, r.panic),
        })
        .collect();

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        rounds: blueprint.rounds,
        aggregator: AggregatorInfo {
            inbox_capacity: blueprint.aggregator.inbox_capacity,
            subscriber_buffer: blueprint.aggregator.subscriber_buffer,
            fault_buffer: blueprint.aggregator.fault_buffer,
            replay_latest: blueprint.aggregator.replay_latest,
        },
        dispatch: DispatchInfo {
            mode: format!("{:?}", blueprint.dispatch.mode),
            max_concurrency: blueprint.dispatch.max_concurrency,
            fetch_timeout_ms: blueprint.dispatch.fetch_timeout_ms,
        },
        resources,
    }
}

fn print_config_info(blueprint: &AggregationBlueprint) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                 Fanin Aggregation Session                    ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    let aggregator = &blueprint.aggregator;
    println!("🧮 Aggregator");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Inbox capacity: {}", aggregator.inbox_capacity);
    println!("   ├─ Subscriber buffer: {}", aggregator.subscriber_buffer);
    println!("   ├─ Fault buffer: {}", aggregator.fault_buffer);
    println!("   └─ Replay latest: {}", aggregator.replay_latest);

    let dispatch = &blueprint.dispatch;
    println!("\n⚙️  Dispatch");
    println!("   ├─ Mode: {:?}", dispatch.mode);
    println!("   ├─ Rounds: {}", blueprint.rounds);
    match dispatch.max_concurrency {
        Some(max) => println!("   ├─ Max concurrency: {}", max),
        None => println!("   ├─ Max concurrency: (one per key)"),
    }
    match dispatch.fetch_timeout_ms {
        Some(ms) => println!("   └─ Fetch timeout: {} ms", ms),
        None => println!("   └─ Fetch timeout: (none)"),
    }

    println!("\n📦 Resources ({})", blueprint.resources.len());
    for (i, resource) in blueprint.resources.iter().enumerate() {
        let is_last = i == blueprint.resources.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        println!(
            "   {} {} ({} records, {} ms, {})",
            prefix,
            resource.key,
            resource.records.len(),
            resource.delay_ms,
            behavior(resource.fail, resource.panic)
        );
    }

    println!();
}
