//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use contracts::DispatchMode;
use observability::LogFormat;
use std::path::PathBuf;

/// Fanin - concurrent fan-out/fan-in snapshot aggregation
#[derive(Parser, Debug)]
#[command(
    name = "fanin",
    author,
    version,
    about = "Fan-out/fan-in snapshot aggregation engine",
    long_about = "Runs concurrent fetch rounds over a fixed set of resource keys.\n\n\
                  Every completed fetch is merged into one live snapshot by a single-writer \n\
                  aggregator; each new snapshot is printed as JSON as soon as it is emitted."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "FANIN_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        default_value = "compact",
        global = true,
        env = "FANIN_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run fetch rounds and stream snapshots
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "config.toml", env = "FANIN_CONFIG")]
    pub config: PathBuf,

    /// Override dispatch mode from configuration
    #[arg(long, value_enum, env = "FANIN_MODE")]
    pub mode: Option<ModeArg>,

    /// Override number of fetch rounds from configuration
    #[arg(long, env = "FANIN_ROUNDS")]
    pub rounds: Option<u32>,

    /// Override maximum concurrent fetches per round
    #[arg(long, env = "FANIN_MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Override per-fetch timeout in milliseconds
    #[arg(long, env = "FANIN_FETCH_TIMEOUT_MS")]
    pub fetch_timeout_ms: Option<u64>,

    /// Do not replay the current snapshot to the printer on subscription
    #[arg(long)]
    pub no_replay: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "FANIN_METRICS_PORT")]
    pub metrics_port: u16,

    /// Pretty-print snapshot JSON
    #[arg(long)]
    pub pretty: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Dispatch mode
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeArg {
    /// Return once every update of the round is in the inbox
    Batch,
    /// Return immediately, watch the snapshot stream
    Streaming,
}

impl From<ModeArg> for DispatchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Batch => DispatchMode::Batch,
            ModeArg::Streaming => DispatchMode::Streaming,
        }
    }
}
