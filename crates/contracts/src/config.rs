//! Aggregator and dispatcher configuration contracts that can be shared across crates.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Aggregator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct AggregatorConfig {
    /// Inbox capacity; senders suspend while the inbox is full
    #[serde(default = "default_inbox_capacity")]
    #[validate(range(min = 1))]
    pub inbox_capacity: usize,

    /// Snapshots retained for slow subscribers before the oldest are skipped
    #[serde(default = "default_subscriber_buffer")]
    #[validate(range(min = 1))]
    pub subscriber_buffer: usize,

    /// Faults retained for slow fault subscribers
    #[serde(default = "default_fault_buffer")]
    #[validate(range(min = 1))]
    pub fault_buffer: usize,

    /// Deliver the current snapshot as first item of every new subscription
    #[serde(default = "default_replay_latest")]
    pub replay_latest: bool,
}

fn default_inbox_capacity() -> usize {
    64
}

fn default_subscriber_buffer() -> usize {
    16
}

fn default_fault_buffer() -> usize {
    32
}

fn default_replay_latest() -> bool {
    true
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: default_inbox_capacity(),
            subscriber_buffer: default_subscriber_buffer(),
            fault_buffer: default_fault_buffer(),
            replay_latest: default_replay_latest(),
        }
    }
}

/// How `run_fetch_round` returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Return immediately; progress is observed on the snapshot stream
    #[default]
    Streaming,
    /// Return after every update of the round was accepted by the inbox
    Batch,
}

/// `max_concurrency` 上限，等于 tokio `Semaphore::MAX_PERMITS`
pub const MAX_CONCURRENCY: usize = usize::MAX >> 3;

/// Dispatcher configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct DispatchConfig {
    /// Maximum concurrent fetches per round (None = one per key)
    #[serde(default)]
    #[validate(range(min = 1, max = MAX_CONCURRENCY))]
    pub max_concurrency: Option<usize>,

    /// Per-fetch timeout in milliseconds (None = no timeout)
    #[serde(default)]
    #[validate(range(min = 1))]
    pub fetch_timeout_ms: Option<u64>,

    /// Default completion mode
    #[serde(default)]
    pub mode: DispatchMode,
}

impl DispatchConfig {
    /// Per-fetch timeout as a `Duration`
    pub fn fetch_timeout(&self) -> Option<std::time::Duration> {
        self.fetch_timeout_ms.map(std::time::Duration::from_millis)
    }
}
