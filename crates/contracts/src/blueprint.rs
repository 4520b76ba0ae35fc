//! AggregationBlueprint - Config Loader output
//!
//! Describes one aggregation session: resource keys with their scripted
//! responses, aggregator tuning, dispatch policy and the number of rounds.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::{AggregatorConfig, DispatchConfig};

/// Config version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// Complete session blueprint
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AggregationBlueprint {
    /// Config version
    #[serde(default)]
    pub version: ConfigVersion,

    /// Aggregator tuning
    #[serde(default)]
    #[validate(nested)]
    pub aggregator: AggregatorConfig,

    /// Dispatch policy
    #[serde(default)]
    #[validate(nested)]
    pub dispatch: DispatchConfig,

    /// Fetch rounds to run against the same aggregator
    #[serde(default = "default_rounds")]
    #[validate(range(min = 1))]
    pub rounds: u32,

    /// Resource definitions (one fetch per resource and round)
    #[validate(nested)]
    pub resources: Vec<ResourceSpec>,
}

fn default_rounds() -> u32 {
    1
}

impl AggregationBlueprint {
    /// Resource keys in declaration order
    pub fn keys(&self) -> Vec<String> {
        self.resources.iter().map(|r| r.key.clone()).collect()
    }

    /// Look up a resource by key
    pub fn resource(&self, key: &str) -> Option<&ResourceSpec> {
        self.resources.iter().find(|r| r.key == key)
    }
}

/// One resource type and the response the scripted fetcher gives for it
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ResourceSpec {
    /// Resource key (e.g. "allergies")
    #[validate(length(min = 1))]
    pub key: String,

    /// Records returned by the fetch
    #[serde(default)]
    pub records: Vec<serde_json::Value>,

    /// Simulated fetch latency
    #[serde(default)]
    pub delay_ms: u64,

    /// Fetch returns an error
    #[serde(default)]
    pub fail: bool,

    /// Fetch panics
    #[serde(default)]
    pub panic: bool,
}

impl ResourceSpec {
    /// Resource answering `records` immediately
    pub fn new(key: impl Into<String>, records: Vec<serde_json::Value>) -> Self {
        Self {
            key: key.into(),
            records,
            delay_ms: 0,
            fail: false,
            panic: false,
        }
    }
}
