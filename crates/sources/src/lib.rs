//! # Sources
//!
//! Resource fetcher implementations.
//!
//! Responsibilities:
//! - Provide `ResourceFetcher` implementations for the dispatcher
//! - Scripted fetcher driven by blueprint resources (records, latency,
//!   failure and panic injection) for runs without a real backend
//! - Per-source call metrics
//!
//! ## Usage Example
//!
//! ```ignore
//! use sources::ScriptedFetcher;
//!
//! let fetcher = Arc::new(ScriptedFetcher::from_blueprint(&blueprint));
//! let round = dispatcher.run_round(blueprint.keys(), Arc::clone(&fetcher)).await?;
//! ```

mod error;
mod metrics;
mod scripted;

pub use crate::error::{Result, SourceError};
pub use crate::metrics::{SourceMetrics, SourceMetricsSnapshot};
pub use crate::scripted::{ScriptedFetcher, ScriptedResponse};
pub use contracts::{FetchError, ResourceFetcher};
