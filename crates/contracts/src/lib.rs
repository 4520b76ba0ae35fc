//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the aggregation engine.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Data Model
//! - `ResourceKey`: identifier of one fetchable data category
//! - `ResultList`: immutable, ordered results of one fetch for one key
//! - `Snapshot`: immutable key -> result list mapping, replaced on every accepted update
//! - `UpdateMessage`: the unit a fetch worker sends to the aggregator

mod blueprint;
mod config;
mod error;
mod fault;
mod fetcher;
mod key;
mod snapshot;

pub use blueprint::*;
pub use config::*;
pub use error::*;
pub use fault::AggregationFault;
pub use fetcher::{FetchError, FnFetcher, LocalResourceFetcher, ResourceFetcher};
pub use key::{validate_key_set, ResourceKey};
pub use snapshot::*;
