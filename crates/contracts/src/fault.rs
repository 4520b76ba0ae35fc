//! AggregationFault - rejected updates
//!
//! A fault is reported by the aggregator loop instead of applying an update.
//! It never stops the loop.

use thiserror::Error;

/// Reason an update was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationFault<K> {
    /// Key already set with a result list of a different length
    #[error("result count mismatch for {key:?}: existing={existing}, incoming={incoming}")]
    LengthMismatch {
        key: K,
        existing: usize,
        incoming: usize,
    },

    /// Key outside the session's key set
    #[error("unknown resource key {key:?}")]
    UnknownKey { key: K },
}

impl<K> AggregationFault<K> {
    /// Key of the rejected update
    pub fn key(&self) -> &K {
        match self {
            Self::LengthMismatch { key, .. } | Self::UnknownKey { key } => key,
        }
    }

    /// Short reason label (used for logs and metric labels)
    pub fn reason(&self) -> &'static str {
        match self {
            Self::LengthMismatch { .. } => "length_mismatch",
            Self::UnknownKey { .. } => "unknown_key",
        }
    }
}
