//! Dispatcher error types

use contracts::ContractError;
use thiserror::Error;

/// Dispatcher-specific errors
///
/// Only round setup can fail; per-key fetch problems never surface here.
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Round started without keys
    #[error("fetch round has no keys")]
    EmptyRound,

    /// Same key listed twice in one round
    #[error("duplicate key in fetch round: {key}")]
    DuplicateKey { key: String },

    /// Invalid configuration or stopped aggregator
    #[error("contract error: {0}")]
    Contract(#[from] ContractError),
}

impl DispatcherError {
    /// Map a key-set validation error onto the round-level variants
    pub(crate) fn from_key_set(err: ContractError) -> Self {
        match err {
            ContractError::EmptyKeySet => Self::EmptyRound,
            ContractError::DuplicateKey { key } => Self::DuplicateKey { key },
            other => Self::Contract(other),
        }
    }
}
