//! Error types for CLI operations.

use contracts::ContractError;
use dispatcher::DispatcherError;
use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration could not be loaded or is invalid
    #[error("Invalid configuration: {0}")]
    Config(#[from] ContractError),

    /// A fetch round could not be launched
    #[error("Fetch round {round} failed to launch: {source}")]
    Round {
        round: u32,
        #[source]
        source: DispatcherError,
    },

    /// Snapshot printer task failed
    #[error("Snapshot printer failed: {message}")]
    Printer { message: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn round(round: u32, source: DispatcherError) -> Self {
        Self::Round { round, source }
    }

    pub fn printer(message: impl Into<String>) -> Self {
        Self::Printer {
            message: message.into(),
        }
    }
}
