//! Source error types

use contracts::FetchError;
use thiserror::Error;

/// Source errors
#[derive(Debug, Error)]
pub enum SourceError {
    /// No response configured for the key
    #[error("no resource configured for key '{key}'")]
    UnknownResource {
        /// Resource key
        key: String,
    },

    /// Response scripted to fail
    #[error("scripted failure for resource '{key}'")]
    ScriptedFailure {
        /// Resource key
        key: String,
    },
}

impl From<SourceError> for FetchError {
    fn from(err: SourceError) -> Self {
        match &err {
            SourceError::UnknownResource { key } | SourceError::ScriptedFailure { key } => {
                FetchError::Failed {
                    key: key.clone(),
                    message: err.to_string(),
                }
            }
        }
    }
}

/// Sources Result type alias
pub type Result<T> = std::result::Result<T, SourceError>;
