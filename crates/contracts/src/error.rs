//! Layered error definitions
//!
//! Categorized by source: config / session / general

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Session Errors =====
    /// An aggregation session needs at least one resource key
    #[error("resource key set is empty")]
    EmptyKeySet,

    /// Resource key supplied twice
    #[error("duplicate resource key: {key}")]
    DuplicateKey { key: String },

    /// The aggregator loop is gone, nothing can be enqueued anymore
    #[error("aggregator stopped")]
    AggregatorStopped,

    /// Inbox is at capacity (only returned by non-suspending sends)
    #[error("aggregator inbox full")]
    InboxFull,

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create duplicate key error from any debuggable key
    pub fn duplicate_key(key: &impl std::fmt::Debug) -> Self {
        Self::DuplicateKey {
            key: format!("{key:?}"),
        }
    }
}
