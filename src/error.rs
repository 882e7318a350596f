//! Error types for the ingestion engine.
//!
//! Per-adapter failures (`Network`, `Parse`) are caught at adapter granularity
//! by the collection cycle and the connectivity probes; they surface as
//! failure counters on `ConnectionStatus`, never as errors from the
//! article query API.

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IngestError {
    /// Transport failure, timeout, or non-2xx response from a provider
    #[error("network error from {source_name}: {message}")]
    Network {
        source_name: String,
        message: String,
    },

    /// Provider answered but the payload could not be decoded
    #[error("parse error from {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    /// No adapter constructor registered for the configured source type
    #[error("unknown source type: {0}")]
    UnknownSourceType(String),

    /// The connection ceiling never freed within the admission timeout
    #[error("connection ceiling of {max} reached; no slot freed within {waited_secs}s")]
    ConnectionCeilingReached { max: usize, waited_secs: u64 },

    /// Every candidate adapter is unhealthy (or none is registered)
    #[error("no healthy adapter available{}", .0.as_deref().map(|t| format!(" for source type {t}")).unwrap_or_default())]
    NoHealthyAdapter(Option<String>),

    #[error("source not found: {0}")]
    SourceNotFound(String),

    #[error("source already registered: {0}")]
    DuplicateSource(String),

    #[error("source is disabled: {0}")]
    SourceDisabled(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl IngestError {
    pub fn network(source_name: impl Into<String>, message: impl ToString) -> Self {
        Self::Network {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    pub fn parse(source_name: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    /// Failures that count against an adapter's health.
    pub fn is_source_failure(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Parse { .. })
    }
}
