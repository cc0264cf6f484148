//! Error types for rivven-cosmos
//!
//! Errors are grouped the way the poll loop and the metadata monitor react to them:
//! transient source errors are retried by re-queuing, a gone range is routed to
//! the split/merge resolver, and everything else is surfaced to the caller.

use crate::types::FeedRange;
use thiserror::Error;

/// Result type alias for rivven-cosmos operations
pub type Result<T> = std::result::Result<T, CosmosError>;

/// Errors raised by the change-feed engine and its collaborators
#[derive(Debug, Error)]
pub enum CosmosError {
    /// Configuration validation failed
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection to the source or checkpoint store failed
    #[error("connection error: {0}")]
    Connection(String),

    /// Timeout waiting for the source
    #[error("timeout: {0}")]
    Timeout(String),

    /// Request was throttled by the source
    #[error("throttled: {0}")]
    Throttled(String),

    /// The queried feed range no longer exists (split or merge happened)
    #[error("feed range {range} no longer exists")]
    RangeGone { range: FeedRange },

    /// The source reported no overlapping ranges for a gone range
    #[error("no overlapping feed ranges found for {range} in container '{container}'")]
    ResolverInconsistency { container: String, range: FeedRange },

    /// Malformed item payload or offset encoding
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Checkpoint or snapshot state could not be interpreted
    #[error("state error: {0}")]
    State(String),

    /// Database or container not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Transient error that may succeed on retry
    #[error("transient error (retryable): {0}")]
    Transient(String),

    /// Fatal error that will not succeed on retry
    #[error("fatal error: {0}")]
    Fatal(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CosmosError {
    /// Check if this error is retryable on the next poll cycle
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Timeout(_) | Self::Throttled(_) | Self::Transient(_)
        )
    }

    /// Check if this error signals that a feed range was split or merged away
    pub fn is_range_gone(&self) -> bool {
        matches!(self, Self::RangeGone { .. })
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a state error
    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    /// Create a transient error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Create a fatal error
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Create a range-gone error
    pub fn range_gone(range: FeedRange) -> Self {
        Self::RangeGone { range }
    }
}
