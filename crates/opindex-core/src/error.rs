//! Error types for the opindex pipeline.

use thiserror::Error;

/// Errors that can occur while indexing.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Network, timeout or RPC fault. Retried by the orchestrator, never fatal.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// `from > to` on a ranged query. A programming or configuration error.
    #[error("invalid block range: from {from} > to {to}")]
    InvalidRange { from: u64, to: u64 },

    /// A single log entry could not be decoded into a `ChainEvent`.
    #[error("decode error: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// Invalid configuration or request parameters.
    #[error("configuration error: {0}")]
    Config(String),

    /// The provider violated the JSON-RPC or subscription protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if the failed operation may succeed when retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Storage(_))
    }

    /// Returns `true` if the error must abort the caller instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidRange { .. } | Self::Config(_))
    }
}
