//! Event sink and query traits implemented by the storage backends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::query::UserOpFilter;
use crate::types::ChainEvent;

/// Result of an idempotent upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpsertOutcome {
    /// The event was not stored before and now is.
    Inserted,
    /// A record with the same `(transactionHash, logIndex)` already exists;
    /// nothing was written.
    AlreadyPresent,
}

/// Idempotent persistence of decoded events.
///
/// `upsert` must be safe to call concurrently and redundantly for the same
/// `(transactionHash, logIndex)`. A repeated call is a no-op returning
/// [`UpsertOutcome::AlreadyPresent`], never an error and never a second row.
/// This is what lets the backfill runner and the live subscriber overlap.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn upsert(&self, event: &ChainEvent) -> Result<UpsertOutcome, IndexerError>;
}

/// Read side of the store, used by query clients.
#[async_trait]
pub trait EventQuery: Send + Sync {
    /// Return every stored event matching all set fields of `filter`,
    /// ordered by block number then log index.
    async fn find(&self, filter: &UserOpFilter) -> Result<Vec<ChainEvent>, IndexerError>;

    /// Total number of stored events.
    async fn count(&self) -> Result<u64, IndexerError>;
}
