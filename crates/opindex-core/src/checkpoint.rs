//! Checkpoint manager: persists the highest fully indexed block.
//!
//! The checkpoint only advances after every event of a backfill batch has been
//! committed to the sink, and it never moves backwards. On restart the
//! indexer resumes at `checkpoint + 1`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::IndexerError;

/// A persisted checkpoint for an indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique indexer identifier.
    pub indexer_id: String,
    /// Highest block whose events are fully and durably recorded.
    pub block_number: u64,
    /// Unix timestamp of when this checkpoint was saved.
    pub updated_at: i64,
}

/// Trait for storing and loading checkpoints.
///
/// Implementations include `MemoryCheckpointStore`, `InMemoryStorage`,
/// `SqliteStorage` and `PostgresStorage`. `save` must never lower a stored
/// block number.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Load the checkpoint for an indexer.
    async fn load(&self, indexer_id: &str) -> Result<Option<Checkpoint>, IndexerError>;

    /// Save (upsert) a checkpoint, keeping the higher block number.
    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError>;

    /// Delete a checkpoint (e.g. when resetting an indexer).
    async fn delete(&self, indexer_id: &str) -> Result<(), IndexerError>;
}

/// Reads and advances the checkpoint of a single indexer.
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn CheckpointStore>,
    indexer_id: String,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn CheckpointStore>, indexer_id: impl Into<String>) -> Self {
        Self {
            store,
            indexer_id: indexer_id.into(),
        }
    }

    pub fn indexer_id(&self) -> &str {
        &self.indexer_id
    }

    /// The stored block number, or `None` if the indexer never committed a batch.
    pub async fn get(&self) -> Result<Option<u64>, IndexerError> {
        Ok(self
            .store
            .load(&self.indexer_id)
            .await?
            .map(|cp| cp.block_number))
    }

    /// First block still to be indexed: `checkpoint + 1`, or `start_block`
    /// when no checkpoint exists.
    pub async fn resume_from(&self, start_block: u64) -> Result<u64, IndexerError> {
        Ok(match self.get().await? {
            Some(block) => block.saturating_add(1),
            None => start_block,
        })
    }

    /// Advance the checkpoint to `block_number`.
    ///
    /// A value below the stored one is ignored.
    pub async fn set(&self, block_number: u64) -> Result<(), IndexerError> {
        if let Some(current) = self.get().await? {
            if block_number < current {
                tracing::warn!(
                    current,
                    requested = block_number,
                    indexer = %self.indexer_id,
                    "ignoring checkpoint regression"
                );
                return Ok(());
            }
        }
        let cp = Checkpoint {
            indexer_id: self.indexer_id.clone(),
            block_number,
            updated_at: chrono::Utc::now().timestamp(),
        };
        self.store.save(cp).await
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory checkpoint store for tests and ephemeral indexers.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<String, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Checkpoint>>, IndexerError> {
        self.data
            .lock()
            .map_err(|_| IndexerError::Storage("checkpoint store poisoned".into()))
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, indexer_id: &str) -> Result<Option<Checkpoint>, IndexerError> {
        Ok(self.lock()?.get(indexer_id).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        let mut data = self.lock()?;
        match data.get(&checkpoint.indexer_id) {
            Some(existing) if existing.block_number > checkpoint.block_number => {}
            _ => {
                data.insert(checkpoint.indexer_id.clone(), checkpoint);
            }
        }
        Ok(())
    }

    async fn delete(&self, indexer_id: &str) -> Result<(), IndexerError> {
        self.lock()?.remove(indexer_id);
        Ok(())
    }
}
