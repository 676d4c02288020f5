//! In-memory storage backend.
//!
//! Stores `UserOperationEvent` records and checkpoints in RAM.
//! Useful for testing and short-lived indexers that don't need persistence.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use opindex_core::checkpoint::{Checkpoint, CheckpointStore};
use opindex_core::error::IndexerError;
use opindex_core::query::UserOpFilter;
use opindex_core::sink::{EventQuery, EventSink, UpsertOutcome};
use opindex_core::types::{ChainEvent, EventKey};

/// In-memory indexer storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
    events: Mutex<HashMap<EventKey, ChainEvent>>,
}

fn lock<T>(m: &Mutex<T>) -> Result<MutexGuard<'_, T>, IndexerError> {
    m.lock()
        .map_err(|_| IndexerError::Storage("in-memory store poisoned".into()))
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events.
    pub fn event_count(&self) -> usize {
        lock(&self.events).map(|e| e.len()).unwrap_or(0)
    }

    /// All stored events ordered by block number, then log index.
    pub fn events(&self) -> Vec<ChainEvent> {
        let mut events: Vec<ChainEvent> = lock(&self.events)
            .map(|e| e.values().cloned().collect())
            .unwrap_or_default();
        sort_events(&mut events);
        events
    }

    /// Look up a single occurrence by its identity.
    pub fn get(&self, key: &EventKey) -> Option<ChainEvent> {
        lock(&self.events).ok()?.get(key).cloned()
    }
}

pub(crate) fn sort_events(events: &mut [ChainEvent]) {
    events.sort_by(|a, b| {
        (a.block_number, a.log_index, &a.transaction_hash)
            .cmp(&(b.block_number, b.log_index, &b.transaction_hash))
    });
}

// ─── EventSink / EventQuery impl ─────────────────────────────────────────────

#[async_trait]
impl EventSink for InMemoryStorage {
    async fn upsert(&self, event: &ChainEvent) -> Result<UpsertOutcome, IndexerError> {
        let mut events = lock(&self.events)?;
        let key = event.key();
        if events.contains_key(&key) {
            return Ok(UpsertOutcome::AlreadyPresent);
        }
        events.insert(key, event.clone());
        Ok(UpsertOutcome::Inserted)
    }
}

#[async_trait]
impl EventQuery for InMemoryStorage {
    async fn find(&self, filter: &UserOpFilter) -> Result<Vec<ChainEvent>, IndexerError> {
        let mut found: Vec<ChainEvent> = lock(&self.events)?
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        sort_events(&mut found);
        Ok(found)
    }

    async fn count(&self) -> Result<u64, IndexerError> {
        Ok(lock(&self.events)?.len() as u64)
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn load(&self, indexer_id: &str) -> Result<Option<Checkpoint>, IndexerError> {
        Ok(lock(&self.checkpoints)?.get(indexer_id).cloned())
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        let mut checkpoints = lock(&self.checkpoints)?;
        let keep_existing = checkpoints
            .get(&checkpoint.indexer_id)
            .is_some_and(|cp| cp.block_number > checkpoint.block_number);
        if !keep_existing {
            checkpoints.insert(checkpoint.indexer_id.clone(), checkpoint);
        }
        Ok(())
    }

    async fn delete(&self, indexer_id: &str) -> Result<(), IndexerError> {
        lock(&self.checkpoints)?.remove(indexer_id);
        Ok(())
    }
}
