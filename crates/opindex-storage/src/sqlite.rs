//! SQLite storage backend for opindex.
//!
//! Persists `UserOperationEvent` records and checkpoints to a single SQLite
//! file. Uses `sqlx` with WAL mode for concurrent read performance.
//!
//! # Usage
//! ```rust,no_run
//! use opindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./userops.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use opindex_core::checkpoint::{Checkpoint, CheckpointStore};
use opindex_core::error::IndexerError;
use opindex_core::query::UserOpFilter;
use opindex_core::sink::{EventQuery, EventSink, UpsertOutcome};
use opindex_core::types::ChainEvent;

use crate::parse_indexed_at;

/// SQLite-backed storage for events and checkpoints.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./userops.db"`) or a full
    /// SQLite URL (`"sqlite:./userops.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Every connection to `sqlite::memory:` is a separate database, so the
    /// pool is pinned to one connection.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                indexer_id   TEXT    NOT NULL PRIMARY KEY,
                block_number INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        // One row per (transaction_hash, log_index).
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_operations (
                user_op_hash     TEXT    NOT NULL,
                sender           TEXT    NOT NULL,
                paymaster        TEXT    NOT NULL,
                nonce            TEXT    NOT NULL,
                success          INTEGER NOT NULL,
                actual_gas_cost  TEXT    NOT NULL,
                actual_gas_used  TEXT    NOT NULL,
                block_number     INTEGER NOT NULL,
                transaction_hash TEXT    NOT NULL,
                log_index        INTEGER NOT NULL,
                indexed_at       TEXT    NOT NULL,
                UNIQUE (transaction_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_userops_block ON user_operations (block_number);",
            "CREATE INDEX IF NOT EXISTS idx_userops_sender ON user_operations (LOWER(sender));",
            "CREATE INDEX IF NOT EXISTS idx_userops_hash ON user_operations (user_op_hash);",
        ] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(|e| IndexerError::Storage(e.to_string()))?;
        }

        Ok(())
    }
}

fn row_to_event(row: &SqliteRow) -> Result<ChainEvent, IndexerError> {
    let get_err = |e: sqlx::Error| IndexerError::Storage(e.to_string());
    let indexed_at: String = row.try_get("indexed_at").map_err(get_err)?;
    Ok(ChainEvent {
        operation_hash: row.try_get("user_op_hash").map_err(get_err)?,
        sender: row.try_get("sender").map_err(get_err)?,
        paymaster: row.try_get("paymaster").map_err(get_err)?,
        nonce: row.try_get("nonce").map_err(get_err)?,
        success: row.try_get("success").map_err(get_err)?,
        actual_gas_cost: row.try_get("actual_gas_cost").map_err(get_err)?,
        actual_gas_used: row.try_get("actual_gas_used").map_err(get_err)?,
        block_number: row.try_get::<i64, _>("block_number").map_err(get_err)? as u64,
        transaction_hash: row.try_get("transaction_hash").map_err(get_err)?,
        log_index: row.try_get::<i64, _>("log_index").map_err(get_err)? as u64,
        indexed_at: parse_indexed_at(&indexed_at)?,
    })
}

// ─── EventSink / EventQuery impl ─────────────────────────────────────────────

#[async_trait]
impl EventSink for SqliteStorage {
    async fn upsert(&self, event: &ChainEvent) -> Result<UpsertOutcome, IndexerError> {
        let result = sqlx::query(
            "INSERT INTO user_operations
             (user_op_hash, sender, paymaster, nonce, success, actual_gas_cost,
              actual_gas_used, block_number, transaction_hash, log_index, indexed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (transaction_hash, log_index) DO NOTHING",
        )
        .bind(&event.operation_hash)
        .bind(&event.sender)
        .bind(&event.paymaster)
        .bind(&event.nonce)
        .bind(event.success)
        .bind(&event.actual_gas_cost)
        .bind(&event.actual_gas_used)
        .bind(event.block_number as i64)
        .bind(&event.transaction_hash)
        .bind(event.log_index as i64)
        .bind(event.indexed_at_string())
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            debug!(tx_hash = %event.transaction_hash, log_index = event.log_index, "event already stored");
            Ok(UpsertOutcome::AlreadyPresent)
        } else {
            debug!(block = event.block_number, tx_hash = %event.transaction_hash, "event stored");
            Ok(UpsertOutcome::Inserted)
        }
    }
}

#[async_trait]
impl EventQuery for SqliteStorage {
    async fn find(&self, filter: &UserOpFilter) -> Result<Vec<ChainEvent>, IndexerError> {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT user_op_hash, sender, paymaster, nonce, success, actual_gas_cost,
                    actual_gas_used, block_number, transaction_hash, log_index, indexed_at
             FROM user_operations WHERE 1 = 1",
        );
        if let Some(v) = &filter.user_op_hash {
            qb.push(" AND user_op_hash = ").push_bind(v.clone());
        }
        if let Some(v) = &filter.sender {
            qb.push(" AND LOWER(sender) = LOWER(").push_bind(v.clone()).push(")");
        }
        if let Some(v) = &filter.paymaster {
            qb.push(" AND LOWER(paymaster) = LOWER(").push_bind(v.clone()).push(")");
        }
        if let Some(v) = filter.success {
            qb.push(" AND success = ").push_bind(v);
        }
        if let Some(v) = filter.block_number {
            qb.push(" AND block_number = ").push_bind(v as i64);
        }
        if let Some(v) = &filter.nonce {
            qb.push(" AND nonce = ").push_bind(v.clone());
        }
        if let Some(v) = &filter.actual_gas_cost {
            qb.push(" AND actual_gas_cost = ").push_bind(v.clone());
        }
        if let Some(v) = &filter.actual_gas_used {
            qb.push(" AND actual_gas_used = ").push_bind(v.clone());
        }
        if let Some(v) = &filter.transaction_hash {
            qb.push(" AND transaction_hash = ").push_bind(v.clone());
        }
        if let Some(v) = &filter.timestamp {
            qb.push(" AND indexed_at = ").push_bind(v.clone());
        }
        qb.push(" ORDER BY block_number, log_index");

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        rows.iter().map(row_to_event).collect()
    }

    async fn count(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM user_operations")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let cnt: i64 = row
            .try_get("cnt")
            .map_err(|e| IndexerError::Storage(e.to_string()))?;
        Ok(cnt as u64)
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load(&self, indexer_id: &str) -> Result<Option<Checkpoint>, IndexerError> {
        let row = sqlx::query(
            "SELECT indexer_id, block_number, updated_at
             FROM checkpoints WHERE indexer_id = ?",
        )
        .bind(indexer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        row.map(|r| {
            Ok(Checkpoint {
                indexer_id: r
                    .try_get("indexer_id")
                    .map_err(|e| IndexerError::Storage(e.to_string()))?,
                block_number: r
                    .try_get::<i64, _>("block_number")
                    .map_err(|e| IndexerError::Storage(e.to_string()))?
                    as u64,
                updated_at: r
                    .try_get("updated_at")
                    .map_err(|e| IndexerError::Storage(e.to_string()))?,
            })
        })
        .transpose()
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO checkpoints (indexer_id, block_number, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT (indexer_id) DO UPDATE SET
                 block_number = MAX(checkpoints.block_number, excluded.block_number),
                 updated_at   = excluded.updated_at",
        )
        .bind(&checkpoint.indexer_id)
        .bind(checkpoint.block_number as i64)
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        debug!(
            indexer_id = %checkpoint.indexer_id,
            block = checkpoint.block_number,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn delete(&self, indexer_id: &str) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM checkpoints WHERE indexer_id = ?")
            .bind(indexer_id)
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
