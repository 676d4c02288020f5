//! Storage backend selection from a database URL.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use opindex_core::{CheckpointStore, EventQuery, EventSink};
use opindex_storage::postgres::PostgresStorage;
use opindex_storage::sqlite::SqliteStorage;
use opindex_storage::InMemoryStorage;

/// One backend seen through each of the traits the commands need.
pub struct Backend {
    pub kind: &'static str,
    pub sink: Arc<dyn EventSink>,
    pub query: Arc<dyn EventQuery>,
    pub checkpoints: Arc<dyn CheckpointStore>,
}

impl Backend {
    fn shared<S>(kind: &'static str, store: S) -> Self
    where
        S: EventSink + EventQuery + CheckpointStore + 'static,
    {
        let store = Arc::new(store);
        Self {
            kind,
            sink: store.clone(),
            query: store.clone(),
            checkpoints: store,
        }
    }

    pub fn is_persistent(&self) -> bool {
        self.kind != "memory"
    }
}

/// `postgres://…` / `postgresql://…` → Postgres, `sqlite:…` or a file path →
/// SQLite, nothing → in-memory.
pub async fn open(database_url: Option<&str>) -> Result<Backend> {
    let backend = match database_url {
        None => Backend::shared("memory", InMemoryStorage::new()),
        Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => {
            let store = PostgresStorage::connect(url)
                .await
                .context("failed to connect to PostgreSQL")?;
            Backend::shared("postgres", store)
        }
        Some(path) => {
            let store = SqliteStorage::open(path)
                .await
                .with_context(|| format!("failed to open SQLite database '{path}'"))?;
            Backend::shared("sqlite", store)
        }
    };
    info!(backend = backend.kind, "storage ready");
    Ok(backend)
}
