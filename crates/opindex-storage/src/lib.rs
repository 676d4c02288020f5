//! opindex-storage — pluggable storage backends for opindex.
//!
//! Every backend implements [`EventSink`](opindex_core::EventSink),
//! [`EventQuery`](opindex_core::EventQuery) and
//! [`CheckpointStore`](opindex_core::CheckpointStore).
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence)
//! - `sqlite` — SQLite via `sqlx` (embedded, single-file persistence)
//! - `postgres` — PostgreSQL via `sqlx` (production)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStorage;

#[cfg(any(feature = "sqlite", feature = "postgres"))]
pub(crate) fn parse_indexed_at(
    s: &str,
) -> Result<chrono::DateTime<chrono::Utc>, opindex_core::IndexerError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&chrono::Utc))
        .map_err(|e| opindex_core::IndexerError::Storage(format!("bad indexed_at {s:?}: {e}")))
}
