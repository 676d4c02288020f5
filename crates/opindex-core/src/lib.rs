//! opindex-core — foundation for the ERC-4337 `UserOperationEvent` indexer.
//!
//! # Architecture
//!
//! ```text
//! IndexerBuilder → Orchestrator (SubscriptionState machine, reconnect timer)
//!                      ├── LiveSubscriber   (ChainClient::subscribe → decode)
//!                      ├── BackfillRunner   (ChainClient::query_range → decode → checkpoint)
//!                      ├── SinkWriter       (bounded channel → EventSink::upsert)
//!                      └── Storage backend  (memory / SQLite / Postgres)
//! ```
//!
//! This crate holds the chain-agnostic pieces: types, traits, the checkpoint
//! manager and the subscription state machine.

pub mod checkpoint;
pub mod client;
pub mod error;
pub mod indexer;
pub mod metrics;
pub mod query;
pub mod sink;
pub mod state;
pub mod types;

pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointStore, MemoryCheckpointStore};
pub use client::{
    ChainClient, ChainClientFactory, LogSubscription, SubscriptionFeed, SubscriptionHandle,
    SubscriptionItem,
};
pub use error::IndexerError;
pub use indexer::{IndexerConfig, DEFAULT_ENTRYPOINT};
pub use metrics::{IndexerMetrics, MetricsSnapshot};
pub use query::UserOpFilter;
pub use sink::{EventQuery, EventSink, UpsertOutcome};
pub use state::{StateEvent, SubscriptionState};
pub use types::{ChainEvent, EventKey, RawLog};
