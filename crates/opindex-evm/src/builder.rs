//! Fluent builder API for creating an EntryPoint indexer.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use opindex_evm::IndexerBuilder;
//! use opindex_storage::InMemoryStorage;
//!
//! # async fn demo() -> Result<(), opindex_core::IndexerError> {
//! let storage = Arc::new(InMemoryStorage::new());
//! let orchestrator = IndexerBuilder::new()
//!     .rpc_url("https://eth.llamarpc.com")
//!     .ws_url("wss://eth.llamarpc.com")
//!     .start_block(19_000_000)
//!     .batch_size(500)
//!     .build(storage.clone(), storage)?;
//! orchestrator.run().await
//! # }
//! ```

use std::sync::Arc;

use opindex_core::checkpoint::CheckpointStore;
use opindex_core::error::IndexerError;
use opindex_core::indexer::IndexerConfig;
use opindex_core::sink::EventSink;

use crate::client::{EvmClientConfig, EvmClientFactory};
use crate::orchestrator::Orchestrator;

/// Fluent builder for [`IndexerConfig`] plus the EVM endpoint settings.
#[derive(Debug, Clone, Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
    client: EvmClientConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the indexer ID (used as the checkpoint key).
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.config.id = id.into();
        self
    }

    /// Set the EntryPoint contract to index.
    pub fn contract(mut self, address: impl Into<String>) -> Self {
        self.config.contract_address = address.into();
        self
    }

    /// Set the first block to index when no checkpoint exists.
    pub fn start_block(mut self, block: u64) -> Self {
        self.config.start_block = block;
        self
    }

    /// Set the number of blocks per `eth_getLogs` batch.
    pub fn batch_size(mut self, size: u64) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn confirmation_depth(mut self, depth: u64) -> Self {
        self.config.confirmation_depth = depth;
        self
    }

    /// Delay before retrying a lost or failed subscription.
    pub fn reconnect_interval_ms(mut self, ms: u64) -> Self {
        self.config.reconnect_interval_ms = ms;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.channel_capacity = capacity;
        self
    }

    pub fn rpc_url(mut self, url: impl Into<String>) -> Self {
        self.client.rpc_url = url.into();
        self
    }

    /// Stream live logs over `eth_subscribe` instead of HTTP filter polling.
    pub fn ws_url(mut self, url: impl Into<String>) -> Self {
        self.client.ws_url = Some(url.into());
        self
    }

    /// Set the HTTP filter polling interval in milliseconds.
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.client.poll_interval_ms = ms;
        self
    }

    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.client.request_timeout_ms = ms;
        self
    }

    /// Build the `IndexerConfig`.
    pub fn build_config(&self) -> IndexerConfig {
        self.config.clone()
    }

    pub fn client_config(&self) -> &EvmClientConfig {
        &self.client
    }

    /// Validate everything and assemble an [`Orchestrator`] on `sink` and
    /// `checkpoints`.
    pub fn build(
        self,
        sink: Arc<dyn EventSink>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Result<Orchestrator, IndexerError> {
        let factory = EvmClientFactory::new(self.client, &self.config.contract_address)?;
        Orchestrator::new(self.config, Arc::new(factory), sink, checkpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opindex_core::DEFAULT_ENTRYPOINT;
    use opindex_storage::InMemoryStorage;

    #[test]
    fn builder_defaults() {
        let b = IndexerBuilder::new();
        let cfg = b.build_config();
        assert_eq!(cfg.contract_address, DEFAULT_ENTRYPOINT);
        assert_eq!(cfg.start_block, 0);
        assert_eq!(cfg.batch_size, 1000);
        assert_eq!(cfg.reconnect_interval_ms, 30_000);
        assert!(b.client_config().ws_url.is_none());
    }

    #[test]
    fn builder_custom() {
        let b = IndexerBuilder::new()
            .id("mainnet")
            .start_block(19_000_000)
            .batch_size(500)
            .confirmation_depth(2)
            .reconnect_interval_ms(5_000)
            .rpc_url("https://rpc.example")
            .ws_url("wss://rpc.example");

        let cfg = b.build_config();
        assert_eq!(cfg.id, "mainnet");
        assert_eq!(cfg.start_block, 19_000_000);
        assert_eq!(cfg.batch_size, 500);
        assert_eq!(cfg.confirmation_depth, 2);
        assert_eq!(cfg.reconnect_interval_ms, 5_000);
        assert_eq!(b.client_config().ws_url.as_deref(), Some("wss://rpc.example"));
    }

    #[test]
    fn build_rejects_bad_contract() {
        let store = Arc::new(InMemoryStorage::new());
        let res = IndexerBuilder::new()
            .contract("0x1234")
            .build(store.clone(), store);
        assert!(matches!(res, Err(IndexerError::Config(_))));
    }

    #[test]
    fn build_rejects_bad_endpoint() {
        let store = Arc::new(InMemoryStorage::new());
        let res = IndexerBuilder::new()
            .rpc_url("localhost:8545")
            .build(store.clone(), store);
        assert!(matches!(res, Err(IndexerError::Config(_))));
    }
}
