//! Indexer configuration.

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::types::is_address;

/// EntryPoint v0.7 deployment address (identical on every EVM chain).
pub const DEFAULT_ENTRYPOINT: &str = "0x0000000071727De22E5E9d8BAf0edAc6f37da032";

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Unique name for this indexer (used as the checkpoint key).
    pub id: String,
    /// Contract whose `UserOperationEvent` logs are indexed.
    pub contract_address: String,
    /// First block to index when no checkpoint exists.
    pub start_block: u64,
    /// Blocks per `eth_getLogs` call during backfill.
    pub batch_size: u64,
    /// Blocks behind the head that backfill leaves to the live feed.
    /// Zero indexes up to the reported head.
    pub confirmation_depth: u64,
    /// Fixed delay between a lost or failed subscription and the next attempt.
    pub reconnect_interval_ms: u64,
    /// Capacity of the decoded-event channel in front of the sink writer.
    pub channel_capacity: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            id: "entrypoint-v07".into(),
            contract_address: DEFAULT_ENTRYPOINT.into(),
            start_block: 0,
            batch_size: 1000,
            confirmation_depth: 0,
            reconnect_interval_ms: 30_000,
            channel_capacity: 1024,
        }
    }
}

impl IndexerConfig {
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.id.trim().is_empty() {
            return Err(IndexerError::Config("indexer id must not be empty".into()));
        }
        if !is_address(&self.contract_address) {
            return Err(IndexerError::Config(format!(
                "invalid contract address: {}",
                self.contract_address
            )));
        }
        if self.batch_size == 0 {
            return Err(IndexerError::Config("batch_size must be at least 1".into()));
        }
        if self.reconnect_interval_ms == 0 {
            return Err(IndexerError::Config(
                "reconnect_interval_ms must be greater than zero".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(IndexerError::Config(
                "channel_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn reconnect_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reconnect_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = IndexerConfig::default();
        assert_eq!(cfg.batch_size, 1000);
        assert_eq!(cfg.reconnect_interval().as_secs(), 30);
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_bad_contract_address() {
        let cfg = IndexerConfig {
            contract_address: "0x71727De22E5E9d8BAf0edAc6f37da032".into(),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn rejects_zero_batch_and_interval() {
        let cfg = IndexerConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = IndexerConfig {
            reconnect_interval_ms: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: IndexerConfig =
            serde_json::from_str(r#"{"start_block": 19000000, "batch_size": 500}"#).unwrap();
        assert_eq!(cfg.start_block, 19_000_000);
        assert_eq!(cfg.batch_size, 500);
        assert_eq!(cfg.contract_address, DEFAULT_ENTRYPOINT);
    }
}
