//! EVM implementation of [`ChainClient`] and its factory.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use opindex_core::client::{check_range, ChainClient, ChainClientFactory, LogSubscription};
use opindex_core::error::IndexerError;
use opindex_core::types::{parse_hex_u64, to_hex_quantity, RawLog};

use crate::decoder::UserOperationDecoder;
use crate::transport::{HttpTransport, RpcTransport};
use crate::{poll, ws};

/// Endpoint settings for the EVM chain client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvmClientConfig {
    /// HTTP JSON-RPC endpoint used for `eth_blockNumber` / `eth_getLogs`.
    pub rpc_url: String,
    /// WebSocket endpoint for `eth_subscribe`. Without one, live logs are
    /// polled through an HTTP log filter.
    pub ws_url: Option<String>,
    /// Filter polling interval when no WebSocket endpoint is configured.
    pub poll_interval_ms: u64,
    /// Per-request timeout; also bounds the WebSocket handshake.
    pub request_timeout_ms: u64,
    /// Buffered logs per live subscription.
    pub subscription_buffer: usize,
}

impl Default for EvmClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8545".into(),
            ws_url: None,
            poll_interval_ms: 2_000,
            request_timeout_ms: 30_000,
            subscription_buffer: 512,
        }
    }
}

impl EvmClientConfig {
    pub fn validate(&self) -> Result<(), IndexerError> {
        if !(self.rpc_url.starts_with("http://") || self.rpc_url.starts_with("https://")) {
            return Err(IndexerError::Config(format!(
                "rpc_url must be http(s): {}",
                self.rpc_url
            )));
        }
        if let Some(ws) = &self.ws_url {
            if !(ws.starts_with("ws://") || ws.starts_with("wss://")) {
                return Err(IndexerError::Config(format!("ws_url must be ws(s): {ws}")));
            }
        }
        if self.poll_interval_ms == 0 || self.request_timeout_ms == 0 {
            return Err(IndexerError::Config(
                "poll_interval_ms and request_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

// ─── EvmChainClient ───────────────────────────────────────────────────────────

/// Chain client for one contract's `UserOperationEvent` logs.
pub struct EvmChainClient {
    transport: Arc<dyn RpcTransport>,
    filter: Value,
    config: EvmClientConfig,
}

impl EvmChainClient {
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        decoder: &UserOperationDecoder,
        config: EvmClientConfig,
    ) -> Self {
        Self {
            transport,
            filter: decoder.log_filter(),
            config,
        }
    }

    fn ranged_filter(&self, from: u64, to: u64) -> Value {
        let mut filter = self.filter.clone();
        filter["fromBlock"] = json!(to_hex_quantity(from));
        filter["toBlock"] = json!(to_hex_quantity(to));
        filter
    }
}

#[async_trait]
impl ChainClient for EvmChainClient {
    async fn current_height(&self) -> Result<u64, IndexerError> {
        let v = self.transport.call("eth_blockNumber", vec![]).await?;
        v.as_str()
            .and_then(parse_hex_u64)
            .ok_or_else(|| IndexerError::Protocol(format!("eth_blockNumber returned {v}")))
    }

    async fn query_range(&self, from: u64, to: u64) -> Result<Vec<RawLog>, IndexerError> {
        check_range(from, to)?;
        let v = self
            .transport
            .call("eth_getLogs", vec![self.ranged_filter(from, to)])
            .await?;
        let logs: Vec<RawLog> = serde_json::from_value(v)
            .map_err(|e| IndexerError::Protocol(format!("malformed eth_getLogs result: {e}")))?;
        debug!(from, to, count = logs.len(), "eth_getLogs");
        Ok(logs)
    }

    async fn subscribe(&self) -> Result<LogSubscription, IndexerError> {
        match &self.config.ws_url {
            Some(url) => {
                ws::subscribe(
                    url,
                    self.filter.clone(),
                    self.config.subscription_buffer,
                    self.config.request_timeout(),
                )
                .await
            }
            None => {
                poll::subscribe(
                    self.transport.clone(),
                    self.filter.clone(),
                    Duration::from_millis(self.config.poll_interval_ms),
                    self.config.subscription_buffer,
                )
                .await
            }
        }
    }
}

// ─── Factory ──────────────────────────────────────────────────────────────────

/// Builds a fresh [`EvmChainClient`] (new HTTP connection pool) per connect.
pub struct EvmClientFactory {
    config: EvmClientConfig,
    decoder: UserOperationDecoder,
}

impl EvmClientFactory {
    pub fn new(config: EvmClientConfig, contract: &str) -> Result<Self, IndexerError> {
        config.validate()?;
        Ok(Self {
            decoder: UserOperationDecoder::new(contract)?,
            config,
        })
    }
}

#[async_trait]
impl ChainClientFactory for EvmClientFactory {
    async fn connect(&self) -> Result<Arc<dyn ChainClient>, IndexerError> {
        let transport = HttpTransport::new(&self.config.rpc_url, self.config.request_timeout())?;
        Ok(Arc::new(EvmChainClient::new(
            Arc::new(transport),
            &self.decoder,
            self.config.clone(),
        )))
    }
}
