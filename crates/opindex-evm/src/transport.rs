//! Request/response JSON-RPC transport.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use opindex_core::error::IndexerError;

use crate::rpc::{JsonRpcRequest, JsonRpcResponse};

/// Sends one JSON-RPC call and returns its `result`.
///
/// Every failure (network, timeout, HTTP status, JSON-RPC error object) is
/// reported as [`IndexerError::Transient`]; a response that cannot be parsed
/// is [`IndexerError::Protocol`]. No retries happen at this layer.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, IndexerError>;
}

/// HTTP JSON-RPC transport backed by `reqwest`.
pub struct HttpTransport {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, IndexerError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, IndexerError> {
        let req = JsonRpcRequest::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);

        let resp = self
            .http
            .post(&self.url)
            .json(&req)
            .send()
            .await
            .map_err(|e| IndexerError::Transient(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(IndexerError::Transient(format!("{method}: HTTP {status}: {body}")));
        }

        let resp: JsonRpcResponse = resp
            .json()
            .await
            .map_err(|e| IndexerError::Protocol(format!("{method}: bad response body: {e}")))?;

        resp.into_result()
            .map_err(|e| IndexerError::Transient(format!("{method}: {e}")))
    }
}
