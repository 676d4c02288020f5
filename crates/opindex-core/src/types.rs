//! Shared types for the indexing pipeline.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// ─── RawLog ───────────────────────────────────────────────────────────────────

/// A raw EVM log as returned by `eth_getLogs`, `eth_getFilterChanges`
/// or an `eth_subscribe("logs")` notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    #[serde(rename = "blockNumber")]
    pub block_number: Option<String>,
    #[serde(rename = "blockHash", default)]
    pub block_hash: Option<String>,
    #[serde(rename = "transactionHash")]
    pub tx_hash: Option<String>,
    #[serde(rename = "logIndex")]
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Block number as u64, `None` for pending or malformed logs.
    pub fn block_number_u64(&self) -> Option<u64> {
        self.block_number.as_deref().and_then(parse_hex_u64)
    }

    /// Log index as u64, `None` for pending or malformed logs.
    pub fn log_index_u64(&self) -> Option<u64> {
        self.log_index.as_deref().and_then(parse_hex_u64)
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

// ─── ChainEvent ───────────────────────────────────────────────────────────────

/// Identity of one event occurrence: `(transactionHash, logIndex)`.
///
/// The operation hash alone is not unique; retried bundles can emit it again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub transaction_hash: String,
    pub log_index: u64,
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.transaction_hash, self.log_index)
    }
}

/// One decoded `UserOperationEvent` occurrence. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEvent {
    /// `userOpHash` (`0x` + 64 lowercase hex chars).
    #[serde(rename = "userOpHash")]
    pub operation_hash: String,
    /// EIP-55 checksummed sender address.
    pub sender: String,
    /// EIP-55 checksummed paymaster address; may be the zero address.
    pub paymaster: String,
    /// uint256 as a decimal string.
    pub nonce: String,
    pub success: bool,
    /// uint256 as a decimal string.
    pub actual_gas_cost: String,
    /// uint256 as a decimal string.
    pub actual_gas_used: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u64,
    /// Processing time, not chain time.
    #[serde(rename = "timestamp")]
    pub indexed_at: DateTime<Utc>,
}

impl ChainEvent {
    pub fn key(&self) -> EventKey {
        EventKey {
            transaction_hash: self.transaction_hash.clone(),
            log_index: self.log_index,
        }
    }

    /// `indexed_at` in the form stored and matched by the query layer
    /// (RFC 3339, UTC, millisecond precision).
    pub fn indexed_at_string(&self) -> String {
        format_timestamp(&self.indexed_at)
    }
}

/// Format a timestamp the way the stores persist it.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ─── Hex helpers ──────────────────────────────────────────────────────────────

/// Parse a hex quantity (with or without `0x`) to u64.
pub fn parse_hex_u64(s: &str) -> Option<u64> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

/// Format a block number as a JSON-RPC hex quantity.
pub fn to_hex_quantity(n: u64) -> String {
    format!("0x{n:x}")
}

/// `^0x[a-fA-F0-9]{len}$`
pub fn is_prefixed_hex(s: &str, len: usize) -> bool {
    match s.strip_prefix("0x") {
        Some(hex) => hex.len() == len && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// `^0x[a-fA-F0-9]{40}$`
pub fn is_address(s: &str) -> bool {
    is_prefixed_hex(s, 40)
}

/// `^0x[a-fA-F0-9]{64}$`
pub fn is_hash32(s: &str) -> bool {
    is_prefixed_hex(s, 64)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
