//! `UserOperationEvent` log decoder.
//!
//! ```text
//! event UserOperationEvent(
//!     bytes32 indexed userOpHash,
//!     address indexed sender,
//!     address indexed paymaster,
//!     uint256 nonce,
//!     bool success,
//!     uint256 actualGasCost,
//!     uint256 actualGasUsed
//! );
//! ```
//!
//! Indexed fields sit in `topics[1..=3]`; the four remaining fields are the
//! ABI-encoded data payload (four static 32-byte words).

use alloy_core::dyn_abi::{DynSolType, DynSolValue};
use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};

use opindex_core::error::IndexerError;
use opindex_core::types::{ChainEvent, RawLog};

/// Canonical event signature.
pub const USER_OPERATION_EVENT_SIGNATURE: &str =
    "UserOperationEvent(bytes32,address,address,uint256,bool,uint256,uint256)";

const DATA_WORDS: usize = 4;

/// `keccak256` of [`USER_OPERATION_EVENT_SIGNATURE`], `0x`-prefixed lowercase hex.
pub fn user_operation_topic() -> String {
    format!("0x{}", hex::encode(keccak256(USER_OPERATION_EVENT_SIGNATURE.as_bytes())))
}

fn keccak256(data: &[u8]) -> [u8; 32] {
    use tiny_keccak::{Hasher, Keccak};
    let mut k = Keccak::v256();
    k.update(data);
    let mut out = [0u8; 32];
    k.finalize(&mut out);
    out
}

/// Decodes raw logs of one contract into [`ChainEvent`]s.
#[derive(Debug, Clone)]
pub struct UserOperationDecoder {
    contract: Address,
    topic0: B256,
}

impl UserOperationDecoder {
    /// Create a decoder for logs emitted by `contract`.
    pub fn new(contract: &str) -> Result<Self, IndexerError> {
        let contract: Address = contract
            .parse()
            .map_err(|e| IndexerError::Config(format!("invalid contract address {contract}: {e}")))?;
        Ok(Self {
            contract,
            topic0: B256::from(keccak256(USER_OPERATION_EVENT_SIGNATURE.as_bytes())),
        })
    }

    /// The watched contract, EIP-55 checksummed.
    pub fn contract(&self) -> String {
        self.contract.to_checksum(None)
    }

    /// `topic0` as `0x`-prefixed lowercase hex.
    pub fn topic0(&self) -> String {
        format!("{:#x}", self.topic0)
    }

    /// The `eth_getLogs` / `eth_subscribe` / `eth_newFilter` filter object
    /// without block bounds.
    pub fn log_filter(&self) -> serde_json::Value {
        serde_json::json!({
            "address": self.contract(),
            "topics": [self.topic0()],
        })
    }

    /// Decode one log. `indexed_at` is stamped onto the event.
    pub fn decode(&self, log: &RawLog, indexed_at: DateTime<Utc>) -> Result<ChainEvent, IndexerError> {
        if log.is_removed() {
            return Err(IndexerError::Decode("log was removed by a reorg".into()));
        }

        let emitter: Address = log
            .address
            .parse()
            .map_err(|e| IndexerError::Decode(format!("bad log address {}: {e}", log.address)))?;
        if emitter != self.contract {
            return Err(IndexerError::Decode(format!(
                "log emitted by {}, expected {}",
                emitter.to_checksum(None),
                self.contract()
            )));
        }

        if log.topics.len() != 4 {
            return Err(IndexerError::Decode(format!(
                "expected 4 topics, got {}",
                log.topics.len()
            )));
        }
        let topics = log
            .topics
            .iter()
            .map(|t| parse_word(t))
            .collect::<Result<Vec<B256>, _>>()?;
        if topics[0] != self.topic0 {
            return Err(IndexerError::Decode(format!(
                "topic0 {:#x} is not UserOperationEvent",
                topics[0]
            )));
        }

        let block_number = log
            .block_number_u64()
            .ok_or_else(|| IndexerError::Decode("missing or malformed blockNumber".into()))?;
        let log_index = log
            .log_index_u64()
            .ok_or_else(|| IndexerError::Decode("missing or malformed logIndex".into()))?;
        let tx_hash = log
            .tx_hash
            .as_deref()
            .ok_or_else(|| IndexerError::Decode("missing transactionHash".into()))
            .and_then(parse_word)?;

        let data = hex_bytes(&log.data)?;
        if data.len() != DATA_WORDS * 32 {
            return Err(IndexerError::Decode(format!(
                "expected {} data bytes, got {}",
                DATA_WORDS * 32,
                data.len()
            )));
        }
        let tuple = DynSolType::Tuple(vec![
            DynSolType::Uint(256),
            DynSolType::Bool,
            DynSolType::Uint(256),
            DynSolType::Uint(256),
        ]);
        let values = match tuple
            .abi_decode(&data)
            .map_err(|e| IndexerError::Decode(format!("abi decode failed: {e}")))?
        {
            DynSolValue::Tuple(values) => values,
            other => vec![other],
        };
        let (nonce, success, gas_cost, gas_used) = match values.as_slice() {
            [DynSolValue::Uint(nonce, _), DynSolValue::Bool(success), DynSolValue::Uint(cost, _), DynSolValue::Uint(used, _)] => {
                (nonce.to_string(), *success, cost.to_string(), used.to_string())
            }
            _ => return Err(IndexerError::Decode("unexpected data layout".into())),
        };

        Ok(ChainEvent {
            operation_hash: format!("{:#x}", topics[1]),
            sender: word_to_address(&topics[2])?.to_checksum(None),
            paymaster: word_to_address(&topics[3])?.to_checksum(None),
            nonce,
            success,
            actual_gas_cost: gas_cost,
            actual_gas_used: gas_used,
            block_number,
            transaction_hash: format!("{tx_hash:#x}"),
            log_index,
            indexed_at,
        })
    }
}

fn hex_bytes(s: &str) -> Result<Vec<u8>, IndexerError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(|e| IndexerError::Decode(format!("invalid hex: {e}")))
}

fn parse_word(s: &str) -> Result<B256, IndexerError> {
    let bytes = hex_bytes(s)?;
    if bytes.len() != 32 {
        return Err(IndexerError::Decode(format!(
            "expected 32-byte word, got {} bytes",
            bytes.len()
        )));
    }
    Ok(B256::from_slice(&bytes))
}

/// An indexed address topic: 12 zero bytes followed by the address.
fn word_to_address(word: &B256) -> Result<Address, IndexerError> {
    if word[..12].iter().any(|b| *b != 0) {
        return Err(IndexerError::Decode(format!("topic {word:#x} is not an address")));
    }
    Ok(Address::from_word(*word))
}
