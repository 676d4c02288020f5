//! Equality filters over stored `UserOperationEvent` records.
//!
//! Every set field must match. Addresses compare case-insensitively, all other
//! fields exactly. `validate` applies the request checks a query front end
//! performs before touching the store.

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;
use crate::types::{is_address, is_hash32, ChainEvent};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOpFilter {
    pub user_op_hash: Option<String>,
    pub sender: Option<String>,
    pub paymaster: Option<String>,
    pub success: Option<bool>,
    pub block_number: Option<u64>,
    pub nonce: Option<String>,
    pub actual_gas_cost: Option<String>,
    pub actual_gas_used: Option<String>,
    pub transaction_hash: Option<String>,
    /// Matches `indexedAt` in its stored RFC 3339 form.
    pub timestamp: Option<String>,
}

impl UserOpFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn paymaster(mut self, paymaster: impl Into<String>) -> Self {
        self.paymaster = Some(paymaster.into());
        self
    }

    pub fn user_op_hash(mut self, hash: impl Into<String>) -> Self {
        self.user_op_hash = Some(hash.into());
        self
    }

    pub fn transaction_hash(mut self, hash: impl Into<String>) -> Self {
        self.transaction_hash = Some(hash.into());
        self
    }

    pub fn success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    pub fn block_number(mut self, block: u64) -> Self {
        self.block_number = Some(block);
        self
    }

    /// Reject malformed addresses and transaction hashes.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if let Some(sender) = &self.sender {
            if !is_address(sender) {
                return Err(IndexerError::Config("Invalid sender address format".into()));
            }
        }
        if let Some(paymaster) = &self.paymaster {
            if !is_address(paymaster) {
                return Err(IndexerError::Config("Invalid paymaster address format".into()));
            }
        }
        if let Some(tx) = &self.transaction_hash {
            if !is_hash32(tx) {
                return Err(IndexerError::Config("Invalid transaction hash format".into()));
            }
        }
        Ok(())
    }

    /// Returns `true` if no field is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Evaluate the filter against one event.
    pub fn matches(&self, event: &ChainEvent) -> bool {
        fn eq<T: PartialEq>(want: &Option<T>, got: &T) -> bool {
            want.as_ref().map_or(true, |w| w == got)
        }
        fn eq_ci(want: &Option<String>, got: &str) -> bool {
            want.as_deref().map_or(true, |w| w.eq_ignore_ascii_case(got))
        }

        eq(&self.user_op_hash, &event.operation_hash)
            && eq_ci(&self.sender, &event.sender)
            && eq_ci(&self.paymaster, &event.paymaster)
            && eq(&self.success, &event.success)
            && eq(&self.block_number, &event.block_number)
            && eq(&self.nonce, &event.nonce)
            && eq(&self.actual_gas_cost, &event.actual_gas_cost)
            && eq(&self.actual_gas_used, &event.actual_gas_used)
            && eq(&self.transaction_hash, &event.transaction_hash)
            && eq(&self.timestamp, &event.indexed_at_string())
    }
}
