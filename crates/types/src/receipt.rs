//! Execution results: logs, receipts, and the per-transaction outcome the
//! processor leaves behind in the execution context.

use serde::{Deserialize, Serialize};

use crate::address::{Address, Hash};

/// One log record emitted during transaction execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Hash>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data: Vec<u8>,
}

/// Receipt of a single executed transaction.
///
/// Compared field-by-field against recorded ground truth by the
/// transaction validator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub status: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bloom: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<Log>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<Address>,
    pub gas_used: u64,
}

/// What the transaction processor produced for the most recent transaction.
///
/// `output`/`error` carry the raw result of read-style executions (RPC
/// replay); `receipt` carries the result of state-transition executions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionOutcome {
    pub receipt: Option<Receipt>,
    pub output: Option<Vec<u8>>,
    pub error: Option<String>,
    pub gas_used: u64,
}

impl TransactionOutcome {
    /// Outcome of a successful execution returning raw bytes.
    pub fn from_output(output: Vec<u8>) -> Self {
        Self {
            output: Some(output),
            ..Default::default()
        }
    }

    /// Outcome of an execution that failed inside the engine.
    pub fn from_error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    /// Outcome of a state-transition execution with a receipt.
    pub fn from_receipt(receipt: Receipt) -> Self {
        let gas_used = receipt.gas_used;
        Self {
            receipt: Some(receipt),
            gas_used,
            ..Default::default()
        }
    }
}
