//! Replay payloads: the data attached to each step of a replay run.
//!
//! The executor and its extensions are generic over [`ReplayPayload`], so the
//! same dispatch machinery drives both substate replay (state transitions
//! with recorded pre/post states) and RPC replay (recorded request/response
//! pairs re-executed against historical state).

use serde::{Deserialize, Serialize};

use crate::account::WorldState;
use crate::receipt::Receipt;

/// The seam between the generic executor and a concrete recording format.
///
/// Implementations expose only the parts validators read; payloads without a
/// given aspect return `None` and the corresponding validation is skipped.
pub trait ReplayPayload: Clone + Send + Sync + 'static {
    /// Recorded world state the transaction consumed.
    fn input_state(&self) -> Option<&WorldState> {
        None
    }

    /// Recorded world state the transaction produced.
    fn output_state(&self) -> Option<&WorldState> {
        None
    }

    /// Recorded receipt of the transaction.
    fn expected_receipt(&self) -> Option<&Receipt> {
        None
    }

    /// Recorded gas consumption, for throughput accounting.
    fn gas_used(&self) -> u64 {
        0
    }
}

/// Recorded ground truth for one historical transaction: the account states
/// it read, the account states it left behind, and its execution result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substate {
    pub input: WorldState,
    pub output: WorldState,
    pub receipt: Receipt,
}

impl ReplayPayload for Substate {
    fn input_state(&self) -> Option<&WorldState> {
        Some(&self.input)
    }

    fn output_state(&self) -> Option<&WorldState> {
        Some(&self.output)
    }

    fn expected_receipt(&self) -> Option<&Receipt> {
        Some(&self.receipt)
    }

    fn gas_used(&self) -> u64 {
        self.receipt.gas_used
    }
}

/// The query half of a recorded RPC exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcQuery {
    /// Full method name, e.g. `eth_getBalance`.
    pub method: String,
    /// Method without its namespace prefix, e.g. `getBalance`.
    pub method_base: String,
    pub params: Vec<serde_json::Value>,
}

/// A successful recorded response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// JSON-encoded result, typically a hex string.
    pub result: serde_json::Value,
}

/// A recorded JSON-RPC error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// One recorded RPC request together with what the recorder observed:
/// either a response or an error, never both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcExchange {
    pub query: RpcQuery,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<RpcResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Block the request was evaluated against.
    pub requested_block: u64,
    /// Block at which the recorder captured the exchange.
    pub recorded_block: u64,
    /// Set by the recorder for exchanges known not to be comparable
    /// (e.g. pending-block queries).
    #[serde(default)]
    pub skip_validation: bool,
}

impl ReplayPayload for RpcExchange {}
