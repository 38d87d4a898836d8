//! Replay and validation harness for pluggable state-database backends.
//!
//! The harness replays recorded chain history against a state database and
//! validates what the database produces along the way: per-transaction world
//! states, per-block state roots, recorded RPC responses, and agreement
//! between shadowed database implementations.
//!
//! The heavy lifting lives in [`replay_harness_core`]: a lifecycle driver
//! dispatching hooks to an ordered extension chain around an external
//! transaction processor. This crate assembles the extension chains for the
//! two supported replay modes and funnels their non-fatal errors into the
//! log:
//!
//! - [`run_substates`] replays recorded transaction substates on the live
//!   database, with optional archive stress-querying in the background.
//! - [`run_rpc_sessions`] replays recorded RPC exchanges against archive
//!   snapshots and compares the responses.

pub mod runner;

pub use runner::{run_rpc_sessions, run_substates};

pub use replay_harness_core::{
    Config, Context, Executor, Extension, Params, Processor, Provider, State,
    StateValidationMode, TransactionInfo,
};
pub use replay_harness_types::{
    Account, Address, Hash, Receipt, ReplayPayload, RpcExchange, Substate, TransactionOutcome,
    WorldState,
};
