//! Shared types for the replay-harness workspace.
//!
//! This crate provides foundational types used across multiple crates in the
//! workspace, breaking circular dependency chains.
//!
//! ## Ledger Types
//!
//! The [`address`] module contains fixed-width identifiers ([`Address`],
//! [`Hash`]) and the [`account`] module the world-state model
//! ([`Account`], [`WorldState`]) that validators compare against recorded
//! ground truth.
//!
//! ## Payload Types
//!
//! The [`payload`] module defines the [`ReplayPayload`] seam the executor is
//! generic over, together with its two concrete carriers:
//! - [`Substate`] - a recorded pre/post state snapshot plus execution result
//!   for one transaction
//! - [`RpcExchange`] - a recorded RPC request/response pair

pub mod account;
pub mod address;
pub mod payload;
pub mod receipt;

// Re-export commonly used types at crate root
pub use account::{Account, WorldState};
pub use address::{Address, Hash, StorageKey, StorageValue};
pub use payload::{ReplayPayload, RpcError, RpcExchange, RpcQuery, RpcResponse, Substate};
pub use receipt::{Log, Receipt, TransactionOutcome};
