//! Execution orchestration core for the replay-harness workspace.
//!
//! The crate is organized around a hook-based lifecycle driver:
//!
//! - [`executor`] - the driver that walks a block range and dispatches
//!   `PreRun`/`PreBlock`/`PreTransaction`/... hooks to an ordered extension
//!   chain around an external transaction processor.
//! - [`state`] - the capability traits a pluggable state database must
//!   satisfy (live scoping, hash retrieval, archive snapshots, per-account
//!   primitives), plus the on-disk side-car record used to resume runs.
//! - [`extension`] - the lifecycle and validation extensions: database
//!   manager, scope emitters, block-range checkers, the state-hash /
//!   world-state / RPC-response / shadow validators, and the background
//!   archive inquirer.
//! - [`config`] - the explicit configuration value passed by reference into
//!   every constructor; no process-wide mutable state exists.

pub mod config;
pub mod executor;
pub mod extension;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Config, StateValidationMode};
pub use executor::{Context, Executor, Extension, Params, Processor, Provider, State, TransactionInfo};
