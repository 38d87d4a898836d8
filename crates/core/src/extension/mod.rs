//! Lifecycle and validation extensions for the executor.
//!
//! The [`statedb`] module manages the database across the run: opening and
//! disposing it, forwarding scope events, emitting sync periods, preparing
//! archive snapshots, and stress-querying the archive in the background.
//! The [`validator`] module compares execution against recorded ground
//! truth: state roots, world states, RPC responses, and shadow databases.

pub mod statedb;
pub mod validator;

pub use statedb::{
    ArchiveDbBlockChecker, ArchiveInquirer, ArchivePrepper, BlockEventEmitter,
    LiveDbBlockChecker, StateDbManager, SyncPeriodEmitter, TransactionEventEmitter,
};
pub use validator::{
    ArchiveDbValidator, LiveDbValidator, RpcComparator, ShadowDbValidator, StateHashValidator,
    ValidateTxTarget,
};
