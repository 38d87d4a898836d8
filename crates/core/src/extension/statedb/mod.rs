//! Extensions tying the state database to the replay lifecycle.

mod archive_inquirer;
mod archive_prepper;
mod block_checker;
mod manager;
mod scope_emitter;
mod sync_period;

pub use archive_inquirer::ArchiveInquirer;
pub use archive_prepper::{ArchivePrepper, ArchiveScope};
pub use block_checker::{ArchiveDbBlockChecker, LiveDbBlockChecker};
pub use manager::StateDbManager;
pub use scope_emitter::{BlockEventEmitter, TransactionEventEmitter};
pub use sync_period::SyncPeriodEmitter;
