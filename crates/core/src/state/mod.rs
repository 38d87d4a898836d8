//! State-database capability traits.
//!
//! Concrete storage engines live outside this crate; the harness only
//! depends on the contract below. Handles use interior mutability (all
//! methods take `&self`), so a live database can be shared between the
//! synchronous main loop and the background inquirer without the harness
//! imposing its own locking.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use replay_harness_types::{Address, Hash, StorageKey, StorageValue, WorldState};

use crate::config::Config;

mod db_info;

pub use db_info::{read_db_info, rename_with_block, write_db_info, DbInfo, DB_INFO_FILE};

/// Per-account read/write primitives shared by live databases and archive
/// snapshots.
pub trait VmState: Send + Sync {
    fn exist(&self, addr: &Address) -> bool;
    fn create_account(&self, addr: &Address);

    fn balance(&self, addr: &Address) -> u128;
    fn add_balance(&self, addr: &Address, value: u128);
    fn sub_balance(&self, addr: &Address, value: u128);

    fn nonce(&self, addr: &Address) -> u64;
    fn set_nonce(&self, addr: &Address, nonce: u64);

    fn code(&self, addr: &Address) -> Vec<u8>;
    fn set_code(&self, addr: &Address, code: Vec<u8>);

    fn storage(&self, addr: &Address, key: &StorageKey) -> StorageValue;
    fn set_storage(&self, addr: &Address, key: StorageKey, value: StorageValue);

    /// The allocation touched by the current transaction, as the engine
    /// would record it into a substate.
    fn substate_post_alloc(&self) -> WorldState;
}

/// A mutable ledger advancing with the replayed chain head.
pub trait StateDb: VmState {
    fn begin_sync_period(&self, number: u64);
    fn end_sync_period(&self);

    fn begin_block(&self, number: u64) -> Result<()>;
    fn end_block(&self) -> Result<()>;

    fn begin_transaction(&self, number: u32) -> Result<()>;
    fn end_transaction(&self) -> Result<()>;

    /// Current state-root hash.
    fn state_hash(&self) -> Result<Hash>;

    /// Finalize pending writes and return the resulting root.
    fn commit(&self, delete_empty_objects: bool) -> Result<Hash>;

    fn close(&self) -> Result<()>;

    /// Consistent read-only snapshot of the state right after `block`.
    fn archive_state(&self, block: u64) -> Result<Box<dyn ArchiveState>>;

    /// Highest block available in the archive, or `None` while the archive
    /// is still empty.
    fn archive_block_height(&self) -> Result<Option<u64>>;

    /// Divergence detected by a write-mirroring shadow wrapper, if any.
    /// Plain databases report `None`.
    fn shadow_divergence(&self) -> Option<String> {
        None
    }
}

/// A released-on-demand historical snapshot obtained from [`StateDb::archive_state`].
pub trait ArchiveState: VmState {
    fn state_hash(&self) -> Result<Hash>;

    fn begin_transaction(&self, number: u32) -> Result<()>;
    fn end_transaction(&self) -> Result<()>;

    /// Return the snapshot to the database. Must be called exactly once.
    fn release(&self) -> Result<()>;
}

/// How the database manager obtains a working database for a run.
pub trait StateDbFactory: Send + Sync {
    /// Open (or create) the database selected by the configuration and
    /// return it together with its working directory.
    fn open(&self, cfg: &Config) -> Result<(Arc<dyn StateDb>, PathBuf)>;
}

/// Auxiliary store of recorded canonical state roots, keyed by block.
///
/// Absence of a block's hash is not an error; validators warn and skip.
pub trait HashStore: Send + Sync {
    fn state_hash(&self, block: u64) -> Result<Option<Hash>>;
}

/// Simple in-memory [`HashStore`], filled from recorded fixtures.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHashStore {
    hashes: std::collections::BTreeMap<u64, Hash>,
}

impl InMemoryHashStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, block: u64, hash: Hash) {
        self.hashes.insert(block, hash);
    }
}

impl FromIterator<(u64, Hash)> for InMemoryHashStore {
    fn from_iter<I: IntoIterator<Item = (u64, Hash)>>(iter: I) -> Self {
        Self {
            hashes: iter.into_iter().collect(),
        }
    }
}

impl HashStore for InMemoryHashStore {
    fn state_hash(&self, block: u64) -> Result<Option<Hash>> {
        Ok(self.hashes.get(&block).copied())
    }
}
