//! In-memory state database and processors shared by the integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use replay_harness_core::state::{ArchiveState, StateDb, StateDbFactory, VmState};
use replay_harness_core::{Config, Context, Processor, State};
use replay_harness_types::{
    Account, Address, Hash, RpcExchange, StorageKey, StorageValue, Substate,
    TransactionOutcome, WorldState,
};

pub fn address(n: u8) -> Address {
    let mut raw = [0u8; 20];
    raw[19] = n;
    Address(raw)
}

fn fnv(mut h: u64, bytes: &[u8]) -> u64 {
    for b in bytes {
        h = (h ^ u64::from(*b)).wrapping_mul(0x100_0000_01b3);
    }
    h
}

/// Deterministic digest of an allocation, good enough to stand in for a
/// state root in tests.
pub fn state_digest(state: &WorldState) -> Hash {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for (addr, account) in state.iter() {
        h = fnv(h, addr.as_bytes());
        h = fnv(h, &account.balance.to_be_bytes());
        h = fnv(h, &account.nonce.to_be_bytes());
        h = fnv(h, &account.code);
        for (key, value) in &account.storage {
            h = fnv(h, key.as_bytes());
            h = fnv(h, value.as_bytes());
        }
    }
    let mut raw = [0u8; 32];
    for (i, chunk) in raw.chunks_mut(8).enumerate() {
        chunk.copy_from_slice(&h.rotate_left(i as u32 * 16).to_be_bytes());
    }
    Hash(raw)
}

#[derive(Default)]
struct MemoryInner {
    accounts: WorldState,
    /// Snapshot of the allocation after each ended block.
    archive: BTreeMap<u64, WorldState>,
    block_hashes: BTreeMap<u64, Hash>,
    current_block: u64,
}

/// Minimal but functional state database: writes go to an account map,
/// every ended block is snapshotted into an instantly caught-up archive.
#[derive(Clone, Default)]
pub struct MemoryDb {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed accounts and archive them as the post-state of `block`.
    pub fn seed(&self, block: u64, accounts: WorldState) {
        let mut inner = self.inner.lock().unwrap();
        inner.archive.insert(block, accounts.clone());
        inner.accounts = accounts;
    }

    /// Hashes of all ended blocks, for building a recorded-hash store.
    pub fn block_hashes(&self) -> BTreeMap<u64, Hash> {
        self.inner.lock().unwrap().block_hashes.clone()
    }

    fn with_account<R>(&self, addr: &Address, f: impl FnOnce(Option<&Account>) -> R) -> R {
        let inner = self.inner.lock().unwrap();
        f(inner.accounts.get(addr))
    }

    fn update_account(&self, addr: &Address, f: impl FnOnce(&mut Account)) {
        let mut inner = self.inner.lock().unwrap();
        let mut account = inner.accounts.get(addr).cloned().unwrap_or_default();
        f(&mut account);
        inner.accounts.insert(*addr, account);
    }
}

impl VmState for MemoryDb {
    fn exist(&self, addr: &Address) -> bool {
        self.with_account(addr, |a| a.is_some())
    }

    fn create_account(&self, addr: &Address) {
        self.update_account(addr, |_| {});
    }

    fn balance(&self, addr: &Address) -> u128 {
        self.with_account(addr, |a| a.map_or(0, |a| a.balance))
    }

    fn add_balance(&self, addr: &Address, value: u128) {
        self.update_account(addr, |a| a.balance = a.balance.saturating_add(value));
    }

    fn sub_balance(&self, addr: &Address, value: u128) {
        self.update_account(addr, |a| a.balance = a.balance.saturating_sub(value));
    }

    fn nonce(&self, addr: &Address) -> u64 {
        self.with_account(addr, |a| a.map_or(0, |a| a.nonce))
    }

    fn set_nonce(&self, addr: &Address, nonce: u64) {
        self.update_account(addr, |a| a.nonce = nonce);
    }

    fn code(&self, addr: &Address) -> Vec<u8> {
        self.with_account(addr, |a| a.map_or_else(Vec::new, |a| a.code.clone()))
    }

    fn set_code(&self, addr: &Address, code: Vec<u8>) {
        self.update_account(addr, |a| a.code = code);
    }

    fn storage(&self, addr: &Address, key: &StorageKey) -> StorageValue {
        self.with_account(addr, |a| a.map_or_else(StorageValue::zero, |a| a.storage_at(key)))
    }

    fn set_storage(&self, addr: &Address, key: StorageKey, value: StorageValue) {
        self.update_account(addr, |a| {
            a.storage.insert(key, value);
        });
    }

    fn substate_post_alloc(&self) -> WorldState {
        self.inner.lock().unwrap().accounts.clone()
    }
}

impl StateDb for MemoryDb {
    fn begin_sync_period(&self, _number: u64) {}
    fn end_sync_period(&self) {}

    fn begin_block(&self, number: u64) -> Result<()> {
        self.inner.lock().unwrap().current_block = number;
        Ok(())
    }

    fn end_block(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let block = inner.current_block;
        let snapshot = inner.accounts.clone();
        inner.block_hashes.insert(block, state_digest(&snapshot));
        inner.archive.insert(block, snapshot);
        Ok(())
    }

    fn begin_transaction(&self, _number: u32) -> Result<()> {
        Ok(())
    }

    fn end_transaction(&self) -> Result<()> {
        Ok(())
    }

    fn state_hash(&self) -> Result<Hash> {
        Ok(state_digest(&self.inner.lock().unwrap().accounts))
    }

    fn commit(&self, _delete_empty_objects: bool) -> Result<Hash> {
        self.state_hash()
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn archive_state(&self, block: u64) -> Result<Box<dyn ArchiveState>> {
        let inner = self.inner.lock().unwrap();
        let state = inner
            .archive
            .get(&block)
            .cloned()
            .ok_or_else(|| anyhow!("block {block} is not archived"))?;
        Ok(Box::new(MemoryArchive {
            state: Mutex::new(state),
        }))
    }

    fn archive_block_height(&self) -> Result<Option<u64>> {
        Ok(self.inner.lock().unwrap().archive.keys().next_back().copied())
    }
}

/// Detached snapshot returned by [`MemoryDb::archive_state`].
pub struct MemoryArchive {
    state: Mutex<WorldState>,
}

impl VmState for MemoryArchive {
    fn exist(&self, addr: &Address) -> bool {
        self.state.lock().unwrap().contains(addr)
    }

    fn create_account(&self, addr: &Address) {
        let mut state = self.state.lock().unwrap();
        if state.get(addr).is_none() {
            state.insert(*addr, Account::default());
        }
    }

    fn balance(&self, addr: &Address) -> u128 {
        self.state.lock().unwrap().get(addr).map_or(0, |a| a.balance)
    }

    fn add_balance(&self, addr: &Address, value: u128) {
        let mut state = self.state.lock().unwrap();
        let mut account = state.get(addr).cloned().unwrap_or_default();
        account.balance = account.balance.saturating_add(value);
        state.insert(*addr, account);
    }

    fn sub_balance(&self, addr: &Address, value: u128) {
        let mut state = self.state.lock().unwrap();
        let mut account = state.get(addr).cloned().unwrap_or_default();
        account.balance = account.balance.saturating_sub(value);
        state.insert(*addr, account);
    }

    fn nonce(&self, addr: &Address) -> u64 {
        self.state.lock().unwrap().get(addr).map_or(0, |a| a.nonce)
    }

    fn set_nonce(&self, addr: &Address, nonce: u64) {
        let mut state = self.state.lock().unwrap();
        let mut account = state.get(addr).cloned().unwrap_or_default();
        account.nonce = nonce;
        state.insert(*addr, account);
    }

    fn code(&self, addr: &Address) -> Vec<u8> {
        self.state
            .lock()
            .unwrap()
            .get(addr)
            .map_or_else(Vec::new, |a| a.code.clone())
    }

    fn set_code(&self, addr: &Address, code: Vec<u8>) {
        let mut state = self.state.lock().unwrap();
        let mut account = state.get(addr).cloned().unwrap_or_default();
        account.code = code;
        state.insert(*addr, account);
    }

    fn storage(&self, addr: &Address, key: &StorageKey) -> StorageValue {
        self.state
            .lock()
            .unwrap()
            .get(addr)
            .map_or_else(StorageValue::zero, |a| a.storage_at(key))
    }

    fn set_storage(&self, addr: &Address, key: StorageKey, value: StorageValue) {
        let mut state = self.state.lock().unwrap();
        let mut account = state.get(addr).cloned().unwrap_or_default();
        account.storage.insert(key, value);
        state.insert(*addr, account);
    }

    fn substate_post_alloc(&self) -> WorldState {
        self.state.lock().unwrap().clone()
    }
}

impl ArchiveState for MemoryArchive {
    fn state_hash(&self) -> Result<Hash> {
        Ok(state_digest(&self.state.lock().unwrap()))
    }

    fn begin_transaction(&self, _number: u32) -> Result<()> {
        Ok(())
    }

    fn end_transaction(&self) -> Result<()> {
        Ok(())
    }

    fn release(&self) -> Result<()> {
        Ok(())
    }
}

/// Factory handing out a pre-built database, with a working directory
/// created under the configured parent.
pub struct MemoryFactory {
    pub db: MemoryDb,
}

impl StateDbFactory for MemoryFactory {
    fn open(&self, cfg: &Config) -> Result<(Arc<dyn StateDb>, PathBuf)> {
        let dir = tempfile::Builder::new()
            .prefix("state-db-tmp-")
            .tempdir_in(&cfg.db_tmp)?
            .into_path();
        Ok((Arc::new(self.db.clone()), dir))
    }
}

/// Applies each substate's recorded output to whichever state the harness
/// prepared (an archive snapshot if one is set, the live database
/// otherwise) and reports the recorded receipt as the execution result.
pub struct ApplyingProcessor;

impl Processor<Substate> for ApplyingProcessor {
    fn process(&self, state: &State<Substate>, ctx: &mut Context) -> Result<()> {
        {
            let db: &dyn VmState = match ctx.archive.as_deref() {
                Some(archive) => archive,
                None => ctx.require_state()?.as_ref(),
            };
            for (addr, account) in state.data.output.iter() {
                if !db.exist(addr) {
                    db.create_account(addr);
                }
                db.sub_balance(addr, db.balance(addr));
                db.add_balance(addr, account.balance);
                db.set_nonce(addr, account.nonce);
                db.set_code(addr, account.code.clone());
                for (key, value) in &account.storage {
                    db.set_storage(addr, *key, *value);
                }
            }
        }
        ctx.execution_result = Some(TransactionOutcome::from_receipt(state.data.receipt.clone()));
        Ok(())
    }
}

/// Answers balance queries from the archive snapshot prepared in the
/// context.
pub struct BalanceQueryProcessor {
    pub subject: Address,
}

impl Processor<RpcExchange> for BalanceQueryProcessor {
    fn process(&self, _state: &State<RpcExchange>, ctx: &mut Context) -> Result<()> {
        let archive = ctx
            .archive
            .as_ref()
            .ok_or_else(|| anyhow!("no archive snapshot prepared"))?;
        let balance = archive.balance(&self.subject);
        ctx.execution_result = Some(TransactionOutcome::from_output(
            format!("0x{balance:x}").into_bytes(),
        ));
        Ok(())
    }
}
