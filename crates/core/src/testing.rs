//! Shared in-memory fakes for unit tests: a recording state database, an
//! archive view over it, and extensions/processors that log what they saw.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use parking_lot::Mutex;
use replay_harness_types::{Account, Address, Hash, StorageKey, StorageValue, WorldState};

use crate::executor::{Context, Extension, Processor, State};
use crate::state::{ArchiveState, StateDb, VmState};

/// Call-order log shared between a test and its recording fixtures.
pub mod record {
    use super::*;

    pub type Log = Arc<Mutex<Vec<String>>>;

    pub fn new_log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    pub fn push(log: &Log, entry: impl Into<String>) {
        log.lock().push(entry.into());
    }

    pub fn take(log: &Log) -> Vec<String> {
        std::mem::take(&mut *log.lock())
    }
}

/// Extension recording every hook invocation, optionally failing on demand.
pub struct RecordingExtension {
    name: &'static str,
    log: record::Log,
    pub fail_on_pre_block: bool,
    pub fail_on_pre_transaction: bool,
    pub fail_on_post_run: bool,
}

impl RecordingExtension {
    pub fn new(name: &'static str, log: record::Log) -> Self {
        Self {
            name,
            log,
            fail_on_pre_block: false,
            fail_on_pre_transaction: false,
            fail_on_post_run: false,
        }
    }
}

impl<T> Extension<T> for RecordingExtension {
    fn pre_run(&mut self, state: &State<T>, _ctx: &mut Context) -> Result<()> {
        record::push(&self.log, format!("{}:pre_run:{}", self.name, state.block));
        Ok(())
    }

    fn post_run(
        &mut self,
        state: &State<T>,
        _ctx: &mut Context,
        _error: Option<&anyhow::Error>,
    ) -> Result<()> {
        record::push(&self.log, format!("{}:post_run:{}", self.name, state.block));
        if self.fail_on_post_run {
            bail!("{}: induced failure", self.name);
        }
        Ok(())
    }

    fn pre_block(&mut self, state: &State<T>, _ctx: &mut Context) -> Result<()> {
        record::push(&self.log, format!("{}:pre_block:{}", self.name, state.block));
        if self.fail_on_pre_block {
            bail!("{}: induced failure", self.name);
        }
        Ok(())
    }

    fn post_block(&mut self, state: &State<T>, _ctx: &mut Context) -> Result<()> {
        record::push(&self.log, format!("{}:post_block:{}", self.name, state.block));
        Ok(())
    }

    fn pre_transaction(&mut self, state: &State<T>, _ctx: &mut Context) -> Result<()> {
        record::push(
            &self.log,
            format!("{}:pre_transaction:{}/{}", self.name, state.block, state.transaction),
        );
        if self.fail_on_pre_transaction {
            bail!("{}: induced failure", self.name);
        }
        Ok(())
    }

    fn post_transaction(&mut self, state: &State<T>, _ctx: &mut Context) -> Result<()> {
        record::push(
            &self.log,
            format!("{}:post_transaction:{}/{}", self.name, state.block, state.transaction),
        );
        Ok(())
    }
}

/// Processor that does nothing.
pub struct NoopProcessor;

impl<T> Processor<T> for NoopProcessor {
    fn process(&self, _state: &State<T>, _ctx: &mut Context) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct FakeInner {
    accounts: BTreeMap<Address, Account>,
    calls: Vec<String>,
    current_block: u64,
    /// Live hash reported per block (falls back to zero).
    live_hashes: BTreeMap<u64, Hash>,
    /// Hash reported by archive snapshots per block (falls back to zero).
    archive_hashes: BTreeMap<u64, Hash>,
    /// Scripted responses of `archive_block_height`; the last entry repeats.
    heights: VecDeque<Option<u64>>,
    shadow_error: Option<String>,
    released: usize,
}

/// Scriptable in-memory state database recording the scope calls it
/// receives.
#[derive(Clone, Default)]
pub struct FakeStateDb {
    inner: Arc<Mutex<FakeInner>>,
}

impl FakeStateDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    pub fn set_account(&self, addr: Address, account: Account) {
        self.inner.lock().accounts.insert(addr, account);
    }

    pub fn account(&self, addr: &Address) -> Option<Account> {
        self.inner.lock().accounts.get(addr).cloned()
    }

    pub fn set_live_hash(&self, block: u64, hash: Hash) {
        self.inner.lock().live_hashes.insert(block, hash);
    }

    pub fn set_archive_hash(&self, block: u64, hash: Hash) {
        self.inner.lock().archive_hashes.insert(block, hash);
    }

    /// Script the sequence of archive heights; the last one repeats forever.
    pub fn script_heights(&self, heights: impl IntoIterator<Item = Option<u64>>) {
        self.inner.lock().heights = heights.into_iter().collect();
    }

    pub fn set_shadow_error(&self, message: impl Into<String>) {
        self.inner.lock().shadow_error = Some(message.into());
    }

    pub fn released_archives(&self) -> usize {
        self.inner.lock().released
    }
}

impl VmState for FakeStateDb {
    fn exist(&self, addr: &Address) -> bool {
        self.inner.lock().accounts.contains_key(addr)
    }

    fn create_account(&self, addr: &Address) {
        self.inner.lock().accounts.entry(*addr).or_default();
    }

    fn balance(&self, addr: &Address) -> u128 {
        self.inner.lock().accounts.get(addr).map_or(0, |a| a.balance)
    }

    fn add_balance(&self, addr: &Address, value: u128) {
        let mut inner = self.inner.lock();
        let acct = inner.accounts.entry(*addr).or_default();
        acct.balance = acct.balance.saturating_add(value);
    }

    fn sub_balance(&self, addr: &Address, value: u128) {
        let mut inner = self.inner.lock();
        let acct = inner.accounts.entry(*addr).or_default();
        acct.balance = acct.balance.saturating_sub(value);
    }

    fn nonce(&self, addr: &Address) -> u64 {
        self.inner.lock().accounts.get(addr).map_or(0, |a| a.nonce)
    }

    fn set_nonce(&self, addr: &Address, nonce: u64) {
        self.inner.lock().accounts.entry(*addr).or_default().nonce = nonce;
    }

    fn code(&self, addr: &Address) -> Vec<u8> {
        self.inner
            .lock()
            .accounts
            .get(addr)
            .map_or_else(Vec::new, |a| a.code.clone())
    }

    fn set_code(&self, addr: &Address, code: Vec<u8>) {
        self.inner.lock().accounts.entry(*addr).or_default().code = code;
    }

    fn storage(&self, addr: &Address, key: &StorageKey) -> StorageValue {
        self.inner
            .lock()
            .accounts
            .get(addr)
            .map_or_else(StorageValue::zero, |a| a.storage_at(key))
    }

    fn set_storage(&self, addr: &Address, key: StorageKey, value: StorageValue) {
        self.inner
            .lock()
            .accounts
            .entry(*addr)
            .or_default()
            .storage
            .insert(key, value);
    }

    fn substate_post_alloc(&self) -> WorldState {
        self.inner
            .lock()
            .accounts
            .iter()
            .map(|(a, acct)| (*a, acct.clone()))
            .collect()
    }
}

impl StateDb for FakeStateDb {
    fn begin_sync_period(&self, number: u64) {
        self.inner.lock().calls.push(format!("begin_sync_period({number})"));
    }

    fn end_sync_period(&self) {
        self.inner.lock().calls.push("end_sync_period".into());
    }

    fn begin_block(&self, number: u64) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.current_block = number;
        inner.calls.push(format!("begin_block({number})"));
        Ok(())
    }

    fn end_block(&self) -> Result<()> {
        self.inner.lock().calls.push("end_block".into());
        Ok(())
    }

    fn begin_transaction(&self, number: u32) -> Result<()> {
        self.inner.lock().calls.push(format!("begin_transaction({number})"));
        Ok(())
    }

    fn end_transaction(&self) -> Result<()> {
        self.inner.lock().calls.push("end_transaction".into());
        Ok(())
    }

    fn state_hash(&self) -> Result<Hash> {
        let inner = self.inner.lock();
        Ok(inner
            .live_hashes
            .get(&inner.current_block)
            .copied()
            .unwrap_or_default())
    }

    fn commit(&self, _delete_empty_objects: bool) -> Result<Hash> {
        self.state_hash()
    }

    fn close(&self) -> Result<()> {
        self.inner.lock().calls.push("close".into());
        Ok(())
    }

    fn archive_state(&self, block: u64) -> Result<Box<dyn ArchiveState>> {
        let inner = self.inner.lock();
        if let Some(height) = inner.heights.front().copied().flatten() {
            if block > height {
                return Err(anyhow!("archive does not yet contain block {block}"));
            }
        }
        Ok(Box::new(FakeArchive {
            inner: self.inner.clone(),
            block,
        }))
    }

    fn archive_block_height(&self) -> Result<Option<u64>> {
        let mut inner = self.inner.lock();
        if inner.heights.len() > 1 {
            Ok(inner.heights.pop_front().unwrap_or(None))
        } else {
            Ok(inner.heights.front().copied().flatten())
        }
    }

    fn shadow_divergence(&self) -> Option<String> {
        self.inner.lock().shadow_error.take()
    }
}

/// Archive view produced by [`FakeStateDb::archive_state`]. Reads go to the
/// same underlying account map.
pub struct FakeArchive {
    inner: Arc<Mutex<FakeInner>>,
    block: u64,
}

impl VmState for FakeArchive {
    fn exist(&self, addr: &Address) -> bool {
        self.inner.lock().accounts.contains_key(addr)
    }

    fn create_account(&self, addr: &Address) {
        self.inner.lock().accounts.entry(*addr).or_default();
    }

    fn balance(&self, addr: &Address) -> u128 {
        self.inner.lock().accounts.get(addr).map_or(0, |a| a.balance)
    }

    fn add_balance(&self, addr: &Address, value: u128) {
        let mut inner = self.inner.lock();
        let acct = inner.accounts.entry(*addr).or_default();
        acct.balance = acct.balance.saturating_add(value);
    }

    fn sub_balance(&self, addr: &Address, value: u128) {
        let mut inner = self.inner.lock();
        let acct = inner.accounts.entry(*addr).or_default();
        acct.balance = acct.balance.saturating_sub(value);
    }

    fn nonce(&self, addr: &Address) -> u64 {
        self.inner.lock().accounts.get(addr).map_or(0, |a| a.nonce)
    }

    fn set_nonce(&self, addr: &Address, nonce: u64) {
        self.inner.lock().accounts.entry(*addr).or_default().nonce = nonce;
    }

    fn code(&self, addr: &Address) -> Vec<u8> {
        self.inner
            .lock()
            .accounts
            .get(addr)
            .map_or_else(Vec::new, |a| a.code.clone())
    }

    fn set_code(&self, addr: &Address, code: Vec<u8>) {
        self.inner.lock().accounts.entry(*addr).or_default().code = code;
    }

    fn storage(&self, addr: &Address, key: &StorageKey) -> StorageValue {
        self.inner
            .lock()
            .accounts
            .get(addr)
            .map_or_else(StorageValue::zero, |a| a.storage_at(key))
    }

    fn set_storage(&self, addr: &Address, key: StorageKey, value: StorageValue) {
        self.inner
            .lock()
            .accounts
            .entry(*addr)
            .or_default()
            .storage
            .insert(key, value);
    }

    fn substate_post_alloc(&self) -> WorldState {
        self.inner
            .lock()
            .accounts
            .iter()
            .map(|(a, acct)| (*a, acct.clone()))
            .collect()
    }
}

impl ArchiveState for FakeArchive {
    fn state_hash(&self) -> Result<Hash> {
        Ok(self
            .inner
            .lock()
            .archive_hashes
            .get(&self.block)
            .copied()
            .unwrap_or_default())
    }

    fn begin_transaction(&self, number: u32) -> Result<()> {
        self.inner
            .lock()
            .calls
            .push(format!("archive_begin_transaction({}, {number})", self.block));
        Ok(())
    }

    fn end_transaction(&self) -> Result<()> {
        self.inner
            .lock()
            .calls
            .push(format!("archive_end_transaction({})", self.block));
        Ok(())
    }

    fn release(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.released += 1;
        let block = self.block;
        inner.calls.push(format!("archive_release({block})"));
        Ok(())
    }
}

/// Helper constructing a test address with a recognizable low byte.
pub fn test_address(n: u8) -> Address {
    let mut raw = [0u8; 20];
    raw[19] = n;
    Address(raw)
}

/// Helper constructing a test hash with a recognizable low byte.
pub fn test_hash(n: u8) -> Hash {
    let mut raw = [0u8; 32];
    raw[31] = n;
    Hash(raw)
}
