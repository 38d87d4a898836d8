//! World-state model: accounts and the allocation map validators compare.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::{Address, StorageKey, StorageValue};

/// State of a single account at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub balance: u128,
    pub nonce: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code: Vec<u8>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub storage: BTreeMap<StorageKey, StorageValue>,
}

impl Account {
    /// Account with the given balance and nonce and no code or storage.
    pub fn with_balance(balance: u128, nonce: u64) -> Self {
        Self {
            balance,
            nonce,
            ..Default::default()
        }
    }

    /// Value of one storage slot, zero when unset.
    pub fn storage_at(&self, key: &StorageKey) -> StorageValue {
        self.storage.get(key).copied().unwrap_or_default()
    }
}

/// The full set of account states at a point in time.
///
/// Backed by an ordered map so iteration, comparison, and error reports are
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldState(BTreeMap<Address, Account>);

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, addr: Address, account: Account) {
        self.0.insert(addr, account);
    }

    pub fn get(&self, addr: &Address) -> Option<&Account> {
        self.0.get(addr)
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.0.contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate accounts in address order.
    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Account)> {
        self.0.iter()
    }

    /// Set equality with another allocation: same addresses, same account
    /// contents, nothing extra on either side.
    pub fn equal(&self, other: &WorldState) -> bool {
        self == other
    }
}

impl FromIterator<(Address, Account)> for WorldState {
    fn from_iter<I: IntoIterator<Item = (Address, Account)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
