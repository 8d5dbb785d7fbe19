//! Account balances and contract storage, merkleised.
//!
//! The world state is a trie mapping the binary form of each [`Address`] to its encoded
//! [`AccountState`]. Each account's storage is a trie of its own, referenced from the account state
//! by `storage_root`. The state sync engine relies on this nesting: given only the root of the
//! world state it discovers and fetches every storage trie as well.
//!
//! [`WorldState`] is the mutable view used by execution engines; [`WorldSnapshot`] is the read-only
//! view at a given root.

use std::collections::{btree_map::Entry, BTreeMap};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    merkle::{trie::MerkleTrie, MerkleRoot, TrieError},
    storage::{write_batch::ChainWriteBatch, KVGet, WriteBatch},
    types::data_types::{Address, CryptoHash},
};

#[derive(Clone, PartialEq, Eq, Debug, Default, BorshSerialize, BorshDeserialize)]
pub struct AccountState {
    pub balance: u128,
    pub nonce: u64,
    pub code_hash: Option<CryptoHash>,
    pub storage_root: MerkleRoot,
}

impl AccountState {
    pub fn bytes(&self) -> Vec<u8> {
        self.try_to_vec().unwrap()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<AccountState, std::io::Error> {
        AccountState::deserialize(&mut &*bytes)
    }
}

fn decode_account(address: &Address, bytes: &[u8]) -> Result<AccountState, TrieError> {
    AccountState::from_bytes(bytes).map_err(|source| TrieError::CorruptNode {
        hash: crate::types::crypto_primitives::sha3_256(&address.bytes()),
        source,
    })
}

/// Mutable world state. Changes stay in memory until [`flush`](WorldState::flush).
pub struct WorldState<S: KVGet + Clone> {
    accounts: MerkleTrie<S>,
    storages: BTreeMap<Address, MerkleTrie<S>>,
}

impl<S: KVGet + Clone> WorldState<S> {
    pub fn new(source: S, root: MerkleRoot) -> WorldState<S> {
        WorldState {
            accounts: MerkleTrie::new(source, root),
            storages: BTreeMap::new(),
        }
    }

    pub fn get_account(&self, address: &Address) -> Result<Option<AccountState>, TrieError> {
        match self.accounts.get(&address.bytes())? {
            Some(bytes) => Ok(Some(decode_account(address, &bytes)?)),
            None => Ok(None),
        }
    }

    fn account_or_default(&self, address: &Address) -> Result<AccountState, TrieError> {
        Ok(self.get_account(address)?.unwrap_or_default())
    }

    pub fn balance(&self, address: &Address) -> Result<u128, TrieError> {
        Ok(self.account_or_default(address)?.balance)
    }

    pub fn set_balance(&mut self, address: &Address, balance: u128) -> Result<(), TrieError> {
        let mut account = self.account_or_default(address)?;
        account.balance = balance;
        self.accounts.set(&address.bytes(), account.bytes())
    }

    pub fn increase_nonce(&mut self, address: &Address) -> Result<u64, TrieError> {
        let mut account = self.account_or_default(address)?;
        account.nonce += 1;
        let nonce = account.nonce;
        self.accounts.set(&address.bytes(), account.bytes())?;
        Ok(nonce)
    }

    fn storage(&mut self, address: &Address) -> Result<&mut MerkleTrie<S>, TrieError> {
        match self.storages.entry(*address) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let root = match self.accounts.get(&address.bytes())? {
                    Some(bytes) => decode_account(address, &bytes)?.storage_root,
                    None => None,
                };
                let source = self.accounts.source().clone();
                Ok(entry.insert(MerkleTrie::new(source, root)))
            }
        }
    }

    pub fn get_value(&mut self, address: &Address, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        self.storage(address)?.get(key)
    }

    pub fn set_value(
        &mut self,
        address: &Address,
        key: &[u8],
        value: Vec<u8>,
    ) -> Result<(), TrieError> {
        self.storage(address)?.set(key, value)
    }

    pub fn delete_value(
        &mut self,
        address: &Address,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, TrieError> {
        self.storage(address)?.delete(key)
    }

    /// Fold every touched storage trie's root back into its account.
    fn sync_storage_roots(&mut self) -> Result<(), TrieError> {
        let roots: Vec<(Address, MerkleRoot)> = self
            .storages
            .iter()
            .map(|(address, storage)| (*address, storage.root_hash()))
            .collect();
        for (address, root) in roots {
            let mut account = self.account_or_default(&address)?;
            if account.storage_root != root {
                account.storage_root = root;
                self.accounts.set(&address.bytes(), account.bytes())?;
            }
        }
        Ok(())
    }

    /// Compute the root the world state would have if flushed now.
    pub fn root_hash(&mut self) -> Result<MerkleRoot, TrieError> {
        self.sync_storage_roots()?;
        Ok(self.accounts.root_hash())
    }

    /// Write every changed node into `wb` and return the new root.
    pub fn flush<W: WriteBatch>(
        &mut self,
        wb: &mut ChainWriteBatch<W>,
    ) -> Result<MerkleRoot, TrieError> {
        self.sync_storage_roots()?;
        for storage in self.storages.values() {
            storage.flush(wb);
        }
        Ok(self.accounts.flush(wb))
    }
}

/// Read-only view of the world state at one root.
#[derive(Clone)]
pub struct WorldSnapshot<S> {
    source: S,
    root: MerkleRoot,
}

impl<S: KVGet + Clone> WorldSnapshot<S> {
    pub fn new(source: S, root: MerkleRoot) -> WorldSnapshot<S> {
        WorldSnapshot { source, root }
    }

    pub fn root(&self) -> MerkleRoot {
        self.root
    }

    pub fn get_account(&self, address: &Address) -> Result<Option<AccountState>, TrieError> {
        match MerkleTrie::new(self.source.clone(), self.root).get(&address.bytes())? {
            Some(bytes) => Ok(Some(decode_account(address, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Get a view of one account. An account that does not exist reads as empty.
    pub fn get_account_snapshot(&self, address: &Address) -> Result<AccountSnapshot<S>, TrieError> {
        let state = self.get_account(address)?.unwrap_or_default();
        let storage = MerkleTrie::new(self.source.clone(), state.storage_root);
        Ok(AccountSnapshot { state, storage })
    }
}

pub struct AccountSnapshot<S> {
    state: AccountState,
    storage: MerkleTrie<S>,
}

impl<S: KVGet> AccountSnapshot<S> {
    pub fn state(&self) -> &AccountState {
        &self.state
    }

    pub fn balance(&self) -> u128 {
        self.state.balance
    }

    pub fn get_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        self.storage.get(key)
    }
}
