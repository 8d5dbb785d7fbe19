//! Traits for pluggable persistence.
//!
//! The library user supplies a key-value store implementing [`KVStore`]. Every bucket described in
//! [`buckets`](super::buckets) lives in this one store; the typed getters on [`KVGet`] form the keys
//! and decode the values.

use std::fmt::Display;

use borsh::BorshDeserialize;

use crate::{
    transaction::TransactionLocator,
    types::{
        data_types::{BlockHeight, CryptoHash},
        validator_list::{ValidatorList, ValidatorListBytes},
    },
};

use super::buckets::{self, concat, BucketID};

pub trait KVStore: KVGet + Clone + Send + 'static {
    type WriteBatch: WriteBatch + Send;
    type Snapshot<'a>: 'a + KVGet;

    fn write(&mut self, wb: Self::WriteBatch);
    fn clear(&mut self);
    fn snapshot<'b>(&'b self) -> Self::Snapshot<'_>;
}

pub trait KVGet {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /* ↓↓↓ Blocks ↓↓↓  */

    fn block_header_bytes(&self, id: &CryptoHash) -> Option<Vec<u8>> {
        self.get(&concat(&buckets::BLOCK_HEADER_BY_HASH, id.as_slice()))
    }

    fn block_body_bytes(&self, id: &CryptoHash) -> Option<Vec<u8>> {
        self.get(&concat(&buckets::BLOCK_BODY_BY_HASH, id.as_slice()))
    }

    /* ↓↓↓ Block Height to Block ↓↓↓ */

    fn block_at_height(&self, height: BlockHeight) -> Result<Option<CryptoHash>, KVGetError> {
        let block_hash_key = concat(&buckets::HASH_BY_BLOCK_HEIGHT, &height.to_le_bytes());
        if let Some(bytes) = self.get(&block_hash_key) {
            Ok(Some(
                CryptoHash::deserialize(&mut bytes.as_slice()).map_err(|err| {
                    KVGetError::DeserializeValueError {
                        key: Key::BlockAtHeight { height },
                        source: err,
                    }
                })?,
            ))
        } else {
            Ok(None)
        }
    }

    /* ↓↓↓ Transaction Locators ↓↓↓ */

    fn transaction_locator(
        &self,
        tx: &CryptoHash,
    ) -> Result<Option<TransactionLocator>, KVGetError> {
        if let Some(bytes) = self.get(&concat(
            &buckets::TRANSACTION_LOCATOR_BY_HASH,
            tx.as_slice(),
        )) {
            Ok(Some(TransactionLocator::deserialize(&mut &*bytes).map_err(
                |err| KVGetError::DeserializeValueError {
                    key: Key::TransactionLocator { tx: *tx },
                    source: err,
                },
            )?))
        } else {
            Ok(None)
        }
    }

    /* ↓↓↓ Content-addressed buckets ↓↓↓ */

    fn bytes_by_hash(&self, hash: &CryptoHash) -> Option<Vec<u8>> {
        self.get(&concat(&buckets::BYTES_BY_HASH, hash.as_slice()))
    }

    fn trie_node(&self, hash: &CryptoHash) -> Option<Vec<u8>> {
        self.get(&concat(&buckets::MERKLE_TRIE, hash.as_slice()))
    }

    fn bucket_value(&self, bucket: BucketID, hash: &CryptoHash) -> Option<Vec<u8>> {
        self.get(&concat(&bucket.prefix(), hash.as_slice()))
    }

    /// Look up a value by its hash the way the sync server does: the merkle trie bucket first, then
    /// the bytes-by-hash bucket.
    fn node_data(&self, hash: &CryptoHash) -> Option<Vec<u8>> {
        self.trie_node(hash).or_else(|| self.bytes_by_hash(hash))
    }

    fn validator_list(&self, hash: &CryptoHash) -> Result<Option<ValidatorList>, KVGetError> {
        let bytes = match self.bytes_by_hash(hash) {
            Some(bytes) => bytes,
            None => return Ok(None),
        };
        let list_bytes = ValidatorListBytes::deserialize(&mut &*bytes).map_err(|err| {
            KVGetError::DeserializeValueError {
                key: Key::ValidatorList { hash: *hash },
                source: err,
            }
        })?;
        ValidatorList::try_from(list_bytes)
            .map(Some)
            .map_err(|err| KVGetError::DeserializeValueError {
                key: Key::ValidatorList { hash: *hash },
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()),
            })
    }

    /* ↓↓↓ Chain Properties ↓↓↓ */

    fn chain_property(&self, name: &str) -> Option<Vec<u8>> {
        self.get(&concat(&buckets::CHAIN_PROPERTY, name.as_bytes()))
    }

    fn last_height(&self) -> Result<Option<BlockHeight>, KVGetError> {
        if let Some(bytes) = self.chain_property(buckets::LAST_HEIGHT) {
            Ok(Some(BlockHeight::deserialize(&mut &*bytes).map_err(
                |err| KVGetError::DeserializeValueError {
                    key: Key::LastHeight,
                    source: err,
                },
            )?))
        } else {
            Ok(None)
        }
    }

    fn network_id(&self) -> Result<Option<u32>, KVGetError> {
        if let Some(bytes) = self.chain_property(buckets::NETWORK_ID) {
            Ok(Some(u32::deserialize(&mut &*bytes).map_err(|err| {
                KVGetError::DeserializeValueError {
                    key: Key::NetworkID,
                    source: err,
                }
            })?))
        } else {
            Ok(None)
        }
    }
}

impl<T: KVGet + ?Sized> KVGet for &T {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        (**self).get(key)
    }
}

/// A [`KVGet`] with nothing in it. Tries opened over `EmptyStore` live purely in memory.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyStore;

impl KVGet for EmptyStore {
    fn get(&self, _: &[u8]) -> Option<Vec<u8>> {
        None
    }
}

pub trait WriteBatch {
    fn new() -> Self;
    fn set(&mut self, key: &[u8], value: &[u8]);
    fn delete(&mut self, key: &[u8]);
}

/// Error when trying to read a value from the key-value store.
///
/// The error may arise in the following circumstances:
/// 1. The value corresponding to a given key cannot be deserialized into its expected type,
/// 2. The value corresponding to a given key cannot be found.
#[derive(Debug)]
pub enum KVGetError {
    DeserializeValueError { key: Key, source: std::io::Error },
    ValueExpectedButNotFound { key: Key },
}

#[derive(Debug)]
pub enum Key {
    BlockHeader { block: CryptoHash },
    BlockBody { block: CryptoHash },
    BlockAtHeight { height: BlockHeight },
    TransactionLocator { tx: CryptoHash },
    ValidatorList { hash: CryptoHash },
    TrieNode { hash: CryptoHash },
    LastHeight,
    NetworkID,
}

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Key::BlockHeader { block } => write!(f, "Block Header for block {}", block),
            Key::BlockBody { block } => write!(f, "Block Body for block {}", block),
            Key::BlockAtHeight { height } => write!(f, "Block at height {}", height.int()),
            Key::TransactionLocator { tx } => write!(f, "Transaction Locator for {}", tx),
            Key::ValidatorList { hash } => write!(f, "Validator List {}", hash),
            Key::TrieNode { hash } => write!(f, "Trie Node {}", hash),
            Key::LastHeight => write!(f, "Last Height"),
            Key::NetworkID => write!(f, "Network ID"),
        }
    }
}
