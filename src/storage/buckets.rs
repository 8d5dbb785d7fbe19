/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Byte-prefixes that specify where each bucket is stored in the user-provided key-value store.
//!
//! # List of buckets
//!
//! The persisted state of the block-management core is split into 7 logical collections
//! ("buckets"). Each bucket is a mapping whose keys are formed by concatenating the bucket's
//! one-byte prefix with the mapping's key:
//!
//! |Bucket|Type|Description|
//! |---|---|---|
//! |Block Header by Hash|[`CryptoHash`](crate::types::data_types::CryptoHash) -> encoded header|Canonical encoding of every finalized block's header, keyed by block ID.|
//! |Block Body by Hash|[`CryptoHash`](crate::types::data_types::CryptoHash) -> encoded body|Transactions and commit votes of every finalized block, keyed by block ID.|
//! |Hash by Block Height|[`BlockHeight`](crate::types::data_types::BlockHeight) -> [`CryptoHash`](crate::types::data_types::CryptoHash)|ID of the finalized block at each height.|
//! |Transaction Locator by Hash|[`CryptoHash`](crate::types::data_types::CryptoHash) -> [`TransactionLocator`](crate::transaction::TransactionLocator)|Where a finalized transaction lives: height, group, index.|
//! |Bytes by Hash|[`CryptoHash`](crate::types::data_types::CryptoHash) -> bytes|General content-addressed storage. Validator lists are stored here.|
//! |Merkle Trie|[`CryptoHash`](crate::types::data_types::CryptoHash) -> trie node|Nodes of every merkle trie: world state, account storage, receipt lists, event logs, transaction lists.|
//! |Chain Property|name -> bytes|Single values about the chain, e.g. [`LAST_HEIGHT`].|
//!
//! # Single values
//!
//! Chain properties are stored at `CHAIN_PROPERTY` + the UTF-8 bytes of the property name.
//!
//! For example, to read the last finalized height directly using
//! [`KVGet`](super::pluggables::KVGet), one would do:
//!
//! ```
//! # use blockcore_rs::storage::{
//! #     buckets::{CHAIN_PROPERTY, LAST_HEIGHT, concat},
//! #     pluggables::KVGet,
//! # };
//! # fn read_last_height(kv: &impl KVGet) -> Option<Vec<u8>> {
//! let key = concat(&CHAIN_PROPERTY, LAST_HEIGHT.as_bytes());
//! kv.get(&key)
//! # }
//! ```
//!
//! Generally, use the typed getters on [`KVGet`](super::pluggables::KVGet) and the setters on
//! [`ChainWriteBatch`](super::write_batch::ChainWriteBatch) instead.

// Buckets
pub const BLOCK_HEADER_BY_HASH: [u8; 1] = [0];
pub const BLOCK_BODY_BY_HASH: [u8; 1] = [1];
pub const HASH_BY_BLOCK_HEIGHT: [u8; 1] = [2];
pub const TRANSACTION_LOCATOR_BY_HASH: [u8; 1] = [3];
pub const BYTES_BY_HASH: [u8; 1] = [4];
pub const MERKLE_TRIE: [u8; 1] = [5];
pub const CHAIN_PROPERTY: [u8; 1] = [6];

// Chain properties
pub const LAST_HEIGHT: &str = "block.lastHeight";
pub const NETWORK_ID: &str = "block.networkID";

/// Identifies a content-addressed bucket in sync requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BucketID {
    BytesByHash,
    MerkleTrie,
}

impl BucketID {
    pub const fn prefix(&self) -> [u8; 1] {
        match self {
            BucketID::BytesByHash => BYTES_BY_HASH,
            BucketID::MerkleTrie => MERKLE_TRIE,
        }
    }
}

/// Concatenate two byteslices into one vector.
pub fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(a.len() + b.len());
    res.extend_from_slice(a);
    res.extend_from_slice(b);
    res
}
