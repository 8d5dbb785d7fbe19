/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [`ChainWriteBatch`], which forms bucket keys and serializes values on top of a user-provided
//! [`WriteBatch`].

use borsh::BorshSerialize;

use crate::{
    transaction::TransactionLocator,
    types::{
        crypto_primitives::sha3_256,
        data_types::{BlockHeight, CryptoHash},
        validator_list::ValidatorList,
    },
};

use super::{
    buckets::{self, concat, BucketID},
    pluggables::{KVStore, WriteBatch},
};

pub struct ChainWriteBatch<W: WriteBatch>(W);

impl<W: WriteBatch> ChainWriteBatch<W> {
    pub fn new() -> ChainWriteBatch<W> {
        ChainWriteBatch(W::new())
    }

    /// Get the wrapped write batch, ready to be passed to [`KVStore::write`].
    pub fn into_inner(self) -> W {
        self.0
    }

    /* ↓↓↓ Blocks ↓↓↓  */

    pub fn set_block_header(&mut self, id: &CryptoHash, header_bytes: &[u8]) {
        self.0
            .set(&concat(&buckets::BLOCK_HEADER_BY_HASH, id.as_slice()), header_bytes);
    }

    pub fn set_block_body(&mut self, id: &CryptoHash, body_bytes: &[u8]) {
        self.0
            .set(&concat(&buckets::BLOCK_BODY_BY_HASH, id.as_slice()), body_bytes);
    }

    pub fn set_block_at_height(&mut self, height: BlockHeight, id: &CryptoHash) {
        self.0.set(
            &concat(&buckets::HASH_BY_BLOCK_HEIGHT, &height.to_le_bytes()),
            &id.try_to_vec().unwrap(),
        );
    }

    /* ↓↓↓ Transaction Locators ↓↓↓ */

    pub fn set_transaction_locator(&mut self, tx: &CryptoHash, locator: &TransactionLocator) {
        self.0.set(
            &concat(&buckets::TRANSACTION_LOCATOR_BY_HASH, tx.as_slice()),
            &locator.try_to_vec().unwrap(),
        );
    }

    /* ↓↓↓ Content-addressed buckets ↓↓↓ */

    /// Store `bytes` in the bytes-by-hash bucket and return its hash.
    pub fn set_bytes(&mut self, bytes: &[u8]) -> CryptoHash {
        let hash = sha3_256(bytes);
        self.0
            .set(&concat(&buckets::BYTES_BY_HASH, hash.as_slice()), bytes);
        hash
    }

    pub fn set_trie_node(&mut self, hash: &CryptoHash, node_bytes: &[u8]) {
        self.0
            .set(&concat(&buckets::MERKLE_TRIE, hash.as_slice()), node_bytes);
    }

    pub fn set_bucket_value(&mut self, bucket: BucketID, hash: &CryptoHash, value: &[u8]) {
        self.0.set(&concat(&bucket.prefix(), hash.as_slice()), value);
    }

    pub fn set_validator_list(&mut self, validators: &ValidatorList) -> CryptoHash {
        self.set_bytes(&validators.bytes())
    }

    /* ↓↓↓ Chain Properties ↓↓↓ */

    pub fn set_last_height(&mut self, height: BlockHeight) {
        self.0.set(
            &concat(&buckets::CHAIN_PROPERTY, buckets::LAST_HEIGHT.as_bytes()),
            &height.try_to_vec().unwrap(),
        );
    }

    pub fn set_network_id(&mut self, network_id: u32) {
        self.0.set(
            &concat(&buckets::CHAIN_PROPERTY, buckets::NETWORK_ID.as_bytes()),
            &network_id.try_to_vec().unwrap(),
        );
    }
}

impl<W: WriteBatch> Default for ChainWriteBatch<W> {
    fn default() -> Self {
        Self::new()
    }
}

/// Write `wb` into `kv_store`.
pub fn commit<K: KVStore>(kv_store: &mut K, wb: ChainWriteBatch<K::WriteBatch>) {
    kv_store.write(wb.into_inner())
}
