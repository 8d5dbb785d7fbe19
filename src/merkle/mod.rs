/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Content-addressed merkle tries.
//!
//! Every merkleised structure in the core (world state, account storage, receipt lists, event logs,
//! transaction lists) is a [`MerkleTrie`](trie::MerkleTrie). Trie nodes are stored in the
//! [`MERKLE_TRIE`](crate::storage::buckets::MERKLE_TRIE) bucket under the SHA3-256 hash of their
//! encoding, which is what lets the [sync builder](builder) fetch a whole trie from peers given only
//! its root.
//!
//! ## Shape
//!
//! A trie is hexary: keys are split into 4-bit nibbles. There are two kinds of [`Node`](node::Node):
//! - A **leaf** holds the remaining nibbles of exactly one key together with its value.
//! - A **branch** holds up to 16 children (one per next nibble) and optionally the value of the key
//!   that ends at the branch.
//!
//! The shape is a function of the key set only: a key set of size 1 under a given prefix is a leaf,
//! larger key sets are branches. Two tries with the same entries therefore have the same root hash
//! regardless of insertion order.

pub mod node;

pub mod trie;

pub mod proof;

pub mod builder;

use crate::{
    errors::{CoreError, ErrorKind},
    types::data_types::CryptoHash,
};

/// Root of a trie. An empty trie has no root.
pub type MerkleRoot = Option<CryptoHash>;

/// Encode `int` as an unsigned LEB128 varint. Used for index keys of list-like tries.
pub fn varint(mut int: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(2);
    loop {
        let byte = (int & 0x7f) as u8;
        int >>= 7;
        if int == 0 {
            bytes.push(byte);
            return bytes;
        }
        bytes.push(byte | 0x80);
    }
}

/// Decode an unsigned LEB128 varint that spans the whole of `bytes`.
pub fn decode_varint(bytes: &[u8]) -> Option<u64> {
    let mut int: u64 = 0;
    for (i, byte) in bytes.iter().enumerate() {
        if i >= 10 {
            return None;
        }
        int |= ((byte & 0x7f) as u64) << (7 * i);
        if byte & 0x80 == 0 {
            return if i + 1 == bytes.len() { Some(int) } else { None };
        }
    }
    None
}

#[derive(Debug)]
pub enum TrieError {
    /// A node referenced by hash is not in the store.
    MissingNode(CryptoHash),
    CorruptNode {
        hash: CryptoHash,
        source: std::io::Error,
    },
    InvalidProof,
}

impl From<TrieError> for CoreError {
    fn from(value: TrieError) -> Self {
        match value {
            TrieError::MissingNode(hash) => {
                ErrorKind::NotFound.error(format!("trie node {} not found", hash))
            }
            TrieError::CorruptNode { hash, source } => {
                ErrorKind::InvalidFormat.error(format!("trie node {} is corrupt: {}", hash, source))
            }
            TrieError::InvalidProof => ErrorKind::InvalidFormat.error("invalid merkle proof"),
        }
    }
}
