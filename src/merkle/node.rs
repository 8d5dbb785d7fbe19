//! Stored form of trie nodes.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{crypto_primitives::sha3_256, data_types::CryptoHash};

use super::TrieError;

/// Number of children of a branch node.
pub const BRANCH_WIDTH: usize = 16;

/// A trie node as it is stored in the [`MERKLE_TRIE`](crate::storage::buckets::MERKLE_TRIE) bucket.
///
/// Paths are sequences of nibbles (each element is `0..16`).
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum Node {
    Leaf {
        path: Vec<u8>,
        value: Vec<u8>,
    },
    Branch {
        children: Vec<Option<CryptoHash>>,
        value: Option<Vec<u8>>,
    },
}

impl Node {
    pub fn bytes(&self) -> Vec<u8> {
        self.try_to_vec().unwrap()
    }

    pub fn hash(&self) -> CryptoHash {
        sha3_256(&self.bytes())
    }

    /// Decode a node stored under `hash`. Fails if the bytes are not a well-formed node.
    pub fn from_bytes(hash: &CryptoHash, bytes: &[u8]) -> Result<Node, TrieError> {
        let node = Node::deserialize(&mut &*bytes).map_err(|source| TrieError::CorruptNode {
            hash: *hash,
            source,
        })?;
        if let Node::Branch { children, .. } = &node {
            if children.len() != BRANCH_WIDTH {
                return Err(TrieError::CorruptNode {
                    hash: *hash,
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("branch with {} children", children.len()),
                    ),
                });
            }
        }
        Ok(node)
    }

    /// Hashes of the nodes this node references.
    pub fn child_hashes(&self) -> Vec<CryptoHash> {
        match self {
            Node::Leaf { .. } => Vec::new(),
            Node::Branch { children, .. } => children.iter().flatten().copied().collect(),
        }
    }

    /// The value stored directly in this node, if any.
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            Node::Leaf { value, .. } => Some(value),
            Node::Branch { value, .. } => value.as_deref(),
        }
    }
}

/// Split `key` into nibbles, high nibble first.
pub fn to_nibbles(key: &[u8]) -> Vec<u8> {
    let mut nibbles = Vec::with_capacity(key.len() * 2);
    for byte in key {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    nibbles
}

/// Join nibbles back into bytes. `nibbles` must have even length.
pub fn from_nibbles(nibbles: &[u8]) -> Vec<u8> {
    nibbles
        .chunks(2)
        .map(|pair| (pair[0] << 4) | pair.get(1).copied().unwrap_or(0))
        .collect()
}
