/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`Builder`]: a work queue of unresolved hashes that reconstructs merkle structures from values
//! supplied one at a time (typically by peers during state sync).
//!
//! ## Requesting
//!
//! A consumer asks for a hash with [`request_trie`](Builder::request_trie) (the hash is a trie root)
//! or [`request_data`](Builder::request_data) (the hash names a single value in a content-addressed
//! bucket). If the value is already available locally it is consumed immediately; otherwise the
//! hash joins the queue of unresolved hashes, together with the list of consumers waiting for it.
//!
//! ## Resolving
//!
//! [`on_data`](Builder::on_data) accepts a value only if its SHA3-256 hash is an outstanding request.
//! Consuming a trie node enqueues its children. Consuming a leaf may enqueue further roots,
//! depending on the [`LeafKind`] of the trie: account leaves reference their storage trie and v2+
//! receipt leaves reference their event-log trie.
//!
//! Resolved values are staged in memory and only written to the key-value store on
//! [`flush`](Builder::flush).

use std::{
    collections::{HashMap, HashSet, VecDeque},
    mem,
};

use crate::{
    receipt::receipt::Receipt,
    storage::{buckets::BucketID, pluggables::KVStore, write_batch::ChainWriteBatch},
    types::{crypto_primitives::sha3_256, data_types::CryptoHash},
    world_state::AccountState,
};

use super::{node::Node, TrieError};

/// How to interpret the values stored in a trie's nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LeafKind {
    /// Opaque values.
    Plain,
    /// Values are encoded [`AccountState`]s referencing a storage trie.
    Account,
    /// Values are encoded receipts, possibly referencing an event-log trie.
    Receipt,
}

/// Who is waiting for a hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Requester {
    TrieNode(LeafKind),
    Bytes(BucketID),
}

/// Work queue of unresolved hashes, see the [module-level docs](self).
pub struct Builder<K: KVStore> {
    kv_store: K,
    pending: HashMap<CryptoHash, Vec<Requester>>,
    queue: VecDeque<CryptoHash>,
    staged: ChainWriteBatch<K::WriteBatch>,
    staged_values: HashMap<CryptoHash, Vec<u8>>,
    resolved: usize,
}

impl<K: KVStore> Builder<K> {
    pub fn new(kv_store: K) -> Builder<K> {
        Builder {
            kv_store,
            pending: HashMap::new(),
            queue: VecDeque::new(),
            staged: ChainWriteBatch::new(),
            staged_values: HashMap::new(),
            resolved: 0,
        }
    }

    /// Request every node of the trie rooted at `root`.
    pub fn request_trie(&mut self, root: CryptoHash, kind: LeafKind) -> Result<(), TrieError> {
        self.request(root, Requester::TrieNode(kind))
    }

    /// Request the single value with `hash` in `bucket`.
    pub fn request_data(&mut self, bucket: BucketID, hash: CryptoHash) -> Result<(), TrieError> {
        self.request(hash, Requester::Bytes(bucket))
    }

    fn request(&mut self, hash: CryptoHash, requester: Requester) -> Result<(), TrieError> {
        let mut work = vec![(hash, requester)];
        while let Some((hash, requester)) = work.pop() {
            if let Some(requesters) = self.pending.get_mut(&hash) {
                if !requesters.contains(&requester) {
                    requesters.push(requester);
                }
                continue;
            }
            match self.local_value(&hash, requester) {
                Some(value) => work.extend(consume(&hash, &value, requester)?),
                None => {
                    self.pending.insert(hash, vec![requester]);
                    self.queue.push_back(hash);
                }
            }
        }
        Ok(())
    }

    fn local_value(&self, hash: &CryptoHash, requester: Requester) -> Option<Vec<u8>> {
        if let Some(value) = self.staged_values.get(hash) {
            return Some(value.clone());
        }
        match requester {
            Requester::TrieNode(_) => self.kv_store.trie_node(hash),
            Requester::Bytes(bucket) => self.kv_store.bucket_value(bucket, hash),
        }
    }

    /// Feed a value received from a peer.
    ///
    /// Returns `Ok(true)` if the value resolved an outstanding request, `Ok(false)` if nobody asked for
    /// it. A value that hashes correctly but cannot be decoded is rejected and the request stays
    /// outstanding.
    pub fn on_data(&mut self, value: &[u8]) -> Result<bool, TrieError> {
        let hash = sha3_256(value);
        let requesters = match self.pending.get(&hash) {
            Some(requesters) => requesters.clone(),
            None => return Ok(false),
        };

        let mut work = Vec::new();
        for requester in requesters.iter() {
            work.extend(consume(&hash, value, *requester)?);
        }

        self.pending.remove(&hash);
        for requester in requesters {
            match requester {
                Requester::TrieNode(_) => self.staged.set_trie_node(&hash, value),
                Requester::Bytes(bucket) => self.staged.set_bucket_value(bucket, &hash, value),
            }
        }
        self.staged_values.insert(hash, value.to_vec());
        self.resolved += 1;

        if self.queue.len() > 2 * self.pending.len() + 64 {
            let pending = &self.pending;
            self.queue.retain(|hash| pending.contains_key(hash));
        }

        for (hash, requester) in work {
            self.request(hash, requester)?;
        }
        Ok(true)
    }

    /// Number of hashes still waiting for a value.
    pub fn unresolved_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of values resolved from [`on_data`](Self::on_data) so far.
    pub fn resolved_count(&self) -> usize {
        self.resolved
    }

    /// Whether `hash` is still waiting for a value.
    pub fn is_pending(&self, hash: &CryptoHash) -> bool {
        self.pending.contains_key(hash)
    }

    /// Get up to `limit` unresolved hashes in request order, skipping those in `exclude`.
    pub fn unresolved(&self, limit: usize, exclude: &HashSet<CryptoHash>) -> Vec<CryptoHash> {
        let mut seen = HashSet::new();
        self.queue
            .iter()
            .filter(|hash| self.pending.contains_key(hash) && !exclude.contains(hash))
            .filter(|hash| seen.insert(**hash))
            .take(limit)
            .copied()
            .collect()
    }

    /// Write everything resolved so far into the key-value store.
    pub fn flush(&mut self) {
        let staged = mem::take(&mut self.staged);
        self.kv_store.write(staged.into_inner());
        self.staged_values.clear();
    }
}

/// Consume one value on behalf of `requester`, returning the hashes it references.
fn consume(
    hash: &CryptoHash,
    value: &[u8],
    requester: Requester,
) -> Result<Vec<(CryptoHash, Requester)>, TrieError> {
    let kind = match requester {
        Requester::Bytes(_) => return Ok(Vec::new()),
        Requester::TrieNode(kind) => kind,
    };
    let node = Node::from_bytes(hash, value)?;
    let mut referenced: Vec<(CryptoHash, Requester)> = node
        .child_hashes()
        .into_iter()
        .map(|child| (child, Requester::TrieNode(kind)))
        .collect();
    if let Some(leaf) = node.value() {
        if let Some(root) = leaf_reference(hash, kind, leaf)? {
            referenced.push((root, Requester::TrieNode(LeafKind::Plain)));
        }
    }
    Ok(referenced)
}

fn leaf_reference(
    hash: &CryptoHash,
    kind: LeafKind,
    leaf: &[u8],
) -> Result<Option<CryptoHash>, TrieError> {
    let corrupt = |reason: String| TrieError::CorruptNode {
        hash: *hash,
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, reason),
    };
    match kind {
        LeafKind::Plain => Ok(None),
        LeafKind::Account => AccountState::from_bytes(leaf)
            .map(|account| account.storage_root)
            .map_err(|err| corrupt(err.to_string())),
        LeafKind::Receipt => {
            Receipt::event_logs_root_from_bytes(leaf).map_err(|err| corrupt(err.to_string()))
        }
    }
}
