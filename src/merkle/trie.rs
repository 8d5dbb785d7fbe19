/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The mutable, lazily-loaded [`MerkleTrie`].
//!
//! A `MerkleTrie` starts from a root hash (or empty) and loads nodes from its source on demand.
//! Updates are applied to an in-memory copy of the touched path. Nothing is written until
//! [`flush`](MerkleTrie::flush) puts every in-memory node into a
//! [`ChainWriteBatch`](crate::storage::write_batch::ChainWriteBatch).

use std::mem;

use crate::{
    storage::{pluggables::KVGet, write_batch::ChainWriteBatch, WriteBatch},
    types::data_types::CryptoHash,
};

use super::{
    node::{from_nibbles, to_nibbles, Node, BRANCH_WIDTH},
    MerkleRoot, TrieError,
};

#[derive(Clone, Debug)]
enum MemNode {
    Empty,
    /// Not loaded yet.
    Stored(CryptoHash),
    Leaf {
        path: Vec<u8>,
        value: Vec<u8>,
    },
    Branch {
        children: Vec<MemNode>,
        value: Option<Vec<u8>>,
    },
}

impl MemNode {
    fn empty_branch() -> MemNode {
        MemNode::Branch {
            children: vec![MemNode::Empty; BRANCH_WIDTH],
            value: None,
        }
    }

    fn from_node(node: Node) -> MemNode {
        match node {
            Node::Leaf { path, value } => MemNode::Leaf { path, value },
            Node::Branch { children, value } => MemNode::Branch {
                children: children
                    .into_iter()
                    .map(|child| child.map_or(MemNode::Empty, MemNode::Stored))
                    .collect(),
                value,
            },
        }
    }

    fn hash(&self) -> Option<CryptoHash> {
        match self {
            MemNode::Empty => None,
            MemNode::Stored(hash) => Some(*hash),
            _ => self.to_node().map(|node| node.hash()),
        }
    }

    fn to_node(&self) -> Option<Node> {
        match self {
            MemNode::Empty | MemNode::Stored(_) => None,
            MemNode::Leaf { path, value } => Some(Node::Leaf {
                path: path.clone(),
                value: value.clone(),
            }),
            MemNode::Branch { children, value } => Some(Node::Branch {
                children: children.iter().map(MemNode::hash).collect(),
                value: value.clone(),
            }),
        }
    }

    fn write<W: WriteBatch>(&self, wb: &mut ChainWriteBatch<W>) -> Option<CryptoHash> {
        let node = match self {
            MemNode::Empty => return None,
            MemNode::Stored(hash) => return Some(*hash),
            MemNode::Leaf { path, value } => Node::Leaf {
                path: path.clone(),
                value: value.clone(),
            },
            MemNode::Branch { children, value } => Node::Branch {
                children: children.iter().map(|child| child.write(wb)).collect(),
                value: value.clone(),
            },
        };
        let bytes = node.bytes();
        let hash = node.hash();
        wb.set_trie_node(&hash, &bytes);
        Some(hash)
    }
}

/// A hexary merkle trie over a node source.
#[derive(Clone)]
pub struct MerkleTrie<S> {
    source: S,
    root: MemNode,
}

impl<S: KVGet> MerkleTrie<S> {
    /// Open the trie rooted at `root`, reading nodes from `source`.
    pub fn new(source: S, root: MerkleRoot) -> MerkleTrie<S> {
        MerkleTrie {
            source,
            root: root.map_or(MemNode::Empty, MemNode::Stored),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.root, MemNode::Empty)
    }

    /// Compute the root hash of the trie in its current state.
    pub fn root_hash(&self) -> MerkleRoot {
        self.root.hash()
    }

    fn load(&self, hash: &CryptoHash) -> Result<Node, TrieError> {
        let bytes = self
            .source
            .trie_node(hash)
            .ok_or(TrieError::MissingNode(*hash))?;
        Node::from_bytes(hash, &bytes)
    }

    fn resolve(&self, node: &mut MemNode) -> Result<(), TrieError> {
        if let MemNode::Stored(hash) = node {
            let loaded = MemNode::from_node(self.load(hash)?);
            *node = loaded;
        }
        Ok(())
    }

    /* ↓↓↓ Reads ↓↓↓ */

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        let path = to_nibbles(key);
        let mut depth = 0;
        let mut node = &self.root;
        loop {
            match node {
                MemNode::Empty => return Ok(None),
                MemNode::Stored(hash) => return self.get_stored(*hash, &path[depth..]),
                MemNode::Leaf {
                    path: leaf_path,
                    value,
                } => {
                    return Ok((leaf_path[..] == path[depth..]).then(|| value.clone()));
                }
                MemNode::Branch { children, value } => {
                    if depth == path.len() {
                        return Ok(value.clone());
                    }
                    node = &children[path[depth] as usize];
                    depth += 1;
                }
            }
        }
    }

    fn get_stored(&self, mut hash: CryptoHash, path: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        let mut depth = 0;
        loop {
            match self.load(&hash)? {
                Node::Leaf {
                    path: leaf_path,
                    value,
                } => return Ok((leaf_path[..] == path[depth..]).then_some(value)),
                Node::Branch { children, value } => {
                    if depth == path.len() {
                        return Ok(value);
                    }
                    match children[path[depth] as usize] {
                        Some(child) => {
                            hash = child;
                            depth += 1;
                        }
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    /// Get a merkle proof of the entry at `key`: the encodings of every node on the path from the root
    /// to the node holding the value. Returns `None` if `key` is absent.
    pub fn proof(&self, key: &[u8]) -> Result<Option<Vec<Vec<u8>>>, TrieError> {
        let path = to_nibbles(key);
        let mut proof = Vec::new();
        let mut depth = 0;
        let mut node = &self.root;
        loop {
            if let Some(encoded) = node.to_node() {
                proof.push(encoded.bytes());
            }
            match node {
                MemNode::Empty => return Ok(None),
                MemNode::Stored(hash) => return self.stored_proof(*hash, &path[depth..], proof),
                MemNode::Leaf {
                    path: leaf_path, ..
                } => return Ok((leaf_path[..] == path[depth..]).then_some(proof)),
                MemNode::Branch { children, value } => {
                    if depth == path.len() {
                        return Ok(value.as_ref().map(|_| proof));
                    }
                    node = &children[path[depth] as usize];
                    depth += 1;
                }
            }
        }
    }

    fn stored_proof(
        &self,
        mut hash: CryptoHash,
        path: &[u8],
        mut proof: Vec<Vec<u8>>,
    ) -> Result<Option<Vec<Vec<u8>>>, TrieError> {
        let mut depth = 0;
        loop {
            let bytes = self
                .source
                .trie_node(&hash)
                .ok_or(TrieError::MissingNode(hash))?;
            let node = Node::from_bytes(&hash, &bytes)?;
            proof.push(bytes);
            match node {
                Node::Leaf {
                    path: leaf_path, ..
                } => return Ok((leaf_path[..] == path[depth..]).then_some(proof)),
                Node::Branch { children, value } => {
                    if depth == path.len() {
                        return Ok(value.map(|_| proof));
                    }
                    match children[path[depth] as usize] {
                        Some(child) => {
                            hash = child;
                            depth += 1;
                        }
                        None => return Ok(None),
                    }
                }
            }
        }
    }

    /// Iterate through all entries in ascending key order.
    pub fn iter(&self) -> TrieIterator<'_, S> {
        TrieIterator {
            source: &self.source,
            stack: vec![(Vec::new(), Pending::Mem(&self.root))],
        }
    }

    /* ↓↓↓ Writes ↓↓↓ */

    pub fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), TrieError> {
        let path = to_nibbles(key);
        let mut root = mem::replace(&mut self.root, MemNode::Empty);
        let result = self.insert(&mut root, &path, value);
        self.root = root;
        result
    }

    /// Remove the entry at `key`, returning its value if it was present.
    pub fn delete(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        let path = to_nibbles(key);
        let mut root = mem::replace(&mut self.root, MemNode::Empty);
        let result = self.remove(&mut root, &path);
        self.root = root;
        result
    }

    fn insert(&self, node: &mut MemNode, path: &[u8], value: Vec<u8>) -> Result<(), TrieError> {
        self.resolve(node)?;
        match node {
            MemNode::Empty => {
                *node = MemNode::Leaf {
                    path: path.to_vec(),
                    value,
                };
            }
            MemNode::Leaf {
                path: leaf_path,
                value: leaf_value,
            } => {
                if leaf_path[..] == path[..] {
                    *leaf_value = value;
                } else {
                    let old_path = mem::take(leaf_path);
                    let old_value = mem::take(leaf_value);
                    let mut branch = MemNode::empty_branch();
                    if let MemNode::Branch {
                        children,
                        value: branch_value,
                    } = &mut branch
                    {
                        match old_path.split_first() {
                            None => *branch_value = Some(old_value),
                            Some((first, rest)) => {
                                children[*first as usize] = MemNode::Leaf {
                                    path: rest.to_vec(),
                                    value: old_value,
                                }
                            }
                        }
                    }
                    self.insert(&mut branch, path, value)?;
                    *node = branch;
                }
            }
            MemNode::Branch {
                children,
                value: branch_value,
            } => match path.split_first() {
                None => *branch_value = Some(value),
                Some((first, rest)) => self.insert(&mut children[*first as usize], rest, value)?,
            },
            MemNode::Stored(_) => unreachable!("node resolved before insert"),
        }
        Ok(())
    }

    fn remove(&self, node: &mut MemNode, path: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        self.resolve(node)?;
        let removed = match node {
            MemNode::Empty => None,
            MemNode::Leaf {
                path: leaf_path,
                value,
            } => {
                if leaf_path[..] == path[..] {
                    let value = mem::take(value);
                    *node = MemNode::Empty;
                    Some(value)
                } else {
                    None
                }
            }
            MemNode::Branch { children, value } => match path.split_first() {
                None => value.take(),
                Some((first, rest)) => self.remove(&mut children[*first as usize], rest)?,
            },
            MemNode::Stored(_) => unreachable!("node resolved before remove"),
        };
        if removed.is_some() {
            self.collapse(node)?;
        }
        Ok(removed)
    }

    /// Restore the canonical shape of a branch after a removal below it.
    fn collapse(&self, node: &mut MemNode) -> Result<(), TrieError> {
        let (children, value) = match node {
            MemNode::Branch { children, value } => (children, value),
            _ => return Ok(()),
        };
        let occupied: Vec<usize> = children
            .iter()
            .enumerate()
            .filter(|(_, child)| !matches!(child, MemNode::Empty))
            .map(|(index, _)| index)
            .collect();

        match (occupied.len(), value.is_some()) {
            (0, false) => *node = MemNode::Empty,
            (0, true) => {
                let value = value.take().unwrap_or_default();
                *node = MemNode::Leaf {
                    path: Vec::new(),
                    value,
                };
            }
            (1, false) => {
                let index = occupied[0];
                let child = &mut children[index];
                self.resolve(child)?;
                if let MemNode::Leaf { path, value } = child {
                    let mut merged = Vec::with_capacity(path.len() + 1);
                    merged.push(index as u8);
                    merged.append(path);
                    let value = mem::take(value);
                    *node = MemNode::Leaf {
                        path: merged,
                        value,
                    };
                }
            }
            _ => (),
        }
        Ok(())
    }

    /// Write every in-memory node into `wb` and return the root hash.
    pub fn flush<W: WriteBatch>(&self, wb: &mut ChainWriteBatch<W>) -> MerkleRoot {
        self.root.write(wb)
    }
}

enum Pending<'t> {
    Mem(&'t MemNode),
    Stored(CryptoHash),
}

/// Iterator over the entries of a [`MerkleTrie`] in ascending key order.
pub struct TrieIterator<'t, S> {
    source: &'t S,
    stack: Vec<(Vec<u8>, Pending<'t>)>,
}

fn with_nibble(prefix: &[u8], nibble: usize) -> Vec<u8> {
    let mut path = Vec::with_capacity(prefix.len() + 1);
    path.extend_from_slice(prefix);
    path.push(nibble as u8);
    path
}

impl<'t, S: KVGet> Iterator for TrieIterator<'t, S> {
    type Item = Result<(Vec<u8>, Vec<u8>), TrieError>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((prefix, pending)) = self.stack.pop() {
            match pending {
                Pending::Mem(MemNode::Empty) => continue,
                Pending::Mem(MemNode::Stored(hash)) => {
                    self.stack.push((prefix, Pending::Stored(*hash)))
                }
                Pending::Mem(MemNode::Leaf { path, value }) => {
                    let key = from_nibbles(&[prefix.as_slice(), path.as_slice()].concat());
                    return Some(Ok((key, value.clone())));
                }
                Pending::Mem(MemNode::Branch { children, value }) => {
                    for (index, child) in children.iter().enumerate().rev() {
                        if !matches!(child, MemNode::Empty) {
                            self.stack
                                .push((with_nibble(&prefix, index), Pending::Mem(child)));
                        }
                    }
                    if let Some(value) = value {
                        return Some(Ok((from_nibbles(&prefix), value.clone())));
                    }
                }
                Pending::Stored(hash) => {
                    let node = match self
                        .source
                        .trie_node(&hash)
                        .ok_or(TrieError::MissingNode(hash))
                        .and_then(|bytes| Node::from_bytes(&hash, &bytes))
                    {
                        Ok(node) => node,
                        Err(err) => {
                            self.stack.clear();
                            return Some(Err(err));
                        }
                    };
                    match node {
                        Node::Leaf { path, value } => {
                            let key = from_nibbles(&[prefix.as_slice(), path.as_slice()].concat());
                            return Some(Ok((key, value)));
                        }
                        Node::Branch { children, value } => {
                            for (index, child) in children.iter().enumerate().rev() {
                                if let Some(child) = child {
                                    self.stack
                                        .push((with_nibble(&prefix, index), Pending::Stored(*child)));
                                }
                            }
                            if let Some(value) = value {
                                return Some(Ok((from_nibbles(&prefix), value)));
                            }
                        }
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::HashMap};

    use super::*;

    #[derive(Default)]
    struct MapStore(RefCell<HashMap<Vec<u8>, Vec<u8>>>);

    impl KVGet for MapStore {
        fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
            self.0.borrow().get(key).cloned()
        }
    }

    struct MapBatch(Vec<(Vec<u8>, Vec<u8>)>);

    impl WriteBatch for MapBatch {
        fn new() -> Self {
            MapBatch(Vec::new())
        }
        fn set(&mut self, key: &[u8], value: &[u8]) {
            self.0.push((key.to_vec(), value.to_vec()))
        }
        fn delete(&mut self, _: &[u8]) {}
    }

    fn persist(store: &MapStore, trie: &MerkleTrie<&MapStore>) -> MerkleRoot {
        let mut wb = ChainWriteBatch::<MapBatch>::new();
        let root = trie.flush(&mut wb);
        for (key, value) in wb.into_inner().0 {
            store.0.borrow_mut().insert(key, value);
        }
        root
    }

    #[test]
    fn root_is_independent_of_insertion_order() {
        let store = MapStore::default();
        let entries: Vec<(Vec<u8>, Vec<u8>)> = vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"ab".to_vec(), b"2".to_vec()),
            (b"abc".to_vec(), b"3".to_vec()),
            (b"b".to_vec(), b"4".to_vec()),
            (vec![0x10], b"5".to_vec()),
        ];

        let mut forward = MerkleTrie::new(&store, None);
        for (key, value) in entries.iter() {
            forward.set(key, value.clone()).unwrap();
        }
        let mut backward = MerkleTrie::new(&store, None);
        for (key, value) in entries.iter().rev() {
            backward.set(key, value.clone()).unwrap();
        }
        assert_eq!(forward.root_hash(), backward.root_hash());

        for (key, value) in entries.iter() {
            assert_eq!(forward.get(key).unwrap().as_ref(), Some(value));
        }
        assert_eq!(forward.get(b"abcd").unwrap(), None);
    }

    #[test]
    fn delete_restores_previous_root() {
        let store = MapStore::default();
        let mut trie = MerkleTrie::new(&store, None);
        trie.set(b"key1", b"v1".to_vec()).unwrap();
        trie.set(b"key2", b"v2".to_vec()).unwrap();
        let before = trie.root_hash();

        trie.set(b"key3", b"v3".to_vec()).unwrap();
        assert_ne!(trie.root_hash(), before);
        assert_eq!(trie.delete(b"key3").unwrap(), Some(b"v3".to_vec()));
        assert_eq!(trie.root_hash(), before);

        assert_eq!(trie.delete(b"missing").unwrap(), None);
        trie.delete(b"key1").unwrap();
        trie.delete(b"key2").unwrap();
        assert!(trie.is_empty());
        assert_eq!(trie.root_hash(), None);
    }

    #[test]
    fn reopened_trie_reads_and_iterates_in_key_order() {
        let store = MapStore::default();
        let mut trie = MerkleTrie::new(&store, None);
        for i in (0u8..20).rev() {
            trie.set(&[i, i], vec![i]).unwrap();
        }
        let root = persist(&store, &trie);

        let reopened = MerkleTrie::new(&store, root);
        assert_eq!(reopened.get(&[7, 7]).unwrap(), Some(vec![7]));
        let keys: Vec<Vec<u8>> = reopened.iter().map(|entry| entry.unwrap().0).collect();
        let expected: Vec<Vec<u8>> = (0u8..20).map(|i| vec![i, i]).collect();
        assert_eq!(keys, expected);

        let mut updated = MerkleTrie::new(&store, root);
        updated.set(&[7, 7], vec![70]).unwrap();
        assert_eq!(updated.get(&[7, 7]).unwrap(), Some(vec![70]));
        assert_ne!(updated.root_hash(), root);
    }
}
