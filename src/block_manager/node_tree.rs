/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The in-memory tree of blocks that extend the last finalized block.
//!
//! The root is always the last finalized block. Every other node is a block that was imported or
//! proposed on top of a node already in the tree and whose transitions executed successfully.
//!
//! A non-root node stays in the tree while a [candidate](super::BlockCandidate) refers to it or it
//! has children. When the last candidate of a leaf is disposed, the leaf is removed, and so is every
//! ancestor that is left without candidates and children. Finalizing a block removes every node that
//! does not descend from it.

use std::collections::HashMap;

use crate::{
    block::Block,
    transition::tree::Handle,
    types::{data_types::CryptoHash, validator_list::ValidatorList},
};

pub(crate) struct BlockNode {
    pub(crate) block: Block,
    pub(crate) parent: Option<CryptoHash>,
    pub(crate) children: Vec<CryptoHash>,
    /// The transition that applied this block's patch transactions on its parent's state.
    pub(crate) in_transition: Handle,
    /// The transition that applies this block's normal transactions. Its result is committed to by
    /// this block's children.
    pub(crate) preexe: Handle,
    /// The validators whose votes certify this block, i.e., the parent's next validators.
    pub(crate) validators: Option<ValidatorList>,
    pub(crate) next_validators: Option<ValidatorList>,
    pub(crate) candidates: usize,
}

pub(crate) struct NodeTree {
    nodes: HashMap<CryptoHash, BlockNode>,
    root: CryptoHash,
}

impl NodeTree {
    pub(crate) fn new(root: BlockNode) -> NodeTree {
        let root_id = root.block.id();
        let mut nodes = HashMap::new();
        nodes.insert(root_id, root);
        NodeTree {
            nodes,
            root: root_id,
        }
    }

    pub(crate) fn root_id(&self) -> CryptoHash {
        self.root
    }

    pub(crate) fn root(&self) -> &BlockNode {
        self.nodes
            .get(&self.root)
            .expect("the root is only removed when another node replaces it")
    }

    pub(crate) fn get(&self, id: &CryptoHash) -> Option<&BlockNode> {
        self.nodes.get(id)
    }

    pub(crate) fn contains(&self, id: &CryptoHash) -> bool {
        self.nodes.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Attach `node` under its parent, which must be in the tree.
    pub(crate) fn add(&mut self, node: BlockNode) {
        let id = node.block.id();
        if let Some(parent) = node.parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            parent.children.push(id);
        }
        self.nodes.insert(id, node);
    }

    pub(crate) fn add_candidate(&mut self, id: &CryptoHash) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) => {
                node.candidates += 1;
                true
            }
            None => false,
        }
    }

    /// Drop one candidate reference to `id`. Returns the transitions of every node that this
    /// removed from the tree.
    pub(crate) fn remove_candidate(&mut self, id: &CryptoHash) -> Vec<Handle> {
        match self.nodes.get_mut(id) {
            Some(node) if node.candidates > 0 => node.candidates -= 1,
            _ => return Vec::new(),
        }
        let mut released = Vec::new();
        let mut next = Some(*id);
        while let Some(id) = next {
            next = None;
            let unreferenced = match self.nodes.get(&id) {
                Some(node) => id != self.root && node.candidates == 0 && node.children.is_empty(),
                None => false,
            };
            if unreferenced {
                if let Some(node) = self.nodes.remove(&id) {
                    if let Some(parent) = node.parent.and_then(|parent| self.nodes.get_mut(&parent))
                    {
                        parent.children.retain(|child| *child != id);
                    }
                    next = node.parent;
                    released.push(node.in_transition);
                    released.push(node.preexe);
                }
            }
        }
        released
    }

    /// Make `new_root`, a child of the current root, the root. The old root and every subtree that
    /// does not contain `new_root` are removed; their transitions are returned.
    pub(crate) fn advance_root(&mut self, new_root: &CryptoHash) -> Vec<Handle> {
        let mut released = Vec::new();
        let old_root = match self.nodes.remove(&self.root) {
            Some(node) => node,
            None => return released,
        };
        for child in old_root.children.iter().filter(|child| *child != new_root) {
            self.remove_subtree(child, &mut released);
        }
        released.push(old_root.in_transition);
        released.push(old_root.preexe);
        if let Some(node) = self.nodes.get_mut(new_root) {
            node.parent = None;
        }
        self.root = *new_root;
        released
    }

    /// Remove every node, returning all of their transitions.
    pub(crate) fn clear(&mut self) -> Vec<Handle> {
        self.nodes
            .drain()
            .flat_map(|(_, node)| [node.in_transition, node.preexe])
            .collect()
    }

    fn remove_subtree(&mut self, id: &CryptoHash, released: &mut Vec<Handle>) {
        if let Some(node) = self.nodes.remove(id) {
            for child in node.children.iter() {
                self.remove_subtree(child, released);
            }
            released.push(node.in_transition);
            released.push(node.preexe);
        }
    }
}
