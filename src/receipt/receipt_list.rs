//! The ordered list of receipts produced by executing one transaction group.
//!
//! A receipt list is a merkle trie mapping the varint-encoded index of each transaction to the
//! encoding of its receipt. Its root is what a transition result commits to.

use crate::{
    merkle::{trie::MerkleTrie, varint, MerkleRoot},
    storage::{pluggables::EmptyStore, write_batch::ChainWriteBatch, KVGet, WriteBatch},
};

use super::{receipt::Receipt, ReceiptError};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReceiptList(Vec<Receipt>);

impl ReceiptList {
    pub fn new(receipts: Vec<Receipt>) -> ReceiptList {
        ReceiptList(receipts)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Receipt> {
        self.0.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Receipt> {
        self.0.iter()
    }

    fn trie(&self) -> MerkleTrie<EmptyStore> {
        let mut trie = MerkleTrie::new(EmptyStore, None);
        for (index, receipt) in self.0.iter().enumerate() {
            trie.set(&varint(index as u64), receipt.bytes())
                .expect("in-memory trie over an empty source never loads a node");
        }
        trie
    }

    /// Root of the receipt trie.
    pub fn hash(&self) -> MerkleRoot {
        self.trie().root_hash()
    }

    /// Write the receipt trie and every receipt's event-log trie into `wb`.
    pub fn flush<W: WriteBatch>(&self, wb: &mut ChainWriteBatch<W>) -> MerkleRoot {
        for receipt in self.0.iter() {
            receipt.flush(wb);
        }
        self.trie().flush(wb)
    }

    /// Read the receipt at `index` from the list rooted at `root`.
    pub fn get_stored<S: KVGet>(
        source: S,
        root: MerkleRoot,
        index: usize,
    ) -> Result<Option<Receipt>, ReceiptError> {
        match MerkleTrie::new(source, root).get(&varint(index as u64))? {
            Some(bytes) => Ok(Some(Receipt::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Read the whole list rooted at `root`.
    pub fn load<S: KVGet>(source: S, root: MerkleRoot) -> Result<ReceiptList, ReceiptError> {
        let trie = MerkleTrie::new(source, root);
        let mut receipts = Vec::new();
        while let Some(bytes) = trie.get(&varint(receipts.len() as u64))? {
            receipts.push(Receipt::from_bytes(&bytes)?);
        }
        Ok(ReceiptList(receipts))
    }

    /// Get a merkle proof of the receipt at `index` in the list rooted at `root`.
    pub fn proof<S: KVGet>(
        source: S,
        root: MerkleRoot,
        index: usize,
    ) -> Result<Vec<Vec<u8>>, ReceiptError> {
        MerkleTrie::new(source, root)
            .proof(&varint(index as u64))?
            .ok_or_else(|| ReceiptError::NotFound(format!("receipt {}", index)))
    }
}

impl FromIterator<Receipt> for ReceiptList {
    fn from_iter<T: IntoIterator<Item = Receipt>>(iter: T) -> Self {
        ReceiptList(iter.into_iter().collect())
    }
}
