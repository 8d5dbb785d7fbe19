//! The ordered list of transactions of one group in a block body.

use crate::{
    merkle::{trie::MerkleTrie, varint, MerkleRoot},
    storage::pluggables::EmptyStore,
};

use super::{factory::FactoryRegistry, Transaction, TransactionError, TransactionInfo};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TransactionList(Vec<Transaction>);

impl TransactionList {
    pub fn new(transactions: Vec<Transaction>) -> TransactionList {
        TransactionList(transactions)
    }

    /// Parse every element of `bytes_list` with `registry`.
    pub fn from_bytes_list(
        registry: &FactoryRegistry,
        bytes_list: &[Vec<u8>],
    ) -> Result<TransactionList, TransactionError> {
        bytes_list
            .iter()
            .map(|bytes| registry.parse(bytes))
            .collect::<Result<Vec<Transaction>, TransactionError>>()
            .map(TransactionList)
    }

    /// Get the stored form of every transaction.
    pub fn bytes_list(&self) -> Vec<Vec<u8>> {
        self.0.iter().map(|tx| tx.bytes()).collect()
    }

    /// Root of the trie mapping each transaction's varint index to its bytes. An empty list has no
    /// root.
    pub fn hash(&self) -> MerkleRoot {
        let mut trie = MerkleTrie::new(EmptyStore, None);
        for (index, tx) in self.0.iter().enumerate() {
            trie.set(&varint(index as u64), tx.bytes())
                .expect("in-memory trie over an empty source never loads a node");
        }
        trie.root_hash()
    }

    pub fn get(&self, index: usize) -> Option<&Transaction> {
        self.0.get(index)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Transaction> {
        self.0.iter()
    }
}

impl FromIterator<Transaction> for TransactionList {
    fn from_iter<T: IntoIterator<Item = Transaction>>(iter: T) -> Self {
        TransactionList(iter.into_iter().collect())
    }
}

impl IntoIterator for TransactionList {
    type Item = Transaction;
    type IntoIter = std::vec::IntoIter<Transaction>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
