//! Verification of merkle proofs produced by [`MerkleTrie::proof`](super::trie::MerkleTrie::proof).

use crate::types::{crypto_primitives::sha3_256, data_types::CryptoHash};

use super::{
    node::{to_nibbles, Node},
    TrieError,
};

/// Check that `proof` proves the entry at `key` in the trie rooted at `root`, and return the proven
/// value.
///
/// Each element of `proof` must be the encoding of a node whose hash is the reference held by the
/// previous node (or `root`, for the first element) for the next nibbles of `key`.
pub fn verify_proof(
    root: &CryptoHash,
    key: &[u8],
    proof: &[Vec<u8>],
) -> Result<Vec<u8>, TrieError> {
    let path = to_nibbles(key);
    let mut expected = *root;
    let mut depth = 0;

    for (position, bytes) in proof.iter().enumerate() {
        if sha3_256(bytes) != expected {
            return Err(TrieError::InvalidProof);
        }
        let node = Node::from_bytes(&expected, bytes)?;
        let is_last = position + 1 == proof.len();
        match node {
            Node::Leaf {
                path: leaf_path,
                value,
            } => {
                return if is_last && leaf_path[..] == path[depth..] {
                    Ok(value)
                } else {
                    Err(TrieError::InvalidProof)
                };
            }
            Node::Branch { children, value } => {
                if depth == path.len() {
                    return match (is_last, value) {
                        (true, Some(value)) => Ok(value),
                        _ => Err(TrieError::InvalidProof),
                    };
                }
                expected = children[path[depth] as usize].ok_or(TrieError::InvalidProof)?;
                depth += 1;
            }
        }
    }
    Err(TrieError::InvalidProof)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{merkle::trie::MerkleTrie, storage::pluggables::EmptyStore};

    #[test]
    fn proofs_verify_against_root_only() {
        let mut trie = MerkleTrie::new(EmptyStore, None);
        for i in 0u8..40 {
            trie.set(&[i], vec![i; 3]).unwrap();
        }
        let root = trie.root_hash().unwrap();

        let proof = trie.proof(&[17]).unwrap().unwrap();
        assert_eq!(verify_proof(&root, &[17], &proof).unwrap(), vec![17; 3]);
        assert!(verify_proof(&root, &[18], &proof).is_err());

        let other_root = sha3_256(b"other");
        assert!(verify_proof(&other_root, &[17], &proof).is_err());

        let mut tampered = proof.clone();
        tampered.pop();
        assert!(verify_proof(&root, &[17], &tampered).is_err());

        assert!(trie.proof(&[200]).unwrap().is_none());
    }
}
