/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Signed commit votes and the commit-vote set carried in a block body.
//!
//! The commit-vote set in block `b` is evidence that a quorum of validators committed `b`'s parent.
//! It is checked by [`CommitVoteSet::verify_block`] against the validator list that governed the
//! parent.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    crypto_primitives::{sha3_256, verify_signature, Keypair, VerifyingKey},
    data_types::{BlockHeight, CryptoHash, SignatureBytes},
    validator_list::ValidatorList,
};

/// Data types that contain: 1. A message, and 2. A digital signature over said message whose
/// correctness can be verified against a `VerifyingKey`.
pub(crate) trait SignedMessage: Clone {
    /// Get the bytes that are passed as input into the signing function to form the signature
    /// of the `SignedMessage`.
    fn message_bytes(&self) -> Vec<u8>;

    /// Get the signature of the `SignedMessage`.
    fn signature_bytes(&self) -> SignatureBytes;

    /// Verify that `signature_bytes` is a signature created by `verifying_key` over `message_bytes`.
    fn is_correct(&self, verifying_key: &VerifyingKey) -> bool {
        verify_signature(verifying_key, &self.message_bytes(), &self.signature_bytes())
    }
}

/// The message a validator signs to commit a block.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct CommitVoteMessage {
    pub height: BlockHeight,
    pub block_id: CryptoHash,
    pub timestamp: i64,
}

/// A single validator's signed [`CommitVoteMessage`].
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CommitVote {
    pub message: CommitVoteMessage,
    pub signature: SignatureBytes,
}

impl CommitVote {
    /// Sign a commit vote for `block_id` at `height` with `keypair`.
    pub fn new(
        keypair: &Keypair,
        height: BlockHeight,
        block_id: CryptoHash,
        timestamp: i64,
    ) -> CommitVote {
        let message = CommitVoteMessage {
            height,
            block_id,
            timestamp,
        };
        let signature = keypair.sign(&message.try_to_vec().unwrap());
        CommitVote { message, signature }
    }
}

impl SignedMessage for CommitVote {
    fn message_bytes(&self) -> Vec<u8> {
        self.message.try_to_vec().unwrap()
    }

    fn signature_bytes(&self) -> SignatureBytes {
        self.signature
    }
}

/// An ordered list of optional signatures over one [`CommitVoteMessage`] (minus the signer), one slot
/// per validator in the governing [`ValidatorList`].
///
/// # Ordering
///
/// The signature of the validator at position `i` in the validator list must sit at position `i`.
/// A `None` means that the validator's vote was not collected.
///
/// # Empty sets
///
/// The genesis block and the block at height 1 carry a set with no signatures. Such a set still
/// carries a timestamp, which the next block's timestamp must exceed.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct CommitVoteSet {
    block_id: Option<CryptoHash>,
    height: BlockHeight,
    timestamp: i64,
    signatures: Vec<Option<SignatureBytes>>,
}

impl CommitVoteSet {
    /// Create a commit-vote set without any signatures. Used for the genesis block and for the first
    /// block after genesis.
    pub fn empty(timestamp: i64) -> CommitVoteSet {
        CommitVoteSet {
            block_id: None,
            height: BlockHeight::new(0),
            timestamp,
            signatures: Vec::new(),
        }
    }

    /// Assemble a commit-vote set for `block_id` at `height` from `votes`, placing each vote in the
    /// slot of its signer in `validators`. Votes from signers outside the list, or votes for another
    /// message, are ignored.
    pub fn from_votes(
        validators: &ValidatorList,
        height: BlockHeight,
        block_id: CryptoHash,
        timestamp: i64,
        votes: &[(VerifyingKey, CommitVote)],
    ) -> CommitVoteSet {
        let expected = CommitVoteMessage {
            height,
            block_id,
            timestamp,
        };
        let mut signatures = vec![None; validators.len()];
        for (signer, vote) in votes {
            if vote.message != expected || !vote.is_correct(signer) {
                continue;
            }
            if let Some(pos) = validators.position(signer) {
                signatures[pos] = Some(vote.signature);
            }
        }
        CommitVoteSet {
            block_id: Some(block_id),
            height,
            timestamp,
            signatures,
        }
    }

    /// Get the timestamp the voters agreed on (microseconds).
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.iter().all(Option::is_none)
    }

    /// Get the canonical encoding of this set.
    pub fn bytes(&self) -> Vec<u8> {
        self.try_to_vec().unwrap()
    }

    /// Get the hash that a block header commits to as its `votes_hash`.
    pub fn hash(&self) -> CryptoHash {
        sha3_256(&self.bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<CommitVoteSet, std::io::Error> {
        CommitVoteSet::deserialize(&mut &*bytes)
    }

    /// Verify that this set certifies the block with `block_id` at `height`, given the list of
    /// validators that governed that block. Returns, per validator, whether it voted.
    ///
    /// With no governing list (the parent is the genesis block), only an empty set is valid.
    pub fn verify_block(
        &self,
        height: BlockHeight,
        block_id: &CryptoHash,
        validators: Option<&ValidatorList>,
    ) -> Result<Vec<bool>, VoteError> {
        let validators = match validators {
            None => {
                return if self.is_empty() {
                    Ok(Vec::new())
                } else {
                    Err(VoteError::UnexpectedVotes)
                }
            }
            Some(validators) => validators,
        };

        if self.block_id.as_ref() != Some(block_id) || self.height != height {
            return Err(VoteError::WrongBlock);
        }
        if self.signatures.len() != validators.len() {
            return Err(VoteError::WrongLength {
                expected: validators.len(),
                actual: self.signatures.len(),
            });
        }

        let message = CommitVoteMessage {
            height,
            block_id: *block_id,
            timestamp: self.timestamp,
        }
        .try_to_vec()
        .unwrap();

        let mut voted = vec![false; validators.len()];
        for (index, (signature, validator)) in self
            .signatures
            .iter()
            .zip(validators.validators())
            .enumerate()
        {
            if let Some(signature) = signature {
                if !verify_signature(validator, &message, signature) {
                    return Err(VoteError::InvalidSignature { index });
                }
                voted[index] = true;
            }
        }

        let count = voted.iter().filter(|v| **v).count();
        if count < validators.quorum() {
            return Err(VoteError::NotEnoughVotes {
                count,
                quorum: validators.quorum(),
            });
        }
        Ok(voted)
    }
}

/// Reasons a commit-vote set fails to certify a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteError {
    UnexpectedVotes,
    WrongBlock,
    WrongLength { expected: usize, actual: usize },
    InvalidSignature { index: usize },
    NotEnoughVotes { count: usize, quorum: usize },
}
