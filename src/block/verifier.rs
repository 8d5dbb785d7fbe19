/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Checks a block must pass before it is attached to the tree.
//!
//! [`verify`] checks a block against its parent before its transactions are executed:
//! 1. `height` is one more than the parent's.
//! 2. `prev_id` is the parent's ID.
//! 3. `version` is the version the parent's result calls for.
//! 4. The commit-vote set certifies the parent under the validator list that governed it.
//! 5. The timestamp is later than both the commit-vote set's and the parent's.
//!
//! [`verify_result`] checks the header against the transition that executed the parent's
//! transactions.

use crate::{
    transaction::TransactionGroup,
    types::{
        commit_votes::VoteError,
        data_types::{BlockHeight, CryptoHash},
        validator_list::ValidatorList,
    },
};

use super::block::Block;

/// Reasons a block header is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    BadHeight {
        expected: BlockHeight,
        actual: BlockHeight,
    },
    BadPrevID {
        expected: CryptoHash,
        actual: Option<CryptoHash>,
    },
    BadVersion {
        expected: u32,
        actual: u32,
    },
    BadVotes(VoteError),
    BadTimestamp {
        timestamp: i64,
        votes_timestamp: i64,
        parent_timestamp: i64,
    },
    BadVotesHash,
    BadTransactionsRoot {
        group: TransactionGroup,
    },
    BadResult,
    BadLogsBloom,
    BadNextValidators,
}

/// Verify `block` against `parent`.
///
/// `expected_version` is the version the execution engine derives from the parent's result.
/// `parent_validators` is the validator list that governed `parent`, i.e., the next validators of
/// the parent's parent. It is `None` when the parent is the genesis block.
///
/// Returns, per validator in `parent_validators`, whether it voted.
pub fn verify(
    block: &Block,
    parent: &Block,
    expected_version: u32,
    parent_validators: Option<&ValidatorList>,
) -> Result<Vec<bool>, HeaderError> {
    let expected_height = parent.height() + 1;
    if block.height() != expected_height {
        return Err(HeaderError::BadHeight {
            expected: expected_height,
            actual: block.height(),
        });
    }

    if block.prev_id() != Some(parent.id()) {
        return Err(HeaderError::BadPrevID {
            expected: parent.id(),
            actual: block.prev_id(),
        });
    }

    if block.version() != expected_version {
        return Err(HeaderError::BadVersion {
            expected: expected_version,
            actual: block.version(),
        });
    }

    let voted = block
        .votes()
        .verify_block(parent.height(), &parent.id(), parent_validators)
        .map_err(HeaderError::BadVotes)?;

    let votes_timestamp = block.votes().timestamp();
    if block.timestamp() <= votes_timestamp || block.timestamp() <= parent.timestamp() {
        return Err(HeaderError::BadTimestamp {
            timestamp: block.timestamp(),
            votes_timestamp,
            parent_timestamp: parent.timestamp(),
        });
    }

    Ok(voted)
}

/// Verify that the header of `block` commits to what executing its parent's transactions produced.
pub fn verify_result(
    block: &Block,
    result: &[u8],
    logs_bloom: &[u8],
    next_validators_hash: Option<CryptoHash>,
) -> Result<(), HeaderError> {
    if block.result() != result {
        return Err(HeaderError::BadResult);
    }
    if block.header().logs_bloom != logs_bloom {
        return Err(HeaderError::BadLogsBloom);
    }
    if block.next_validators_hash() != next_validators_hash {
        return Err(HeaderError::BadNextValidators);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::{
        block::{block::BlockParams, header::VERSION_2},
        types::{
            commit_votes::CommitVoteSet,
            crypto_primitives::{Keypair, SigningKey},
        },
    };

    use super::*;

    fn parent() -> Block {
        Block::new(
            BlockParams::builder()
                .version(VERSION_2)
                .height(BlockHeight::new(4))
                .timestamp(100)
                .votes(CommitVoteSet::empty(90))
                .result(vec![1, 2, 3])
                .build(),
        )
    }

    fn child(parent: &Block, height: u64, timestamp: i64, votes_timestamp: i64) -> Block {
        Block::new(
            BlockParams::builder()
                .version(VERSION_2)
                .height(BlockHeight::new(height))
                .timestamp(timestamp)
                .prev_id(Some(parent.id()))
                .votes(CommitVoteSet::empty(votes_timestamp))
                .result(vec![4, 5, 6])
                .build(),
        )
    }

    #[test]
    fn checks_run_in_order() {
        let parent = parent();

        assert!(verify(&child(&parent, 5, 101, 100), &parent, VERSION_2, None).is_ok());
        assert!(matches!(
            verify(&child(&parent, 6, 101, 100), &parent, VERSION_2, None),
            Err(HeaderError::BadHeight { .. })
        ));
        assert!(matches!(
            verify(&child(&parent, 5, 101, 100), &parent, VERSION_2 + 1, None),
            Err(HeaderError::BadVersion { .. })
        ));

        let orphan = child(&child(&parent, 5, 101, 100), 5, 101, 100);
        assert!(matches!(
            verify(&orphan, &parent, VERSION_2, None),
            Err(HeaderError::BadPrevID { .. })
        ));
    }

    #[test]
    fn timestamp_must_pass_votes_and_parent() {
        let parent = parent();
        assert_eq!(
            verify(&child(&parent, 5, 100, 50), &parent, VERSION_2, None),
            Err(HeaderError::BadTimestamp {
                timestamp: 100,
                votes_timestamp: 50,
                parent_timestamp: 100,
            })
        );
        assert!(matches!(
            verify(&child(&parent, 5, 120, 120), &parent, VERSION_2, None),
            Err(HeaderError::BadTimestamp { .. })
        ));
    }

    #[test]
    fn empty_votes_need_no_validator_list() {
        let parent = parent();
        let block = child(&parent, 5, 101, 100);
        let signer = Keypair::new(SigningKey::from_bytes(&[7u8; 32]));
        let validators = ValidatorList::new(vec![signer.public()]);
        assert!(matches!(
            verify(&block, &parent, VERSION_2, Some(&validators)),
            Err(HeaderError::BadVotes(VoteError::WrongBlock))
        ));
    }

    #[test]
    fn result_must_match_execution() {
        let parent = parent();
        let block = child(&parent, 5, 101, 100);
        let bloom = block.header().logs_bloom.clone();

        assert!(verify_result(&block, &[4, 5, 6], &bloom, None).is_ok());
        assert_eq!(
            verify_result(&block, &[4, 5], &bloom, None),
            Err(HeaderError::BadResult)
        );
        assert_eq!(
            verify_result(&block, &[4, 5, 6], &[0xff], None),
            Err(HeaderError::BadLogsBloom)
        );
        assert_eq!(
            verify_result(&block, &[4, 5, 6], &bloom, Some(CryptoHash::new([1u8; 32]))),
            Err(HeaderError::BadNextValidators)
        );
    }
}
