//! The block body: the transactions of both groups and the commit-vote set, in the form they are
//! stored and sent in.

use borsh::{BorshDeserialize, BorshSerialize};

#[derive(Clone, PartialEq, Eq, Debug, Default, BorshSerialize, BorshDeserialize)]
pub struct BlockBody {
    pub patch_transactions: Vec<Vec<u8>>,
    pub normal_transactions: Vec<Vec<u8>>,
    /// Encoded [`CommitVoteSet`](crate::types::commit_votes::CommitVoteSet).
    pub votes: Vec<u8>,
}

impl BlockBody {
    pub fn bytes(&self) -> Vec<u8> {
        self.try_to_vec().unwrap()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<BlockBody, std::io::Error> {
        BlockBody::deserialize(&mut &*bytes)
    }
}
