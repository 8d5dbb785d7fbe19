/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [`Block`]: a decoded header and body whose body is known to match the header.

use std::io::{self, Write};

use typed_builder::TypedBuilder;

use crate::{
    errors::{CoreError, ErrorKind},
    receipt::logs_bloom::LogsBloom,
    transaction::{factory::FactoryRegistry, transaction_list::TransactionList, TransactionGroup},
    types::{
        commit_votes::CommitVoteSet,
        data_types::{Address, BlockHeight, CryptoHash},
    },
};

use super::{body::BlockBody, header::BlockHeader, verifier::HeaderError};

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    header: BlockHeader,
    id: CryptoHash,
    patch_transactions: TransactionList,
    normal_transactions: TransactionList,
    votes: CommitVoteSet,
}

/// Everything a new block is assembled from. The header's roots and hashes are derived.
#[derive(TypedBuilder)]
pub struct BlockParams {
    version: u32,
    height: BlockHeight,
    timestamp: i64,
    #[builder(default)]
    proposer: Option<Address>,
    #[builder(default)]
    prev_id: Option<CryptoHash>,
    votes: CommitVoteSet,
    #[builder(default)]
    next_validators_hash: Option<CryptoHash>,
    #[builder(default)]
    patch_transactions: TransactionList,
    #[builder(default)]
    normal_transactions: TransactionList,
    #[builder(default)]
    logs_bloom: LogsBloom,
    result: Vec<u8>,
}

impl Block {
    pub fn new(params: BlockParams) -> Block {
        let header = BlockHeader {
            version: params.version,
            height: params.height,
            timestamp: params.timestamp,
            proposer: params.proposer,
            prev_id: params.prev_id,
            votes_hash: params.votes.hash(),
            next_validators_hash: params.next_validators_hash,
            patch_transactions_root: params.patch_transactions.hash(),
            normal_transactions_root: params.normal_transactions.hash(),
            logs_bloom: params.logs_bloom.compressed_bytes(),
            result: params.result,
        };
        Block {
            id: header.id(),
            header,
            patch_transactions: params.patch_transactions,
            normal_transactions: params.normal_transactions,
            votes: params.votes,
        }
    }

    /// Combine a decoded header and body, checking that the body is the one the header commits to.
    pub fn from_parts(
        header: BlockHeader,
        body: BlockBody,
        registry: &FactoryRegistry,
    ) -> Result<Block, CoreError> {
        let patch_transactions =
            TransactionList::from_bytes_list(registry, &body.patch_transactions)?;
        if patch_transactions.hash() != header.patch_transactions_root {
            return Err(HeaderError::BadTransactionsRoot {
                group: TransactionGroup::Patch,
            }
            .into());
        }
        let normal_transactions =
            TransactionList::from_bytes_list(registry, &body.normal_transactions)?;
        if normal_transactions.hash() != header.normal_transactions_root {
            return Err(HeaderError::BadTransactionsRoot {
                group: TransactionGroup::Normal,
            }
            .into());
        }
        let votes = CommitVoteSet::from_bytes(&body.votes)
            .map_err(|err| ErrorKind::InvalidFormat.error(format!("commit votes: {}", err)))?;
        if votes.hash() != header.votes_hash {
            return Err(HeaderError::BadVotesHash.into());
        }
        Ok(Block {
            id: header.id(),
            header,
            patch_transactions,
            normal_transactions,
            votes,
        })
    }

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn id(&self) -> CryptoHash {
        self.id
    }

    pub fn version(&self) -> u32 {
        self.header.version
    }

    pub fn height(&self) -> BlockHeight {
        self.header.height
    }

    pub fn timestamp(&self) -> i64 {
        self.header.timestamp
    }

    pub fn proposer(&self) -> Option<Address> {
        self.header.proposer
    }

    pub fn prev_id(&self) -> Option<CryptoHash> {
        self.header.prev_id
    }

    pub fn next_validators_hash(&self) -> Option<CryptoHash> {
        self.header.next_validators_hash
    }

    pub fn result(&self) -> &[u8] {
        &self.header.result
    }

    pub fn logs_bloom(&self) -> Result<LogsBloom, CoreError> {
        Ok(self.header.logs_bloom()?)
    }

    pub fn votes(&self) -> &CommitVoteSet {
        &self.votes
    }

    pub fn patch_transactions(&self) -> &TransactionList {
        &self.patch_transactions
    }

    pub fn normal_transactions(&self) -> &TransactionList {
        &self.normal_transactions
    }

    pub fn transactions(&self, group: TransactionGroup) -> &TransactionList {
        match group {
            TransactionGroup::Patch => &self.patch_transactions,
            TransactionGroup::Normal => &self.normal_transactions,
        }
    }

    pub fn body(&self) -> BlockBody {
        BlockBody {
            patch_transactions: self.patch_transactions.bytes_list(),
            normal_transactions: self.normal_transactions.bytes_list(),
            votes: self.votes.bytes(),
        }
    }

    /// Write the block data stream: the encoded header followed by the encoded body.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.header.bytes())?;
        writer.write_all(&self.body().bytes())
    }

    pub fn bytes(&self) -> Vec<u8> {
        let mut bytes = self.header.bytes();
        bytes.extend(self.body().bytes());
        bytes
    }
}
