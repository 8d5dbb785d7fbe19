/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The version 2 block header.

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    merkle::MerkleRoot,
    receipt::{logs_bloom::LogsBloom, ReceiptError},
    types::{
        crypto_primitives::sha3_256,
        data_types::{Address, BlockHeight, CryptoHash},
    },
};

pub const VERSION_0: u32 = 0;
pub const VERSION_1: u32 = 1;
pub const VERSION_2: u32 = 2;

/// The fixed-order header tuple. The block ID is the SHA3-256 hash of its borsh encoding, whose
/// first four bytes are therefore always the little-endian `version`.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub height: BlockHeight,
    /// Microseconds since the unix epoch.
    pub timestamp: i64,
    /// `None` for the genesis block.
    pub proposer: Option<Address>,
    /// `None` for the genesis block.
    pub prev_id: Option<CryptoHash>,
    pub votes_hash: CryptoHash,
    pub next_validators_hash: Option<CryptoHash>,
    pub patch_transactions_root: MerkleRoot,
    pub normal_transactions_root: MerkleRoot,
    /// Compressed form of the merged logs bloom of the receipts of the transactions this block's
    /// result commits to.
    pub logs_bloom: Vec<u8>,
    /// Commitment to the state the parent's transactions produced.
    pub result: Vec<u8>,
}

impl BlockHeader {
    pub fn bytes(&self) -> Vec<u8> {
        self.try_to_vec().unwrap()
    }

    pub fn id(&self) -> CryptoHash {
        sha3_256(&self.bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<BlockHeader, std::io::Error> {
        BlockHeader::deserialize(&mut &*bytes)
    }

    pub fn logs_bloom(&self) -> Result<LogsBloom, ReceiptError> {
        LogsBloom::from_compressed_bytes(&self.logs_bloom)
    }
}

/// Read the version of a v2 header (or block data stream) without decoding the rest of it.
pub fn peek_version(bytes: &[u8]) -> Option<u32> {
    let prefix: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_the_leading_field() {
        let header = BlockHeader {
            version: VERSION_2,
            height: BlockHeight::new(7),
            timestamp: 20,
            proposer: Some(Address::account([1u8; 20])),
            prev_id: Some(CryptoHash::new([2u8; 32])),
            votes_hash: CryptoHash::new([3u8; 32]),
            next_validators_hash: None,
            patch_transactions_root: None,
            normal_transactions_root: Some(CryptoHash::new([4u8; 32])),
            logs_bloom: LogsBloom::new().compressed_bytes(),
            result: vec![9, 9],
        };
        let bytes = header.bytes();
        assert_eq!(peek_version(&bytes), Some(VERSION_2));
        let decoded = BlockHeader::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.id(), header.id());
    }
}
