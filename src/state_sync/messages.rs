/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages exchanged between nodes as part of the state sync protocol.
//!
//! The protocol consists of two request/response pairs:
//! 1. [`HasNode`] asks a peer whether it has every root of a sync target. The peer answers with a
//!    [`HasNodeResult`].
//! 2. [`RequestNodeData`] asks a peer for the values with the given hashes. The peer answers with a
//!    [`NodeData`] carrying the values it has.
//!
//! A response echoes the `req_id` of its request.

use std::io::{self, Read, Write};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{merkle::MerkleRoot, types::data_types::CryptoHash};

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum SyncMessage {
    HasNode(HasNode),
    HasNodeResult(HasNodeResult),
    RequestNodeData(RequestNodeData),
    NodeData(NodeData),
}

impl SyncMessage {
    pub fn req_id(&self) -> u32 {
        match self {
            SyncMessage::HasNode(msg) => msg.req_id,
            SyncMessage::HasNodeResult(msg) => msg.req_id,
            SyncMessage::RequestNodeData(msg) => msg.req_id,
            SyncMessage::NodeData(msg) => msg.req_id,
        }
    }
}

/// How a peer answered a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum Status {
    NoError,
    /// The peer does not have (some of) what was asked for.
    NoData,
    TimeExpired,
}

/// Which sync target a [`RequestNodeData`] is for. Encoded on the wire by its [`code`](Self::code).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncType {
    WorldState,
    PatchReceipts,
    NormalReceipts,
}

impl SyncType {
    pub const fn code(&self) -> u8 {
        match self {
            SyncType::WorldState => 1,
            SyncType::PatchReceipts => 2,
            SyncType::NormalReceipts => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<SyncType> {
        match code {
            1 => Some(SyncType::WorldState),
            2 => Some(SyncType::PatchReceipts),
            4 => Some(SyncType::NormalReceipts),
            _ => None,
        }
    }
}

impl BorshSerialize for SyncType {
    fn serialize<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.code().serialize(writer)
    }
}

impl BorshDeserialize for SyncType {
    fn deserialize_reader<R: Read>(reader: &mut R) -> io::Result<Self> {
        let code = u8::deserialize_reader(reader)?;
        SyncType::from_code(code).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown sync type {}", code),
            )
        })
    }
}

/// Probe: does the receiver have every non-empty root listed?
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct HasNode {
    pub req_id: u32,
    pub state_hash: MerkleRoot,
    pub validator_hash: Option<CryptoHash>,
    pub patch_rcpt_hash: MerkleRoot,
    pub normal_rcpt_hash: MerkleRoot,
}

impl From<HasNode> for SyncMessage {
    fn from(value: HasNode) -> Self {
        SyncMessage::HasNode(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct HasNodeResult {
    pub req_id: u32,
    pub status: Status,
}

impl From<HasNodeResult> for SyncMessage {
    fn from(value: HasNodeResult) -> Self {
        SyncMessage::HasNodeResult(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct RequestNodeData {
    pub req_id: u32,
    pub sync_type: SyncType,
    pub hashes: Vec<CryptoHash>,
}

impl From<RequestNodeData> for SyncMessage {
    fn from(value: RequestNodeData) -> Self {
        SyncMessage::RequestNodeData(value)
    }
}

/// Values answering a [`RequestNodeData`]. Values the sender does not have are left out, so `data`
/// can be shorter than the request's `hashes` and is not in any particular order.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NodeData {
    pub req_id: u32,
    pub status: Status,
    pub sync_type: SyncType,
    pub data: Vec<Vec<u8>>,
}

impl From<NodeData> for SyncMessage {
    fn from(value: NodeData) -> Self {
        SyncMessage::NodeData(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_type_is_encoded_by_code() {
        let request = RequestNodeData {
            req_id: 7,
            sync_type: SyncType::NormalReceipts,
            hashes: vec![CryptoHash::new([3; 32])],
        };
        let bytes = request.try_to_vec().unwrap();
        // req_id, then the type code.
        assert_eq!(&bytes[0..5], &[7, 0, 0, 0, 4]);
        assert_eq!(RequestNodeData::deserialize(&mut &*bytes).unwrap(), request);
    }

    #[test]
    fn unknown_sync_type_is_rejected() {
        let mut bytes = RequestNodeData {
            req_id: 1,
            sync_type: SyncType::WorldState,
            hashes: Vec::new(),
        }
        .try_to_vec()
        .unwrap();
        bytes[4] = 3;
        assert!(RequestNodeData::deserialize(&mut &*bytes).is_err());
    }
}
