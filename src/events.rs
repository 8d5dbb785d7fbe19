/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of events for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed.

use std::{
    sync::mpsc::Sender,
    time::{Duration, SystemTime},
};

use crate::{
    merkle::MerkleRoot,
    state_sync::messages::Status,
    types::{
        crypto_primitives::VerifyingKey,
        data_types::{BlockHeight, CryptoHash},
    },
};

pub enum Event {
    // Block manager events.
    ImportBlock(ImportBlockEvent),
    ProposeBlock(ProposeBlockEvent),
    FinalizeBlock(FinalizeBlockEvent),
    CancelTask(CancelTaskEvent),
    // State sync events.
    StartSync(StartSyncEvent),
    EndSync(EndSyncEvent),
    ReceiveSyncRequest(ReceiveSyncRequestEvent),
    SendSyncResponse(SendSyncResponseEvent),
    PeerTimeout(PeerTimeoutEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            // The bus is gone only while its owner is shutting down.
            let _ = event_publisher.send(event);
        }
    }
}

/// A block was imported, verified, and attached to the block tree.
pub struct ImportBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
}

/// A block was proposed and attached to the block tree.
pub struct ProposeBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
}

pub struct FinalizeBlockEvent {
    pub timestamp: SystemTime,
    pub block: CryptoHash,
    pub height: BlockHeight,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    Import,
    Propose,
}

/// An import or propose task was cancelled before it delivered a block.
pub struct CancelTaskEvent {
    pub timestamp: SystemTime,
    pub task: TaskKind,
    /// The imported block, or the parent of the proposed one.
    pub block: CryptoHash,
}

pub struct StartSyncEvent {
    pub timestamp: SystemTime,
    pub state_hash: MerkleRoot,
    pub validators_hash: Option<CryptoHash>,
}

pub struct EndSyncEvent {
    pub timestamp: SystemTime,
    pub state_hash: MerkleRoot,
    /// Number of values fetched from peers.
    pub fetched: usize,
    pub completed: bool,
}

pub struct ReceiveSyncRequestEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub request_id: u32,
    /// Number of hashes asked about.
    pub hashes: usize,
}

pub struct SendSyncResponseEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub request_id: u32,
    pub status: Status,
}

/// A sync request sent to `peer` expired. `timeout` is the timeout the peer gets next.
pub struct PeerTimeoutEvent {
    pub timestamp: SystemTime,
    pub peer: VerifyingKey,
    pub timeout: Duration,
}
