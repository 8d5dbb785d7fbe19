/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fetching missing trie nodes and content-addressed values from peers.
//!
//! A node that joins or restarts behind the head of the chain only knows the hashes its last block
//! commits to. The state sync engines fetch everything under those hashes from peers that have it:
//!
//! - [Snapshot sync](snapshot_sync) fetches the world state, both receipt lists and the validator
//!   list named by a [`SyncTargets`](snapshot_sync::SyncTargets), and completes once all of them are
//!   available locally.
//! - [Data sync](data_sync) runs in the background for the lifetime of [`StateSync`] and fetches
//!   single values any component [asks for](StateSync::add_request).
//!
//! Both engines are fed by the [poller](receiving) and share the peer lifecycle
//! ([`on_peer_join`](StateSync::on_peer_join), [`on_peer_leave`](StateSync::on_peer_leave)). The
//! [server](server) answers other nodes' requests from the local database.
//!
//! ## Peer selection
//!
//! A peer is only sent snapshot requests after it answered a [`HasNode`](messages::HasNode) probe
//! with [`Status::NoError`](messages::Status::NoError). A request that is not answered in time
//! doubles the peer's timeout, up to [`max_timeout`](crate::config::SyncConfiguration::max_timeout),
//! and sends the peer back to be probed (snapshot sync) or to rest for a round (data sync).

pub mod messages;

pub mod network;

pub(crate) mod receiving;

pub(crate) mod peer_pool;

pub mod snapshot_sync;

pub mod data_sync;

pub(crate) mod server;

pub mod manager;

pub use manager::StateSync;
pub use network::Network;

use crate::{
    errors::{CoreError, ErrorKind},
    merkle::TrieError,
    receipt::ReceiptError,
    storage::pluggables::KVGetError,
};

#[derive(Debug)]
pub enum SyncError {
    /// The engine was stopped before it finished.
    Interrupted,
    /// No result was produced within the time the caller was willing to wait.
    Timeout,
    /// A snapshot sync is already running.
    AlreadySyncing,
    /// The engine has shut down and accepts no more requests.
    Terminated,
    Trie(TrieError),
    Receipt(ReceiptError),
    KVGet(KVGetError),
}

impl From<TrieError> for SyncError {
    fn from(value: TrieError) -> Self {
        SyncError::Trie(value)
    }
}

impl From<ReceiptError> for SyncError {
    fn from(value: ReceiptError) -> Self {
        SyncError::Receipt(value)
    }
}

impl From<KVGetError> for SyncError {
    fn from(value: KVGetError) -> Self {
        SyncError::KVGet(value)
    }
}

impl From<SyncError> for CoreError {
    fn from(value: SyncError) -> Self {
        match value {
            SyncError::Interrupted => ErrorKind::Interrupted.error("sync stopped"),
            SyncError::Timeout => ErrorKind::Timeout.error("sync did not finish in time"),
            SyncError::AlreadySyncing => ErrorKind::InvalidState.error("a sync is already running"),
            SyncError::Terminated => ErrorKind::InvalidState.error("terminated"),
            SyncError::Trie(err) => err.into(),
            SyncError::Receipt(err) => err.into(),
            SyncError::KVGet(err) => err.into(),
        }
    }
}
