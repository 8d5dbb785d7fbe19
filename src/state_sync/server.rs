/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Implements the [`SyncServer`], which answers other nodes' sync requests from the local database.
//!
//! 1. A [`HasNode`] is answered with [`Status::NoError`] if every root it lists is available
//!    locally, and [`Status::NoData`] otherwise.
//! 2. A [`RequestNodeData`] is answered with the values the server has among the requested ones.
//!    Values are looked up in the merkle trie bucket first, then in the bytes-by-hash bucket. If none
//!    is found the status is [`Status::NoData`].

use std::{
    sync::mpsc::{Receiver, Sender, TryRecvError},
    thread::{self, JoinHandle},
    time::{Duration, SystemTime},
};

use crate::{
    events::{Event, ReceiveSyncRequestEvent, SendSyncResponseEvent},
    storage::KVGet,
    types::{crypto_primitives::VerifyingKey, data_types::CryptoHash},
};

use super::{
    messages::{HasNode, HasNodeResult, NodeData, RequestNodeData, Status, SyncMessage},
    network::{Network, SenderHandle},
    receiving::{MessageReceiveError, MessageStub},
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub(crate) struct SyncServer<N: Network + 'static, K: KVGet + Send + 'static> {
    kv_store: K,
    receiver: MessageStub,
    sender: SenderHandle<N>,
    shutdown_signal: Receiver<()>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network + 'static, K: KVGet + Send + 'static> SyncServer<N, K> {
    pub(crate) fn new(
        kv_store: K,
        requests: Receiver<(VerifyingKey, SyncMessage)>,
        network: N,
        shutdown_signal: Receiver<()>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            kv_store,
            receiver: MessageStub::new(requests),
            sender: SenderHandle::new(network),
            shutdown_signal,
            event_publisher,
        }
    }

    pub(crate) fn start(mut self) -> JoinHandle<()> {
        thread::spawn(move || loop {
            match self.shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => (),
            }

            match self.receiver.recv(POLL_INTERVAL) {
                Ok((origin, request)) => self.on_request(origin, request),
                Err(MessageReceiveError::NotAvailable) => (),
                Err(MessageReceiveError::Disconnected) => return,
            }
        })
    }

    fn on_request(&mut self, origin: VerifyingKey, request: SyncMessage) {
        let (req_id, hashes) = match &request {
            SyncMessage::HasNode(has_node) => (has_node.req_id, has_node_roots(has_node).len()),
            SyncMessage::RequestNodeData(request) => (request.req_id, request.hashes.len()),
            _ => return,
        };
        Event::publish(
            &self.event_publisher,
            Event::ReceiveSyncRequest(ReceiveSyncRequestEvent {
                timestamp: SystemTime::now(),
                peer: origin,
                request_id: req_id,
                hashes,
            }),
        );

        let response: SyncMessage = match request {
            SyncMessage::HasNode(has_node) => self.has_node(&has_node).into(),
            SyncMessage::RequestNodeData(request) => self.node_data(request).into(),
            _ => return,
        };
        let status = match &response {
            SyncMessage::HasNodeResult(result) => result.status,
            SyncMessage::NodeData(node_data) => node_data.status,
            _ => return,
        };
        self.sender.send(origin, response);

        Event::publish(
            &self.event_publisher,
            Event::SendSyncResponse(SendSyncResponseEvent {
                timestamp: SystemTime::now(),
                peer: origin,
                request_id: req_id,
                status,
            }),
        );
    }

    fn has_node(&self, has_node: &HasNode) -> HasNodeResult {
        let missing = has_node_roots(has_node)
            .into_iter()
            .any(|hash| self.kv_store.node_data(&hash).is_none());
        HasNodeResult {
            req_id: has_node.req_id,
            status: if missing {
                Status::NoData
            } else {
                Status::NoError
            },
        }
    }

    fn node_data(&self, request: RequestNodeData) -> NodeData {
        let data: Vec<Vec<u8>> = request
            .hashes
            .iter()
            .filter_map(|hash| self.kv_store.node_data(hash))
            .collect();
        NodeData {
            req_id: request.req_id,
            status: if data.is_empty() {
                Status::NoData
            } else {
                Status::NoError
            },
            sync_type: request.sync_type,
            data,
        }
    }
}

fn has_node_roots(has_node: &HasNode) -> Vec<CryptoHash> {
    [
        has_node.state_hash,
        has_node.validator_hash,
        has_node.patch_rcpt_hash,
        has_node.normal_rcpt_hash,
    ]
    .into_iter()
    .flatten()
    .collect()
}
