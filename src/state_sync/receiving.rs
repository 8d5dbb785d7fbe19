//! Functions and types for receiving messages from the P2P network.

use std::{
    sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::types::crypto_primitives::VerifyingKey;

use super::{messages::SyncMessage, network::Network};

/// Spawn the poller thread, which polls the [`Network`] for messages and distributes them into two
/// receivers:
/// 1. Requests ([`HasNode`](super::messages::HasNode) and
///    [`RequestNodeData`](super::messages::RequestNodeData)), processed by the
///    [`SyncServer`](super::server::SyncServer), and
/// 2. Responses, processed by the sync engines.
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    shutdown_signal: Receiver<()>,
) -> (
    JoinHandle<()>,
    Receiver<(VerifyingKey, SyncMessage)>,
    Receiver<(VerifyingKey, SyncMessage)>,
) {
    let (to_request_receiver, request_receiver) = mpsc::channel();
    let (to_response_receiver, response_receiver) = mpsc::channel();

    let poller_thread = thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        if let Some((origin, msg)) = network.recv() {
            let _ = match msg {
                SyncMessage::HasNode(_) | SyncMessage::RequestNodeData(_) => {
                    to_request_receiver.send((origin, msg))
                }
                SyncMessage::HasNodeResult(_) | SyncMessage::NodeData(_) => {
                    to_response_receiver.send((origin, msg))
                }
            };
        } else {
            thread::yield_now()
        }
    });

    (poller_thread, request_receiver, response_receiver)
}

/// A receiving end for messages distributed by the poller.
pub(crate) struct MessageStub {
    messages: Receiver<(VerifyingKey, SyncMessage)>,
}

impl MessageStub {
    pub(crate) fn new(messages: Receiver<(VerifyingKey, SyncMessage)>) -> MessageStub {
        MessageStub { messages }
    }

    /// Receive a message, waiting for at most `timeout`.
    pub(crate) fn recv(
        &self,
        timeout: Duration,
    ) -> Result<(VerifyingKey, SyncMessage), MessageReceiveError> {
        match self.messages.recv_timeout(timeout) {
            Ok(received) => Ok(received),
            Err(RecvTimeoutError::Timeout) => Err(MessageReceiveError::NotAvailable),
            Err(RecvTimeoutError::Disconnected) => Err(MessageReceiveError::Disconnected),
        }
    }
}

#[derive(Debug)]
pub(crate) enum MessageReceiveError {
    Disconnected,
    NotAvailable,
}
