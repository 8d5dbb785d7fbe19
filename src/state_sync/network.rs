use crate::types::crypto_primitives::VerifyingKey;

use super::messages::SyncMessage;

/// The peer-to-peer layer the sync engines talk through. Peers are identified by their verifying
/// keys. Peer discovery is the provider's business: it reports peers to
/// [`StateSync::on_peer_join`](super::StateSync::on_peer_join) and
/// [`on_peer_leave`](super::StateSync::on_peer_leave).
pub trait Network: Clone + Send {
    /// Send a message to all peers without blocking.
    fn broadcast(&mut self, message: SyncMessage);

    /// Send a message to the specified peer without blocking.
    fn send(&mut self, peer: VerifyingKey, message: SyncMessage);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(VerifyingKey, SyncMessage)>;
}

/// Handle for sending messages to the [`Network`].
#[derive(Clone)]
pub(crate) struct SenderHandle<N: Network> {
    network: N,
}

impl<N: Network> SenderHandle<N> {
    pub(crate) fn new(network: N) -> Self {
        Self { network }
    }

    pub(crate) fn send<S: Into<SyncMessage>>(&mut self, peer: VerifyingKey, msg: S) {
        self.network.send(peer, msg.into())
    }
}
