use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
};

use blockcore_rs::{
    state_sync::{messages::SyncMessage, Network},
    types::crypto_primitives::VerifyingKey,
};

/// A mock network stub which passes sync messages from and to threads using channels.
#[derive(Clone)]
pub(crate) struct NetworkStub {
    my_verifying_key: VerifyingKey,
    all_peers: HashMap<VerifyingKey, Sender<(VerifyingKey, SyncMessage)>>,
    inbox: Arc<Mutex<Receiver<(VerifyingKey, SyncMessage)>>>,
}

impl Network for NetworkStub {
    fn broadcast(&mut self, message: SyncMessage) {
        for (peer, sender) in &self.all_peers {
            if *peer != self.my_verifying_key {
                let _ = sender.send((self.my_verifying_key, message.clone()));
            }
        }
    }

    fn send(&mut self, peer: VerifyingKey, message: SyncMessage) {
        if let Some(peer) = self.all_peers.get(&peer) {
            let _ = peer.send((self.my_verifying_key, message));
        }
    }

    fn recv(&mut self) -> Option<(VerifyingKey, SyncMessage)> {
        match self.inbox.lock().unwrap().try_recv() {
            Ok(o_m) => Some(o_m),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => panic!(),
        }
    }
}

pub(crate) fn mock_network(peers: impl Iterator<Item = VerifyingKey>) -> Vec<NetworkStub> {
    let mut all_peers = HashMap::new();
    let peer_and_inboxes: Vec<(VerifyingKey, Receiver<(VerifyingKey, SyncMessage)>)> = peers
        .map(|peer| {
            let (sender, receiver) = mpsc::channel();
            all_peers.insert(peer, sender);

            (peer, receiver)
        })
        .collect();

    peer_and_inboxes
        .into_iter()
        .map(|(my_verifying_key, inbox)| NetworkStub {
            my_verifying_key,
            all_peers: all_peers.clone(),
            inbox: Arc::new(Mutex::new(inbox)),
        })
        .collect()
}
