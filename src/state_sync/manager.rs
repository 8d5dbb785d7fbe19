/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [`StateSync`]: the threads of the sync subsystem, started together and stopped on drop.

use std::{
    collections::HashSet,
    sync::{
        atomic::AtomicU32,
        mpsc::{self, Receiver, Sender, TryRecvError},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    config::SyncConfiguration,
    errors::CoreError,
    event_bus::{EventBus, EventHandlers},
    storage::{buckets::BucketID, KVStore},
    types::{crypto_primitives::VerifyingKey, data_types::CryptoHash},
};

use super::{
    data_sync::DataSync,
    messages::SyncMessage,
    network::Network,
    receiving::{start_polling, MessageReceiveError, MessageStub},
    server::SyncServer,
    snapshot_sync::{SnapshotShared, SnapshotSync, SyncTargets},
    SyncError,
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

type CurrentSnapshot<K> = Arc<Mutex<Option<Arc<SnapshotShared<K>>>>>;

/// The state sync subsystem of a node: the [server](super::server) answering peers, the background
/// [data sync](super::data_sync), and at most one [snapshot sync](super::snapshot_sync) at a time.
pub struct StateSync<N: Network + 'static, K: KVStore> {
    kv_store: K,
    network: N,
    config: SyncConfiguration,
    req_ids: Arc<AtomicU32>,
    peers: Mutex<HashSet<VerifyingKey>>,
    data_sync: Arc<DataSync<K>>,
    snapshot: CurrentSnapshot<K>,
    threads: Vec<(Sender<()>, JoinHandle<()>)>,
    event_bus: Option<EventBus>,
}

impl<N: Network + 'static, K: KVStore> StateSync<N, K> {
    pub fn new(
        kv_store: K,
        network: N,
        config: SyncConfiguration,
        event_handlers: EventHandlers,
    ) -> StateSync<N, K> {
        let mut event_handlers = event_handlers;
        if config.log_events {
            event_handlers.add_loggers();
        }
        let event_bus = EventBus::start(event_handlers);
        let event_publisher = event_bus.as_ref().map(EventBus::publisher);

        let req_ids = Arc::new(AtomicU32::new(1));
        let data_sync = Arc::new(DataSync::start(
            kv_store.clone(),
            network.clone(),
            config.clone(),
            req_ids.clone(),
            event_publisher.clone(),
        ));
        let snapshot: CurrentSnapshot<K> = Arc::new(Mutex::new(None));

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let (poller, requests, responses) = start_polling(network.clone(), poller_shutdown_receiver);

        let (server_shutdown, server_shutdown_receiver) = mpsc::channel();
        let server = SyncServer::new(
            kv_store.clone(),
            requests,
            network.clone(),
            server_shutdown_receiver,
            event_publisher,
        )
        .start();

        let (dispatcher_shutdown, dispatcher_shutdown_receiver) = mpsc::channel();
        let dispatcher = start_dispatcher(
            MessageStub::new(responses),
            data_sync.clone(),
            snapshot.clone(),
            dispatcher_shutdown_receiver,
        );

        StateSync {
            kv_store,
            network,
            config,
            req_ids,
            peers: Mutex::new(HashSet::new()),
            data_sync,
            snapshot,
            // Stopped in this order.
            threads: vec![
                (dispatcher_shutdown, dispatcher),
                (server_shutdown, server),
                (poller_shutdown, poller),
            ],
            event_bus,
        }
    }

    /// Tell the engines that `peer` is connected and may serve requests.
    pub fn on_peer_join(&self, peer: VerifyingKey) {
        if !self.peers.lock().unwrap().insert(peer) {
            return;
        }
        self.data_sync.on_peer_join(peer);
        if let Some(snapshot) = self.snapshot.lock().unwrap().as_ref() {
            snapshot.on_peer_join(peer);
        }
    }

    /// Tell the engines that `peer` is gone. Its outstanding requests are given to other peers.
    pub fn on_peer_leave(&self, peer: &VerifyingKey) {
        if !self.peers.lock().unwrap().remove(peer) {
            return;
        }
        self.data_sync.on_peer_leave(peer);
        if let Some(snapshot) = self.snapshot.lock().unwrap().as_ref() {
            snapshot.on_peer_leave(peer);
        }
    }

    /// Start fetching everything under `targets` from the connected peers. Fails with
    /// [`InvalidState`](crate::errors::ErrorKind::InvalidState) while another snapshot sync is running.
    pub fn start_sync(&self, targets: SyncTargets) -> Result<SnapshotSync<K>, CoreError> {
        let mut current = self.snapshot.lock().unwrap();
        if current.as_ref().is_some_and(|running| !running.is_finished()) {
            return Err(SyncError::AlreadySyncing.into());
        }
        log::info!("Starting state sync for state {:?}", targets.state_hash);

        let peers: Vec<VerifyingKey> = self.peers.lock().unwrap().iter().copied().collect();
        let sync = SnapshotSync::start(
            self.kv_store.clone(),
            targets,
            peers,
            self.network.clone(),
            self.config.clone(),
            self.req_ids.clone(),
            self.event_bus.as_ref().map(EventBus::publisher),
        )?;
        *current = Some(sync.shared());
        Ok(sync)
    }

    /// Ask the background data sync for the value with hash `key` in `bucket`. Does nothing if the
    /// value is available locally.
    pub fn add_request(&self, bucket: BucketID, key: CryptoHash) -> Result<(), CoreError> {
        self.data_sync.add_request(bucket, key)
    }

    /// Number of values requested with [`add_request`](Self::add_request) that have not arrived yet.
    pub fn unresolved_count(&self) -> usize {
        self.data_sync.unresolved_count()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap().len()
    }
}

impl<N: Network + 'static, K: KVStore> Drop for StateSync<N, K> {
    fn drop(&mut self) {
        for (shutdown, thread) in self.threads.drain(..) {
            let _ = shutdown.send(());
            let _ = thread.join();
        }
        self.data_sync.stop();
        self.snapshot.lock().unwrap().take();
        self.event_bus.take();
    }
}

/// Spawn the thread that hands responses to the engine that sent the request.
fn start_dispatcher<K: KVStore>(
    responses: MessageStub,
    data_sync: Arc<DataSync<K>>,
    snapshot: CurrentSnapshot<K>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        let (origin, response): (VerifyingKey, SyncMessage) = match responses.recv(POLL_INTERVAL) {
            Ok(received) => received,
            Err(MessageReceiveError::NotAvailable) => continue,
            Err(MessageReceiveError::Disconnected) => return,
        };
        if data_sync.on_response(&origin, &response) {
            continue;
        }
        let current = snapshot.lock().unwrap().clone();
        if let Some(current) = current {
            if !current.on_response(&origin, &response) {
                log::debug!("dropped sync response {} nobody waits for", response.req_id());
            }
        }
    })
}
