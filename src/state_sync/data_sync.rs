//! Background fetching of single values.
//!
//! Any component may ask for a value it is missing with [`add_request`](DataSync::add_request). The
//! worker sends the outstanding keys to up to
//! [`data_sync_peers`](crate::config::SyncConfiguration::data_sync_peers) ready peers per round and
//! starts the next round on the first reply, or after
//! [`data_sync_round`](crate::config::SyncConfiguration::data_sync_round) if nobody replies.
//!
//! Peers that answer with values somebody asked for are served first in later rounds. Peers that
//! answer with nothing useful, or not at all, rest for a round.

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        mpsc::Sender,
        Arc, Condvar, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use crate::{
    config::SyncConfiguration,
    errors::CoreError,
    events::{Event, PeerTimeoutEvent},
    merkle::builder::Builder,
    storage::{buckets::BucketID, KVStore},
    types::{
        crypto_primitives::{sha3_256, VerifyingKey},
        data_types::CryptoHash,
    },
};

use super::{
    messages::{RequestNodeData, Status, SyncMessage, SyncType},
    network::{Network, SenderHandle},
    peer_pool::{PeerPool, RequestKind},
    SyncError,
};

const IDLE_WAIT: Duration = Duration::from_millis(200);

struct DataSyncState<K: KVStore> {
    builder: Builder<K>,
    pool: PeerPool,
    stopped: bool,
    round: Duration,
    round_deadline: Option<Instant>,
    replied: bool,
}

struct DataSyncShared<K: KVStore> {
    state: Mutex<DataSyncState<K>>,
    signal: Condvar,
}

pub struct DataSync<K: KVStore> {
    shared: Arc<DataSyncShared<K>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<K: KVStore> DataSync<K> {
    pub(crate) fn start<N: Network + 'static>(
        kv_store: K,
        network: N,
        config: SyncConfiguration,
        req_ids: Arc<AtomicU32>,
        event_publisher: Option<Sender<Event>>,
    ) -> DataSync<K> {
        let shared = Arc::new(DataSyncShared {
            state: Mutex::new(DataSyncState {
                builder: Builder::new(kv_store),
                pool: PeerPool::new(config.request_timeout, config.max_timeout),
                stopped: false,
                round: config.data_sync_round,
                round_deadline: None,
                replied: false,
            }),
            signal: Condvar::new(),
        });

        let worker_shared = shared.clone();
        let worker = thread::spawn(move || {
            run(
                worker_shared,
                SenderHandle::new(network),
                config,
                req_ids,
                event_publisher,
            )
        });

        DataSync {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Ask for the value with hash `key` in `bucket`. Does nothing if the value is available locally.
    pub fn add_request(&self, bucket: BucketID, key: CryptoHash) -> Result<(), CoreError> {
        let mut state = self.shared.state.lock().unwrap();
        if state.stopped {
            return Err(SyncError::Terminated.into());
        }
        state.builder.request_data(bucket, key)?;
        if state.builder.is_pending(&key) {
            log::debug!("data sync requested {}", key);
            self.shared.signal.notify_all();
        }
        Ok(())
    }

    /// Number of requested values that have not arrived yet.
    pub fn unresolved_count(&self) -> usize {
        self.shared.state.lock().unwrap().builder.unresolved_count()
    }

    pub(crate) fn on_peer_join(&self, peer: VerifyingKey) {
        let mut state = self.shared.state.lock().unwrap();
        if state.pool.join(peer, true) {
            self.shared.signal.notify_all();
        }
    }

    pub(crate) fn on_peer_leave(&self, peer: &VerifyingKey) {
        let mut state = self.shared.state.lock().unwrap();
        if state.pool.leave(peer).is_some() {
            self.shared.signal.notify_all();
        }
    }

    /// Handle a response from `peer`. Returns whether it answered a request of data sync.
    pub(crate) fn on_response(&self, peer: &VerifyingKey, message: &SyncMessage) -> bool {
        let node_data = match message {
            SyncMessage::NodeData(node_data) => node_data,
            _ => return false,
        };
        let mut state = self.shared.state.lock().unwrap();
        if state.stopped {
            return false;
        }
        let hashes = match state.pool.complete(peer, node_data.req_id) {
            Some(RequestKind::Data { hashes, .. }) => hashes,
            Some(RequestKind::Probe) | None => return false,
        };

        let mut useful = 0;
        for value in node_data.data.iter() {
            if !hashes.contains(&sha3_256(value)) {
                continue;
            }
            match state.builder.on_data(value) {
                Ok(true) => useful += 1,
                Ok(false) => (),
                Err(err) => log::warn!("rejected value from data sync peer: {:?}", err),
            }
        }
        if useful > 0 {
            state.builder.flush();
        }

        let now = Instant::now();
        if node_data.status == Status::NoError && useful > 0 {
            state.pool.make_ready(peer, true);
        } else {
            let until = now + state.round;
            state.pool.rest(peer, until);
        }
        state.replied = true;
        self.shared.signal.notify_all();
        true
    }

    /// Stop the worker. Later requests fail with [`InvalidState`](crate::errors::ErrorKind::InvalidState).
    pub(crate) fn stop(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.stopped = true;
            self.shared.signal.notify_all();
        }
        if let Some(worker) = self.worker.lock().unwrap().take() {
            let _ = worker.join();
        }
    }
}

impl<K: KVStore> Drop for DataSync<K> {
    fn drop(&mut self) {
        self.stop()
    }
}

fn run<N: Network, K: KVStore>(
    shared: Arc<DataSyncShared<K>>,
    mut sender: SenderHandle<N>,
    config: SyncConfiguration,
    req_ids: Arc<AtomicU32>,
    event_publisher: Option<Sender<Event>>,
) {
    let mut state = shared.state.lock().unwrap();
    loop {
        if state.stopped {
            return;
        }
        let now = Instant::now();
        let round = state.round;

        for (peer, _, timeout) in state.pool.expire(now) {
            state.pool.rest(&peer, now + round);
            Event::publish(
                &event_publisher,
                Event::PeerTimeout(PeerTimeoutEvent {
                    timestamp: SystemTime::now(),
                    peer,
                    timeout,
                }),
            );
        }
        state.pool.wake(now, true);

        let round_over = state.replied || state.round_deadline.map_or(true, |deadline| now >= deadline);
        if round_over && state.builder.unresolved_count() > 0 && state.pool.ready_count() > 0 {
            send_round(&mut state, &mut sender, &config, &req_ids, now);
        }

        let wait = [state.pool.next_deadline(), state.round_deadline]
            .into_iter()
            .flatten()
            .filter(|deadline| *deadline > now)
            .min()
            .map(|deadline| deadline - now)
            .unwrap_or(IDLE_WAIT);
        state = shared.signal.wait_timeout(state, wait).unwrap().0;
    }
}

fn send_round<N: Network, K: KVStore>(
    state: &mut DataSyncState<K>,
    sender: &mut SenderHandle<N>,
    config: &SyncConfiguration,
    req_ids: &AtomicU32,
    now: Instant,
) {
    let mut sent = 0;
    for peer in state.pool.ready_peers().into_iter().take(config.data_sync_peers) {
        let in_flight = state.pool.in_flight(0);
        let hashes = state.builder.unresolved(config.max_request_hashes, &in_flight);
        if hashes.is_empty() {
            break;
        }
        let req_id = req_ids.fetch_add(1, Ordering::Relaxed);
        sender.send(
            peer,
            RequestNodeData {
                req_id,
                sync_type: SyncType::WorldState,
                hashes: hashes.clone(),
            },
        );
        state
            .pool
            .sent(&peer, req_id, RequestKind::Data { target: 0, hashes }, now);
        sent += 1;
    }
    if sent > 0 {
        log::debug!("data sync round sent to {} peers", sent);
        state.round_deadline = Some(now + config.data_sync_round);
        state.replied = false;
    }
}
