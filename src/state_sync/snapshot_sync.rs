/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Fetching everything a block's result and validator list commit to.
//!
//! A snapshot sync has up to four targets: the world state trie, the patch and normal receipt tries,
//! and the validator list. Each non-empty target gets its own [`Builder`], so that targets complete
//! independently. The sync completes when no builder has unresolved hashes left; the fetched values
//! are then flushed into the database and returned as a [`SyncResult`].
//!
//! ## The worker
//!
//! One thread drives the sync. Each time it wakes up, it:
//! 1. Expires overdue requests, doubling the timeouts of the peers that did not answer.
//! 2. Probes unchecked peers with a [`HasNode`] for the targets.
//! 3. Picks up to [`max_peers_for_sync`](crate::config::SyncConfiguration::max_peers_for_sync) ready
//!    peers at random and sends each of them up to
//!    [`max_request_hashes`](crate::config::SyncConfiguration::max_request_hashes) unresolved hashes
//!    of one target.
//! 4. Sleeps until a response arrives, a peer joins, or the next request expires.
//!
//! Responses are handled on the caller's thread by [`SnapshotShared::on_response`], which feeds
//! values into the builders and wakes the worker.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU32, Ordering},
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
        Arc, Condvar, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime},
};

use rand::seq::SliceRandom;

use crate::{
    config::SyncConfiguration,
    errors::CoreError,
    events::{EndSyncEvent, Event, PeerTimeoutEvent, StartSyncEvent},
    merkle::{
        builder::{Builder, LeafKind},
        MerkleRoot,
    },
    receipt::receipt_list::ReceiptList,
    storage::{
        buckets::BucketID,
        pluggables::{KVGetError, Key},
        KVGet, KVStore,
    },
    types::{
        crypto_primitives::{sha3_256, VerifyingKey},
        data_types::CryptoHash,
        validator_list::ValidatorList,
    },
    world_state::WorldSnapshot,
};

use super::{
    messages::{HasNode, RequestNodeData, Status, SyncMessage, SyncType},
    network::{Network, SenderHandle},
    peer_pool::{PeerPool, RequestKind},
    SyncError,
};

/// How long the worker sleeps when nothing is outstanding.
const IDLE_WAIT: Duration = Duration::from_millis(200);

/// The hashes a snapshot sync fetches everything under. `None` targets are skipped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncTargets {
    pub state_hash: MerkleRoot,
    pub validators_hash: Option<CryptoHash>,
    pub patch_receipts_hash: MerkleRoot,
    pub normal_receipts_hash: MerkleRoot,
}

/// What a completed snapshot sync makes available locally.
pub struct SyncResult<K: KVGet + Clone> {
    pub world: WorldSnapshot<K>,
    pub validators: Option<ValidatorList>,
    pub patch_receipts: ReceiptList,
    pub normal_receipts: ReceiptList,
}

struct Target<K: KVStore> {
    sync_type: SyncType,
    builder: Builder<K>,
}

pub(crate) struct SnapshotState<K: KVStore> {
    targets: SyncTargets,
    builders: Vec<Target<K>>,
    pool: PeerPool,
    stopped: bool,
    finished: bool,
    fetched: usize,
}

impl<K: KVStore> SnapshotState<K> {
    fn unresolved_count(&self) -> usize {
        self.builders
            .iter()
            .map(|target| target.builder.unresolved_count())
            .sum()
    }
}

/// The state of a snapshot sync shared between its worker and the threads that deliver responses
/// and peer events to it.
pub(crate) struct SnapshotShared<K: KVStore> {
    state: Mutex<SnapshotState<K>>,
    signal: Condvar,
}

impl<K: KVStore> SnapshotShared<K> {
    pub(crate) fn is_finished(&self) -> bool {
        self.state.lock().unwrap().finished
    }

    pub(crate) fn on_peer_join(&self, peer: VerifyingKey) {
        let mut state = self.state.lock().unwrap();
        if state.pool.join(peer, false) {
            self.signal.notify_all();
        }
    }

    pub(crate) fn on_peer_leave(&self, peer: &VerifyingKey) {
        let mut state = self.state.lock().unwrap();
        if state.pool.leave(peer).is_some() {
            self.signal.notify_all();
        }
    }

    /// Handle a response from `peer`. Returns whether it answered a request of this sync.
    pub(crate) fn on_response(&self, peer: &VerifyingKey, message: &SyncMessage) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.stopped || state.finished {
            return false;
        }
        let kind = match state.pool.complete(peer, message.req_id()) {
            Some(kind) => kind,
            None => return false,
        };
        let now = Instant::now();
        let rest_until = now + state.pool.timeout(peer).unwrap_or_default();

        match (kind, message) {
            (RequestKind::Probe, SyncMessage::HasNodeResult(result)) => {
                if result.status == Status::NoError {
                    state.pool.make_ready(peer, false);
                } else {
                    log::debug!("peer has no data for the sync targets: {:?}", result.status);
                    state.pool.rest(peer, rest_until);
                }
            }
            (RequestKind::Data { target, hashes }, SyncMessage::NodeData(node_data)) => {
                let requested: HashSet<CryptoHash> = hashes.into_iter().collect();
                let mut useful = 0;
                if let Some(target) = state.builders.get_mut(target) {
                    for value in node_data.data.iter() {
                        if !requested.contains(&sha3_256(value)) {
                            continue;
                        }
                        match target.builder.on_data(value) {
                            Ok(true) => useful += 1,
                            Ok(false) => (),
                            Err(err) => log::warn!("rejected value from sync peer: {:?}", err),
                        }
                    }
                }
                state.fetched += useful;
                if node_data.status == Status::NoError {
                    state.pool.make_ready(peer, useful > 0);
                } else {
                    state.pool.rest(peer, rest_until);
                }
            }
            _ => state.pool.rest(peer, rest_until),
        }

        self.signal.notify_all();
        true
    }

    fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        self.signal.notify_all();
    }
}

/// A running snapshot sync. Dropping it stops the sync.
pub struct SnapshotSync<K: KVStore> {
    shared: Arc<SnapshotShared<K>>,
    result: Receiver<Result<SyncResult<K>, SyncError>>,
    worker: Option<JoinHandle<()>>,
}

impl<K: KVStore> SnapshotSync<K> {
    pub(crate) fn start<N: Network + 'static>(
        kv_store: K,
        targets: SyncTargets,
        peers: Vec<VerifyingKey>,
        network: N,
        config: SyncConfiguration,
        req_ids: Arc<AtomicU32>,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<SnapshotSync<K>, SyncError> {
        let mut builders = Vec::new();
        if let Some(root) = targets.state_hash {
            let mut builder = Builder::new(kv_store.clone());
            builder.request_trie(root, LeafKind::Account)?;
            builders.push(Target {
                sync_type: SyncType::WorldState,
                builder,
            });
        }
        if let Some(hash) = targets.validators_hash {
            let mut builder = Builder::new(kv_store.clone());
            builder.request_data(BucketID::BytesByHash, hash)?;
            builders.push(Target {
                sync_type: SyncType::WorldState,
                builder,
            });
        }
        for (root, sync_type) in [
            (targets.patch_receipts_hash, SyncType::PatchReceipts),
            (targets.normal_receipts_hash, SyncType::NormalReceipts),
        ] {
            if let Some(root) = root {
                let mut builder = Builder::new(kv_store.clone());
                builder.request_trie(root, LeafKind::Receipt)?;
                builders.push(Target { sync_type, builder });
            }
        }

        let mut pool = PeerPool::new(config.request_timeout, config.max_timeout);
        for peer in peers {
            pool.join(peer, false);
        }

        let shared = Arc::new(SnapshotShared {
            state: Mutex::new(SnapshotState {
                targets,
                builders,
                pool,
                stopped: false,
                finished: false,
                fetched: 0,
            }),
            signal: Condvar::new(),
        });

        Event::publish(
            &event_publisher,
            Event::StartSync(StartSyncEvent {
                timestamp: SystemTime::now(),
                state_hash: targets.state_hash,
                validators_hash: targets.validators_hash,
            }),
        );

        let (result_sender, result) = mpsc::channel();
        let worker_shared = shared.clone();
        let worker = thread::spawn(move || {
            let mut worker = SnapshotWorker {
                shared: worker_shared,
                sender: SenderHandle::new(network),
                config,
                req_ids,
                event_publisher,
            };
            let result = worker.run(kv_store);
            let _ = result_sender.send(result);
        });

        Ok(SnapshotSync {
            shared,
            result,
            worker: Some(worker),
        })
    }

    pub(crate) fn shared(&self) -> Arc<SnapshotShared<K>> {
        self.shared.clone()
    }

    /// Number of hashes that are still to be fetched.
    pub fn unresolved_count(&self) -> usize {
        self.shared.state.lock().unwrap().unresolved_count()
    }

    /// Stop the sync. [`wait`](Self::wait) then fails with [`Interrupted`](crate::errors::ErrorKind::Interrupted).
    pub fn stop(&self) {
        self.shared.stop()
    }

    /// Block until the sync completes.
    pub fn wait(mut self) -> Result<SyncResult<K>, CoreError> {
        let result = self.result.recv().unwrap_or(Err(SyncError::Interrupted));
        self.join();
        Ok(result?)
    }

    /// Block until the sync completes or `timeout` passes, in which case the sync is stopped and
    /// this fails with [`Timeout`](crate::errors::ErrorKind::Timeout).
    pub fn wait_timeout(mut self, timeout: Duration) -> Result<SyncResult<K>, CoreError> {
        let result = match self.result.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(SyncError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(SyncError::Interrupted),
        };
        self.join();
        Ok(result?)
    }

    fn join(&mut self) {
        self.shared.stop();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl<K: KVStore> Drop for SnapshotSync<K> {
    fn drop(&mut self) {
        self.join();
    }
}

struct SnapshotWorker<N: Network, K: KVStore> {
    shared: Arc<SnapshotShared<K>>,
    sender: SenderHandle<N>,
    config: SyncConfiguration,
    req_ids: Arc<AtomicU32>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network, K: KVStore> SnapshotWorker<N, K> {
    fn run(&mut self, kv_store: K) -> Result<SyncResult<K>, SyncError> {
        let shared = self.shared.clone();
        let mut rng = rand::thread_rng();
        let mut state = shared.state.lock().unwrap();

        let outcome = loop {
            if state.stopped {
                break Err(SyncError::Interrupted);
            }
            let now = Instant::now();
            self.expire(&mut state, now);
            state.pool.wake(now, false);

            if state.unresolved_count() == 0 {
                break Ok(());
            }

            self.probe(&mut state, now);
            self.request(&mut state, now, &mut rng);

            let wait = state
                .pool
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(now))
                .unwrap_or(IDLE_WAIT)
                .max(Duration::from_millis(1));
            state = shared.signal.wait_timeout(state, wait).unwrap().0;
        };

        state.finished = true;
        let completed = outcome.is_ok();
        if completed {
            for target in state.builders.iter_mut() {
                target.builder.flush();
            }
        }
        Event::publish(
            &self.event_publisher,
            Event::EndSync(EndSyncEvent {
                timestamp: SystemTime::now(),
                state_hash: state.targets.state_hash,
                fetched: state.fetched,
                completed,
            }),
        );
        let targets = state.targets;
        drop(state);

        outcome?;
        sync_result(kv_store, &targets)
    }

    fn expire(&mut self, state: &mut SnapshotState<K>, now: Instant) {
        for (peer, _, timeout) in state.pool.expire(now) {
            log::debug!("sync request expired, next timeout {:?}", timeout);
            Event::publish(
                &self.event_publisher,
                Event::PeerTimeout(PeerTimeoutEvent {
                    timestamp: SystemTime::now(),
                    peer,
                    timeout,
                }),
            );
        }
    }

    fn probe(&mut self, state: &mut SnapshotState<K>, now: Instant) {
        let wanted = self
            .config
            .max_peers_for_sync
            .saturating_sub(state.pool.ready_count() + state.pool.sent_count());
        for peer in state.pool.unchecked_peers().into_iter().take(wanted) {
            let req_id = self.req_ids.fetch_add(1, Ordering::Relaxed);
            self.sender.send(
                peer,
                HasNode {
                    req_id,
                    state_hash: state.targets.state_hash,
                    validator_hash: state.targets.validators_hash,
                    patch_rcpt_hash: state.targets.patch_receipts_hash,
                    normal_rcpt_hash: state.targets.normal_receipts_hash,
                },
            );
            state.pool.sent(&peer, req_id, RequestKind::Probe, now);
        }
    }

    fn request(&mut self, state: &mut SnapshotState<K>, now: Instant, rng: &mut impl rand::Rng) {
        let ready = state.pool.ready_peers();
        let chosen: Vec<VerifyingKey> = ready
            .choose_multiple(rng, self.config.max_peers_for_sync)
            .copied()
            .collect();

        let mut next_target = 0;
        for peer in chosen {
            let mut assigned = None;
            for offset in 0..state.builders.len() {
                let index = (next_target + offset) % state.builders.len();
                let in_flight = state.pool.in_flight(index);
                let hashes = state.builders[index]
                    .builder
                    .unresolved(self.config.max_request_hashes, &in_flight);
                if !hashes.is_empty() {
                    assigned = Some((index, hashes));
                    break;
                }
            }
            let (index, hashes) = match assigned {
                Some(assigned) => assigned,
                None => return,
            };
            next_target = index + 1;

            let req_id = self.req_ids.fetch_add(1, Ordering::Relaxed);
            self.sender.send(
                peer,
                RequestNodeData {
                    req_id,
                    sync_type: state.builders[index].sync_type,
                    hashes: hashes.clone(),
                },
            );
            state.pool.sent(
                &peer,
                req_id,
                RequestKind::Data {
                    target: index,
                    hashes,
                },
                now,
            );
        }
    }
}

fn sync_result<K: KVStore>(kv_store: K, targets: &SyncTargets) -> Result<SyncResult<K>, SyncError> {
    let validators = match targets.validators_hash {
        Some(hash) => Some(kv_store.validator_list(&hash)?.ok_or(
            KVGetError::ValueExpectedButNotFound {
                key: Key::ValidatorList { hash },
            },
        )?),
        None => None,
    };
    Ok(SyncResult {
        validators,
        patch_receipts: ReceiptList::load(kv_store.clone(), targets.patch_receipts_hash)?,
        normal_receipts: ReceiptList::load(kv_store.clone(), targets.normal_receipts_hash)?,
        world: WorldSnapshot::new(kv_store, targets.state_hash),
    })
}
