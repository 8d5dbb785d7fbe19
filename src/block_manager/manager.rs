/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The [`BlockManager`]: the public face of the block-management core.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    io::Read,
    sync::{
        mpsc::{self, Receiver, Sender},
        Arc, Mutex, Weak,
    },
    thread::{self, JoinHandle},
};

use crate::{
    block::{
        block::BlockParams,
        header::VERSION_2,
        reader::{read_block, read_block_data, BlockData},
        Block,
    },
    config::BlockManagerConfiguration,
    errors::{CoreError, ErrorKind},
    event_bus::{EventBus, EventHandlers},
    merkle::builder::{Builder, LeafKind},
    storage::{
        buckets::BucketID,
        pluggables::{KVGet, KVStore},
        write_batch::{commit, ChainWriteBatch},
    },
    transaction::{factory::FactoryRegistry, transaction_list::TransactionList, TransactionInfo},
    transition::{
        execution::{
            BlockInfo, ConsensusInfo, Execution, ExecutionEvent, FinalizeFlags, ServiceManager,
            TransitionResult,
        },
        ref_trace::TraceEntry,
        tree::{Handle, Notification, TransitionTree},
    },
    types::{
        commit_votes::CommitVoteSet,
        data_types::{BlockHeight, CryptoHash},
    },
};

use super::{
    cache::{BlockCache, BLOCK_CACHE_CAPACITY},
    candidate::{BlockCandidate, CandidateOwner, TaskCanceller, TaskId, TaskOwner},
    chain::{load_block, write_block, Chain, LocatedTransaction, WorkerMessage},
    deferred::DeferredMutex,
    node_tree::{BlockNode, NodeTree},
    task::ImportFlags,
};

/// Number of hashes [`export_blocks`](BlockManager::export_blocks) resolves per round.
const EXPORT_BATCH: usize = 256;

/// Coordinates import, proposal and finalization of blocks. See the [module-level docs](super).
pub struct BlockManager<K: KVStore, S: ServiceManager> {
    chain: Arc<DeferredMutex<Chain<K, S>>>,
    registry: Arc<FactoryRegistry>,
    worker_sender: Mutex<Sender<WorkerMessage>>,
    worker: Option<JoinHandle<()>>,
    event_bus: Option<EventBus>,
}

impl<K: KVStore, S: ServiceManager> BlockManager<K, S> {
    /// Open the chain stored in `kv_store`.
    ///
    /// If `kv_store` is empty, the genesis block is built from
    /// [`genesis_transactions`](BlockManagerConfiguration::genesis_transactions), executed on the
    /// service's initial transition and finalized before this returns. Otherwise the last finalized
    /// block is restored and its normal transactions are executed again.
    pub fn new(
        kv_store: K,
        service: S,
        registry: FactoryRegistry,
        config: BlockManagerConfiguration,
        event_handlers: EventHandlers,
    ) -> Result<BlockManager<K, S>, CoreError> {
        let mut kv_store = kv_store;
        let registry = Arc::new(registry);

        let mut event_handlers = event_handlers;
        if config.log_events {
            event_handlers.add_loggers();
        }
        let event_bus = EventBus::start(event_handlers);
        let event_publisher = event_bus.as_ref().map(EventBus::publisher);

        let (worker_sender, worker_receiver) = mpsc::channel();
        let notifier_sender = Mutex::new(worker_sender.clone());
        let mut tree = TransitionTree::new(
            Arc::new(service),
            Arc::new(move |id, event| {
                if let Ok(sender) = notifier_sender.lock() {
                    let _ = sender.send(WorkerMessage::Transition(id, event));
                }
            }),
        );

        let root = match kv_store.last_height()? {
            None => finalize_genesis(&mut kv_store, &mut tree, &registry, &config, &worker_receiver)?,
            Some(height) => restore(&kv_store, &mut tree, &registry, &config, height)?,
        };
        log::info!(
            "Block manager opened at height {} with block {}",
            root.block.height(),
            root.block.id()
        );

        let mut cache = BlockCache::new(BLOCK_CACHE_CAPACITY);
        cache.put(root.block.clone());
        let chain = Arc::new(DeferredMutex::new(Chain {
            kv_store,
            registry: registry.clone(),
            config,
            tree,
            nodes: NodeTree::new(root),
            cache,
            tasks: HashMap::new(),
            owners: HashMap::new(),
            next_task: 0,
            block_waiters: BTreeMap::new(),
            transaction_waiters: BTreeMap::new(),
            event_publisher,
            this: Weak::new(),
        }));
        chain.lock().this = Arc::downgrade(&chain);
        let worker = start_worker(chain.clone(), worker_receiver);

        Ok(BlockManager {
            chain,
            registry,
            worker_sender: Mutex::new(worker_sender),
            worker: Some(worker),
            event_bus,
        })
    }

    /* ↓↓↓ Import and propose ↓↓↓ */

    /// Read a block from `reader` and import it on top of its parent, which must be in the tree.
    ///
    /// Header errors (height, previous ID, version, votes, timestamp) are returned right away.
    /// Execution errors, and the resulting [`BlockCandidate`], are delivered to `callback` from the
    /// block manager's worker thread, unless the task is cancelled first.
    pub fn import<R: Read>(
        &self,
        reader: &mut R,
        flags: ImportFlags,
        callback: impl FnOnce(Result<BlockCandidate, CoreError>) + Send + 'static,
    ) -> Result<TaskCanceller, CoreError> {
        let block = read_block(reader, &self.registry)?;
        self.import_block(block, flags, callback)
    }

    /// Import an already decoded block. See [`import`](Self::import).
    pub fn import_block(
        &self,
        block: Block,
        flags: ImportFlags,
        callback: impl FnOnce(Result<BlockCandidate, CoreError>) + Send + 'static,
    ) -> Result<TaskCanceller, CoreError> {
        let mut guard = self.chain.lock();
        let (chain, deferred) = guard.split();
        let task = chain.start_import(block, flags, Box::new(callback), deferred)?;
        Ok(self.canceller(task.unwrap_or_default()))
    }

    /// Propose a new block on top of `parent_id`, carrying `votes` for the parent.
    ///
    /// The block's timestamp is the latest of the configured clock's time, one microsecond after
    /// the votes' timestamp, and one microsecond after the parent's timestamp.
    pub fn propose(
        &self,
        parent_id: &CryptoHash,
        votes: CommitVoteSet,
        callback: impl FnOnce(Result<BlockCandidate, CoreError>) + Send + 'static,
    ) -> Result<TaskCanceller, CoreError> {
        let mut guard = self.chain.lock();
        let (chain, deferred) = guard.split();
        let task = chain.start_propose(parent_id, votes, Box::new(callback), deferred)?;
        Ok(self.canceller(task))
    }

    fn canceller(&self, task: TaskId) -> TaskCanceller {
        let owner: Weak<dyn TaskOwner> = Arc::downgrade(&self.chain) as Weak<dyn TaskOwner>;
        TaskCanceller::new(owner, task)
    }

    /* ↓↓↓ Candidates ↓↓↓ */

    /// Get another reference to the node of `candidate`.
    pub fn dup_candidate(&self, candidate: &BlockCandidate) -> Result<BlockCandidate, CoreError> {
        candidate.dup().ok_or_else(|| {
            ErrorKind::InvalidState.error(format!("block {} is no longer in the tree", candidate.id()))
        })
    }

    /// Give back `candidate`. Equivalent to dropping it.
    pub fn dispose_candidate(&self, candidate: BlockCandidate) {
        drop(candidate)
    }

    /* ↓↓↓ Commit and finalize ↓↓↓ */

    /// Check that `candidate` is still attached to the tree.
    pub fn commit(&self, candidate: &BlockCandidate) -> Result<(), CoreError> {
        if self.chain.lock().nodes.contains(&candidate.id()) {
            Ok(())
        } else {
            Err(ErrorKind::InvalidState.error(format!("block {} is not in the tree", candidate.id())))
        }
    }

    /// Finalize `candidate`, whose parent must be the last finalized block. Every block that does not
    /// descend from it is removed from the tree.
    pub fn finalize(&self, candidate: &BlockCandidate) -> Result<(), CoreError> {
        let mut guard = self.chain.lock();
        let (chain, deferred) = guard.split();
        chain.finalize(&candidate.id(), deferred)
    }

    /* ↓↓↓ Queries ↓↓↓ */

    pub fn get_last_block(&self) -> Block {
        self.chain.lock().nodes.root().block.clone()
    }

    pub fn get_block(&self, id: &CryptoHash) -> Result<Block, CoreError> {
        self.chain.lock().block(id)
    }

    pub fn get_block_by_height(&self, height: BlockHeight) -> Result<Block, CoreError> {
        self.chain.lock().block_by_height(height)
    }

    /// Get a channel that receives the block at `height` once it is finalized. If it already is, the
    /// block is in the channel already.
    pub fn wait_for_block(&self, height: BlockHeight) -> Receiver<Block> {
        let (sender, receiver) = mpsc::channel();
        let mut chain = self.chain.lock();
        if height <= chain.last_height() {
            match chain.block_by_height(height) {
                Ok(block) => {
                    let _ = sender.send(block);
                }
                Err(err) => log::warn!("Finalized block at height {} is unreadable: {}", height, err),
            }
        } else {
            chain.block_waiters.entry(height).or_default().push(sender);
        }
        receiver
    }

    /// Look up a finalized transaction by ID.
    pub fn get_transaction_info(&self, id: &CryptoHash) -> Result<LocatedTransaction, CoreError> {
        self.chain.lock().transaction_info(id)
    }

    /// Get a channel that receives the located transaction once its receipt is final. Fails with
    /// [`NotFound`](ErrorKind::NotFound) if the transaction is not in a finalized block.
    pub fn wait_transaction_result(
        &self,
        id: &CryptoHash,
    ) -> Result<Receiver<Result<LocatedTransaction, CoreError>>, CoreError> {
        let (sender, receiver) = mpsc::channel();
        self.chain.lock().wait_transaction(id, sender)?;
        Ok(receiver)
    }

    /// Decode block data of any version from `reader` without attaching it.
    pub fn new_block_data_from_reader<R: Read>(&self, reader: &mut R) -> Result<BlockData, CoreError> {
        read_block_data(reader, &self.registry)
    }

    /// Copy finalized blocks `from..=to` into `destination`, with everything needed to open a
    /// block manager on it at height `to`: validator lists, the world state and the receipts their
    /// results commit to. `on_block` is called after each block is copied; an error from it stops the
    /// export.
    pub fn export_blocks<D: KVStore>(
        &self,
        from: BlockHeight,
        to: BlockHeight,
        destination: D,
        mut on_block: impl FnMut(BlockHeight) -> Result<(), CoreError>,
    ) -> Result<(), CoreError> {
        let (source, network_id, last_height) = {
            let chain = self.chain.lock();
            (chain.kv_store.clone(), chain.config.network_id, chain.last_height())
        };
        if from > to || to > last_height {
            return Err(ErrorKind::IllegalArgument.error(format!(
                "cannot export heights {}..={} with {} finalized",
                from, to, last_height
            )));
        }

        let mut destination = destination;
        let mut height = from;
        while height <= to {
            let id = source
                .block_at_height(height)?
                .ok_or_else(|| ErrorKind::NotFound.error(format!("no block at height {}", height)))?;
            let block = load_block(&source, &self.registry, &id)?;

            let mut wb = ChainWriteBatch::new();
            write_block(&mut wb, &block);
            commit(&mut destination, wb);

            let mut builder = Builder::new(destination.clone());
            let result = TransitionResult::from_bytes(block.result())?;
            if let Some(root) = result.state_hash {
                builder.request_trie(root, LeafKind::Account)?;
            }
            for root in [result.patch_receipts_hash, result.normal_receipts_hash]
                .into_iter()
                .flatten()
            {
                builder.request_trie(root, LeafKind::Receipt)?;
            }
            if let Some(hash) = block.next_validators_hash() {
                builder.request_data(BucketID::BytesByHash, hash)?;
            }
            copy_unresolved(&source, &mut builder)?;
            builder.flush();

            on_block(height)?;
            height += 1;
        }

        let mut wb = ChainWriteBatch::new();
        wb.set_last_height(to);
        wb.set_network_id(network_id.int());
        commit(&mut destination, wb);
        Ok(())
    }

    /* ↓↓↓ Tracing ↓↓↓ */

    /// Start or stop recording live transitions.
    pub fn set_transition_tracing(&self, enabled: bool) {
        self.chain.lock().tree.enable_tracing(enabled)
    }

    /// List live transitions. Empty unless tracing is enabled.
    pub fn transition_trace(&self) -> Vec<TraceEntry> {
        self.chain.lock().tree.trace_report()
    }

    /// Number of blocks in the tree, including the last finalized one.
    pub fn tree_size(&self) -> usize {
        self.chain.lock().nodes.len()
    }
}

impl<K: KVStore, S: ServiceManager> Drop for BlockManager<K, S> {
    fn drop(&mut self) {
        {
            let mut guard = self.chain.lock();
            let (chain, deferred) = guard.split();
            chain.terminate(deferred);
        }
        if let Ok(sender) = self.worker_sender.lock() {
            let _ = sender.send(WorkerMessage::Shutdown);
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.event_bus.take();
    }
}

impl<K: KVStore, S: ServiceManager> CandidateOwner for DeferredMutex<Chain<K, S>> {
    fn add_candidate(&self, id: &CryptoHash) -> bool {
        self.lock().nodes.add_candidate(id)
    }

    fn remove_candidate(&self, id: &CryptoHash) {
        let mut guard = self.lock();
        let (chain, deferred) = guard.split();
        chain.remove_candidate(id, deferred);
    }
}

impl<K: KVStore, S: ServiceManager> TaskOwner for DeferredMutex<Chain<K, S>> {
    fn cancel_task(&self, task: TaskId) -> bool {
        let mut guard = self.lock();
        let (chain, deferred) = guard.split();
        chain.cancel_task(task, deferred)
    }
}

/// Feed the engine's progress reports to the chain until asked to stop.
fn start_worker<K: KVStore, S: ServiceManager>(
    shared: Arc<DeferredMutex<Chain<K, S>>>,
    receiver: Receiver<WorkerMessage>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match receiver.recv() {
            Ok(WorkerMessage::Transition(id, event)) => {
                let mut guard = shared.lock();
                let (chain, deferred) = guard.split();
                let notifications = chain.tree.on_event(id, event);
                chain.dispatch(notifications, deferred);
            }
            Ok(WorkerMessage::Shutdown) | Err(_) => return,
        }
    })
}

/// Build, execute and persist the genesis block of an empty database.
fn finalize_genesis<K: KVStore, S: ServiceManager>(
    kv_store: &mut K,
    tree: &mut TransitionTree<S>,
    registry: &FactoryRegistry,
    config: &BlockManagerConfiguration,
    receiver: &Receiver<WorkerMessage>,
) -> Result<BlockNode, CoreError> {
    let initial = tree.service().initial_transition()?;
    let result = initial
        .result()
        .ok_or_else(|| ErrorKind::InvalidState.error("initial transition has no result"))?;
    let logs_bloom = initial.logs_bloom();
    let patch_receipts = initial.patch_receipts();
    let normal_receipts = initial.normal_receipts();
    let in_transition = tree.new_root(initial);

    let transactions = TransactionList::from_bytes_list(registry, &config.genesis_transactions)?;
    if let Some(foreign) = transactions
        .iter()
        .find(|transaction| !transaction.validate_network(config.network_id))
    {
        return Err(ErrorKind::IllegalArgument.error(format!(
            "genesis transaction {} is not for network {}",
            foreign.id(),
            config.network_id
        )));
    }
    let info = BlockInfo {
        height: BlockHeight::new(0),
        timestamp: 0,
    };
    let (preexe, notifications) = tree.transit(
        &in_transition,
        transactions.clone(),
        info,
        ConsensusInfo::default(),
    )?;
    wait_until_executed(tree, &preexe, notifications, receiver)?;

    let execution = tree
        .execution(&preexe)
        .ok_or_else(|| ErrorKind::InvalidState.error("genesis transition was released"))?;
    let next_validators = execution.next_validators();
    let block = Block::new(
        BlockParams::builder()
            .version(VERSION_2)
            .height(BlockHeight::new(0))
            .timestamp(0)
            .votes(CommitVoteSet::empty(0))
            .next_validators_hash(next_validators.as_ref().map(|validators| validators.hash()))
            .normal_transactions(transactions)
            .logs_bloom(logs_bloom)
            .result(result)
            .build(),
    );
    tree.service().finalize(
        execution,
        FinalizeFlags {
            patch_transactions: true,
            normal_transactions: true,
            result: true,
        },
    )?;

    let mut wb = ChainWriteBatch::new();
    write_block(&mut wb, &block);
    patch_receipts.flush(&mut wb);
    normal_receipts.flush(&mut wb);
    if let Some(next_validators) = &next_validators {
        wb.set_validator_list(next_validators);
    }
    wb.set_last_height(block.height());
    wb.set_network_id(config.network_id.int());
    commit(kv_store, wb);
    log::debug!("Finalized genesis block {}", block.id());

    Ok(BlockNode {
        block,
        parent: None,
        children: Vec::new(),
        in_transition,
        preexe,
        validators: None,
        next_validators,
        candidates: 0,
    })
}

/// Drive the tree from the worker channel until `handle` has executed.
fn wait_until_executed<S: ServiceManager>(
    tree: &mut TransitionTree<S>,
    handle: &Handle,
    notifications: Vec<Notification>,
    receiver: &Receiver<WorkerMessage>,
) -> Result<(), CoreError> {
    let mut notifications = notifications;
    loop {
        for notification in notifications.drain(..) {
            if notification.handle != handle.id() {
                continue;
            }
            match notification.event {
                ExecutionEvent::Validated(Err(err)) | ExecutionEvent::Executed(Err(err)) => {
                    return Err(err)
                }
                ExecutionEvent::Executed(Ok(())) => return Ok(()),
                ExecutionEvent::Validated(Ok(())) => (),
            }
        }
        match receiver.recv() {
            Ok(WorkerMessage::Transition(id, event)) => notifications = tree.on_event(id, event),
            Ok(WorkerMessage::Shutdown) | Err(_) => {
                return Err(ErrorKind::Interrupted.error("stopped while executing genesis"))
            }
        }
    }
}

/// Rebuild the root node from the last finalized block in `kv_store`.
fn restore<K: KVStore, S: ServiceManager>(
    kv_store: &K,
    tree: &mut TransitionTree<S>,
    registry: &FactoryRegistry,
    config: &BlockManagerConfiguration,
    height: BlockHeight,
) -> Result<BlockNode, CoreError> {
    match kv_store.network_id()? {
        Some(network_id) if network_id == config.network_id.int() => (),
        stored => {
            return Err(ErrorKind::InvalidState.error(format!(
                "database belongs to network {:?}, configured network is {}",
                stored, config.network_id
            )))
        }
    }
    let id = kv_store
        .block_at_height(height)?
        .ok_or_else(|| ErrorKind::NotFound.error(format!("last block at height {}", height)))?;
    let block = load_block(kv_store, registry, &id)?;

    let next_validators = match block.next_validators_hash() {
        Some(hash) => Some(kv_store.validator_list(&hash)?.ok_or_else(|| {
            ErrorKind::NotFound.error(format!("validator list {}", hash))
        })?),
        None => None,
    };
    let validators = match block.prev_id() {
        Some(prev_id) => {
            let parent = load_block(kv_store, registry, &prev_id)?;
            match parent.next_validators_hash() {
                Some(hash) => kv_store.validator_list(&hash)?,
                None => None,
            }
        }
        None => None,
    };

    let execution =
        tree.service()
            .transition_from_result(block.result(), next_validators.clone(), block.height())?;
    let in_transition = tree.new_root(execution);
    let info = BlockInfo {
        height: block.height(),
        timestamp: block.timestamp(),
    };
    let consensus = ConsensusInfo {
        proposer: block.proposer(),
        voted: Vec::new(),
    };
    // Progress of the re-execution reaches the worker, which finds no owner for it.
    let (preexe, _) = tree.transit(
        &in_transition,
        block.normal_transactions().clone(),
        info,
        consensus,
    )?;

    Ok(BlockNode {
        block,
        parent: None,
        children: Vec::new(),
        in_transition,
        preexe,
        validators,
        next_validators,
        candidates: 0,
    })
}

/// Resolve everything `builder` asks for from `source`.
fn copy_unresolved<G: KVGet, D: KVStore>(source: &G, builder: &mut Builder<D>) -> Result<(), CoreError> {
    let none = HashSet::new();
    loop {
        let hashes = builder.unresolved(EXPORT_BATCH, &none);
        if hashes.is_empty() {
            return Ok(());
        }
        for hash in hashes {
            let value = source
                .node_data(&hash)
                .ok_or_else(|| ErrorKind::NotFound.error(format!("merkle value {}", hash)))?;
            builder.on_data(&value)?;
        }
    }
}
