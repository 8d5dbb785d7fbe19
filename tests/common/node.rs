//! A block manager over an in-memory database and the [`TestService`], with blocking wrappers
//! around the callback-based import and propose.

use std::{
    sync::{
        atomic::{AtomicI64, Ordering},
        mpsc, Arc,
    },
    time::Duration,
};

use blockcore_rs::{
    block::Block,
    block_manager::{BlockCandidate, BlockManager, ImportFlags},
    config::{BlockManagerConfiguration, Clock},
    errors::CoreError,
    event_bus::EventHandlers,
    transaction::factory::FactoryRegistry,
    types::{
        commit_votes::CommitVoteSet, data_types::CryptoHash, validator_list::ValidatorList,
    },
};

use super::{fixtures::NETWORK_ID, mem_db::MemDB, test_service::TestService};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// A clock that tells the time it was last set to.
pub(crate) struct FixedClock(AtomicI64);

impl FixedClock {
    pub(crate) fn new(now: i64) -> Arc<FixedClock> {
        Arc::new(FixedClock(AtomicI64::new(now)))
    }

    pub(crate) fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

pub(crate) struct Node {
    kv_store: MemDB,
    service: TestService,
    manager: BlockManager<MemDB, TestService>,
}

impl Node {
    /// Open a node with an empty database, which finalizes the genesis block.
    pub(crate) fn new(validators: Option<ValidatorList>, clock: Arc<FixedClock>) -> Node {
        let kv_store = MemDB::new();
        let service = TestService::new(kv_store.clone(), validators);
        Node::open(kv_store, service, config(clock), EventHandlers::default()).unwrap()
    }

    pub(crate) fn open(
        kv_store: MemDB,
        service: TestService,
        config: BlockManagerConfiguration,
        event_handlers: EventHandlers,
    ) -> Result<Node, CoreError> {
        let manager = BlockManager::new(
            kv_store.clone(),
            service.clone(),
            FactoryRegistry::default(),
            config,
            event_handlers,
        )?;
        Ok(Node {
            kv_store,
            service,
            manager,
        })
    }

    pub(crate) fn kv_store(&self) -> &MemDB {
        &self.kv_store
    }

    pub(crate) fn service(&self) -> &TestService {
        &self.service
    }

    pub(crate) fn manager(&self) -> &BlockManager<MemDB, TestService> {
        &self.manager
    }

    /// Propose a block on `parent` and wait for the callback.
    pub(crate) fn propose(
        &self,
        parent: &CryptoHash,
        votes: CommitVoteSet,
    ) -> Result<BlockCandidate, CoreError> {
        let (sender, receiver) = mpsc::channel();
        let _canceller = self.manager.propose(parent, votes, move |result| {
            let _ = sender.send(result);
        })?;
        receiver
            .recv_timeout(CALLBACK_TIMEOUT)
            .expect("propose callback was not invoked")
    }

    /// Import the encoded `block` and wait for the callback.
    pub(crate) fn import(&self, block: &Block, flags: ImportFlags) -> Result<BlockCandidate, CoreError> {
        let (sender, receiver) = mpsc::channel();
        let bytes = block.bytes();
        let _canceller = self.manager.import(&mut bytes.as_slice(), flags, move |result| {
            let _ = sender.send(result);
        })?;
        receiver
            .recv_timeout(CALLBACK_TIMEOUT)
            .expect("import callback was not invoked")
    }

    /// Propose a block on the last finalized block and finalize it.
    pub(crate) fn extend(&self, votes: CommitVoteSet) -> Block {
        let parent = self.manager.get_last_block();
        let candidate = self.propose(&parent.id(), votes).unwrap();
        self.manager.finalize(&candidate).unwrap();
        candidate.block().clone()
    }
}

pub(crate) fn config(clock: Arc<FixedClock>) -> BlockManagerConfiguration {
    BlockManagerConfiguration::builder()
        .network_id(NETWORK_ID)
        .clock(clock)
        .build()
}
