/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Integration tests of the block manager: proposing, importing, cancelling, finalizing and
//! restoring blocks on top of the test execution engine.

mod common;

use std::{sync::mpsc, time::Duration};

use blockcore_rs::{
    block::{block::BlockParams, header::VERSION_2, verifier::HeaderError, Block},
    block_manager::ImportFlags,
    config::BlockManagerConfiguration,
    errors::ErrorKind,
    event_bus::EventHandlers,
    events::TaskKind,
    merkle::{proof::verify_proof, varint},
    transaction::{TransactionGroup, TransactionInfo},
    transition::execution::TransitionResult,
    types::{
        commit_votes::CommitVoteSet,
        data_types::{Address, BlockHeight, CryptoHash, NetworkID},
    },
};
use common::{
    fixtures::{commit_votes, double_sign_report, keypair, transfer, validator_list},
    logging::{log_with_context, setup_logger},
    node::{config, FixedClock, Node},
    test_service::TestService,
};
use log::LevelFilter;

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Tests that a proposed block extends the genesis block and becomes the last block once finalized.
#[test]
fn propose_and_finalize_test() {
    setup_logger(LevelFilter::Info);

    // 1. Open a node on an empty database.
    let clock = FixedClock::new(20);
    let node = Node::new(None, clock);
    let genesis = node.manager().get_last_block();
    assert_eq!(genesis.height(), BlockHeight::new(0));
    assert_eq!(genesis.prev_id(), None);
    assert_eq!(genesis.timestamp(), 0);

    // 2. Propose a block on the genesis block.
    let candidate = node.propose(&genesis.id(), CommitVoteSet::empty(10)).unwrap();
    let block = candidate.block().clone();
    assert_eq!(block.height(), BlockHeight::new(1));
    assert_eq!(block.prev_id(), Some(genesis.id()));
    assert_eq!(block.timestamp(), 20);
    assert_eq!(node.manager().tree_size(), 2);

    // 3. Finalize it.
    node.manager().commit(&candidate).unwrap();
    node.manager().finalize(&candidate).unwrap();
    log_with_context(None, "finalized block 1");

    let last = node.manager().get_last_block();
    assert_eq!(last.id(), block.id());
    assert_eq!(node.manager().get_block_by_height(BlockHeight::new(1)).unwrap(), block);
    assert_eq!(node.manager().get_block(&genesis.id()).unwrap(), genesis);
    assert_eq!(node.service().finalize_count(), 3);
}

/// Tests that the timestamp of a proposed block is pushed past the parent's when the clock lags.
#[test]
fn propose_timestamp_follows_parent_test() {
    setup_logger(LevelFilter::Info);

    let clock = FixedClock::new(20);
    let node = Node::new(None, clock.clone());
    node.extend(CommitVoteSet::empty(10));

    clock.set(5);
    let block = node.extend(CommitVoteSet::empty(15));
    assert_eq!(block.height(), BlockHeight::new(2));
    assert_eq!(block.timestamp(), 21);
}

/// Tests that a block whose timestamp does not exceed its parent's is rejected before execution.
#[test]
fn import_bad_timestamp_test() {
    setup_logger(LevelFilter::Info);

    // 1. Finalize block 1 with timestamp 20.
    let node = Node::new(None, FixedClock::new(20));
    let block1 = node.extend(CommitVoteSet::empty(10));
    assert_eq!(block1.timestamp(), 20);

    // 2. Build block 2 with the same timestamp as its parent.
    let block2 = Block::new(
        BlockParams::builder()
            .version(VERSION_2)
            .height(BlockHeight::new(2))
            .timestamp(20)
            .prev_id(Some(block1.id()))
            .votes(CommitVoteSet::empty(15))
            .result(block1.result().to_vec())
            .build(),
    );

    // 3. The import fails synchronously and the callback never runs.
    let (sender, receiver) = mpsc::channel();
    let err = node
        .manager()
        .import_block(block2, ImportFlags::default(), move |result| {
            let _ = sender.send(result);
        })
        .err()
        .expect("import of a block with a stale timestamp succeeded");
    assert!(matches!(
        err.header_error(),
        Some(HeaderError::BadTimestamp { timestamp: 20, .. })
    ));
    assert_eq!(err.kind(), ErrorKind::IllegalArgument);
    assert!(receiver.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(node.manager().get_last_block().height(), BlockHeight::new(1));
}

/// Tests that a cancelled proposal never calls back and leaves the tree unchanged.
#[test]
fn cancel_propose_test() {
    setup_logger(LevelFilter::Info);

    // 1. Open a node that reports cancellations.
    let (cancel_sender, cancel_receiver) = mpsc::channel();
    let kv_store = common::mem_db::MemDB::new();
    let service = TestService::new(kv_store.clone(), None);
    let node = Node::open(
        kv_store,
        service,
        config(FixedClock::new(20)),
        EventHandlers::default().on_cancel_task(move |event| {
            let _ = cancel_sender.send((event.task, event.block));
        }),
    )
    .unwrap();
    let genesis = node.manager().get_last_block();

    // 2. Hold back execution and propose.
    node.service().gate().close();
    let (sender, receiver) = mpsc::channel();
    let canceller = node
        .manager()
        .propose(&genesis.id(), CommitVoteSet::empty(10), move |result| {
            let _ = sender.send(result.map(|candidate| candidate.id()));
        })
        .unwrap();

    // 3. Cancel the proposal.
    assert!(canceller.cancel());
    assert!(!canceller.cancel());
    assert_eq!(
        cancel_receiver.recv_timeout(CALLBACK_TIMEOUT).unwrap(),
        (TaskKind::Propose, genesis.id())
    );

    // 4. Let execution go on. Nothing is delivered.
    node.service().gate().open();
    assert!(receiver.recv_timeout(Duration::from_millis(500)).is_err());
    assert_eq!(node.manager().tree_size(), 1);
}

/// Tests that transactions keep their order through proposal and import, and that the receipt of a
/// normal transaction is final once the next block is.
#[test]
fn transactions_and_receipts_test() {
    setup_logger(LevelFilter::Info);

    // 1. Initialize test components.
    // 1.1. A proposer and an importer over separate databases.
    let proposer = Node::new(None, FixedClock::new(20));
    let importer = Node::new(None, FixedClock::new(20));
    assert_eq!(
        proposer.manager().get_last_block().id(),
        importer.manager().get_last_block().id()
    );

    // 1.2. Two transfers.
    let sender = keypair();
    let a = transfer(&sender, Address::account([1u8; 20]), 10, 1, false);
    let b = transfer(&sender, Address::account([2u8; 20]), 20, 2, true);

    // 2. Propose and finalize block 1 carrying both.
    proposer.service().add_transaction(a.clone());
    proposer.service().add_transaction(b.clone());
    let block1 = proposer.extend(CommitVoteSet::empty(10));
    let normal: Vec<_> = block1.normal_transactions().iter().cloned().collect();
    assert_eq!(normal, vec![a.clone(), b.clone()]);

    // 3. Import block 1 on the other node.
    let imported = importer.import(&block1, ImportFlags::default()).unwrap();
    assert_eq!(imported.id(), block1.id());
    let normal: Vec<_> = imported.block().normal_transactions().iter().cloned().collect();
    assert_eq!(normal, vec![a.clone(), b.clone()]);

    // 3.1. Importing a block already in the tree delivers it right away.
    let (sender_again, receiver_again) = mpsc::channel();
    let canceller = importer
        .manager()
        .import_block(block1.clone(), ImportFlags::default(), move |result| {
            let _ = sender_again.send(result.map(|candidate| candidate.id()));
        })
        .unwrap();
    assert_eq!(
        receiver_again.recv_timeout(CALLBACK_TIMEOUT).unwrap().unwrap(),
        block1.id()
    );
    assert!(!canceller.cancel());
    assert_eq!(importer.manager().tree_size(), 2);

    // 4. The receipt of `a` is not final before block 2 is.
    let located = proposer.manager().get_transaction_info(&a.id()).unwrap();
    assert_eq!(located.block.id(), block1.id());
    assert_eq!(located.group, TransactionGroup::Normal);
    assert_eq!(located.index, 0);
    assert_eq!(located.transaction, a);
    assert_eq!(
        located.receipt().err().map(|err| err.kind()),
        Some(ErrorKind::ResultNotFinalized)
    );
    let waiter = proposer.manager().wait_transaction_result(&b.id()).unwrap();

    // 5. Finalize block 2.
    proposer.extend(CommitVoteSet::empty(25));

    let located = proposer.manager().get_transaction_info(&a.id()).unwrap();
    assert!(located.receipt().unwrap().status().is_success());

    // 5.1. Events of the stored receipt are read from, and proven against, the event-log trie.
    let receipt = located.receipt().unwrap();
    let root = receipt.event_logs_root().unwrap();
    let events = receipt.event_logs(proposer.kv_store()).unwrap();
    assert_eq!(events.len(), 2);
    for (index, event) in events.iter().enumerate() {
        let proof = receipt.proof_of_event(index, proposer.kv_store()).unwrap();
        assert_eq!(
            verify_proof(&root, &varint(index as u64), &proof).unwrap(),
            event.bytes()
        );
    }
    assert!(receipt
        .proof_of_event(events.len(), proposer.kv_store())
        .is_err());

    let located = waiter.recv_timeout(CALLBACK_TIMEOUT).unwrap().unwrap();
    assert_eq!(located.index, 1);
    assert!(located.receipt().unwrap().status().is_success());

    // 6. Unknown transactions are not found.
    let unknown = proposer.manager().get_transaction_info(&CryptoHash::new([7u8; 32]));
    assert_eq!(unknown.err().map(|err| err.kind()), Some(ErrorKind::NotFound));
}

/// Tests that a finalized double-sign report reaches the execution engine and the next block votes
/// with the validator set it named.
#[test]
fn double_sign_report_test() {
    setup_logger(LevelFilter::Info);

    // 1. A single validator.
    let signer = keypair();
    let validators = validator_list(&[signer.clone()]);
    let node = Node::new(Some(validators.clone()), FixedClock::new(20));

    // 2. Propose block 1 with a report against the validator.
    let report = double_sign_report(&signer, validators, BlockHeight::new(100), 5);
    node.service().add_patch(report.clone());
    let block1 = node.extend(CommitVoteSet::empty(10));
    assert_eq!(block1.patch_transactions().len(), 1);
    assert!(block1.next_validators_hash().is_some());

    assert_eq!(
        node.service().equivocations(),
        vec![(BlockHeight::new(100), signer.address())]
    );
    let located = node.manager().get_transaction_info(&report.id()).unwrap();
    assert_eq!(located.group, TransactionGroup::Patch);
    assert!(located.receipt().unwrap().status().is_success());

    // 3. Block 2 needs the validator's vote for block 1.
    let votes = commit_votes(&[signer], BlockHeight::new(1), block1.id(), 30);
    let block2 = node.extend(votes);
    assert_eq!(block2.height(), BlockHeight::new(2));
    assert_eq!(block2.timestamp(), 31);
}

/// Tests that a node reopened on the same database resumes at the last finalized block, and that
/// a database of another network is refused.
#[test]
fn restore_test() {
    setup_logger(LevelFilter::Info);

    // 1. Finalize two blocks.
    let clock = FixedClock::new(20);
    let node = Node::new(None, clock.clone());
    node.extend(CommitVoteSet::empty(10));
    let last = node.extend(CommitVoteSet::empty(25));
    let kv_store = node.kv_store().clone();
    drop(node);

    // 2. Reopen.
    let service = TestService::new(kv_store.clone(), None);
    let node = Node::open(kv_store.clone(), service, config(clock.clone()), EventHandlers::default())
        .unwrap();
    assert_eq!(node.manager().get_last_block(), last);
    let block3 = node.extend(CommitVoteSet::empty(30));
    assert_eq!(block3.prev_id(), Some(last.id()));
    drop(node);

    // 3. Reopen as another network.
    let service = TestService::new(kv_store.clone(), None);
    let other_network = BlockManagerConfiguration::builder()
        .network_id(NetworkID::new(2))
        .clock(clock)
        .build();
    let err = Node::open(kv_store, service, other_network, EventHandlers::default())
        .err()
        .expect("opened a database of another network");
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

/// Tests that block waiters receive blocks when they are finalized.
#[test]
fn wait_for_block_test() {
    setup_logger(LevelFilter::Info);

    let node = Node::new(None, FixedClock::new(20));
    let genesis = node.manager().wait_for_block(BlockHeight::new(0));
    let pending = node.manager().wait_for_block(BlockHeight::new(1));
    assert!(pending.try_recv().is_err());
    assert_eq!(genesis.try_recv().unwrap().height(), BlockHeight::new(0));

    let block1 = node.extend(CommitVoteSet::empty(10));
    assert_eq!(pending.recv_timeout(CALLBACK_TIMEOUT).unwrap(), block1);
}

/// Tests that an imported block claiming a different result is rejected, unless the import is
/// forced, in which case its result is adopted.
#[test]
fn import_by_force_test() {
    setup_logger(LevelFilter::Info);

    // 1. Propose block 1 on one node.
    let proposer = Node::new(None, FixedClock::new(20));
    let sender = keypair();
    proposer
        .service()
        .add_transaction(transfer(&sender, Address::account([3u8; 20]), 1, 1, false));
    let genesis = proposer.manager().get_last_block();
    let block1 = proposer
        .propose(&genesis.id(), CommitVoteSet::empty(10))
        .unwrap()
        .block()
        .clone();

    // 2. Claim different receipts in its result.
    let mut result = TransitionResult::from_bytes(block1.result()).unwrap();
    result.patch_receipts_hash = Some(CryptoHash::new([9u8; 32]));
    let tampered = Block::new(
        BlockParams::builder()
            .version(block1.version())
            .height(block1.height())
            .timestamp(block1.timestamp())
            .proposer(block1.proposer())
            .prev_id(block1.prev_id())
            .votes(block1.votes().clone())
            .next_validators_hash(block1.next_validators_hash())
            .patch_transactions(block1.patch_transactions().clone())
            .normal_transactions(block1.normal_transactions().clone())
            .logs_bloom(block1.logs_bloom().unwrap())
            .result(result.bytes())
            .build(),
    );
    assert_ne!(tampered.id(), block1.id());

    // 3. A plain import fails once the patch transactions are executed.
    let importer = Node::new(None, FixedClock::new(20));
    let err = importer
        .import(&tampered, ImportFlags::default())
        .err()
        .expect("imported a block with a wrong result");
    assert!(matches!(err.header_error(), Some(HeaderError::BadResult)));
    assert_eq!(importer.manager().tree_size(), 1);

    // 4. A forced import adopts the claimed result.
    let forced = importer
        .import(&tampered, ImportFlags { by_force: true })
        .unwrap();
    assert_eq!(forced.id(), tampered.id());
    assert_eq!(importer.manager().tree_size(), 2);
}

/// Tests that a decoded block round-trips through the reader the block manager exposes.
#[test]
fn block_data_from_reader_test() {
    setup_logger(LevelFilter::Info);

    let node = Node::new(None, FixedClock::new(20));
    let block1 = node.extend(CommitVoteSet::empty(10));
    let bytes = block1.bytes();
    let data = node
        .manager()
        .new_block_data_from_reader(&mut bytes.as_slice())
        .unwrap();
    assert_eq!(data.id(), block1.id());
    assert_eq!(data.height(), BlockHeight::new(1));

    let truncated = &bytes[..bytes.len() / 2];
    assert!(node
        .manager()
        .new_block_data_from_reader(&mut &truncated[..])
        .is_err());
}

/// Tests that exported blocks open as a chain on their own.
#[test]
fn export_blocks_test() {
    setup_logger(LevelFilter::Info);

    let clock = FixedClock::new(20);
    let node = Node::new(None, clock.clone());
    let sender = keypair();
    node.service()
        .add_transaction(transfer(&sender, Address::account([4u8; 20]), 1, 1, false));
    node.extend(CommitVoteSet::empty(10));
    let last = node.extend(CommitVoteSet::empty(25));

    let destination = common::mem_db::MemDB::new();
    let mut exported = Vec::new();
    node.manager()
        .export_blocks(BlockHeight::new(0), BlockHeight::new(2), destination.clone(), |height| {
            exported.push(height);
            Ok(())
        })
        .unwrap();
    assert_eq!(
        exported,
        vec![BlockHeight::new(0), BlockHeight::new(1), BlockHeight::new(2)]
    );

    let service = TestService::new(destination.clone(), None);
    let copy = Node::open(destination, service, config(clock), EventHandlers::default()).unwrap();
    assert_eq!(copy.manager().get_last_block(), last);
}
