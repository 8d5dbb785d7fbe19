/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Integration tests of state sync between nodes connected through a mock network.

mod common;

use std::{
    thread,
    time::{Duration, Instant},
};

use blockcore_rs::{
    config::SyncConfiguration,
    errors::ErrorKind,
    event_bus::EventHandlers,
    receipt::{
        receipt::{Receipt, Status},
        receipt_list::ReceiptList,
    },
    state_sync::{
        snapshot_sync::{SyncResult, SyncTargets},
        StateSync,
    },
    storage::{
        buckets::BucketID,
        write_batch::{commit, ChainWriteBatch},
        KVGet,
    },
    types::{
        crypto_primitives::Keypair,
        data_types::{Address, CryptoHash},
        revision::Revision,
    },
    world_state::WorldState,
};
use common::{
    fixtures::{keypairs, validator_list},
    logging::setup_logger,
    mem_db::MemDB,
    network::{mock_network, NetworkStub},
};
use log::LevelFilter;

const SYNC_TIMEOUT: Duration = Duration::from_secs(30);

/// What the serving node holds.
struct Seed {
    state_hash: Option<CryptoHash>,
    validators_hash: CryptoHash,
    patch_receipts_hash: Option<CryptoHash>,
}

fn account(index: u8) -> Address {
    Address::account([index; 20])
}

fn key(index: u8) -> Vec<u8> {
    vec![b'k', index]
}

/// Write a world state of 20 storage entries, a validator list and a receipt list into `kv_store`.
fn seed(kv_store: &mut MemDB, validators: &[Keypair]) -> Seed {
    let mut wb = ChainWriteBatch::new();

    let mut state = WorldState::new(kv_store.clone(), None);
    for index in 0..20u8 {
        state
            .set_value(&account(index % 4), &key(index), vec![index; 3])
            .unwrap();
    }
    state.set_balance(&account(0), 1_000).unwrap();
    let state_hash = state.flush(&mut wb).unwrap();

    let validators_hash = wb.set_validator_list(&validator_list(validators));

    let mut receipt = Receipt::new(Revision::LATEST, account(1));
    receipt.add_log(account(1), vec![b"Transfer(int)".to_vec()], vec![vec![1]]);
    receipt.set_result(Status::SUCCESS, 100, 0, None);
    let patch_receipts_hash = ReceiptList::new(vec![receipt]).flush(&mut wb);

    commit(kv_store, wb);
    Seed {
        state_hash,
        validators_hash,
        patch_receipts_hash,
    }
}

fn sync_config() -> SyncConfiguration {
    SyncConfiguration::builder()
        .max_request_hashes(8)
        .data_sync_round(Duration::from_millis(300))
        .request_timeout(Duration::from_millis(500))
        .max_timeout(Duration::from_secs(2))
        .log_events(true)
        .build()
}

/// Start one sync subsystem per database, each on its own end of a mock network.
fn start_nodes(kv_stores: &[MemDB]) -> (Vec<Keypair>, Vec<StateSync<NetworkStub, MemDB>>) {
    let keypairs = keypairs(kv_stores.len());
    let networks = mock_network(keypairs.iter().map(Keypair::public));
    let nodes = kv_stores
        .iter()
        .zip(networks)
        .map(|(kv_store, network)| {
            StateSync::new(kv_store.clone(), network, sync_config(), EventHandlers::default())
        })
        .collect();
    (keypairs, nodes)
}

/// Tests that a node with an empty database fetches a world state, a validator list and receipts
/// from a peer that has them.
#[test]
fn snapshot_sync_test() {
    setup_logger(LevelFilter::Info);

    // 1. Initialize test components.
    // 1.1. A serving node with a seeded database and an empty node.
    let mut kv_server = MemDB::new();
    let kv_client = MemDB::new();
    let validators = keypairs(3);
    let seed = seed(&mut kv_server, &validators);
    assert!(seed.state_hash.is_some());

    // 1.2. Connect the nodes.
    let (keypairs, nodes) = start_nodes(&[kv_server.clone(), kv_client.clone()]);
    nodes[1].on_peer_join(keypairs[0].public());
    assert_eq!(nodes[1].peer_count(), 1);

    // 2. Sync.
    let targets = SyncTargets {
        state_hash: seed.state_hash,
        validators_hash: Some(seed.validators_hash),
        patch_receipts_hash: seed.patch_receipts_hash,
        ..Default::default()
    };
    let sync = nodes[1].start_sync(targets).unwrap();
    let SyncResult {
        world,
        validators: synced_validators,
        patch_receipts,
        normal_receipts,
    } = sync.wait_timeout(SYNC_TIMEOUT).unwrap();

    // 3. Everything is readable from the client's own database.
    assert_eq!(world.root(), seed.state_hash);
    for index in 0..20u8 {
        let account = world.get_account_snapshot(&account(index % 4)).unwrap();
        assert_eq!(account.get_value(&key(index)).unwrap(), Some(vec![index; 3]));
    }
    assert_eq!(world.get_account_snapshot(&account(0)).unwrap().balance(), 1_000);
    assert_eq!(synced_validators, Some(validator_list(&validators)));
    assert_eq!(
        kv_client.validator_list(&seed.validators_hash).unwrap(),
        Some(validator_list(&validators))
    );
    assert_eq!(patch_receipts.len(), 1);
    assert_eq!(
        patch_receipts.get(0).map(Receipt::status),
        Some(Status::SUCCESS)
    );
    assert!(normal_receipts.is_empty());
}

/// Tests that a sync with nothing to fetch completes without talking to peers.
#[test]
fn empty_sync_test() {
    setup_logger(LevelFilter::Info);

    let (_, nodes) = start_nodes(&[MemDB::new()]);
    let result = nodes[0]
        .start_sync(SyncTargets::default())
        .unwrap()
        .wait_timeout(SYNC_TIMEOUT)
        .unwrap();
    assert_eq!(result.world.root(), None);
    assert_eq!(result.validators, None);
    assert!(result.patch_receipts.is_empty());

    // A finished sync does not block the next one.
    assert!(nodes[0].start_sync(SyncTargets::default()).is_ok());
}

/// Tests that only one snapshot sync runs at a time, and that a sync without peers times out.
#[test]
fn sync_without_peers_test() {
    setup_logger(LevelFilter::Info);

    let (_, nodes) = start_nodes(&[MemDB::new()]);
    let targets = SyncTargets {
        state_hash: Some(CryptoHash::new([5u8; 32])),
        ..Default::default()
    };
    let first = nodes[0].start_sync(targets).unwrap();
    assert!(first.unresolved_count() > 0);

    let second = nodes[0].start_sync(targets).err().expect("started two syncs");
    assert_eq!(second.kind(), ErrorKind::InvalidState);

    let timed_out = first
        .wait_timeout(Duration::from_millis(200))
        .err()
        .expect("sync without peers completed");
    assert_eq!(timed_out.kind(), ErrorKind::Timeout);

    // The timed out sync was stopped, so another may start.
    assert!(nodes[0].start_sync(targets).is_ok());
}

/// Tests that a stopped sync reports that it was interrupted.
#[test]
fn stop_sync_test() {
    setup_logger(LevelFilter::Info);

    let (_, nodes) = start_nodes(&[MemDB::new()]);
    let sync = nodes[0]
        .start_sync(SyncTargets {
            validators_hash: Some(CryptoHash::new([6u8; 32])),
            ..Default::default()
        })
        .unwrap();
    sync.stop();
    let err = sync.wait().err().expect("stopped sync completed");
    assert_eq!(err.kind(), ErrorKind::Interrupted);
}

/// Tests that values requested one by one are fetched in the background.
#[test]
fn data_sync_test() {
    setup_logger(LevelFilter::Info);

    // 1. Seed the server and connect the nodes.
    let mut kv_server = MemDB::new();
    let kv_client = MemDB::new();
    let validators = keypairs(2);
    let seed = seed(&mut kv_server, &validators);
    let (keypairs, nodes) = start_nodes(&[kv_server, kv_client.clone()]);

    // 2. Ask for the validator list before any peer is known.
    nodes[1]
        .add_request(BucketID::BytesByHash, seed.validators_hash)
        .unwrap();
    assert_eq!(nodes[1].unresolved_count(), 1);

    // 3. Once the server joins, the request is served.
    nodes[1].on_peer_join(keypairs[0].public());
    let deadline = Instant::now() + SYNC_TIMEOUT;
    while nodes[1].unresolved_count() > 0 {
        assert!(Instant::now() < deadline, "data sync did not finish");
        thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(
        kv_client.validator_list(&seed.validators_hash).unwrap(),
        Some(validator_list(&validators))
    );

    // 4. Values already present are not requested again.
    nodes[1]
        .add_request(BucketID::BytesByHash, seed.validators_hash)
        .unwrap();
    assert_eq!(nodes[1].unresolved_count(), 0);

    // 5. After the server leaves, unknown values stay unresolved.
    nodes[1].on_peer_leave(&keypairs[0].public());
    assert_eq!(nodes[1].peer_count(), 0);
    nodes[1]
        .add_request(BucketID::MerkleTrie, CryptoHash::new([8u8; 32]))
        .unwrap();
    thread::sleep(Duration::from_millis(200));
    assert_eq!(nodes[1].unresolved_count(), 1);
}
