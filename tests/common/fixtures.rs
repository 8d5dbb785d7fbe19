//! Keys, transactions and votes shared by the integration tests.

use blockcore_rs::{
    transaction::{
        double_sign::{DoubleSignContext, DoubleSignData, DoubleSignDataType, DoubleSignReportTx},
        v3::TransactionV3Params,
        Transaction,
    },
    types::{
        commit_votes::{CommitVote, CommitVoteSet},
        crypto_primitives::{Keypair, SigningKey},
        data_types::{Address, BlockHeight, CryptoHash, NetworkID},
        validator_list::ValidatorList,
    },
};
use rand_core::OsRng;

pub(crate) const NETWORK_ID: NetworkID = NetworkID::new(1);

pub(crate) fn keypair() -> Keypair {
    Keypair::new(SigningKey::generate(&mut OsRng))
}

pub(crate) fn keypairs(n: usize) -> Vec<Keypair> {
    (0..n).map(|_| keypair()).collect()
}

pub(crate) fn validator_list(keypairs: &[Keypair]) -> ValidatorList {
    ValidatorList::new(keypairs.iter().map(Keypair::public).collect())
}

/// A signed v3 transfer of `value` to `to`, in binary form if `binary` is set.
pub(crate) fn transfer(from: &Keypair, to: Address, value: u128, timestamp: i64, binary: bool) -> Transaction {
    Transaction::V3(
        TransactionV3Params::builder()
            .to(to)
            .value(value)
            .step_limit(100_000)
            .timestamp(timestamp)
            .nid(NETWORK_ID)
            .build()
            .sign(from, binary)
            .unwrap(),
    )
}

/// Commit votes of every keypair for the block `block_id` at `height`.
pub(crate) fn commit_votes(
    keypairs: &[Keypair],
    height: BlockHeight,
    block_id: CryptoHash,
    timestamp: i64,
) -> CommitVoteSet {
    let votes: Vec<_> = keypairs
        .iter()
        .map(|keypair| (keypair.public(), CommitVote::new(keypair, height, block_id, timestamp)))
        .collect();
    CommitVoteSet::from_votes(&validator_list(keypairs), height, block_id, timestamp, &votes)
}

/// A report of `signer` voting for two different blocks at `height`.
pub(crate) fn double_sign_report(
    signer: &Keypair,
    validators: ValidatorList,
    height: BlockHeight,
    timestamp: i64,
) -> Transaction {
    let first = DoubleSignData::new(
        signer,
        DoubleSignDataType::Vote,
        NETWORK_ID,
        height,
        0,
        Some(CryptoHash::new([1u8; 32])),
    );
    let second = DoubleSignData::new(
        signer,
        DoubleSignDataType::Vote,
        NETWORK_ID,
        height,
        0,
        Some(CryptoHash::new([2u8; 32])),
    );
    assert!(first.is_conflict_with(&second));
    Transaction::DoubleSignReport(
        DoubleSignReportTx::new(
            NETWORK_ID,
            timestamp,
            [&first, &second],
            &DoubleSignContext::new(validators),
        )
        .unwrap(),
    )
}
