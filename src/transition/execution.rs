/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The seam between the block manager and the execution engine.
//!
//! The block manager never executes transactions itself. It asks a [`ServiceManager`] to create an
//! [`Execution`] for a list of transactions on top of a parent execution, starts it, and is told
//! about its progress through an [`ExecutionObserver`]. Executions run on the engine's own threads.

use std::sync::Arc;

use borsh::{BorshDeserialize, BorshSerialize};

use crate::{
    block::header::VERSION_2,
    errors::CoreError,
    merkle::MerkleRoot,
    receipt::{logs_bloom::LogsBloom, receipt_list::ReceiptList},
    transaction::transaction_list::TransactionList,
    types::{
        data_types::{Address, BlockHeight, CryptoHash},
        validator_list::ValidatorList,
    },
};

/// The commitment a block header's `result` field carries.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, BorshSerialize, BorshDeserialize)]
pub struct TransitionResult {
    pub state_hash: MerkleRoot,
    pub patch_receipts_hash: MerkleRoot,
    pub normal_receipts_hash: MerkleRoot,
}

impl TransitionResult {
    pub fn bytes(&self) -> Vec<u8> {
        self.try_to_vec().unwrap()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<TransitionResult, std::io::Error> {
        TransitionResult::deserialize(&mut &*bytes)
    }
}

/// The block a transition executes transactions for.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct BlockInfo {
    pub height: BlockHeight,
    pub timestamp: i64,
}

/// Who proposed the block and which validators voted for its parent.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ConsensusInfo {
    pub proposer: Option<Address>,
    pub voted: Vec<bool>,
}

/// What [`ServiceManager::finalize`] should make permanent.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FinalizeFlags {
    pub patch_transactions: bool,
    pub normal_transactions: bool,
    pub result: bool,
}

/// Invoked by the engine to cancel a running execution. Returns whether the execution was still
/// cancellable.
pub type Canceller = Box<dyn FnOnce() -> bool + Send>;

/// Progress reported by an execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecutionEvent {
    /// The transactions were pre-validated.
    Validated(Result<(), CoreError>),
    /// The transactions were executed and the result is available.
    Executed(Result<(), CoreError>),
}

/// Handed to [`Execution::execute`]. The engine reports on it, from any thread, first whether the
/// transactions are valid and then whether executing them succeeded.
#[derive(Clone)]
pub struct ExecutionObserver {
    notify: Arc<dyn Fn(ExecutionEvent) + Send + Sync>,
}

impl ExecutionObserver {
    pub fn new(notify: Arc<dyn Fn(ExecutionEvent) + Send + Sync>) -> ExecutionObserver {
        ExecutionObserver { notify }
    }

    pub fn on_validate(&self, result: Result<(), CoreError>) {
        (self.notify)(ExecutionEvent::Validated(result))
    }

    pub fn on_execute(&self, result: Result<(), CoreError>) {
        (self.notify)(ExecutionEvent::Executed(result))
    }
}

/// One speculative execution of a list of transactions on top of a parent execution.
///
/// Accessors other than [`transactions`](Execution::transactions) are only meaningful after the
/// execution has reported [`ExecutionEvent::Executed`] with `Ok`.
pub trait Execution: Send + 'static {
    /// Start executing. The engine must report through `observer` asynchronously or before
    /// returning; the block manager does not hold any lock the observer needs.
    ///
    /// Returns the function that cancels the execution.
    fn execute(&mut self, observer: ExecutionObserver) -> Result<Canceller, CoreError>;

    /// The transactions this execution applies.
    fn transactions(&self) -> TransactionList;

    /// The encoded [`TransitionResult`] of the state after this execution.
    fn result(&self) -> Option<Vec<u8>>;

    /// The merged logs bloom of this execution's receipts.
    fn logs_bloom(&self) -> LogsBloom;

    /// The validator list in force after this execution.
    fn next_validators(&self) -> Option<ValidatorList>;

    fn patch_receipts(&self) -> ReceiptList;

    fn normal_receipts(&self) -> ReceiptList;

    /// Whether this execution adopted its result from a block header instead of computing it.
    fn is_sync(&self) -> bool {
        false
    }
}

/// The execution engine.
///
/// Implementors must be deterministic: executing the same transactions on the same parent state
/// with the same [`BlockInfo`] must produce the same result on every replica.
pub trait ServiceManager: Send + Sync + 'static {
    type Execution: Execution;

    /// Create the already-executed execution that the genesis block starts from: an empty state.
    fn initial_transition(&self) -> Result<Self::Execution, CoreError>;

    /// Create an already-executed execution whose state is the one committed to by `result`. Used
    /// to restore the finalized block after a restart.
    fn transition_from_result(
        &self,
        result: &[u8],
        next_validators: Option<ValidatorList>,
        height: BlockHeight,
    ) -> Result<Self::Execution, CoreError>;

    /// Create an execution that applies the patch transactions of the block described by `info`.
    fn patch_transition(
        &self,
        parent: &Self::Execution,
        patch_transactions: TransactionList,
        info: &BlockInfo,
    ) -> Result<Self::Execution, CoreError>;

    /// Create an execution that applies the normal transactions of a block.
    fn create_transition(
        &self,
        parent: &Self::Execution,
        normal_transactions: TransactionList,
        info: &BlockInfo,
        consensus: &ConsensusInfo,
    ) -> Result<Self::Execution, CoreError>;

    /// Create an execution that does not execute `transactions` but adopts `result` and
    /// `next_validators_hash` from a block header. Its state is fetched by state sync.
    fn create_sync_transition(
        &self,
        parent: &Self::Execution,
        transactions: TransactionList,
        result: &[u8],
        next_validators_hash: Option<CryptoHash>,
    ) -> Result<Self::Execution, CoreError>;

    /// Create an execution of normal transactions picked by the engine, for a block this node
    /// proposes.
    fn propose_transition(
        &self,
        parent: &Self::Execution,
        info: &BlockInfo,
        consensus: &ConsensusInfo,
    ) -> Result<Self::Execution, CoreError>;

    /// Get the patch transactions a block proposed on top of `parent` should carry.
    fn get_patches(&self, parent: &Self::Execution, info: &BlockInfo) -> TransactionList;

    /// Make an execution's effects permanent. Called once per flag per execution, in chain order.
    fn finalize(&self, execution: &Self::Execution, flags: FinalizeFlags) -> Result<(), CoreError>;

    /// The block version that must follow a block whose result is `parent_result`.
    fn expected_next_version(&self, _parent_result: &[u8]) -> u32 {
        VERSION_2
    }
}
