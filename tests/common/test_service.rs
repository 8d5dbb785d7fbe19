//! A deterministic execution engine for the integration tests.
//!
//! Every transaction bumps the nonce of its sender and stores its ID under the recipient's storage.
//! Double-sign reports mark the equivocator in the system contract's storage. Executions run on a
//! thread of their own, behind a [`Gate`] that tests close to hold them back.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Condvar, Mutex,
    },
    thread,
};

use blockcore_rs::{
    errors::{CoreError, ErrorKind},
    merkle::MerkleRoot,
    receipt::{
        logs_bloom::LogsBloom,
        receipt::{Receipt, Status},
        receipt_list::ReceiptList,
    },
    storage::{
        write_batch::{commit, ChainWriteBatch},
        KVGet,
    },
    transaction::{transaction_list::TransactionList, Transaction, TransactionInfo},
    transition::execution::{
        BlockInfo, Canceller, ConsensusInfo, Execution, ExecutionObserver, FinalizeFlags,
        ServiceManager, TransitionResult,
    },
    types::{
        data_types::{Address, BlockHeight, CryptoHash},
        revision::Revision,
        validator_list::ValidatorList,
    },
    world_state::WorldState,
};

use super::mem_db::MemDB;

const REVISION: Revision = Revision::LATEST;

/// Holds executions back while closed.
#[derive(Clone, Default)]
pub(crate) struct Gate(Arc<(Mutex<bool>, Condvar)>);

impl Gate {
    pub(crate) fn close(&self) {
        *self.0 .0.lock().unwrap() = true;
    }

    pub(crate) fn open(&self) {
        *self.0 .0.lock().unwrap() = false;
        self.0 .1.notify_all();
    }

    fn pass(&self) {
        let mut closed = self.0 .0.lock().unwrap();
        while *closed {
            closed = self.0 .1.wait(closed).unwrap();
        }
    }
}

#[derive(Clone)]
struct Output {
    result: TransitionResult,
    patch_receipts: ReceiptList,
    normal_receipts: ReceiptList,
    next_validators: Option<ValidatorList>,
}

impl Output {
    fn new(
        state_hash: MerkleRoot,
        patch_receipts: ReceiptList,
        normal_receipts: ReceiptList,
        next_validators: Option<ValidatorList>,
    ) -> Output {
        Output {
            result: TransitionResult {
                state_hash,
                patch_receipts_hash: patch_receipts.hash(),
                normal_receipts_hash: normal_receipts.hash(),
            },
            patch_receipts,
            normal_receipts,
            next_validators,
        }
    }
}

type Slot = Arc<Mutex<Option<Output>>>;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Work {
    Patch,
    Normal,
}

pub(crate) struct TestExecution {
    kv_store: MemDB,
    work: Work,
    parent: Option<Slot>,
    transactions: TransactionList,
    output: Slot,
    sync: bool,
    gate: Gate,
}

impl TestExecution {
    fn executed(kv_store: MemDB, output: Output, sync: bool) -> TestExecution {
        TestExecution {
            kv_store,
            work: Work::Normal,
            parent: None,
            transactions: TransactionList::default(),
            output: Arc::new(Mutex::new(Some(output))),
            sync,
            gate: Gate::default(),
        }
    }

    fn output(&self) -> Option<Output> {
        self.output.lock().unwrap().clone()
    }
}

impl Execution for TestExecution {
    fn execute(&mut self, observer: ExecutionObserver) -> Result<Canceller, CoreError> {
        if self.output.lock().unwrap().is_some() {
            observer.on_validate(Ok(()));
            observer.on_execute(Ok(()));
            return Ok(Box::new(|| false));
        }
        let parent = self
            .parent
            .as_ref()
            .and_then(|parent| parent.lock().unwrap().clone())
            .ok_or_else(|| ErrorKind::InvalidState.error("parent has not executed"))?;

        let cancelled = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicBool::new(false));
        let (kv_store, work, transactions, output, gate) = (
            self.kv_store.clone(),
            self.work,
            self.transactions.clone(),
            self.output.clone(),
            self.gate.clone(),
        );
        let (thread_cancelled, thread_done) = (cancelled.clone(), done.clone());
        thread::spawn(move || {
            gate.pass();
            if thread_cancelled.load(Ordering::SeqCst) {
                return;
            }
            let executed = apply(kv_store, &parent, work, &transactions);
            thread_done.store(true, Ordering::SeqCst);
            match executed {
                Ok(executed) => {
                    *output.lock().unwrap() = Some(executed);
                    observer.on_validate(Ok(()));
                    observer.on_execute(Ok(()));
                }
                Err(err) => observer.on_validate(Err(err)),
            }
        });

        Ok(Box::new(move || {
            !done.load(Ordering::SeqCst) && !cancelled.swap(true, Ordering::SeqCst)
        }))
    }

    fn transactions(&self) -> TransactionList {
        self.transactions.clone()
    }

    fn result(&self) -> Option<Vec<u8>> {
        self.output().map(|output| output.result.bytes())
    }

    fn logs_bloom(&self) -> LogsBloom {
        let mut logs_bloom = LogsBloom::new();
        if let Some(output) = self.output() {
            for receipt in output.patch_receipts.iter().chain(output.normal_receipts.iter()) {
                logs_bloom.merge(receipt.logs_bloom());
            }
        }
        logs_bloom
    }

    fn next_validators(&self) -> Option<ValidatorList> {
        self.output().and_then(|output| output.next_validators)
    }

    fn patch_receipts(&self) -> ReceiptList {
        self.output()
            .map(|output| output.patch_receipts)
            .unwrap_or_default()
    }

    fn normal_receipts(&self) -> ReceiptList {
        self.output()
            .map(|output| output.normal_receipts)
            .unwrap_or_default()
    }

    fn is_sync(&self) -> bool {
        self.sync
    }
}

/// Execute `transactions` on the state of `parent` and store the new state in `kv_store`.
fn apply(
    mut kv_store: MemDB,
    parent: &Output,
    work: Work,
    transactions: &TransactionList,
) -> Result<Output, CoreError> {
    let mut state = WorldState::new(kv_store.clone(), parent.result.state_hash);
    let mut receipts = Vec::new();
    for transaction in transactions.iter() {
        transaction.verify()?;
        receipts.push(apply_transaction(&mut state, transaction)?);
    }
    let mut wb = ChainWriteBatch::new();
    let state_hash = state.flush(&mut wb)?;
    commit(&mut kv_store, wb);

    let receipts = ReceiptList::new(receipts);
    Ok(match work {
        Work::Patch => Output::new(
            state_hash,
            receipts,
            parent.normal_receipts.clone(),
            parent.next_validators.clone(),
        ),
        Work::Normal => Output::new(
            state_hash,
            parent.patch_receipts.clone(),
            receipts,
            parent.next_validators.clone(),
        ),
    })
}

fn apply_transaction(
    state: &mut WorldState<MemDB>,
    transaction: &Transaction,
) -> Result<Receipt, CoreError> {
    if let Transaction::DoubleSignReport(report) = transaction {
        let (height, address) = report.double_sign_info()?;
        state.set_value(&Address::system(), &equivocation_key(height, &address), vec![1])?;
        let mut receipt = Receipt::new(REVISION, Address::system());
        receipt.add_log(
            Address::system(),
            vec![b"DoubleSignReported(Address,int)".to_vec(), address.bytes()],
            vec![height.to_le_bytes().to_vec()],
        );
        receipt.set_result(Status::SUCCESS, 0, 0, None);
        return Ok(receipt);
    }

    let (from, to) = (transaction.from(), transaction.to());
    state.increase_nonce(&from)?;
    state.set_value(&to, transaction.id().as_slice(), from.bytes())?;
    let mut receipt = Receipt::new(REVISION, to);
    receipt.add_log(
        to,
        vec![b"Applied(bytes)".to_vec()],
        vec![transaction.id().as_slice().to_vec()],
    );
    receipt.add_log(to, vec![b"Sent(Address)".to_vec(), from.bytes()], Vec::new());
    receipt.set_result(Status::SUCCESS, 1_000, 0, None);
    Ok(receipt)
}

/// Key under the system contract's storage marking that `address` equivocated at `height`.
pub(crate) fn equivocation_key(height: BlockHeight, address: &Address) -> Vec<u8> {
    let mut key = height.to_le_bytes().to_vec();
    key.extend(address.bytes());
    key
}

struct ServiceState {
    kv_store: MemDB,
    validators: Option<ValidatorList>,
    patches: Mutex<Vec<Transaction>>,
    proposals: Mutex<Vec<Transaction>>,
    gate: Gate,
    equivocations: Mutex<Vec<(BlockHeight, Address)>>,
    finalized: Mutex<Vec<FinalizeFlags>>,
}

/// Clones share their queues, gate and records, so a test keeps one to drive the one it hands to the
/// block manager.
#[derive(Clone)]
pub(crate) struct TestService(Arc<ServiceState>);

impl TestService {
    pub(crate) fn new(kv_store: MemDB, validators: Option<ValidatorList>) -> TestService {
        TestService(Arc::new(ServiceState {
            kv_store,
            validators,
            patches: Mutex::new(Vec::new()),
            proposals: Mutex::new(Vec::new()),
            gate: Gate::default(),
            equivocations: Mutex::new(Vec::new()),
            finalized: Mutex::new(Vec::new()),
        }))
    }

    /// Queue a patch transaction for the next proposed block.
    pub(crate) fn add_patch(&self, transaction: Transaction) {
        self.0.patches.lock().unwrap().push(transaction);
    }

    /// Queue a normal transaction for the next proposed block.
    pub(crate) fn add_transaction(&self, transaction: Transaction) {
        self.0.proposals.lock().unwrap().push(transaction);
    }

    pub(crate) fn gate(&self) -> &Gate {
        &self.0.gate
    }

    /// Equivocations carried by finalized double-sign reports.
    pub(crate) fn equivocations(&self) -> Vec<(BlockHeight, Address)> {
        self.0.equivocations.lock().unwrap().clone()
    }

    pub(crate) fn finalize_count(&self) -> usize {
        self.0.finalized.lock().unwrap().len()
    }

    fn pending(
        &self,
        parent: &TestExecution,
        work: Work,
        transactions: TransactionList,
    ) -> TestExecution {
        TestExecution {
            kv_store: self.0.kv_store.clone(),
            work,
            parent: Some(parent.output.clone()),
            transactions,
            output: Arc::new(Mutex::new(None)),
            sync: false,
            gate: self.0.gate.clone(),
        }
    }

    fn stored_receipts(&self, root: MerkleRoot) -> ReceiptList {
        ReceiptList::load(self.0.kv_store.clone(), root).unwrap_or_default()
    }
}

impl ServiceManager for TestService {
    type Execution = TestExecution;

    fn initial_transition(&self) -> Result<TestExecution, CoreError> {
        let output = Output::new(
            None,
            ReceiptList::default(),
            ReceiptList::default(),
            self.0.validators.clone(),
        );
        Ok(TestExecution::executed(self.0.kv_store.clone(), output, false))
    }

    fn transition_from_result(
        &self,
        result: &[u8],
        next_validators: Option<ValidatorList>,
        _height: BlockHeight,
    ) -> Result<TestExecution, CoreError> {
        let result = TransitionResult::from_bytes(result)?;
        let output = Output {
            result,
            patch_receipts: ReceiptList::load(self.0.kv_store.clone(), result.patch_receipts_hash)?,
            normal_receipts: ReceiptList::load(self.0.kv_store.clone(), result.normal_receipts_hash)?,
            next_validators,
        };
        Ok(TestExecution::executed(self.0.kv_store.clone(), output, false))
    }

    fn patch_transition(
        &self,
        parent: &TestExecution,
        patch_transactions: TransactionList,
        _info: &BlockInfo,
    ) -> Result<TestExecution, CoreError> {
        Ok(self.pending(parent, Work::Patch, patch_transactions))
    }

    fn create_transition(
        &self,
        parent: &TestExecution,
        normal_transactions: TransactionList,
        _info: &BlockInfo,
        _consensus: &ConsensusInfo,
    ) -> Result<TestExecution, CoreError> {
        Ok(self.pending(parent, Work::Normal, normal_transactions))
    }

    fn create_sync_transition(
        &self,
        parent: &TestExecution,
        _transactions: TransactionList,
        result: &[u8],
        next_validators_hash: Option<CryptoHash>,
    ) -> Result<TestExecution, CoreError> {
        let result = TransitionResult::from_bytes(result)?;
        let next_validators = match next_validators_hash {
            Some(hash) => self.0.kv_store.validator_list(&hash)?,
            None => None,
        }
        .or_else(|| parent.next_validators());
        let output = Output {
            result,
            patch_receipts: self.stored_receipts(result.patch_receipts_hash),
            normal_receipts: self.stored_receipts(result.normal_receipts_hash),
            next_validators,
        };
        Ok(TestExecution::executed(self.0.kv_store.clone(), output, true))
    }

    fn propose_transition(
        &self,
        parent: &TestExecution,
        _info: &BlockInfo,
        _consensus: &ConsensusInfo,
    ) -> Result<TestExecution, CoreError> {
        let transactions: TransactionList = self.0.proposals.lock().unwrap().drain(..).collect();
        Ok(self.pending(parent, Work::Normal, transactions))
    }

    fn get_patches(&self, _parent: &TestExecution, _info: &BlockInfo) -> TransactionList {
        self.0.patches.lock().unwrap().drain(..).collect()
    }

    fn finalize(&self, execution: &TestExecution, flags: FinalizeFlags) -> Result<(), CoreError> {
        if flags.patch_transactions {
            for transaction in execution.transactions.iter() {
                if let Transaction::DoubleSignReport(report) = transaction {
                    self.0
                        .equivocations
                        .lock()
                        .unwrap()
                        .push(report.double_sign_info()?);
                }
            }
        }
        self.0.finalized.lock().unwrap().push(flags);
        Ok(())
    }
}
