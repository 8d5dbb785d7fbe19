/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The tree of speculative transitions.
//!
//! ## Arena
//!
//! Transitions live in an arena owned by the [`TransitionTree`]. A transition is addressed by a
//! [`TransitionId`], an index plus the generation of the slot at that index, so an id that outlives
//! its transition never resolves to the slot's next occupant. Parent and child links are ids.
//!
//! ## Handles
//!
//! Users hold transitions through [`Handle`]s. A handle is not `Clone`: a second handle on the same
//! transition is made with [`new_handle`](TransitionTree::new_handle) and every handle must be given
//! back with [`release`](TransitionTree::release). When the last handle on a transition that is
//! still running is released, the execution is cancelled. A transition is removed from the arena
//! once it has no handles and no children.
//!
//! ## Notifications
//!
//! The engine reports progress to the tree through [`on_event`](TransitionTree::on_event). Every
//! operation that can make progress visible returns a list of [`Notification`]s, one per affected
//! handle, that the caller dispatches to whoever owns the handle. Each handle sees `Validated`
//! before `Executed`. A handle created after its transition made progress is first sent the
//! progress made so far.
//!
//! ## Ordering and deduplication
//!
//! A child starts executing only once its parent has executed. If the parent fails or is cancelled,
//! the child fails with the same error.
//!
//! Before creating a child, the tree looks for an existing child of the same parent with equal
//! inputs and returns a new handle on it instead. Children that adopted their result from a block
//! header (sync transitions) are preferred over ones that compute it.

use std::{collections::HashMap, sync::Arc};

use crate::{
    errors::{CoreError, ErrorKind},
    merkle::MerkleRoot,
    transaction::transaction_list::TransactionList,
    types::data_types::CryptoHash,
};

use super::{
    execution::{
        BlockInfo, Canceller, ConsensusInfo, Execution, ExecutionEvent, ExecutionObserver,
        ServiceManager,
    },
    ref_trace::{RefTrace, TraceEntry},
};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TransitionId {
    index: usize,
    generation: u64,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct HandleId(u64);

/// A live reference to a transition.
#[must_use = "handles must be released"]
#[derive(Debug, PartialEq, Eq)]
pub struct Handle {
    id: HandleId,
    transition: TransitionId,
}

impl Handle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn transition(&self) -> TransitionId {
        self.transition
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
    /// Waiting for the parent to execute.
    Pending,
    Executing,
    Validated,
    Executed,
    Failed,
    Canceled,
}

impl Phase {
    fn is_running(&self) -> bool {
        matches!(self, Phase::Pending | Phase::Executing | Phase::Validated)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Kind {
    Initial,
    Patch,
    Normal,
    Propose,
}

impl Kind {
    fn name(&self) -> &'static str {
        match self {
            Kind::Initial => "initial",
            Kind::Patch => "patch",
            Kind::Normal => "normal",
            Kind::Propose => "propose",
        }
    }
}

/// The inputs two sibling transitions must share to be interchangeable.
#[derive(Clone, PartialEq, Debug)]
struct TransitionKey {
    kind: Kind,
    transactions_root: MerkleRoot,
    info: Option<BlockInfo>,
    consensus: Option<ConsensusInfo>,
}

/// Progress delivered to the owner of a handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub handle: HandleId,
    pub event: ExecutionEvent,
}

/// Routes an engine's report on one transition back to whoever drives the tree.
pub type Notifier = Arc<dyn Fn(TransitionId, ExecutionEvent) + Send + Sync>;

struct TransitionNode<E> {
    execution: E,
    key: TransitionKey,
    sync: bool,
    parent: Option<TransitionId>,
    children: Vec<TransitionId>,
    handles: Vec<HandleId>,
    phase: Phase,
    validate_slot: Option<Result<(), CoreError>>,
    execute_slot: Option<Result<(), CoreError>>,
    canceller: Option<Canceller>,
}

struct Slot<E> {
    generation: u64,
    node: Option<TransitionNode<E>>,
}

pub struct TransitionTree<S: ServiceManager> {
    service: Arc<S>,
    notifier: Notifier,
    slots: Vec<Slot<S::Execution>>,
    free: Vec<usize>,
    next_handle: u64,
    handles: HashMap<HandleId, TransitionId>,
    trace: RefTrace,
}

impl<S: ServiceManager> TransitionTree<S> {
    pub fn new(service: Arc<S>, notifier: Notifier) -> TransitionTree<S> {
        TransitionTree {
            service,
            notifier,
            slots: Vec::new(),
            free: Vec::new(),
            next_handle: 0,
            handles: HashMap::new(),
            trace: RefTrace::default(),
        }
    }

    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /* ↓↓↓ Creating transitions ↓↓↓ */

    /// Insert an execution that has already executed, e.g., the engine's initial transition or one
    /// restored from a result. It becomes the root of a new tree.
    pub fn new_root(&mut self, execution: S::Execution) -> Handle {
        let id = self.insert(TransitionNode {
            execution,
            key: TransitionKey {
                kind: Kind::Initial,
                transactions_root: None,
                info: None,
                consensus: None,
            },
            sync: false,
            parent: None,
            children: Vec::new(),
            handles: Vec::new(),
            phase: Phase::Executed,
            validate_slot: Some(Ok(())),
            execute_slot: Some(Ok(())),
            canceller: None,
        });
        self.handle_for(id)
    }

    /// Get a transition that applies the patch transactions of the block described by `info` on top
    /// of `parent`.
    pub fn patch(
        &mut self,
        parent: &Handle,
        patch_transactions: TransactionList,
        info: BlockInfo,
    ) -> Result<(Handle, Vec<Notification>), CoreError> {
        let key = TransitionKey {
            kind: Kind::Patch,
            transactions_root: patch_transactions.hash(),
            info: Some(info),
            consensus: None,
        };
        self.child(parent, key, false, |service, parent| {
            service.patch_transition(parent, patch_transactions, &info)
        })
    }

    /// Get a transition that applies the normal transactions of a block on top of `parent`.
    pub fn transit(
        &mut self,
        parent: &Handle,
        normal_transactions: TransactionList,
        info: BlockInfo,
        consensus: ConsensusInfo,
    ) -> Result<(Handle, Vec<Notification>), CoreError> {
        let key = TransitionKey {
            kind: Kind::Normal,
            transactions_root: normal_transactions.hash(),
            info: Some(info),
            consensus: Some(consensus.clone()),
        };
        self.child(parent, key, false, |service, parent| {
            service.create_transition(parent, normal_transactions, &info, &consensus)
        })
    }

    /// Get a transition of normal transactions the engine picks for a new block.
    pub fn propose(
        &mut self,
        parent: &Handle,
        info: BlockInfo,
        consensus: ConsensusInfo,
    ) -> Result<(Handle, Vec<Notification>), CoreError> {
        let key = TransitionKey {
            kind: Kind::Propose,
            transactions_root: None,
            info: Some(info),
            consensus: Some(consensus.clone()),
        };
        self.child(parent, key, false, |service, parent| {
            service.propose_transition(parent, &info, &consensus)
        })
    }

    /// Create a transition that stands in for a patch transition but adopts `result` and
    /// `next_validators_hash` instead of executing `patch_transactions`.
    pub fn sync(
        &mut self,
        parent: &Handle,
        patch_transactions: TransactionList,
        info: BlockInfo,
        result: &[u8],
        next_validators_hash: Option<CryptoHash>,
    ) -> Result<(Handle, Vec<Notification>), CoreError> {
        let key = TransitionKey {
            kind: Kind::Patch,
            transactions_root: patch_transactions.hash(),
            info: Some(info),
            consensus: None,
        };
        self.child(parent, key, true, |service, parent| {
            service.create_sync_transition(parent, patch_transactions, result, next_validators_hash)
        })
    }

    /// Make another handle on the transition `handle` refers to. Its owner is first sent the
    /// progress the transition already made.
    pub fn new_handle(&mut self, handle: &Handle) -> Result<(Handle, Vec<Notification>), CoreError> {
        let id = self.live_id(handle)?;
        let new_handle = self.handle_for(id);
        let notifications = self.replay(id, new_handle.id);
        Ok((new_handle, notifications))
    }

    fn child(
        &mut self,
        parent: &Handle,
        key: TransitionKey,
        sync: bool,
        make: impl FnOnce(&S, &S::Execution) -> Result<S::Execution, CoreError>,
    ) -> Result<(Handle, Vec<Notification>), CoreError> {
        let parent_id = self.live_id(parent)?;

        if let Some(existing) = self.find_child(parent_id, &key, sync) {
            let handle = self.handle_for(existing);
            let notifications = self.replay(existing, handle.id);
            return Ok((handle, notifications));
        }

        let execution = match self.node(parent_id) {
            Some(parent) => make(&self.service, &parent.execution)?,
            None => return Err(ErrorKind::InvalidState.error("parent transition is disposed")),
        };
        let id = self.insert(TransitionNode {
            execution,
            key,
            sync,
            parent: Some(parent_id),
            children: Vec::new(),
            handles: Vec::new(),
            phase: Phase::Pending,
            validate_slot: None,
            execute_slot: None,
            canceller: None,
        });
        if let Some(parent) = self.node_mut(parent_id) {
            parent.children.push(id);
        }
        let handle = self.handle_for(id);
        let notifications = self.start_if_ready(id);
        Ok((handle, notifications))
    }

    /// Find a child of `parent` with inputs equal to `key`, preferring sync children. Failed and
    /// cancelled children are skipped.
    fn find_child(
        &self,
        parent: TransitionId,
        key: &TransitionKey,
        sync_only: bool,
    ) -> Option<TransitionId> {
        let children = &self.node(parent)?.children;
        let candidates: Vec<(TransitionId, bool)> = children
            .iter()
            .filter_map(|child| {
                let node = self.node(*child)?;
                let usable = !matches!(node.phase, Phase::Failed | Phase::Canceled);
                (usable && node.key == *key && (node.sync || !sync_only))
                    .then_some((*child, node.sync))
            })
            .collect();
        candidates
            .iter()
            .find(|(_, sync)| *sync)
            .or_else(|| candidates.first())
            .map(|(id, _)| *id)
    }

    /* ↓↓↓ Progress ↓↓↓ */

    /// Record progress reported by the engine for `id`. Reports for disposed, failed, or cancelled
    /// transitions are ignored.
    pub fn on_event(&mut self, id: TransitionId, event: ExecutionEvent) -> Vec<Notification> {
        let phase = match self.node(id) {
            Some(node) => node.phase,
            None => return Vec::new(),
        };
        if !phase.is_running() {
            return Vec::new();
        }

        let mut notifications = Vec::new();
        match event {
            ExecutionEvent::Validated(result) => {
                let already = self.node(id).map_or(true, |node| node.validate_slot.is_some());
                if already {
                    return notifications;
                }
                match result {
                    Ok(()) => {
                        self.set_validated(id, Ok(()), &mut notifications);
                    }
                    Err(err) => {
                        self.set_validated(id, Err(err.clone()), &mut notifications);
                        self.fail_children(id, err, &mut notifications);
                    }
                }
            }
            ExecutionEvent::Executed(result) => {
                let validated = self.node(id).map_or(true, |node| node.validate_slot.is_some());
                if !validated {
                    self.set_validated(id, Ok(()), &mut notifications);
                }
                match result {
                    Ok(()) => {
                        self.set_executed(id, Ok(()), &mut notifications);
                        let children = self
                            .node(id)
                            .map(|node| node.children.clone())
                            .unwrap_or_default();
                        for child in children {
                            notifications.extend(self.start_if_ready(child));
                        }
                    }
                    Err(err) => {
                        self.set_executed(id, Err(err.clone()), &mut notifications);
                        self.fail_children(id, err, &mut notifications);
                    }
                }
            }
        }
        notifications
    }

    fn set_validated(
        &mut self,
        id: TransitionId,
        result: Result<(), CoreError>,
        notifications: &mut Vec<Notification>,
    ) {
        if let Some(node) = self.node_mut(id) {
            node.phase = if result.is_ok() {
                Phase::Validated
            } else {
                node.canceller = None;
                Phase::Failed
            };
            node.validate_slot = Some(result.clone());
            for handle in node.handles.iter() {
                notifications.push(Notification {
                    handle: *handle,
                    event: ExecutionEvent::Validated(result.clone()),
                });
            }
        }
    }

    fn set_executed(
        &mut self,
        id: TransitionId,
        result: Result<(), CoreError>,
        notifications: &mut Vec<Notification>,
    ) {
        if let Some(node) = self.node_mut(id) {
            node.phase = if result.is_ok() {
                Phase::Executed
            } else {
                Phase::Failed
            };
            node.canceller = None;
            node.execute_slot = Some(result.clone());
            for handle in node.handles.iter() {
                notifications.push(Notification {
                    handle: *handle,
                    event: ExecutionEvent::Executed(result.clone()),
                });
            }
        }
    }

    /// Fail `id` with `err` in whichever phase it is in.
    fn fail(&mut self, id: TransitionId, err: CoreError, notifications: &mut Vec<Notification>) {
        let (validated, running) = match self.node(id) {
            Some(node) => (node.validate_slot.is_some(), node.phase.is_running()),
            None => return,
        };
        if !running {
            return;
        }
        if let Some(canceller) = self.node_mut(id).and_then(|node| node.canceller.take()) {
            canceller();
        }
        if validated {
            self.set_executed(id, Err(err.clone()), notifications);
        } else {
            self.set_validated(id, Err(err.clone()), notifications);
        }
        self.fail_children(id, err, notifications);
    }

    fn fail_children(
        &mut self,
        id: TransitionId,
        err: CoreError,
        notifications: &mut Vec<Notification>,
    ) {
        let children = self
            .node(id)
            .map(|node| node.children.clone())
            .unwrap_or_default();
        for child in children {
            self.fail(child, err.clone(), notifications);
        }
    }

    /// Start `id` if its parent has executed, or fail it if its parent cannot.
    fn start_if_ready(&mut self, id: TransitionId) -> Vec<Notification> {
        let mut notifications = Vec::new();
        let (phase, parent) = match self.node(id) {
            Some(node) => (node.phase, node.parent),
            None => return notifications,
        };
        if phase != Phase::Pending {
            return notifications;
        }

        let parent_state = parent.and_then(|parent| {
            self.node(parent)
                .map(|node| (node.phase, node.execute_slot.clone(), node.validate_slot.clone()))
        });
        match parent_state {
            None | Some((Phase::Executed, _, _)) => {}
            Some((Phase::Failed, execute_slot, validate_slot)) => {
                let err = match (execute_slot, validate_slot) {
                    (Some(Err(err)), _) | (_, Some(Err(err))) => err,
                    _ => ErrorKind::InvalidState.error("parent transition failed"),
                };
                self.fail(id, err, &mut notifications);
                return notifications;
            }
            Some((Phase::Canceled, _, _)) => {
                self.fail(
                    id,
                    ErrorKind::Interrupted.error("parent transition was cancelled"),
                    &mut notifications,
                );
                return notifications;
            }
            Some(_) => return notifications,
        }

        let notifier = self.notifier.clone();
        let observer = ExecutionObserver::new(Arc::new(move |event| notifier(id, event)));
        let started = match self.node_mut(id) {
            Some(node) => {
                node.phase = Phase::Executing;
                node.execution.execute(observer)
            }
            None => return notifications,
        };
        match started {
            Ok(canceller) => {
                if let Some(node) = self.node_mut(id) {
                    if node.phase.is_running() {
                        node.canceller = Some(canceller);
                    }
                }
            }
            Err(err) => self.fail(id, err, &mut notifications),
        }
        notifications
    }

    /* ↓↓↓ Releasing ↓↓↓ */

    /// Give back `handle`. Releasing the last handle on a running transition cancels it; releasing
    /// the last handle on a transition without children disposes it.
    pub fn release(&mut self, handle: Handle) -> Vec<Notification> {
        let mut notifications = Vec::new();
        let id = match self.handles.remove(&handle.id) {
            Some(id) => id,
            None => return notifications,
        };
        let (unreferenced, running) = match self.node_mut(id) {
            Some(node) => {
                node.handles.retain(|h| *h != handle.id);
                (node.handles.is_empty(), node.phase.is_running())
            }
            None => return notifications,
        };
        if !unreferenced {
            return notifications;
        }
        if running {
            self.cancel(id, &mut notifications);
        }
        self.try_dispose(id);
        notifications
    }

    fn cancel(&mut self, id: TransitionId, notifications: &mut Vec<Notification>) {
        if let Some(node) = self.node_mut(id) {
            if let Some(canceller) = node.canceller.take() {
                canceller();
            }
            node.phase = Phase::Canceled;
            log::debug!("cancelled transition {:?}", id);
        }
        self.fail_children(
            id,
            ErrorKind::Interrupted.error("parent transition was cancelled"),
            notifications,
        );
    }

    fn try_dispose(&mut self, id: TransitionId) {
        let parent = match self.node(id) {
            Some(node) if node.handles.is_empty() && node.children.is_empty() => node.parent,
            _ => return,
        };
        if let Some(slot) = self.slots.get_mut(id.index) {
            slot.node = None;
        }
        self.free.push(id.index);
        self.trace.on_dispose(id);
        if let Some(parent) = parent {
            if let Some(node) = self.node_mut(parent) {
                node.children.retain(|child| *child != id);
            }
            self.try_dispose(parent);
        }
    }

    /* ↓↓↓ Queries ↓↓↓ */

    pub fn execution(&self, handle: &Handle) -> Option<&S::Execution> {
        self.node(self.handles.get(&handle.id).copied()?)
            .map(|node| &node.execution)
    }

    pub fn phase(&self, handle: &Handle) -> Option<Phase> {
        self.node(self.handles.get(&handle.id).copied()?)
            .map(|node| node.phase)
    }

    /// Whether the transition is a sync transition.
    pub fn is_sync(&self, handle: &Handle) -> bool {
        self.handles
            .get(&handle.id)
            .and_then(|id| self.node(*id))
            .map_or(false, |node| node.sync)
    }

    /// Number of transitions in the arena.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.node.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn enable_tracing(&mut self, enabled: bool) {
        self.trace.set_enabled(enabled);
    }

    /// List every live transition. Empty unless tracing is enabled.
    pub fn trace_report(&self) -> Vec<TraceEntry> {
        if !self.trace.is_enabled() {
            return Vec::new();
        }
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.node.as_ref().map(|node| TraceEntry {
                    transition: TransitionId {
                        index,
                        generation: slot.generation,
                    },
                    kind: node.key.kind.name(),
                    phase: node.phase,
                    sync: node.sync,
                    handles: node.handles.len(),
                    children: node.children.len(),
                })
            })
            .collect()
    }

    /* ↓↓↓ Arena ↓↓↓ */

    fn insert(&mut self, node: TransitionNode<S::Execution>) -> TransitionId {
        let kind = node.key.kind.name();
        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.generation += 1;
                slot.node = Some(node);
                TransitionId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                TransitionId {
                    index: self.slots.len() - 1,
                    generation: 0,
                }
            }
        };
        self.trace.on_create(id, kind);
        id
    }

    fn node(&self, id: TransitionId) -> Option<&TransitionNode<S::Execution>> {
        self.slots
            .get(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: TransitionId) -> Option<&mut TransitionNode<S::Execution>> {
        self.slots
            .get_mut(id.index)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    fn live_id(&self, handle: &Handle) -> Result<TransitionId, CoreError> {
        self.handles
            .get(&handle.id)
            .copied()
            .filter(|id| self.node(*id).is_some())
            .ok_or_else(|| ErrorKind::InvalidState.error("handle was released"))
    }

    fn handle_for(&mut self, id: TransitionId) -> Handle {
        let handle_id = HandleId(self.next_handle);
        self.next_handle += 1;
        self.handles.insert(handle_id, id);
        if let Some(node) = self.node_mut(id) {
            node.handles.push(handle_id);
        }
        Handle {
            id: handle_id,
            transition: id,
        }
    }

    fn replay(&self, id: TransitionId, handle: HandleId) -> Vec<Notification> {
        let mut notifications = Vec::new();
        if let Some(node) = self.node(id) {
            if let Some(result) = &node.validate_slot {
                notifications.push(Notification {
                    handle,
                    event: ExecutionEvent::Validated(result.clone()),
                });
            }
            if let Some(result) = &node.execute_slot {
                notifications.push(Notification {
                    handle,
                    event: ExecutionEvent::Executed(result.clone()),
                });
            }
        }
        notifications
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use super::*;
    use crate::{
        transition::execution::FinalizeFlags,
        receipt::{logs_bloom::LogsBloom, receipt_list::ReceiptList},
        types::{data_types::BlockHeight, validator_list::ValidatorList},
    };

    struct FakeExecution {
        transactions: TransactionList,
        cancelled: Arc<AtomicUsize>,
    }

    impl Execution for FakeExecution {
        fn execute(&mut self, _observer: ExecutionObserver) -> Result<Canceller, CoreError> {
            let cancelled = self.cancelled.clone();
            Ok(Box::new(move || {
                cancelled.fetch_add(1, Ordering::SeqCst);
                true
            }))
        }
        fn transactions(&self) -> TransactionList {
            self.transactions.clone()
        }
        fn result(&self) -> Option<Vec<u8>> {
            None
        }
        fn logs_bloom(&self) -> LogsBloom {
            LogsBloom::new()
        }
        fn next_validators(&self) -> Option<ValidatorList> {
            None
        }
        fn patch_receipts(&self) -> ReceiptList {
            ReceiptList::default()
        }
        fn normal_receipts(&self) -> ReceiptList {
            ReceiptList::default()
        }
    }

    #[derive(Default)]
    struct FakeService {
        created: Mutex<usize>,
        cancelled: Arc<AtomicUsize>,
    }

    impl FakeService {
        fn make(&self, transactions: TransactionList) -> Result<FakeExecution, CoreError> {
            *self.created.lock().unwrap() += 1;
            Ok(FakeExecution {
                transactions,
                cancelled: self.cancelled.clone(),
            })
        }
    }

    impl ServiceManager for FakeService {
        type Execution = FakeExecution;

        fn initial_transition(&self) -> Result<FakeExecution, CoreError> {
            self.make(TransactionList::default())
        }
        fn transition_from_result(
            &self,
            _result: &[u8],
            _next_validators: Option<ValidatorList>,
            _height: BlockHeight,
        ) -> Result<FakeExecution, CoreError> {
            self.make(TransactionList::default())
        }
        fn patch_transition(
            &self,
            _parent: &FakeExecution,
            patch_transactions: TransactionList,
            _info: &BlockInfo,
        ) -> Result<FakeExecution, CoreError> {
            self.make(patch_transactions)
        }
        fn create_transition(
            &self,
            _parent: &FakeExecution,
            normal_transactions: TransactionList,
            _info: &BlockInfo,
            _consensus: &ConsensusInfo,
        ) -> Result<FakeExecution, CoreError> {
            self.make(normal_transactions)
        }
        fn create_sync_transition(
            &self,
            _parent: &FakeExecution,
            transactions: TransactionList,
            _result: &[u8],
            _next_validators_hash: Option<CryptoHash>,
        ) -> Result<FakeExecution, CoreError> {
            self.make(transactions)
        }
        fn propose_transition(
            &self,
            _parent: &FakeExecution,
            _info: &BlockInfo,
            _consensus: &ConsensusInfo,
        ) -> Result<FakeExecution, CoreError> {
            self.make(TransactionList::default())
        }
        fn get_patches(&self, _parent: &FakeExecution, _info: &BlockInfo) -> TransactionList {
            TransactionList::default()
        }
        fn finalize(&self, _execution: &FakeExecution, _flags: FinalizeFlags) -> Result<(), CoreError> {
            Ok(())
        }
    }

    fn tree() -> (TransitionTree<FakeService>, Arc<FakeService>) {
        let service = Arc::new(FakeService::default());
        (TransitionTree::new(service.clone(), Arc::new(|_, _| {})), service)
    }

    fn info(height: u64) -> BlockInfo {
        BlockInfo {
            height: BlockHeight::new(height),
            timestamp: height as i64 * 10,
        }
    }

    #[test]
    fn equal_siblings_share_a_transition() {
        let (mut tree, service) = tree();
        let root = tree.new_root(service.initial_transition().unwrap());
        let (a, _) = tree.patch(&root, TransactionList::default(), info(1)).unwrap();
        let (b, _) = tree.patch(&root, TransactionList::default(), info(1)).unwrap();
        let (c, _) = tree.patch(&root, TransactionList::default(), info(2)).unwrap();
        assert_eq!(a.transition(), b.transition());
        assert_ne!(a.transition(), c.transition());
        // initial + two distinct patches
        assert_eq!(*service.created.lock().unwrap(), 3);
    }

    #[test]
    fn sync_children_take_priority() {
        let (mut tree, service) = tree();
        let root = tree.new_root(service.initial_transition().unwrap());
        let (normal, _) = tree.patch(&root, TransactionList::default(), info(1)).unwrap();
        let (sync, _) = tree
            .sync(&root, TransactionList::default(), info(1), &[1], None)
            .unwrap();
        assert_ne!(normal.transition(), sync.transition());
        let (again, _) = tree.patch(&root, TransactionList::default(), info(1)).unwrap();
        assert_eq!(again.transition(), sync.transition());
        assert!(tree.is_sync(&again));
    }

    #[test]
    fn late_handle_replays_progress_in_order() {
        let (mut tree, service) = tree();
        let root = tree.new_root(service.initial_transition().unwrap());
        let (first, notifications) = tree.patch(&root, TransactionList::default(), info(1)).unwrap();
        assert!(notifications.is_empty());
        assert_eq!(tree.phase(&first), Some(Phase::Executing));

        let notifications = tree.on_event(first.transition(), ExecutionEvent::Executed(Ok(())));
        // Validated is implied before Executed.
        assert_eq!(
            notifications,
            vec![
                Notification {
                    handle: first.id(),
                    event: ExecutionEvent::Validated(Ok(()))
                },
                Notification {
                    handle: first.id(),
                    event: ExecutionEvent::Executed(Ok(()))
                },
            ]
        );

        let (second, replayed) = tree.new_handle(&first).unwrap();
        assert_eq!(
            replayed
                .iter()
                .map(|n| (n.handle, n.event.clone()))
                .collect::<Vec<_>>(),
            vec![
                (second.id(), ExecutionEvent::Validated(Ok(()))),
                (second.id(), ExecutionEvent::Executed(Ok(()))),
            ]
        );
    }

    #[test]
    fn children_wait_for_parent_and_inherit_failure() {
        let (mut tree, service) = tree();
        let root = tree.new_root(service.initial_transition().unwrap());
        let (parent, _) = tree.patch(&root, TransactionList::default(), info(1)).unwrap();
        let (child, _) = tree
            .transit(&parent, TransactionList::default(), info(1), ConsensusInfo::default())
            .unwrap();
        assert_eq!(tree.phase(&child), Some(Phase::Pending));

        let err = ErrorKind::IllegalArgument.error("bad transaction");
        let notifications = tree.on_event(parent.transition(), ExecutionEvent::Validated(Err(err.clone())));
        assert!(notifications.contains(&Notification {
            handle: child.id(),
            event: ExecutionEvent::Validated(Err(err)),
        }));
        assert_eq!(tree.phase(&child), Some(Phase::Failed));
    }

    #[test]
    fn releasing_last_handle_cancels_and_disposes() {
        let (mut tree, service) = tree();
        let root = tree.new_root(service.initial_transition().unwrap());
        let (a, _) = tree.patch(&root, TransactionList::default(), info(1)).unwrap();
        let (b, _) = tree.new_handle(&a).unwrap();
        assert_eq!(tree.len(), 2);

        let _ = tree.release(a);
        assert_eq!(service.cancelled.load(Ordering::SeqCst), 0);
        let _ = tree.release(b);
        assert_eq!(service.cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(tree.len(), 1);

        // The slot is reused with a new generation.
        let (c, _) = tree.patch(&root, TransactionList::default(), info(1)).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.on_event(
            TransitionId { index: c.transition().index, generation: c.transition().generation + 1 },
            ExecutionEvent::Executed(Ok(())),
        ), Vec::new());
    }

    #[test]
    fn trace_report_lists_live_transitions() {
        let (mut tree, service) = tree();
        tree.enable_tracing(true);
        let root = tree.new_root(service.initial_transition().unwrap());
        let (a, _) = tree.patch(&root, TransactionList::default(), info(1)).unwrap();
        let report = tree.trace_report();
        assert_eq!(report.len(), 2);
        assert!(report.iter().any(|entry| entry.kind == "patch" && entry.handles == 1));
        let _ = tree.release(a);
        assert_eq!(tree.trace_report().len(), 1);
    }
}
