/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Everything the block manager keeps under its lock, and the operations that run while holding it.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{mpsc::Sender, Arc, Weak},
    time::SystemTime,
};

use crate::{
    block::{body::BlockBody, header::BlockHeader, Block},
    config::BlockManagerConfiguration,
    errors::{CoreError, ErrorKind},
    events::{CancelTaskEvent, Event, FinalizeBlockEvent},
    receipt::{receipt::Receipt, receipt_list::ReceiptList},
    storage::{
        pluggables::{KVGet, KVStore, WriteBatch},
        write_batch::{commit, ChainWriteBatch},
    },
    transaction::{
        factory::FactoryRegistry, Transaction, TransactionGroup, TransactionInfo,
        TransactionLocator,
    },
    transition::{
        execution::{Execution, ExecutionEvent, FinalizeFlags, ServiceManager, TransitionResult},
        tree::{Handle, HandleId, Notification, TransitionId, TransitionTree},
    },
    types::data_types::{BlockHeight, CryptoHash},
};

use super::{
    cache::BlockCache,
    candidate::{BlockCandidate, CandidateOwner, TaskId},
    deferred::{Deferred, DeferredMutex},
    node_tree::NodeTree,
    task::Task,
};

pub(crate) type BlockCallback = Box<dyn FnOnce(Result<BlockCandidate, CoreError>) + Send>;

pub(crate) enum WorkerMessage {
    Transition(TransitionId, ExecutionEvent),
    Shutdown,
}

/// A finalized transaction together with the block that carries it and, once final, its receipt.
#[derive(Clone, Debug)]
pub struct LocatedTransaction {
    pub block: Block,
    pub group: TransactionGroup,
    pub index: usize,
    pub transaction: Transaction,
    receipt: Option<Receipt>,
}

impl LocatedTransaction {
    /// Get the receipt of the transaction.
    ///
    /// The receipt of a normal transaction is committed to by the block after the one carrying it.
    /// Until that block is finalized, this returns an error of kind
    /// [`ResultNotFinalized`](ErrorKind::ResultNotFinalized).
    pub fn receipt(&self) -> Result<&Receipt, CoreError> {
        self.receipt.as_ref().ok_or_else(|| {
            ErrorKind::ResultNotFinalized.error(format!(
                "receipt of transaction {} is not final yet",
                self.transaction.id()
            ))
        })
    }
}

type TransactionWaiter = (CryptoHash, Sender<Result<LocatedTransaction, CoreError>>);

pub(crate) struct Chain<K: KVStore, S: ServiceManager> {
    pub(super) kv_store: K,
    pub(super) registry: Arc<FactoryRegistry>,
    pub(super) config: BlockManagerConfiguration,
    pub(super) tree: TransitionTree<S>,
    pub(super) nodes: NodeTree,
    pub(super) cache: BlockCache,
    pub(super) tasks: HashMap<TaskId, Task>,
    pub(super) owners: HashMap<HandleId, TaskId>,
    pub(super) next_task: TaskId,
    pub(super) block_waiters: BTreeMap<BlockHeight, Vec<Sender<Block>>>,
    pub(super) transaction_waiters: BTreeMap<BlockHeight, Vec<TransactionWaiter>>,
    pub(super) event_publisher: Option<Sender<Event>>,
    pub(super) this: Weak<DeferredMutex<Chain<K, S>>>,
}

impl<K: KVStore, S: ServiceManager> Chain<K, S> {
    /* ↓↓↓ Routing transition progress ↓↓↓ */

    /// Hand each notification to the task that owns its handle.
    pub(super) fn dispatch(&mut self, notifications: Vec<Notification>, deferred: &mut Deferred<Self>) {
        for notification in notifications {
            let task_id = match self.owners.get(&notification.handle) {
                Some(task_id) => *task_id,
                None => continue,
            };
            let task = match self.tasks.remove(&task_id) {
                Some(task) => task,
                None => continue,
            };
            let task = match task {
                Task::Import(task) => self
                    .step_import(task_id, task, notification, deferred)
                    .map(Task::Import),
                Task::Propose(task) => self
                    .step_propose(task, notification, deferred)
                    .map(Task::Propose),
            };
            if let Some(task) = task {
                self.tasks.insert(task_id, task);
            }
        }
    }

    /// Dispatch `notifications` at the end of the current critical section, after whatever created
    /// them has finished updating the chain.
    pub(super) fn dispatch_later(
        &mut self,
        notifications: Vec<Notification>,
        deferred: &mut Deferred<Self>,
    ) {
        if !notifications.is_empty() {
            deferred.call_later_in_lock(move |chain: &mut Self, deferred| {
                chain.dispatch(notifications, deferred)
            });
        }
    }

    pub(super) fn release(&mut self, handle: Handle, deferred: &mut Deferred<Self>) {
        self.owners.remove(&handle.id());
        let notifications = self.tree.release(handle);
        self.dispatch_later(notifications, deferred);
    }

    pub(super) fn own(&mut self, handle: &Handle, task_id: TaskId) {
        self.owners.insert(handle.id(), task_id);
    }

    pub(super) fn next_task_id(&mut self) -> TaskId {
        self.next_task += 1;
        self.next_task
    }

    pub(super) fn candidate_owner(&self) -> Weak<dyn CandidateOwner> {
        self.this.clone()
    }

    /// Give the caller of a task a new candidate for the node `id`, which must be in the tree.
    pub(super) fn deliver(&mut self, id: &CryptoHash, callback: BlockCallback, deferred: &mut Deferred<Self>) {
        let block = match self.nodes.get(id) {
            Some(node) => node.block.clone(),
            None => {
                let err = ErrorKind::InvalidState.error(format!("block {} left the tree", id));
                deferred.call_later(move || callback(Err(err)));
                return;
            }
        };
        self.nodes.add_candidate(id);
        let candidate = BlockCandidate::new(block, self.candidate_owner());
        deferred.call_later(move || callback(Ok(candidate)));
    }

    pub(super) fn remove_candidate(&mut self, id: &CryptoHash, deferred: &mut Deferred<Self>) {
        for handle in self.nodes.remove_candidate(id) {
            self.release(handle, deferred);
        }
    }

    /// Stop a task that has not delivered a block yet. Nothing is delivered to its callback.
    pub(super) fn cancel_task(&mut self, task_id: TaskId, deferred: &mut Deferred<Self>) -> bool {
        let (kind, block, handles) = match self.tasks.remove(&task_id) {
            Some(task) => task.into_parts(),
            None => return false,
        };
        for handle in handles {
            self.release(handle, deferred);
        }
        log::debug!("Cancelled {:?} task for block {}", kind, block);
        Event::publish(
            &self.event_publisher,
            Event::CancelTask(CancelTaskEvent {
                timestamp: SystemTime::now(),
                task: kind,
                block,
            }),
        );
        true
    }

    /* ↓↓↓ Finalization ↓↓↓ */

    /// Finalize the child `id` of the last finalized block, persisting it and pruning every block
    /// that does not descend from it.
    pub(super) fn finalize(&mut self, id: &CryptoHash, deferred: &mut Deferred<Self>) -> Result<(), CoreError> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| ErrorKind::IllegalArgument.error(format!("block {} is not in the tree", id)))?;
        if node.parent != Some(self.nodes.root_id()) {
            return Err(ErrorKind::InvalidState.error(format!(
                "parent of block {} is not the last finalized block {}",
                id,
                self.nodes.root_id()
            )));
        }
        let input = self
            .tree
            .execution(&node.in_transition)
            .ok_or_else(|| ErrorKind::InvalidState.error("patch transition was released"))?;
        let preexe = self
            .tree
            .execution(&node.preexe)
            .ok_or_else(|| ErrorKind::InvalidState.error("normal transition was released"))?;

        let service = self.tree.service();
        service.finalize(
            input,
            FinalizeFlags {
                patch_transactions: true,
                normal_transactions: false,
                result: true,
            },
        )?;
        service.finalize(
            preexe,
            FinalizeFlags {
                patch_transactions: false,
                normal_transactions: true,
                result: false,
            },
        )?;

        let mut wb = ChainWriteBatch::new();
        write_block(&mut wb, &node.block);
        input.patch_receipts().flush(&mut wb);
        input.normal_receipts().flush(&mut wb);
        if let Some(next_validators) = &node.next_validators {
            wb.set_validator_list(next_validators);
        }
        wb.set_last_height(node.block.height());
        commit(&mut self.kv_store, wb);

        let block = node.block.clone();
        for handle in self.nodes.advance_root(id) {
            self.release(handle, deferred);
        }
        self.cache.put(block.clone());

        log::debug!("Finalized block {} at height {}", block.id(), block.height());
        Event::publish(
            &self.event_publisher,
            Event::FinalizeBlock(FinalizeBlockEvent {
                timestamp: SystemTime::now(),
                block: block.id(),
                height: block.height(),
            }),
        );
        self.notify_waiters(&block);
        Ok(())
    }

    fn notify_waiters(&mut self, block: &Block) {
        let height = block.height();
        let later_blocks = self.block_waiters.split_off(&(height + 1));
        for (_, senders) in std::mem::replace(&mut self.block_waiters, later_blocks) {
            for sender in senders {
                let _ = sender.send(block.clone());
            }
        }

        let later_transactions = self.transaction_waiters.split_off(&(height + 1));
        let ready = std::mem::replace(&mut self.transaction_waiters, later_transactions);
        for (_, waiters) in ready {
            for (transaction, sender) in waiters {
                let _ = sender.send(self.transaction_info(&transaction));
            }
        }
    }

    /* ↓↓↓ Queries ↓↓↓ */

    pub(super) fn last_height(&self) -> BlockHeight {
        self.nodes.root().block.height()
    }

    pub(super) fn block(&mut self, id: &CryptoHash) -> Result<Block, CoreError> {
        if let Some(block) = self.cache.get(id) {
            return Ok(block);
        }
        let block = load_block(&self.kv_store, &self.registry, id)?;
        self.cache.put(block.clone());
        Ok(block)
    }

    pub(super) fn block_by_height(&mut self, height: BlockHeight) -> Result<Block, CoreError> {
        if let Some(block) = self.cache.get_by_height(height) {
            return Ok(block);
        }
        let id = self
            .kv_store
            .block_at_height(height)?
            .ok_or_else(|| ErrorKind::NotFound.error(format!("no block at height {}", height)))?;
        self.block(&id)
    }

    pub(super) fn transaction_info(&mut self, transaction: &CryptoHash) -> Result<LocatedTransaction, CoreError> {
        let locator = self
            .kv_store
            .transaction_locator(transaction)?
            .ok_or_else(|| ErrorKind::NotFound.error(format!("transaction {}", transaction)))?;
        let block = self.block_by_height(locator.height).map_err(|err| {
            ErrorKind::InvalidState.error(format!("block of transaction {}: {}", transaction, err))
        })?;
        let found = block
            .transactions(locator.group)
            .get(locator.index as usize)
            .cloned()
            .ok_or_else(|| {
                ErrorKind::InvalidState.error(format!(
                    "transaction {:?}[{}] is not in block {}",
                    locator.group, locator.index, locator.height
                ))
            })?;

        let receipt_height = receipt_height(&locator);
        let receipt = if receipt_height > self.last_height() {
            None
        } else {
            let result_block = if receipt_height == block.height() {
                block.clone()
            } else {
                self.block_by_height(receipt_height)?
            };
            let result = TransitionResult::from_bytes(result_block.result())?;
            let root = match locator.group {
                TransactionGroup::Patch => result.patch_receipts_hash,
                TransactionGroup::Normal => result.normal_receipts_hash,
            };
            ReceiptList::get_stored(&self.kv_store, root, locator.index as usize)?
        };

        Ok(LocatedTransaction {
            block,
            group: locator.group,
            index: locator.index as usize,
            transaction: found,
            receipt,
        })
    }

    /// Register `sender` to be answered when the receipt of `transaction` is final, or answer now.
    pub(super) fn wait_transaction(
        &mut self,
        transaction: &CryptoHash,
        sender: Sender<Result<LocatedTransaction, CoreError>>,
    ) -> Result<(), CoreError> {
        let locator = self
            .kv_store
            .transaction_locator(transaction)?
            .ok_or_else(|| ErrorKind::NotFound.error(format!("transaction {}", transaction)))?;
        let receipt_height = receipt_height(&locator);
        if receipt_height > self.last_height() {
            self.transaction_waiters
                .entry(receipt_height)
                .or_default()
                .push((*transaction, sender));
        } else {
            let _ = sender.send(self.transaction_info(transaction));
        }
        Ok(())
    }

    /// Release every node and task. Called once, when the block manager shuts down.
    pub(super) fn terminate(&mut self, deferred: &mut Deferred<Self>) {
        let task_ids: Vec<TaskId> = self.tasks.keys().copied().collect();
        for task_id in task_ids {
            if let Some(task) = self.tasks.remove(&task_id) {
                let (_, _, handles) = task.into_parts();
                for handle in handles {
                    self.release(handle, deferred);
                }
            }
        }
        for handle in self.nodes.clear() {
            self.release(handle, deferred);
        }
    }
}

/// The height of the block whose result commits to the receipt of the located transaction.
fn receipt_height(locator: &TransactionLocator) -> BlockHeight {
    match locator.group {
        TransactionGroup::Patch => locator.height,
        TransactionGroup::Normal => locator.height + 1,
    }
}

/// Stage `block` with its height index and transaction locators.
pub(super) fn write_block<W: WriteBatch>(wb: &mut ChainWriteBatch<W>, block: &Block) {
    let id = block.id();
    wb.set_block_header(&id, &block.header().bytes());
    wb.set_block_body(&id, &block.body().bytes());
    wb.set_block_at_height(block.height(), &id);
    for group in [TransactionGroup::Patch, TransactionGroup::Normal] {
        for (index, transaction) in block.transactions(group).iter().enumerate() {
            wb.set_transaction_locator(
                &transaction.id(),
                &TransactionLocator {
                    height: block.height(),
                    group,
                    index: index as u32,
                },
            );
        }
    }
}

/// Read a finalized block from `kv_store`.
pub(super) fn load_block<K: KVGet>(
    kv_store: &K,
    registry: &FactoryRegistry,
    id: &CryptoHash,
) -> Result<Block, CoreError> {
    let header_bytes = kv_store
        .block_header_bytes(id)
        .ok_or_else(|| ErrorKind::NotFound.error(format!("block {}", id)))?;
    let body_bytes = kv_store
        .block_body_bytes(id)
        .ok_or_else(|| ErrorKind::NotFound.error(format!("body of block {}", id)))?;
    let header = BlockHeader::from_bytes(&header_bytes)
        .unwrap_or_else(|err| panic!("corrupted header of block {}: {}", id, err));
    let body = BlockBody::from_bytes(&body_bytes)
        .unwrap_or_else(|err| panic!("corrupted body of block {}: {}", id, err));
    Block::from_parts(header, body, registry)
}
