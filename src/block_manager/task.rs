/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state machines of import and propose tasks.
//!
//! ## Import
//!
//! ```text
//! ExecutingIn ──in executed, result verified──▶ ValidatingOut ──out validated──▶ (delivered)
//!      │                                              │
//!      └──────────── error or cancel ─────────────────┴──▶ (stopped)
//! ```
//!
//! An import task first executes the block's patch transactions on top of its parent (the "in"
//! transition) and checks that the header's `result`, `logs_bloom` and `next_validators_hash` are
//! what that execution produced. It then starts the block's normal transactions (the "out"
//! transition). Once the out transition is validated the block is attached to the tree and
//! delivered. The out transition keeps executing after that; its result is checked by the next block.
//!
//! With [`ImportFlags::by_force`], an in transition that fails, or whose result disagrees with the
//! header, is replaced by a sync transition that adopts the header's result.
//!
//! ## Propose
//!
//! ```text
//! ExecutingIn ──in executed──▶ (delivered)
//!      └──── error or cancel ──▶ (stopped)
//! ```
//!
//! A task lives in the block manager's task table while it is running. Delivering or stopping it
//! removes it, so a task that is not in the table cannot be cancelled.

use std::{mem, time::SystemTime};

use crate::{
    block::{block::BlockParams, verifier, Block},
    errors::{CoreError, ErrorKind},
    events::{Event, ImportBlockEvent, ProposeBlockEvent, TaskKind},
    storage::pluggables::KVStore,
    transition::{
        execution::{BlockInfo, ConsensusInfo, Execution, ExecutionEvent, ServiceManager},
        tree::{Handle, Notification},
    },
    types::{commit_votes::CommitVoteSet, data_types::CryptoHash},
};

use super::{
    candidate::TaskId,
    chain::{BlockCallback, Chain},
    deferred::Deferred,
    node_tree::BlockNode,
};

/// Options of [`BlockManager::import`](super::BlockManager::import).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportFlags {
    /// Adopt the header's result instead of failing when the block's patch transactions cannot be
    /// executed to that result.
    pub by_force: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ImportState {
    ExecutingIn,
    ValidatingOut,
}

pub(crate) struct ImportTask {
    block: Block,
    flags: ImportFlags,
    voted: Vec<bool>,
    state: ImportState,
    in_transition: Handle,
    out: Option<Handle>,
    callback: BlockCallback,
}

pub(crate) struct ProposeTask {
    parent: CryptoHash,
    votes: CommitVoteSet,
    voted: Vec<bool>,
    info: BlockInfo,
    in_transition: Handle,
    callback: BlockCallback,
}

pub(crate) enum Task {
    Import(ImportTask),
    Propose(ProposeTask),
}

impl Task {
    /// Take the task apart for cancellation: its kind, the block it is about, and its transitions.
    pub(super) fn into_parts(self) -> (TaskKind, CryptoHash, Vec<Handle>) {
        match self {
            Task::Import(task) => {
                let mut handles = vec![task.in_transition];
                handles.extend(task.out);
                (TaskKind::Import, task.block.id(), handles)
            }
            Task::Propose(task) => (TaskKind::Propose, task.parent, vec![task.in_transition]),
        }
    }
}

fn info_of(block: &Block) -> BlockInfo {
    BlockInfo {
        height: block.height(),
        timestamp: block.timestamp(),
    }
}

impl<K: KVStore, S: ServiceManager> Chain<K, S> {
    /* ↓↓↓ Import ↓↓↓ */

    /// Verify `block` against its parent and start executing it. Returns `None` if the block is
    /// already in the tree, in which case it is delivered right away.
    pub(super) fn start_import(
        &mut self,
        block: Block,
        flags: ImportFlags,
        callback: BlockCallback,
        deferred: &mut Deferred<Self>,
    ) -> Result<Option<TaskId>, CoreError> {
        let id = block.id();
        if self.nodes.contains(&id) {
            self.deliver(&id, callback, deferred);
            return Ok(None);
        }

        let prev_id = block
            .prev_id()
            .ok_or_else(|| ErrorKind::IllegalArgument.error(format!("block {} has no parent", id)))?;
        let parent = self.nodes.get(&prev_id).ok_or_else(|| {
            ErrorKind::IllegalArgument.error(format!("parent {} of block {} not found", prev_id, id))
        })?;
        let expected_version = self.tree.service().expected_next_version(parent.block.result());
        let voted = verifier::verify(
            &block,
            &parent.block,
            expected_version,
            parent.validators.as_ref(),
        )?;
        let (in_transition, notifications) = self.tree.patch(
            &parent.preexe,
            block.patch_transactions().clone(),
            info_of(&block),
        )?;

        let task_id = self.next_task_id();
        self.own(&in_transition, task_id);
        self.tasks.insert(
            task_id,
            Task::Import(ImportTask {
                block,
                flags,
                voted,
                state: ImportState::ExecutingIn,
                in_transition,
                out: None,
                callback,
            }),
        );
        self.dispatch_later(notifications, deferred);
        Ok(Some(task_id))
    }

    pub(super) fn step_import(
        &mut self,
        task_id: TaskId,
        mut task: ImportTask,
        notification: Notification,
        deferred: &mut Deferred<Self>,
    ) -> Option<ImportTask> {
        match task.state {
            ImportState::ExecutingIn => {
                if notification.handle != task.in_transition.id() {
                    return Some(task);
                }
                match notification.event {
                    ExecutionEvent::Validated(Ok(())) => Some(task),
                    ExecutionEvent::Validated(Err(err)) => {
                        self.fail_import(task, err, deferred);
                        None
                    }
                    ExecutionEvent::Executed(Err(err)) => self.sync_or_fail(task_id, task, err, deferred),
                    ExecutionEvent::Executed(Ok(())) => {
                        if !self.tree.is_sync(&task.in_transition) {
                            if let Err(err) = self.verify_in(&task) {
                                return self.sync_or_fail(task_id, task, err, deferred);
                            }
                        }
                        let consensus = ConsensusInfo {
                            proposer: task.block.proposer(),
                            voted: task.voted.clone(),
                        };
                        match self.tree.transit(
                            &task.in_transition,
                            task.block.normal_transactions().clone(),
                            info_of(&task.block),
                            consensus,
                        ) {
                            Ok((out, notifications)) => {
                                self.own(&out, task_id);
                                task.out = Some(out);
                                task.state = ImportState::ValidatingOut;
                                self.dispatch_later(notifications, deferred);
                                Some(task)
                            }
                            Err(err) => {
                                self.fail_import(task, err, deferred);
                                None
                            }
                        }
                    }
                }
            }
            ImportState::ValidatingOut => {
                if Some(notification.handle) != task.out.as_ref().map(Handle::id) {
                    return Some(task);
                }
                match notification.event {
                    ExecutionEvent::Validated(Ok(())) => {
                        self.attach_imported(task, deferred);
                        None
                    }
                    ExecutionEvent::Validated(Err(err)) | ExecutionEvent::Executed(Err(err)) => {
                        self.fail_import(task, err, deferred);
                        None
                    }
                    ExecutionEvent::Executed(Ok(())) => Some(task),
                }
            }
        }
    }

    /// Check the header of the imported block against what its patch transactions produced.
    fn verify_in(&self, task: &ImportTask) -> Result<(), CoreError> {
        let execution = self
            .tree
            .execution(&task.in_transition)
            .ok_or_else(|| ErrorKind::InvalidState.error("patch transition was released"))?;
        let result = execution
            .result()
            .ok_or_else(|| ErrorKind::InvalidState.error("executed transition has no result"))?;
        verifier::verify_result(
            &task.block,
            &result,
            &execution.logs_bloom().compressed_bytes(),
            execution.next_validators().map(|validators| validators.hash()),
        )?;
        Ok(())
    }

    /// With `by_force`, replace a failed in transition with one that adopts the header's result.
    fn sync_or_fail(
        &mut self,
        task_id: TaskId,
        mut task: ImportTask,
        err: CoreError,
        deferred: &mut Deferred<Self>,
    ) -> Option<ImportTask> {
        if !task.flags.by_force || self.tree.is_sync(&task.in_transition) {
            self.fail_import(task, err, deferred);
            return None;
        }
        let parent = match task.block.prev_id().and_then(|prev_id| self.nodes.get(&prev_id)) {
            Some(parent) => parent,
            None => {
                let err = ErrorKind::InvalidState.error("parent left the tree during import");
                self.fail_import(task, err, deferred);
                return None;
            }
        };
        log::debug!("Importing block {} by force: {}", task.block.id(), err);
        let synced = self.tree.sync(
            &parent.preexe,
            task.block.patch_transactions().clone(),
            info_of(&task.block),
            task.block.result(),
            task.block.next_validators_hash(),
        );
        match synced {
            Ok((sync, notifications)) => {
                self.own(&sync, task_id);
                let failed = mem::replace(&mut task.in_transition, sync);
                self.release(failed, deferred);
                self.dispatch_later(notifications, deferred);
                Some(task)
            }
            Err(err) => {
                self.fail_import(task, err, deferred);
                None
            }
        }
    }

    fn fail_import(&mut self, task: ImportTask, err: CoreError, deferred: &mut Deferred<Self>) {
        log::debug!("Import of block {} failed: {}", task.block.id(), err);
        self.release(task.in_transition, deferred);
        if let Some(out) = task.out {
            self.release(out, deferred);
        }
        let callback = task.callback;
        deferred.call_later(move || callback(Err(err)));
    }

    fn attach_imported(&mut self, task: ImportTask, deferred: &mut Deferred<Self>) {
        let ImportTask {
            block,
            in_transition,
            out,
            callback,
            ..
        } = task;
        let out = match out {
            Some(out) => out,
            None => {
                self.release(in_transition, deferred);
                let err = ErrorKind::InvalidState.error("import validated without a normal transition");
                deferred.call_later(move || callback(Err(err)));
                return;
            }
        };
        let id = block.id();
        let height = block.height();
        if !self.attach(block, in_transition, out, deferred) {
            let err = ErrorKind::InvalidState.error(format!("parent of block {} left the tree", id));
            deferred.call_later(move || callback(Err(err)));
            return;
        }
        Event::publish(
            &self.event_publisher,
            Event::ImportBlock(ImportBlockEvent {
                timestamp: SystemTime::now(),
                block: id,
                height,
            }),
        );
        self.deliver(&id, callback, deferred);
    }

    /// Add a node for `block` with the given transitions, unless it is already in the tree. Returns
    /// false, releasing the transitions, if the parent is no longer in the tree.
    fn attach(
        &mut self,
        block: Block,
        in_transition: Handle,
        preexe: Handle,
        deferred: &mut Deferred<Self>,
    ) -> bool {
        self.owners.remove(&in_transition.id());
        self.owners.remove(&preexe.id());
        let id = block.id();
        if self.nodes.contains(&id) {
            self.release(in_transition, deferred);
            self.release(preexe, deferred);
            return true;
        }
        let validators = match block.prev_id().and_then(|prev_id| self.nodes.get(&prev_id)) {
            Some(parent) => parent.next_validators.clone(),
            None => {
                self.release(in_transition, deferred);
                self.release(preexe, deferred);
                return false;
            }
        };
        let next_validators = self
            .tree
            .execution(&in_transition)
            .and_then(|execution| execution.next_validators());
        self.nodes.add(BlockNode {
            parent: block.prev_id(),
            block,
            children: Vec::new(),
            in_transition,
            preexe,
            validators,
            next_validators,
            candidates: 0,
        });
        true
    }

    /* ↓↓↓ Propose ↓↓↓ */

    /// Verify `votes` for the parent and start executing the patch transactions of a new block.
    pub(super) fn start_propose(
        &mut self,
        parent_id: &CryptoHash,
        votes: CommitVoteSet,
        callback: BlockCallback,
        deferred: &mut Deferred<Self>,
    ) -> Result<TaskId, CoreError> {
        let parent = self.nodes.get(parent_id).ok_or_else(|| {
            ErrorKind::IllegalArgument.error(format!("parent {} not found", parent_id))
        })?;
        let voted =
            votes.verify_block(parent.block.height(), parent_id, parent.validators.as_ref())?;
        let timestamp = self
            .config
            .clock
            .now()
            .max(votes.timestamp() + 1)
            .max(parent.block.timestamp() + 1);
        let info = BlockInfo {
            height: parent.block.height() + 1,
            timestamp,
        };
        let parent_in = self
            .tree
            .execution(&parent.in_transition)
            .ok_or_else(|| ErrorKind::InvalidState.error("parent transition was released"))?;
        let patches = self.tree.service().get_patches(parent_in, &info);
        let (in_transition, notifications) = self.tree.patch(&parent.preexe, patches, info)?;

        let task_id = self.next_task_id();
        self.own(&in_transition, task_id);
        self.tasks.insert(
            task_id,
            Task::Propose(ProposeTask {
                parent: *parent_id,
                votes,
                voted,
                info,
                in_transition,
                callback,
            }),
        );
        self.dispatch_later(notifications, deferred);
        Ok(task_id)
    }

    pub(super) fn step_propose(
        &mut self,
        task: ProposeTask,
        notification: Notification,
        deferred: &mut Deferred<Self>,
    ) -> Option<ProposeTask> {
        if notification.handle != task.in_transition.id() {
            return Some(task);
        }
        match notification.event {
            ExecutionEvent::Validated(Ok(())) => Some(task),
            ExecutionEvent::Validated(Err(err)) | ExecutionEvent::Executed(Err(err)) => {
                self.fail_propose(task, err, deferred);
                None
            }
            ExecutionEvent::Executed(Ok(())) => {
                self.finish_propose(task, deferred);
                None
            }
        }
    }

    fn finish_propose(&mut self, task: ProposeTask, deferred: &mut Deferred<Self>) {
        let consensus = ConsensusInfo {
            proposer: self.config.proposer,
            voted: task.voted.clone(),
        };
        let out = match self.tree.propose(&task.in_transition, task.info, consensus) {
            // Nobody owns the out transition until the block is attached, so its progress so far
            // needs no dispatching.
            Ok((out, _)) => out,
            Err(err) => return self.fail_propose(task, err, deferred),
        };
        let block = match self.assemble(&task, &out) {
            Ok(block) => block,
            Err(err) => {
                self.release(out, deferred);
                return self.fail_propose(task, err, deferred);
            }
        };

        let ProposeTask {
            in_transition,
            callback,
            ..
        } = task;
        let id = block.id();
        let height = block.height();
        if !self.attach(block, in_transition, out, deferred) {
            let err = ErrorKind::InvalidState.error(format!("parent of block {} left the tree", id));
            deferred.call_later(move || callback(Err(err)));
            return;
        }
        Event::publish(
            &self.event_publisher,
            Event::ProposeBlock(ProposeBlockEvent {
                timestamp: SystemTime::now(),
                block: id,
                height,
            }),
        );
        self.deliver(&id, callback, deferred);
    }

    /// Build the block a finished propose task proposes.
    fn assemble(&self, task: &ProposeTask, out: &Handle) -> Result<Block, CoreError> {
        let parent = self.nodes.get(&task.parent).ok_or_else(|| {
            ErrorKind::InvalidState.error(format!("parent {} left the tree", task.parent))
        })?;
        let input = self
            .tree
            .execution(&task.in_transition)
            .ok_or_else(|| ErrorKind::InvalidState.error("patch transition was released"))?;
        let output = self
            .tree
            .execution(out)
            .ok_or_else(|| ErrorKind::InvalidState.error("normal transition was released"))?;
        let result = input
            .result()
            .ok_or_else(|| ErrorKind::InvalidState.error("executed transition has no result"))?;

        Ok(Block::new(
            BlockParams::builder()
                .version(self.tree.service().expected_next_version(parent.block.result()))
                .height(task.info.height)
                .timestamp(task.info.timestamp)
                .proposer(self.config.proposer)
                .prev_id(Some(task.parent))
                .votes(task.votes.clone())
                .next_validators_hash(input.next_validators().map(|validators| validators.hash()))
                .patch_transactions(input.transactions())
                .normal_transactions(output.transactions())
                .logs_bloom(input.logs_bloom())
                .result(result)
                .build(),
        ))
    }

    fn fail_propose(&mut self, task: ProposeTask, err: CoreError, deferred: &mut Deferred<Self>) {
        log::debug!("Proposal on block {} failed: {}", task.parent, err);
        self.release(task.in_transition, deferred);
        let callback = task.callback;
        deferred.call_later(move || callback(Err(err)));
    }
}
