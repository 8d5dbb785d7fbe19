//! Handles that import and propose hand out to their callers.

use std::sync::Weak;

use crate::{block::Block, types::data_types::CryptoHash};

pub(crate) type TaskId = u64;

pub(crate) trait CandidateOwner: Send + Sync {
    fn add_candidate(&self, id: &CryptoHash) -> bool;

    fn remove_candidate(&self, id: &CryptoHash);
}

pub(crate) trait TaskOwner: Send + Sync {
    fn cancel_task(&self, task: TaskId) -> bool;
}

/// A block that was imported or proposed and is attached to the block manager's tree.
///
/// The block stays in the tree, and its transitions stay alive, until every candidate for it has
/// been dropped (or [disposed](super::BlockManager::dispose_candidate)) or a conflicting block is
/// finalized. Use [`dup_candidate`](super::BlockManager::dup_candidate) for another reference.
pub struct BlockCandidate {
    block: Block,
    owner: Weak<dyn CandidateOwner>,
}

impl BlockCandidate {
    pub(crate) fn new(block: Block, owner: Weak<dyn CandidateOwner>) -> BlockCandidate {
        BlockCandidate { block, owner }
    }

    pub fn block(&self) -> &Block {
        &self.block
    }

    pub fn id(&self) -> CryptoHash {
        self.block.id()
    }

    /// Take another reference to the same node. Returns `None` if the node is no longer in the tree.
    pub(crate) fn dup(&self) -> Option<BlockCandidate> {
        let owner = self.owner.upgrade()?;
        if !owner.add_candidate(&self.block.id()) {
            return None;
        }
        Some(BlockCandidate {
            block: self.block.clone(),
            owner: self.owner.clone(),
        })
    }
}

impl Drop for BlockCandidate {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.remove_candidate(&self.block.id());
        }
    }
}

/// Cancels an import or propose task.
pub struct TaskCanceller {
    owner: Weak<dyn TaskOwner>,
    task: TaskId,
}

impl TaskCanceller {
    pub(crate) fn new(owner: Weak<dyn TaskOwner>, task: TaskId) -> TaskCanceller {
        TaskCanceller { owner, task }
    }

    /// Cancel the task if it has not delivered a block yet. Returns whether it did cancel; a task is
    /// cancelled at most once, and its callback is never invoked after a successful cancel.
    pub fn cancel(&self) -> bool {
        match self.owner.upgrade() {
            Some(owner) => owner.cancel_task(self.task),
            None => false,
        }
    }
}
