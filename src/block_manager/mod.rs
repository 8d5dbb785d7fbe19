/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The coordinator that imports, proposes and finalizes blocks.
//!
//! ## The block tree
//!
//! The [`BlockManager`] keeps a tree of blocks rooted at the last finalized block. Each block is
//! paired with two [transitions](crate::transition): the one that applied its patch transactions
//! ("in") and the one that applies its normal transactions ("preexe"). The result of a block's
//! preexe transition is what its children's headers commit to.
//!
//! ## Tasks
//!
//! [`import`](BlockManager::import) and [`propose`](BlockManager::propose) return immediately with a
//! [`TaskCanceller`]. The work they start runs on the execution engine's threads; when it completes,
//! the block is attached to the tree and a [`BlockCandidate`] is delivered to the caller's callback.
//! A cancelled task delivers nothing.
//!
//! ## Locking
//!
//! All state lives behind one mutex. Engine progress is routed through a channel to a worker thread
//! that takes the lock to advance tasks, so an engine may report progress from inside the call that
//! started an execution. User callbacks always run after the lock is released.
//!
//! ## Finalization
//!
//! [`finalize`](BlockManager::finalize) persists a child of the last finalized block: its header,
//! body, height index, transaction locators, the receipts its result commits to, and its next
//! validator list. Blocks that do not descend from it are removed from the tree.

pub(crate) mod cache;

pub(crate) mod candidate;

pub(crate) mod chain;

pub(crate) mod deferred;

pub mod manager;

pub(crate) mod node_tree;

pub(crate) mod task;

pub use candidate::{BlockCandidate, TaskCanceller};
pub use chain::LocatedTransaction;
pub use manager::BlockManager;
pub use task::ImportFlags;
