/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Speculative state transitions.
//!
//! Every block the block manager knows about but has not finalized is executed speculatively on
//! top of its parent's execution. A block is executed in two steps: its patch transactions on top of
//! the parent's post-execution state, and its normal transactions on top of that. The
//! [`execution`] module defines the traits the execution engine implements; the [`tree`] module
//! keeps the executions in a tree that mirrors the block tree and orders their execution.

pub mod execution;

pub mod tree;

pub mod ref_trace;
