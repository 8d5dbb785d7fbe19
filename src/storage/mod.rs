/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Pluggable persistence for finalized blocks, transaction locators, and content-addressed data.
//!
//! The core never assumes a particular database. The library user provides a [`KVStore`]
//! (see [`pluggables`]) and the core stores everything in the buckets listed in [`buckets`].
//!
//! Writes go through [`ChainWriteBatch`](write_batch::ChainWriteBatch) and are applied atomically
//! by [`KVStore::write`]. Two writers exist: the block manager (at finalization, under its mutex)
//! and the sync engines (when flushing fetched data, under their own lock). Readers are not
//! locked, so the store must provide point-in-time consistent reads.

pub mod buckets;

pub mod pluggables;

pub mod write_batch;

pub use pluggables::{KVGet, KVStore, WriteBatch};
