/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The block-management core of a BFT blockchain node.
//!
//! The core sits between a consensus engine, which decides which blocks to vote for, and an
//! execution engine, which runs transactions. It:
//! 1. Imports blocks received from peers and proposes new ones, speculatively executing their
//!    transactions on a [tree of transitions](transition::tree) so that competing forks can be
//!    evaluated in parallel ([`block_manager`]).
//! 2. Finalizes blocks once consensus commits them, persisting headers, bodies, transaction
//!    locators and receipts into a pluggable [key-value store](storage).
//! 3. Fetches missing world state and receipts from peers when a node joins or restarts behind the
//!    head of the chain ([`state_sync`]).
//!
//! The execution engine is supplied by the library user through the
//! [`ServiceManager`](transition::execution::ServiceManager) trait, the database through
//! [`KVStore`](storage::KVStore), and the peer-to-peer layer through
//! [`Network`](state_sync::Network).

pub mod types;

pub mod errors;

pub mod storage;

pub mod merkle;

pub mod receipt;

pub mod transaction;

pub mod world_state;

pub mod block;

pub mod transition;

pub mod block_manager;

pub mod state_sync;

pub mod config;

pub mod events;

pub mod logging;

pub mod event_bus;
