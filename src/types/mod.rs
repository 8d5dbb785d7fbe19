//! Types and traits that are used across multiple components of the block-management core.
//!
//! Types specific to a single component (receipts, transactions, block headers) live in that
//! component's module, e.g., [`crate::block::header`].

pub mod data_types;

pub mod crypto_primitives;

pub mod validator_list;

pub mod commit_votes;

pub mod revision;
