/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Receipts, event logs, and the logs bloom.
//!
//! Executing a transaction produces a [`Receipt`](receipt::Receipt). The receipts of a transaction
//! group form a [`ReceiptList`](receipt_list::ReceiptList) whose merkle root is part of the
//! transition result a block header commits to. Every receipt carries a
//! [`LogsBloom`](logs_bloom::LogsBloom) over its events; the union of those blooms over a block is
//! the block header's `logs_bloom`.

pub mod lzw;

pub mod logs_bloom;

pub mod event_signature;

pub mod event_log;

pub mod fee_detail;

pub mod receipt;

pub mod receipt_list;

use crate::{
    errors::{CoreError, ErrorKind},
    merkle::TrieError,
};

#[derive(Debug)]
pub enum ReceiptError {
    InvalidFormat(String),
    InvalidState(String),
    NotFound(String),
    Trie(TrieError),
}

impl From<TrieError> for ReceiptError {
    fn from(value: TrieError) -> Self {
        ReceiptError::Trie(value)
    }
}

impl std::fmt::Display for ReceiptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiptError::InvalidFormat(msg) => write!(f, "invalid format: {}", msg),
            ReceiptError::InvalidState(msg) => write!(f, "invalid state: {}", msg),
            ReceiptError::NotFound(msg) => write!(f, "not found: {}", msg),
            ReceiptError::Trie(err) => write!(f, "{:?}", err),
        }
    }
}

impl From<ReceiptError> for CoreError {
    fn from(value: ReceiptError) -> Self {
        match value {
            ReceiptError::InvalidFormat(msg) => ErrorKind::InvalidFormat.error(msg),
            ReceiptError::InvalidState(msg) => ErrorKind::InvalidState.error(msg),
            ReceiptError::NotFound(msg) => ErrorKind::NotFound.error(msg),
            ReceiptError::Trie(err) => err.into(),
        }
    }
}
