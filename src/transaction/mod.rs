/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Transactions as the block-management core sees them.
//!
//! The core does not execute transactions. It needs to identify them, tell which group they belong
//! to, run the stateless [`verify`](TransactionInfo::verify) and context-dependent
//! [`pre_validate`](TransactionInfo::pre_validate) checks, and store them. Three variants exist:
//! - [`TransactionV2`](v2::TransactionV2): legacy JSON transfers.
//! - [`TransactionV3`](v3::TransactionV3): general transactions, in JSON or binary form.
//! - [`DoubleSignReportTx`](double_sign::DoubleSignReportTx): evidence that a validator signed two
//!   conflicting messages.
//!
//! Bytes are turned into a [`Transaction`] by a [`FactoryRegistry`](factory::FactoryRegistry).

pub mod serialize;

pub mod v2;

pub mod v3;

pub mod double_sign;

pub mod factory;

pub mod transaction_list;

use borsh::{BorshDeserialize, BorshSerialize};
use serde_json::Value;

use crate::{
    errors::{CoreError, ErrorKind},
    types::{
        data_types::{Address, BlockHeight, CryptoHash, NetworkID},
        revision::Revision,
    },
};

use self::{double_sign::DoubleSignReportTx, v2::TransactionV2, v3::TransactionV3};

/// Leading byte of the binary form of a transaction.
pub const BINARY_TAG: u8 = 0x03;

/// Fields that open the binary form of every transaction, after [`BINARY_TAG`]. Factories peek at
/// them to decide which variant the rest of the bytes decode to.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub(crate) struct BinaryHeader {
    pub version: u16,
    pub data_type: Option<String>,
}

impl BinaryHeader {
    /// Decode the header of `bytes`, which must start with [`BINARY_TAG`].
    pub(crate) fn peek(bytes: &[u8]) -> Option<BinaryHeader> {
        match bytes.split_first() {
            Some((&BINARY_TAG, mut rest)) => BinaryHeader::deserialize(&mut rest).ok(),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum TransactionGroup {
    Normal,
    Patch,
}

/// Where a finalized transaction is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct TransactionLocator {
    pub height: BlockHeight,
    pub group: TransactionGroup,
    pub index: u32,
}

/// What [`pre_validate`](TransactionInfo::pre_validate) may consult about the state a transaction
/// would execute on.
pub trait TransactionContext {
    fn network_id(&self) -> NetworkID;
    fn revision(&self) -> Revision;
    fn step_price(&self) -> u128;
    /// Minimum step limit of a normal transaction.
    fn minimum_step(&self) -> u128;
    fn balance(&self, address: &Address) -> u128;
}

/// Behaviour shared by all transaction variants.
pub trait TransactionInfo {
    /// The transaction hash.
    fn id(&self) -> CryptoHash;
    /// The form stored in block bodies.
    fn bytes(&self) -> Vec<u8>;
    /// Stateless checks, including the signature.
    fn verify(&self) -> Result<(), TransactionError>;
    /// Checks against the state the transaction would execute on.
    fn pre_validate(&self, ctx: &dyn TransactionContext) -> Result<(), TransactionError>;
    fn group(&self) -> TransactionGroup;
    fn version(&self) -> u16;
    fn timestamp(&self) -> i64;
    fn nonce(&self) -> Option<u128>;
    fn from(&self) -> Address;
    fn to(&self) -> Address;
    fn validate_network(&self, network_id: NetworkID) -> bool;
    fn to_json(&self) -> Value;
}

#[derive(Clone, Debug, PartialEq)]
pub enum Transaction {
    V2(TransactionV2),
    V3(TransactionV3),
    DoubleSignReport(DoubleSignReportTx),
}

macro_rules! dispatch {
    ($self:ident, $tx:ident => $body:expr) => {
        match $self {
            Transaction::V2($tx) => $body,
            Transaction::V3($tx) => $body,
            Transaction::DoubleSignReport($tx) => $body,
        }
    };
}

impl TransactionInfo for Transaction {
    fn id(&self) -> CryptoHash {
        dispatch!(self, tx => tx.id())
    }

    fn bytes(&self) -> Vec<u8> {
        dispatch!(self, tx => tx.bytes())
    }

    fn verify(&self) -> Result<(), TransactionError> {
        dispatch!(self, tx => tx.verify())
    }

    fn pre_validate(&self, ctx: &dyn TransactionContext) -> Result<(), TransactionError> {
        if !self.validate_network(ctx.network_id()) {
            return Err(TransactionError::InvalidFormat(format!(
                "transaction {} is not for network {}",
                self.id(),
                ctx.network_id()
            )));
        }
        dispatch!(self, tx => tx.pre_validate(ctx))
    }

    fn group(&self) -> TransactionGroup {
        dispatch!(self, tx => tx.group())
    }

    fn version(&self) -> u16 {
        dispatch!(self, tx => tx.version())
    }

    fn timestamp(&self) -> i64 {
        dispatch!(self, tx => tx.timestamp())
    }

    fn nonce(&self) -> Option<u128> {
        dispatch!(self, tx => tx.nonce())
    }

    fn from(&self) -> Address {
        dispatch!(self, tx => TransactionInfo::from(tx))
    }

    fn to(&self) -> Address {
        dispatch!(self, tx => tx.to())
    }

    fn validate_network(&self, network_id: NetworkID) -> bool {
        dispatch!(self, tx => tx.validate_network(network_id))
    }

    fn to_json(&self) -> Value {
        dispatch!(self, tx => tx.to_json())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    InvalidFormat(String),
    InvalidVersion(String),
    InvalidSignature(String),
    InvalidValue(String),
    OutOfStep { step_limit: u128, minimum: u128 },
    OutOfBalance { balance: u128, required: u128 },
    /// The transaction kind is disabled at the current revision.
    Disabled(String),
}

impl From<TransactionError> for CoreError {
    fn from(value: TransactionError) -> Self {
        match value {
            TransactionError::InvalidFormat(msg) | TransactionError::InvalidVersion(msg) => {
                ErrorKind::InvalidFormat.error(msg)
            }
            TransactionError::InvalidSignature(msg) => ErrorKind::InvalidSignature.error(msg),
            TransactionError::InvalidValue(msg) => ErrorKind::IllegalArgument.error(msg),
            TransactionError::OutOfStep {
                step_limit,
                minimum,
            } => ErrorKind::OutOfStep.error(format!(
                "step limit {} is below the minimum {}",
                step_limit, minimum
            )),
            TransactionError::OutOfBalance { balance, required } => ErrorKind::OutOfBalance
                .error(format!("balance {} is below the required {}", balance, required)),
            TransactionError::Disabled(msg) => ErrorKind::InvalidState.error(msg),
        }
    }
}

/* ↓↓↓ JSON field helpers ↓↓↓ */

pub(crate) fn field_str<'a>(
    fields: &'a serde_json::Map<String, Value>,
    key: &str,
) -> Result<&'a str, TransactionError> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| TransactionError::InvalidFormat(format!("missing or non-string {}", key)))
}

pub(crate) fn parse_hex_u128(s: &str, key: &str) -> Result<u128, TransactionError> {
    s.strip_prefix("0x")
        .and_then(|digits| u128::from_str_radix(digits, 16).ok())
        .ok_or_else(|| TransactionError::InvalidValue(format!("{} is not a hex integer: {}", key, s)))
}

pub(crate) fn field_u128(
    fields: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<u128, TransactionError> {
    parse_hex_u128(field_str(fields, key)?, key)
}

pub(crate) fn optional_u128(
    fields: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<Option<u128>, TransactionError> {
    match fields.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => field_u128(fields, key).map(Some),
    }
}

pub(crate) fn field_i64(
    fields: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<i64, TransactionError> {
    let int = field_u128(fields, key)?;
    i64::try_from(int).map_err(|_| TransactionError::InvalidValue(format!("{} overflows", key)))
}

pub(crate) fn field_address(
    fields: &serde_json::Map<String, Value>,
    key: &str,
) -> Result<Address, TransactionError> {
    let s = field_str(fields, key)?;
    s.parse::<Address>()
        .map_err(|_| TransactionError::InvalidFormat(format!("{} is not an address: {}", key, s)))
}
