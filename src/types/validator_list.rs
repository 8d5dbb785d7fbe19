/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The ordered list of validators whose commit votes certify a block.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::ed25519::Error;
use std::slice;

use super::{
    crypto_primitives::{address_of, sha3_256},
    data_types::{Address, CryptoHash},
};

pub use ed25519_dalek::VerifyingKey;

/// Stores the identities of the validators that vote on a block.
///
/// ## Ordering of validators
///
/// Unlike a set, a `ValidatorList` keeps validators in the order they were provided in. A commit-vote
/// set lists its votes in the same order, so the position of a validator is significant and part of
/// the list's [`hash`](ValidatorList::hash).
///
/// ## Quorum
///
/// Every validator carries equal weight. A quorum is strictly more than two-thirds of the list.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct ValidatorList {
    validators: Vec<VerifyingKey>,
}

impl ValidatorList {
    /// Create a validator list containing `validators` in the given order. Duplicates after the first
    /// occurrence are dropped.
    pub fn new(validators: Vec<VerifyingKey>) -> ValidatorList {
        let mut list = ValidatorList {
            validators: Vec::with_capacity(validators.len()),
        };
        for validator in validators {
            if !list.contains(&validator) {
                list.validators.push(validator);
            }
        }
        list
    }

    pub fn len(&self) -> usize {
        self.validators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Check whether the list contains `validator`.
    pub fn contains(&self, validator: &VerifyingKey) -> bool {
        self.position(validator).is_some()
    }

    /// Get the position of `validator` in the list.
    pub fn position(&self, validator: &VerifyingKey) -> Option<usize> {
        self.validators.iter().position(|v| v == validator)
    }

    /// Get the validator at `index`.
    pub fn get(&self, index: usize) -> Option<&VerifyingKey> {
        self.validators.get(index)
    }

    /// Iterate through the validators in list order.
    pub fn validators(&self) -> slice::Iter<VerifyingKey> {
        self.validators.iter()
    }

    /// Resolve raw signer bytes (a 32-byte verifying key) to the address of a validator in this list.
    pub fn address_of(&self, signer: &[u8]) -> Option<Address> {
        self.validators
            .iter()
            .find(|v| v.as_bytes().as_slice() == signer)
            .map(address_of)
    }

    /// Minimum number of distinct votes that form a quorum of this list.
    pub fn quorum(&self) -> usize {
        self.validators.len() * 2 / 3 + 1
    }

    /// Get the canonical encoding of this list.
    pub fn bytes(&self) -> Vec<u8> {
        ValidatorListBytes::from(self).try_to_vec().unwrap()
    }

    /// Get the SHA3-256 hash of the canonical encoding of this list.
    pub fn hash(&self) -> CryptoHash {
        sha3_256(&self.bytes())
    }

    /// Decode a list from its canonical encoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<ValidatorList, ValidatorListDecodeError> {
        let list_bytes = ValidatorListBytes::deserialize(&mut &*bytes)
            .map_err(ValidatorListDecodeError::Deserialize)?;
        ValidatorList::try_from(list_bytes).map_err(ValidatorListDecodeError::VerifyingKey)
    }
}

/// Intermediate representation of [`ValidatorList`] for safe serialization and deserialization.
///
/// To serialize an instance of `ValidatorList`, convert it into `ValidatorListBytes` and serialize
/// that. To deserialize, deserialize into `ValidatorListBytes` and then try to convert it with
/// [`TryFrom`].
#[derive(Clone, BorshDeserialize, BorshSerialize)]
pub struct ValidatorListBytes(Vec<[u8; 32]>);

impl From<&ValidatorList> for ValidatorListBytes {
    fn from(list: &ValidatorList) -> Self {
        ValidatorListBytes(list.validators.iter().map(|v| v.to_bytes()).collect())
    }
}

impl TryFrom<ValidatorListBytes> for ValidatorList {
    type Error = Error;

    fn try_from(value: ValidatorListBytes) -> Result<Self, Self::Error> {
        let validators = value
            .0
            .iter()
            .map(VerifyingKey::from_bytes)
            .collect::<Result<Vec<VerifyingKey>, Error>>()?;
        Ok(ValidatorList::new(validators))
    }
}

#[derive(Debug)]
pub enum ValidatorListDecodeError {
    Deserialize(std::io::Error),
    VerifyingKey(Error),
}
