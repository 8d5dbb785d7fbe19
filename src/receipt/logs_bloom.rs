/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The 2048-bit [`LogsBloom`].
//!
//! A logs bloom summarizes the event logs emitted by a receipt (or, merged, by every receipt of a
//! block) so that a client can skip blocks that cannot contain the events it looks for.
//!
//! ## Rasterization
//!
//! Each *part* added to the bloom sets three bits. With `h` the SHA3-256 hash of the part, bit
//! `((h[2i] << 8) | h[2i+1]) & 2047` is set for `i` in `0..3`. Under the
//! [legacy](crate::types::revision::Revision::LEGACY_LOGS_BLOOM) revision flag, `h` is instead the
//! SHA3-256 hash of the lowercase hex form of the SHA-256 hash of the part.
//!
//! An event log contributes one part per indexed element, namely the element prefixed with its
//! zero-based position, and, if the revision includes addresses, one part for the emitting
//! address prefixed with `0xff`.
//!
//! ## Forms
//!
//! The raw form is the 256-byte bit vector, most significant byte first. Block headers (and v3
//! receipts) carry the [LZW](super::lzw)-compressed raw form.

use std::fmt::{self, Debug, Formatter};

use crate::types::{
    crypto_primitives::{sha256, sha3_256},
    data_types::Address,
    revision::Revision,
};

use super::{lzw, ReceiptError};

pub const LOGS_BLOOM_BITS: usize = 2048;
pub const LOGS_BLOOM_BYTES: usize = LOGS_BLOOM_BITS / 8;

/// Prefix of the part that represents the address emitting an event.
const ADDRESS_PART_PREFIX: u8 = 0xff;

#[derive(Clone, PartialEq, Eq)]
pub struct LogsBloom {
    bits: [u8; LOGS_BLOOM_BYTES],
}

impl Default for LogsBloom {
    fn default() -> Self {
        LogsBloom::new()
    }
}

impl LogsBloom {
    /// Create an empty bloom.
    pub fn new() -> LogsBloom {
        LogsBloom {
            bits: [0u8; LOGS_BLOOM_BYTES],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|b| *b == 0)
    }

    fn set_bit(&mut self, index: usize) {
        let byte = LOGS_BLOOM_BYTES - 1 - index / 8;
        self.bits[byte] |= 1 << (index % 8);
    }

    /// Set the three bits of `part`.
    pub fn add_part(&mut self, part: &[u8], legacy: bool) {
        let hash = if legacy {
            sha3_256(hex::encode(sha256(part)).as_bytes())
        } else {
            sha3_256(part)
        }
        .bytes();
        for i in 0..3 {
            let index = (((hash[2 * i] as usize) << 8) | hash[2 * i + 1] as usize)
                & (LOGS_BLOOM_BITS - 1);
            self.set_bit(index);
        }
    }

    /// Add an event log emitted by `address` with the given indexed elements.
    pub fn add_log(&mut self, address: &Address, indexed: &[Vec<u8>], revision: Revision) {
        let legacy = revision.legacy_logs_bloom();
        if revision.logs_bloom_includes_address() {
            let mut part = vec![ADDRESS_PART_PREFIX];
            part.extend(address.bytes());
            self.add_part(&part, legacy);
        }
        for (position, element) in indexed.iter().enumerate() {
            let mut part = Vec::with_capacity(element.len() + 1);
            part.push(position as u8);
            part.extend_from_slice(element);
            self.add_part(&part, legacy);
        }
    }

    /// Set every bit that is set in `other`.
    pub fn merge(&mut self, other: &LogsBloom) {
        for (mine, theirs) in self.bits.iter_mut().zip(other.bits.iter()) {
            *mine |= theirs;
        }
    }

    /// Check whether every bit set in `other` is also set in this bloom.
    pub fn contain(&self, other: &LogsBloom) -> bool {
        self.bits
            .iter()
            .zip(other.bits.iter())
            .all(|(mine, theirs)| mine & theirs == *theirs)
    }

    /// Get the raw 256-byte form.
    pub fn bytes(&self) -> Vec<u8> {
        self.bits.to_vec()
    }

    /// Parse the raw form. Shorter inputs are treated as having leading zero bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<LogsBloom, ReceiptError> {
        if bytes.len() > LOGS_BLOOM_BYTES {
            return Err(ReceiptError::InvalidFormat(format!(
                "logs bloom of {} bytes",
                bytes.len()
            )));
        }
        let mut bloom = LogsBloom::new();
        bloom.bits[LOGS_BLOOM_BYTES - bytes.len()..].copy_from_slice(bytes);
        Ok(bloom)
    }

    /// Get the LZW-compressed raw form, as carried in block headers.
    pub fn compressed_bytes(&self) -> Vec<u8> {
        lzw::compress(&self.bits)
    }

    pub fn from_compressed_bytes(bytes: &[u8]) -> Result<LogsBloom, ReceiptError> {
        let raw = lzw::decompress(bytes)
            .map_err(|err| ReceiptError::InvalidFormat(format!("logs bloom: {:?}", err)))?;
        LogsBloom::from_bytes(&raw)
    }

    /// Get the `0x`-prefixed hex form used in JSON.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.bits))
    }
}

impl Debug for LogsBloom {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bloom_of(parts: &[&[u8]]) -> LogsBloom {
        let mut bloom = LogsBloom::new();
        for part in parts {
            bloom.add_part(part, false);
        }
        bloom
    }

    #[test]
    fn merge_and_contain() {
        let a = bloom_of(&[b"alpha", b"beta"]);
        let b = bloom_of(&[b"gamma"]);
        assert!(a.contain(&a));

        let mut merged = a.clone();
        merged.merge(&b);
        assert!(merged.contain(&a));
        assert!(merged.contain(&b));
        assert!(!a.contain(&merged));

        let subset = bloom_of(&[b"alpha"]);
        let mut merged_subset = a.clone();
        merged_subset.merge(&subset);
        assert!(a.contain(&merged_subset));
        assert_eq!(merged_subset, a);
    }

    #[test]
    fn legacy_mode_sets_different_bits() {
        let mut legacy = LogsBloom::new();
        legacy.add_part(b"Transfer(Address,int)", true);
        let modern = bloom_of(&[b"Transfer(Address,int)"]);
        assert_ne!(legacy, modern);
        assert!(legacy.bits.iter().map(|b| b.count_ones()).sum::<u32>() <= 3);
    }

    #[test]
    fn add_log_respects_address_flag() {
        let address = Address::contract([1u8; 20]);
        let indexed = vec![b"Event(int)".to_vec(), vec![0x01]];

        let mut without = LogsBloom::new();
        without.add_log(&address, &indexed, Revision::default());
        let mut with = LogsBloom::new();
        with.add_log(
            &address,
            &indexed,
            Revision::new(Revision::LOGS_BLOOM_ADDRESS),
        );
        assert!(with.contain(&without));

        let mut topic = LogsBloom::new();
        topic.add_part(&[&[0u8][..], b"Event(int)"].concat(), false);
        assert!(without.contain(&topic));
    }

    #[test]
    fn compressed_form_restores_bloom() {
        let bloom = bloom_of(&[b"x", b"y", b"z"]);
        let compressed = bloom.compressed_bytes();
        assert!(compressed.len() < LOGS_BLOOM_BYTES);
        assert_eq!(LogsBloom::from_compressed_bytes(&compressed).unwrap(), bloom);
        assert_eq!(
            LogsBloom::from_compressed_bytes(&LogsBloom::new().compressed_bytes()).unwrap(),
            LogsBloom::new()
        );
        assert!(LogsBloom::from_bytes(&[0u8; LOGS_BLOOM_BYTES + 1]).is_err());
    }
}
