/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store bytes, and do not have any major "active" behavior.

use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::Hash,
    ops::{Add, AddAssign, Sub},
    str::FromStr,
};

use borsh::{BorshDeserialize, BorshSerialize};

/// Number that identifies the network a block, vote, or transaction belongs to.
///
/// All replicas of the same chain must be configured with the same `NetworkID`. Transactions and
/// double-sign evidence carrying a different `NetworkID` are rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct NetworkID(u32);

impl NetworkID {
    /// Create a new `NetworkID` with an `int` value.
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    /// Get the `u32` value of this `NetworkID`.
    pub const fn int(&self) -> u32 {
        self.0
    }
}

impl Display for NetworkID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Height of a block in the chain.
///
/// Starts at 0 for the genesis block and increases by 1 for every subsequent block linked through
/// [`prev_id`](crate::block::header::BlockHeader::prev_id).
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize,
)]
pub struct BlockHeight(u64);

impl BlockHeight {
    /// Create a new `BlockHeight` with an `int` inner value.
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    /// Get the inner `u64` value of this `BlockHeight`.
    pub const fn int(&self) -> u64 {
        self.0
    }

    /// Get the little-endian representation of the inner `u64` value of this `BlockHeight`.
    pub fn to_le_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Get the height that precedes this one, or `None` for the genesis height.
    pub fn prev(&self) -> Option<BlockHeight> {
        self.0.checked_sub(1).map(BlockHeight)
    }
}

impl Display for BlockHeight {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl AddAssign<u64> for BlockHeight {
    fn add_assign(&mut self, rhs: u64) {
        self.0.add_assign(rhs)
    }
}

impl Add<u64> for BlockHeight {
    type Output = BlockHeight;
    fn add(self, rhs: u64) -> Self::Output {
        BlockHeight::new(self.0.add(rhs))
    }
}

impl Sub<BlockHeight> for BlockHeight {
    type Output = u64;
    fn sub(self, rhs: BlockHeight) -> Self::Output {
        self.0 - rhs.0
    }
}

/// 32-byte cryptographic hash.
///
/// Every `CryptoHash` produced by this crate is a SHA3-256 digest: block IDs, trie node references,
/// transaction IDs, and the keys of the `BytesByHash` bucket.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct CryptoHash([u8; 32]);

impl CryptoHash {
    /// Create a new `CryptoHash` wrapping `bytes`.
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 32]` value of this `CryptoHash`.
    pub const fn bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Get a reference to the bytes of this `CryptoHash`.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Try to interpret `bytes` as a `CryptoHash`. Returns `None` if `bytes` is not exactly 32 bytes
    /// long.
    pub fn from_slice(bytes: &[u8]) -> Option<CryptoHash> {
        <[u8; 32]>::try_from(bytes).ok().map(CryptoHash)
    }

    /// Get the `0x`-prefixed lowercase hex form of this hash.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl Display for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Debug for CryptoHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Length of the body of an [`Address`].
pub const ADDRESS_BODY_LEN: usize = 20;

/// Account address.
///
/// An address is 20 bytes derived from a public key (for externally owned accounts) or assigned at
/// deployment (for contracts). The binary form is 21 bytes: a one-byte contract flag followed by the
/// body. The textual form is `hx<hex>` for accounts and `cx<hex>` for contracts.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct Address {
    contract: bool,
    body: [u8; ADDRESS_BODY_LEN],
}

impl Address {
    /// Create a new account (non-contract) `Address` with the given body.
    pub const fn account(body: [u8; ADDRESS_BODY_LEN]) -> Self {
        Self {
            contract: false,
            body,
        }
    }

    /// Create a new contract `Address` with the given body.
    pub const fn contract(body: [u8; ADDRESS_BODY_LEN]) -> Self {
        Self {
            contract: true,
            body,
        }
    }

    /// The system contract address, `cx0000000000000000000000000000000000000000`.
    pub const fn system() -> Self {
        Self::contract([0u8; ADDRESS_BODY_LEN])
    }

    pub const fn is_contract(&self) -> bool {
        self.contract
    }

    pub const fn body(&self) -> &[u8; ADDRESS_BODY_LEN] {
        &self.body
    }

    /// Get the 21-byte binary form of this address.
    pub fn bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(ADDRESS_BODY_LEN + 1);
        bytes.push(self.contract as u8);
        bytes.extend_from_slice(&self.body);
        bytes
    }

    /// Parse the 21-byte binary form of an address.
    pub fn from_bytes(bytes: &[u8]) -> Option<Address> {
        if bytes.len() != ADDRESS_BODY_LEN + 1 || bytes[0] > 1 {
            return None;
        }
        let mut body = [0u8; ADDRESS_BODY_LEN];
        body.copy_from_slice(&bytes[1..]);
        Some(Address {
            contract: bytes[0] == 1,
            body,
        })
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let prefix = if self.contract { "cx" } else { "hx" };
        write!(f, "{}{}", prefix, hex::encode(self.body))
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (contract, body_hex) = match s.get(0..2) {
            Some("hx") => (false, &s[2..]),
            Some("cx") => (true, &s[2..]),
            _ => return Err(AddressParseError(s.to_string())),
        };
        let body_bytes = hex::decode(body_hex).map_err(|_| AddressParseError(s.to_string()))?;
        let body = <[u8; ADDRESS_BODY_LEN]>::try_from(body_bytes.as_slice())
            .map_err(|_| AddressParseError(s.to_string()))?;
        Ok(Address { contract, body })
    }
}

/// Error returned when a string is not a valid `hx`/`cx` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressParseError(pub String);

/// Ed25519 digital signature.
#[derive(Clone, Copy, PartialEq, Eq, BorshDeserialize, BorshSerialize)]
pub struct SignatureBytes([u8; 64]);

impl SignatureBytes {
    /// Create a new `SignatureBytes` wrapping `bytes`.
    pub const fn new(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    /// Get the inner `[u8; 64]` value of this `SignatureBytes`.
    pub const fn bytes(&self) -> [u8; 64] {
        self.0
    }

    /// Try to interpret `bytes` as a signature. Returns `None` if `bytes` is not 64 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<SignatureBytes> {
        <[u8; 64]>::try_from(bytes).ok().map(SignatureBytes)
    }
}

impl Debug for SignatureBytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Encode `int` as `0x`-prefixed lowercase hex, the form used by JSON projections.
pub fn hex_int(int: impl Into<i128>) -> String {
    let int = int.into();
    if int < 0 {
        format!("-0x{:x}", -int)
    } else {
        format!("0x{:x}", int)
    }
}

/// Parse a `0x`-prefixed hex integer produced by [`hex_int`].
pub fn parse_hex_int(s: &str) -> Option<i128> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let digits = digits.strip_prefix("0x")?;
    let int = i128::from_str_radix(digits, 16).ok()?;
    Some(if negative { -int } else { int })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_text_form_round_trips() {
        let address = Address::account([7u8; ADDRESS_BODY_LEN]);
        let text = address.to_string();
        assert!(text.starts_with("hx"));
        assert_eq!(text.parse::<Address>().unwrap(), address);
        assert_eq!(Address::from_bytes(&address.bytes()), Some(address));
        assert!("zz00".parse::<Address>().is_err());
    }

    #[test]
    fn hex_int_handles_sign() {
        assert_eq!(hex_int(255), "0xff");
        assert_eq!(hex_int(-1), "-0x1");
        assert_eq!(parse_hex_int("0xff"), Some(255));
        assert_eq!(parse_hex_int("-0x1"), Some(-1));
        assert_eq!(parse_hex_int("ff"), None);
    }
}
