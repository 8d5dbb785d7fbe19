/*
    Copyright © 2024, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Cryptographic primitives.
//!
//! The definitions and re-exports in this module provide two categories of cryptographic primitives:
//! 1. **Cryptographic Hashes**: SHA3-256 provided by the [`sha3`] crate is used everywhere; SHA-256
//!    from the [`sha2`] crate only appears in the legacy logs bloom mode.
//! 2. **Digital Signatures**: provided by the [`ed25519_dalek`] crate.

use super::data_types::{Address, CryptoHash, SignatureBytes, ADDRESS_BODY_LEN};

// re-exports below.
pub use sha2::Sha256 as LegacyHasher;
pub use sha3::Digest;
pub use sha3::Sha3_256 as CryptoHasher;

pub use ed25519_dalek::{Signature, SignatureError, Signer, SigningKey, Verifier, VerifyingKey};

/// Compute the SHA3-256 hash of `bytes`.
pub fn sha3_256(bytes: &[u8]) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    hasher.update(bytes);
    CryptoHash::new(hasher.finalize().into())
}

/// Compute the SHA-256 hash of `bytes`.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = LegacyHasher::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Derive the account address owned by `verifying_key`: the last 20 bytes of the SHA3-256 hash of
/// the key.
pub fn address_of(verifying_key: &VerifyingKey) -> Address {
    let hash = sha3_256(verifying_key.as_bytes()).bytes();
    let mut body = [0u8; ADDRESS_BODY_LEN];
    body.copy_from_slice(&hash[32 - ADDRESS_BODY_LEN..]);
    Address::account(body)
}

/// Verify that `signature` was produced by `verifying_key` over `message`.
pub fn verify_signature(
    verifying_key: &VerifyingKey,
    message: &[u8],
    signature: &SignatureBytes,
) -> bool {
    let signature = Signature::from_bytes(&signature.bytes());
    verifying_key.verify(message, &signature).is_ok()
}

/// A facade around [`SigningKey`] that implements method for [`sign`](Self::sign)-ing messages as well
/// as a getter for the [`public`](Self::public) key associated with the signing key.
#[derive(Clone)]
pub struct Keypair(pub(crate) SigningKey);

impl Keypair {
    /// Create a `Keypair` that wraps over `signing_key`.
    pub fn new(signing_key: SigningKey) -> Keypair {
        Keypair(signing_key)
    }

    /// Sign an arbitrary `message` with the `Keypair`.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        SignatureBytes::new(self.0.sign(message).to_bytes())
    }

    /// Get the `VerifyingKey` of this `Keypair`.
    pub fn public(&self) -> VerifyingKey {
        self.0.verifying_key()
    }

    /// Get the account address of this `Keypair`.
    pub fn address(&self) -> Address {
        address_of(&self.public())
    }
}
