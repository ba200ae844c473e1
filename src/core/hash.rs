//! Domain-Separated Hashing
//!
//! Deterministic SHA-256 hashing for:
//! - Round identities (hash of the frozen parameter set)
//! - Transaction identities
//! - Ownership-proof and credential bindings
//!
//! Order of updates is part of each domain's definition.

use sha2::{Sha256, Digest};
use std::time::Duration;

use crate::core::units::Amount;

/// Hash output type (256 bits / 32 bytes).
pub type Hash256 = [u8; 32];

/// Deterministic hasher with a domain separator.
///
/// Wraps SHA-256 with helpers for the engine's value types.
pub struct Hasher {
    hasher: Sha256,
}

impl Hasher {
    /// Create a new hasher with a domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Hasher for round identities.
    pub fn for_round_id() -> Self {
        Self::new(b"MIXPOOL_ROUND_ID_V1")
    }

    /// Hasher for transaction identities.
    pub fn for_transaction() -> Self {
        Self::new(b"MIXPOOL_TX_V1")
    }

    /// Hasher for ownership-proof bindings.
    pub fn for_ownership_proof() -> Self {
        Self::new(b"MIXPOOL_OWNERSHIP_V1")
    }

    /// Hasher for credential MACs.
    pub fn for_credential() -> Self {
        Self::new(b"MIXPOOL_CREDENTIAL_V1")
    }

    /// Update with raw bytes, length-prefixed.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.update_u64(bytes.len() as u64);
        self.hasher.update(bytes);
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a satoshi amount.
    #[inline]
    pub fn update_amount(&mut self, value: Amount) {
        self.update_u64(value.to_sat());
    }

    /// Update with a duration (whole milliseconds).
    #[inline]
    pub fn update_duration(&mut self, value: Duration) {
        self.update_u64(value.as_millis() as u64);
    }

    /// Update with a fixed 32-byte digest.
    #[inline]
    pub fn update_hash(&mut self, value: &Hash256) {
        self.hasher.update(value);
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> Hash256 {
        self.hasher.finalize().into()
    }
}
