//! Credential Issuance
//!
//! The engine accounts for amount and vsize budgets through credentials a
//! participant can present back later without revealing which registration
//! they came from. The cryptosystem that makes presentation unlinkable is
//! supplied behind the `CredentialIssuer` trait; the engine's own duty is
//! narrower and absolute: every net delta it forwards to the issuer must be
//! recomputed from its own ledger, never taken from the client.
//!
//! `InProcessIssuer` is the bundled implementation: MAC-authenticated
//! credentials with per-round outstanding-balance bookkeeping. It enforces
//! the issuance arithmetic (`requested == presented + delta`), refuses
//! replays, and exposes the outstanding balance per round — the observable
//! behind the engine's conservation law.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Serialize, Deserialize};

use crate::core::hash::{Hash256, Hasher};
use crate::round::round::RoundId;

/// Which budget a credential certifies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Satoshi value.
    Amount,
    /// Virtual-size budget.
    Vsize,
}

/// A credential issued by the coordinator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Budget type.
    pub kind: CredentialKind,
    /// Round the credential is valid in.
    pub round_id: RoundId,
    /// Certified value.
    pub value: u64,
    /// Issuance nonce.
    pub nonce: u64,
    /// Authentication tag.
    pub mac: Hash256,
}

/// A request to issue credentials.
///
/// `delta` is the net value entering (positive) or leaving (negative) the
/// credential system; zero for pure reissuance. Issuance succeeds only if
/// the requested values equal the presented values plus the delta.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRequest {
    /// Credentials being presented (consumed).
    pub presented: Vec<Credential>,
    /// Values to mint.
    pub requested: Vec<u64>,
    /// Declared net delta.
    pub delta: i64,
}

impl CredentialRequest {
    /// A zero request: nothing presented, two zero-value credentials out.
    pub fn zero() -> Self {
        Self { presented: Vec::new(), requested: vec![0, 0], delta: 0 }
    }

    /// A request minting `values` against a positive net delta.
    pub fn minting(values: Vec<u64>, delta: i64) -> Self {
        Self { presented: Vec::new(), requested: values, delta }
    }

    /// Sum of presented values.
    pub fn presented_sum(&self) -> i128 {
        self.presented.iter().map(|c| c.value as i128).sum()
    }

    /// Sum of requested values.
    pub fn requested_sum(&self) -> i128 {
        self.requested.iter().map(|&v| v as i128).sum()
    }
}

/// Credentials minted for a request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialResponse {
    /// Freshly issued credentials, one per requested value.
    pub issued: Vec<Credential>,
}

/// Why issuance was refused.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// A presented credential failed authentication.
    #[error("presented credential failed verification")]
    InvalidCredential,

    /// A presented credential was already consumed.
    #[error("presented credential was already spent")]
    CredentialReused,

    /// A presented credential belongs to a different round.
    #[error("credential bound to a different round")]
    WrongRound,

    /// `requested != presented + delta`.
    #[error("balance mismatch: requested {requested}, presented {presented}, delta {delta}")]
    BalanceMismatch {
        /// Sum of requested values.
        requested: i128,
        /// Sum of presented values.
        presented: i128,
        /// Declared delta.
        delta: i64,
    },
}

/// The issuance service consumed by the orchestrator.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Issue credentials of `kind` for a round.
    async fn issue(
        &self,
        round_id: RoundId,
        kind: CredentialKind,
        request: &CredentialRequest,
    ) -> Result<CredentialResponse, CredentialError>;

    /// Commitment to the issuer's public parameters, hashed into round ids.
    fn parameters_commitment(&self) -> Hash256;
}

// =============================================================================
// IN-PROCESS ISSUER
// =============================================================================

/// MAC-based issuer with per-round outstanding-balance bookkeeping.
#[derive(Debug)]
pub struct InProcessIssuer {
    key: Hash256,
    nonce_counter: AtomicU64,
    outstanding: Mutex<HashMap<(RoundId, CredentialKind), i128>>,
    consumed: Mutex<HashSet<Hash256>>,
}

impl InProcessIssuer {
    /// Issuer keyed from a seed.
    pub fn new(seed: &[u8]) -> Self {
        let mut hasher = Hasher::for_credential();
        hasher.update_bytes(seed);
        Self {
            key: hasher.finalize(),
            nonce_counter: AtomicU64::new(1),
            outstanding: Mutex::new(HashMap::new()),
            consumed: Mutex::new(HashSet::new()),
        }
    }

    /// Net value of `kind` issued and not yet redeemed for a round.
    pub fn outstanding(&self, round_id: RoundId, kind: CredentialKind) -> i128 {
        self.outstanding.lock().unwrap().get(&(round_id, kind)).copied().unwrap_or(0)
    }

    fn mac(&self, kind: CredentialKind, round_id: &RoundId, value: u64, nonce: u64) -> Hash256 {
        let mut hasher = Hasher::for_credential();
        hasher.update_hash(&self.key);
        hasher.update_u8(kind as u8);
        hasher.update_hash(&round_id.0);
        hasher.update_u64(value);
        hasher.update_u64(nonce);
        hasher.finalize()
    }

    fn mint(&self, kind: CredentialKind, round_id: RoundId, value: u64) -> Credential {
        let nonce = self.nonce_counter.fetch_add(1, Ordering::Relaxed);
        let mac = self.mac(kind, &round_id, value, nonce);
        Credential { kind, round_id, value, nonce, mac }
    }
}

#[async_trait]
impl CredentialIssuer for InProcessIssuer {
    async fn issue(
        &self,
        round_id: RoundId,
        kind: CredentialKind,
        request: &CredentialRequest,
    ) -> Result<CredentialResponse, CredentialError> {
        for credential in &request.presented {
            if credential.kind != kind || credential.round_id != round_id {
                return Err(CredentialError::WrongRound);
            }
            if credential.mac != self.mac(kind, &round_id, credential.value, credential.nonce) {
                return Err(CredentialError::InvalidCredential);
            }
        }
        if request.requested_sum() != request.presented_sum() + request.delta as i128 {
            return Err(CredentialError::BalanceMismatch {
                requested: request.requested_sum(),
                presented: request.presented_sum(),
                delta: request.delta,
            });
        }

        // Consume presented credentials atomically with the mint
        {
            let mut consumed = self.consumed.lock().unwrap();
            if request.presented.iter().any(|c| consumed.contains(&c.mac)) {
                return Err(CredentialError::CredentialReused);
            }
            for credential in &request.presented {
                consumed.insert(credential.mac);
            }
        }

        let issued = request.requested.iter()
            .map(|&value| self.mint(kind, round_id, value))
            .collect();

        *self.outstanding.lock().unwrap().entry((round_id, kind)).or_insert(0) +=
            request.delta as i128;

        Ok(CredentialResponse { issued })
    }

    fn parameters_commitment(&self) -> Hash256 {
        let mut hasher = Hasher::for_credential();
        hasher.update_bytes(b"public-parameters");
        hasher.update_hash(&self.key);
        hasher.finalize()
    }
}
