//! Alice — a Registered Input
//!
//! One coin registered into a round, together with its ownership proof,
//! its confirmation deadline and its signing readiness.

use serde::{Serialize, Deserialize};
use tokio::time::Instant;

use crate::core::coin::{Coin, OwnershipProof};
use crate::core::units::{Amount, CoordinationFeeRate, FeeRate};

/// Unique Alice identifier (UUID as bytes).
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AliceId(pub [u8; 16]);

impl AliceId {
    /// Generate a fresh random id.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().into_bytes())
    }

    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl std::fmt::Display for AliceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", uuid::Uuid::from_bytes(self.0))
    }
}

/// One registered input.
#[derive(Clone, Debug)]
pub struct Alice {
    /// Identifier handed back to the registrant.
    pub id: AliceId,
    /// The registered coin.
    pub coin: Coin,
    /// Proof of script control, bound to this round.
    pub ownership_proof: OwnershipProof,
    /// Deadline to confirm the connection before being dropped.
    pub deadline: Instant,
    /// Whether the connection was confirmed (real credentials issued).
    pub confirmed: bool,
    /// Whether the registrant signalled readiness to sign.
    pub ready_to_sign: bool,
}

impl Alice {
    /// Create an unconfirmed Alice with a fresh id.
    pub fn new(coin: Coin, ownership_proof: OwnershipProof, deadline: Instant) -> Self {
        Self {
            id: AliceId::random(),
            coin,
            ownership_proof,
            deadline,
            confirmed: false,
            ready_to_sign: false,
        }
    }

    /// Vsize this input contributes to the transaction.
    ///
    /// Registration guarantees a standard template, so this is total.
    pub fn input_vsize(&self) -> u64 {
        self.coin.input_vsize().unwrap_or(0)
    }

    /// Mining fee this input owes for its own spending cost.
    pub fn input_fee(&self, rate: FeeRate) -> Amount {
        rate.fee(self.input_vsize())
    }

    /// Value left after mining and coordination fees.
    ///
    /// `None` when fees consume the whole coin. This is the amount the
    /// coordinator is willing to certify as a real credential, recomputed
    /// from its own ledger rather than trusted from the client.
    pub fn net_value(&self, rate: FeeRate, coordination: CoordinationFeeRate) -> Option<Amount> {
        let after_mining = self.coin.value.checked_sub(self.input_fee(rate))?;
        let after_coordination = after_mining.checked_sub(coordination.fee(self.coin.value))?;
        if after_coordination == Amount::ZERO {
            None
        } else {
            Some(after_coordination)
        }
    }

    /// Vsize budget left after this input's own footprint.
    pub fn remaining_vsize(&self, max_per_alice: u64) -> Option<u64> {
        max_per_alice.checked_sub(self.input_vsize())
    }
}
