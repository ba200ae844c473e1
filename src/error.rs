//! Protocol Errors
//!
//! Typed rejection reasons for remote calls, plus the offense kinds that
//! feed the ban list. Ordinary validation failures are plain rejections;
//! only evidenced misbehavior maps to an offense.

use chrono::{DateTime, Utc};

use crate::core::units::Amount;
use crate::round::phase::Phase;

/// Why an outpoint is being sent to the prison.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offense {
    /// Ownership proof failed verification.
    OwnershipProofViolation,
    /// The coin was provably spent while registered.
    DoubleSpend,
    /// Confirmed but never signed before the signing window closed.
    FailedToSign,
    /// Registered but never confirmed before the confirmation window closed.
    FailedToConfirm,
}

impl Offense {
    /// Cheating offenses get the long ban window; disruption the short one.
    pub fn is_cheating(self) -> bool {
        matches!(self, Offense::OwnershipProofViolation | Offense::DoubleSpend)
    }
}

/// Typed protocol error returned to remote callers.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// No live round with that id.
    #[error("Round not found")]
    RoundNotFound,

    /// No such Alice in the round.
    #[error("Alice not found")]
    AliceNotFound,

    /// The operation is not valid in the round's current phase.
    #[error("Wrong phase: round is in {actual:?}")]
    WrongPhase {
        /// Phase the round is actually in.
        actual: Phase,
    },

    /// The round stopped accepting inputs.
    #[error("Input registration has ended")]
    InputRegistrationEnded,

    /// The round reached its input capacity.
    #[error("Round is full")]
    RoundFull,

    /// The outpoint is already an input of a live round.
    #[error("Input already registered")]
    InputAlreadyRegistered,

    /// The outpoint is serving a ban sentence.
    #[error("Input banned until {until}")]
    InputBanned {
        /// End of the ban window.
        until: DateTime<Utc>,
    },

    /// The node does not know the outpoint as unspent.
    #[error("Input not found or already spent")]
    InputNotFound,

    /// Coinbase output without enough confirmations.
    #[error("Immature coinbase input")]
    InputImmature,

    /// The input is not on the blame round's whitelist.
    #[error("Input not whitelisted for this round")]
    InputNotWhitelisted,

    /// Ownership proof did not verify. Ban-worthy.
    #[error("Wrong ownership proof")]
    WrongOwnershipProof,

    /// The input cannot pay for its own spending cost.
    #[error("Uneconomical input")]
    UneconomicalInput,

    /// Value outside the round's allowed range.
    #[error("Amount out of range [{min}, {max}]")]
    AmountOutOfRange {
        /// Smallest allowed value.
        min: Amount,
        /// Largest allowed value.
        max: Amount,
    },

    /// Claimed vsize does not fit the per-Alice budget.
    #[error("Vsize allocation exceeded")]
    VsizeAllocationExceeded,

    /// Script template not accepted by this round.
    #[error("Script type not allowed")]
    ScriptNotAllowed,

    /// Script already appears as an input or output somewhere live,
    /// or was used in the past.
    #[error("Script already used")]
    ScriptAlreadyUsed,

    /// The Alice already confirmed its connection.
    #[error("Connection already confirmed")]
    AlreadyConfirmed,

    /// The client's requested credential delta does not match the
    /// coordinator's own arithmetic.
    #[error("Credential delta mismatch: expected {expected}, requested {requested}")]
    CredentialDeltaMismatch {
        /// Delta recomputed from the coordinator's ledger.
        expected: i64,
        /// Delta the client asked for.
        requested: i64,
    },

    /// Reissuance must not change total credential value.
    #[error("Reissuance delta must be zero")]
    DeltaNotZero,

    /// Output registration must redeem a positive credential amount.
    #[error("No credential value redeemed")]
    NothingRedeemed,

    /// Input index outside the transaction.
    #[error("Witness index out of range")]
    WitnessOutOfRange,

    /// Input is already signed.
    #[error("Witness already provided")]
    WitnessAlreadyProvided,

    /// Witness carries no signature material.
    #[error("Invalid witness")]
    InvalidWitness,

    /// The credential issuer rejected the request.
    #[error("Credential issuance failed: {0}")]
    Credential(String),

    /// Coordinator-side failure surfaced to the caller.
    #[error("Coordinator backend failure: {0}")]
    Backend(String),
}

impl ProtocolError {
    /// The offense this rejection evidences, if it is ban-worthy on its own.
    ///
    /// Double-spend and timeout offenses are detected by the stepping code,
    /// not by handler rejections, so only the proof violation maps here.
    pub fn offense(&self) -> Option<Offense> {
        match self {
            ProtocolError::WrongOwnershipProof => Some(Offense::OwnershipProofViolation),
            _ => None,
        }
    }
}
