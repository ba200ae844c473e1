//! Round Snapshots
//!
//! Immutable, versioned per-round state for polling clients. A snapshot
//! set is published after every orchestrator step; `get_status` serves it
//! without touching the coordinator lock. Clients diff against the
//! `state_id` they last saw.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::units::Amount;
use crate::round::construction::{TxIn, TxOut};
use crate::round::params::RoundParameters;
use crate::round::phase::{EndRoundState, Phase};
use crate::round::round::{Round, RoundId, RoundKind};

/// The frozen transaction as signers see it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnsignedTxSnapshot {
    /// Inputs in canonical order; signers locate their index here.
    pub inputs: Vec<TxIn>,
    /// Outputs in canonical order, coordinator fee output included.
    pub outputs: Vec<TxOut>,
}

/// Client-facing view of one round.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    /// Round identity.
    pub id: RoundId,
    /// Snapshot version; grows with every observable mutation.
    pub state_id: u64,
    /// Current phase.
    pub phase: Phase,
    /// Terminal outcome, `None` discriminant while live.
    pub end_state: EndRoundState,
    /// The failed round this continues, for blame rounds.
    pub blame_of: Option<RoundId>,
    /// Everything a client needs to build conforming requests.
    pub params: RoundParameters,
    /// Advertised maximum input amount.
    pub max_suggested_amount: Amount,
    /// Registered input count.
    pub input_count: usize,
    /// Registered output count.
    pub output_count: usize,
    /// When the current phase times out.
    pub phase_deadline: DateTime<Utc>,
    /// When the round was created.
    pub created_at: DateTime<Utc>,
    /// The frozen transaction, present from the signing phase on.
    pub unsigned_tx: Option<UnsignedTxSnapshot>,
}

impl RoundSnapshot {
    /// Capture a round.
    pub fn from_round(round: &Round) -> Self {
        Self {
            id: round.id,
            state_id: round.state_id(),
            phase: round.phase(),
            end_state: round.end_state(),
            blame_of: match &round.kind {
                RoundKind::Default => None,
                RoundKind::Blame { blame_of, .. } => Some(*blame_of),
            },
            params: round.params.clone(),
            max_suggested_amount: round.params.max_suggested_amount,
            input_count: round.alices.len(),
            output_count: round.bobs.len(),
            phase_deadline: round.phase_deadline_utc,
            created_at: round.created_at_utc,
            unsigned_tx: round.signing().map(|signing| UnsignedTxSnapshot {
                inputs: signing.inputs.clone(),
                outputs: signing.outputs.clone(),
            }),
        }
    }
}

/// Response to a status poll.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Snapshots of rounds new or changed since the caller's checkpoints.
    pub rounds: Vec<RoundSnapshot>,
}

impl StatusResponse {
    /// Compact wire encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        bincode::serialize(self).unwrap_or_default()
    }

    /// Decode a compact wire encoding.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bincode::deserialize(bytes).ok()
    }
}
