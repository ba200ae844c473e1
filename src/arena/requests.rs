//! Remote-Call Payloads
//!
//! Request and response types for the coordinator's remote-callable
//! surface. The transport layer deserializes wire messages into these and
//! hands them to the orchestrator's handlers.

use serde::{Serialize, Deserialize};

use crate::core::coin::{OutPoint, OwnershipProof, ScriptPubkey, Witness};
use crate::infra::credentials::{CredentialRequest, CredentialResponse};
use crate::round::alice::AliceId;
use crate::round::round::RoundId;

/// Register one input into a round.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InputRegistrationRequest {
    /// Target round.
    pub round_id: RoundId,
    /// The coin being registered.
    pub outpoint: OutPoint,
    /// Proof of script control bound to the round.
    pub ownership_proof: OwnershipProof,
    /// Zero-value amount credential request.
    pub zero_amount: CredentialRequest,
    /// Zero-value vsize credential request.
    pub zero_vsize: CredentialRequest,
}

/// Result of input registration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InputRegistrationResponse {
    /// Handle for follow-up calls.
    pub alice_id: AliceId,
    /// Issued zero-value amount credentials.
    pub amount_credentials: CredentialResponse,
    /// Issued zero-value vsize credentials.
    pub vsize_credentials: CredentialResponse,
}

/// Confirm a registered input's connection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfirmationRequest {
    /// Target round.
    pub round_id: RoundId,
    /// The input being confirmed.
    pub alice_id: AliceId,
    /// Zero-value amount credential request.
    pub zero_amount: CredentialRequest,
    /// Zero-value vsize credential request.
    pub zero_vsize: CredentialRequest,
    /// Real amount credential request; delta must equal the input's
    /// remaining value as recomputed by the coordinator.
    pub real_amount: CredentialRequest,
    /// Real vsize credential request; delta must equal the input's
    /// remaining vsize budget.
    pub real_vsize: CredentialRequest,
}

/// Result of connection confirmation.
///
/// Real credentials are only present once the round reached the
/// connection-confirmation phase.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConnectionConfirmationResponse {
    /// Issued zero-value amount credentials.
    pub zero_amount_credentials: CredentialResponse,
    /// Issued zero-value vsize credentials.
    pub zero_vsize_credentials: CredentialResponse,
    /// Issued real amount credentials.
    pub real_amount_credentials: Option<CredentialResponse>,
    /// Issued real vsize credentials.
    pub real_vsize_credentials: Option<CredentialResponse>,
}

/// Register one output.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputRegistrationRequest {
    /// Target round.
    pub round_id: RoundId,
    /// Destination script.
    pub script: ScriptPubkey,
    /// Amount credentials being redeemed; delta is negative.
    pub amount: CredentialRequest,
    /// Vsize credentials being consumed; delta is negative.
    pub vsize: CredentialRequest,
}

/// Result of output registration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputRegistrationResponse {
    /// Change credentials from the amount presentation.
    pub amount_credentials: CredentialResponse,
    /// Change credentials from the vsize presentation.
    pub vsize_credentials: CredentialResponse,
}

/// Split or merge credential denominations without changing totals.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReissuanceRequest {
    /// Target round.
    pub round_id: RoundId,
    /// Amount reissuance; delta must be zero.
    pub amount: CredentialRequest,
    /// Vsize reissuance; delta must be zero.
    pub vsize: CredentialRequest,
}

/// Result of reissuance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReissuanceResponse {
    /// Reissued amount credentials.
    pub amount_credentials: CredentialResponse,
    /// Reissued vsize credentials.
    pub vsize_credentials: CredentialResponse,
}

/// Apply a witness to one input of the frozen coinjoin.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignTransactionRequest {
    /// Target round.
    pub round_id: RoundId,
    /// Index of the input in canonical order.
    pub input_index: usize,
    /// The witness.
    pub witness: Witness,
}

/// Checkpoint for delta polling: the last snapshot version seen.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RoundCheckpoint {
    /// The round.
    pub round_id: RoundId,
    /// Last `state_id` the client saw.
    pub state_id: u64,
}

/// Poll the live round set.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatusRequest {
    /// Per-round checkpoints; rounds unchanged since are elided.
    pub checkpoints: Vec<RoundCheckpoint>,
}
