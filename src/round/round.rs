//! Round State Machine
//!
//! One coordinated coinjoin batch. The identity is a hash over the frozen
//! parameter set plus the credential issuer's public parameters, so ids are
//! unguessable and survive coordinator restarts without a counter. Phase
//! only ever moves forward; a failed round is continued by a brand-new
//! blame round instead of regressing.

use std::collections::{BTreeMap, BTreeSet};
use std::time::SystemTime;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tokio::time::Instant;

use crate::core::coin::{OutPoint, ScriptPubkey};
use crate::core::hash::{Hash256, Hasher};
use crate::core::time_frame::TimeFrame;
use crate::round::alice::{Alice, AliceId};
use crate::round::bob::Bob;
use crate::round::construction::{ConstructionState, SigningState};
use crate::round::params::RoundParameters;
use crate::round::phase::{EndRoundState, Phase};

/// Round identifier: hash of the frozen parameters, the issuer's public
/// parameter commitment, and a creation nonce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoundId(pub Hash256);

impl RoundId {
    /// Derive the identity for a round about to be created.
    pub fn compute(params: &RoundParameters, issuer_commitment: &Hash256, nonce: u64) -> Self {
        let mut hasher = Hasher::for_round_id();
        hasher.update_u64(params.mining_fee_rate.sat_per_kvb);
        hasher.update_u64(params.coordination_fee_rate.rate_ppm);
        hasher.update_amount(params.coordination_fee_rate.plebs_dont_pay_threshold);
        hasher.update_amount(params.allowed_input_amounts.min);
        hasher.update_amount(params.allowed_input_amounts.max);
        hasher.update_amount(params.allowed_output_amounts.min);
        hasher.update_amount(params.allowed_output_amounts.max);
        hasher.update_u64(params.allowed_input_kinds.len() as u64);
        for kind in &params.allowed_input_kinds {
            hasher.update_u8(*kind as u8);
        }
        hasher.update_u64(params.allowed_output_kinds.len() as u64);
        for kind in &params.allowed_output_kinds {
            hasher.update_u8(*kind as u8);
        }
        hasher.update_u64(params.min_input_count as u64);
        hasher.update_u64(params.max_input_count as u64);
        hasher.update_amount(params.max_suggested_amount);
        hasher.update_duration(params.input_registration_timeout);
        hasher.update_duration(params.connection_confirmation_timeout);
        hasher.update_duration(params.output_registration_timeout);
        hasher.update_duration(params.transaction_signing_timeout);
        hasher.update_duration(params.fail_fast_signing_timeout);
        hasher.update_u64(params.max_vsize_allocation_per_alice);
        hasher.update_hash(issuer_commitment);
        hasher.update_u64(nonce);
        Self(hasher.finalize())
    }
}

impl std::fmt::Display for RoundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Standard round or blame continuation.
#[derive(Clone, Debug)]
pub enum RoundKind {
    /// A freshly created round, open to anyone.
    Default,
    /// Continuation of a failed round, restricted to a whitelist of
    /// outpoints that already proved good faith.
    Blame {
        /// The failed round this one continues.
        blame_of: RoundId,
        /// Outpoints allowed to register.
        whitelist: BTreeSet<OutPoint>,
    },
}

/// The round's transaction-construction state by phase.
#[derive(Clone, Debug)]
pub enum TxState {
    /// Inputs and outputs still accumulating.
    Constructing(ConstructionState),
    /// Frozen and collecting witnesses.
    Signing(SigningState),
}

/// One live round.
#[derive(Debug)]
pub struct Round {
    /// Immutable identity.
    pub id: RoundId,
    /// Frozen parameters.
    pub params: RoundParameters,
    /// Standard or blame.
    pub kind: RoundKind,
    /// Registered inputs (BTreeMap for deterministic iteration).
    pub alices: BTreeMap<AliceId, Alice>,
    /// Registered outputs.
    pub bobs: Vec<Bob>,
    /// In-progress transaction.
    pub tx: TxState,
    /// Timer of the current phase.
    pub phase_frame: TimeFrame,
    /// Client-facing deadline of the current phase.
    pub phase_deadline_utc: DateTime<Utc>,
    /// Creation instant.
    pub created_at: Instant,
    /// Client-facing creation time.
    pub created_at_utc: DateTime<Utc>,
    /// When the round ended, if it did.
    pub ended_at: Option<Instant>,
    /// Whether signing runs on the shortened fail-fast window.
    pub fast_signing: bool,
    /// Externally requested abort, applied on the next step.
    pub flagged_end: Option<EndRoundState>,
    phase: Phase,
    end_state: EndRoundState,
    state_id: u64,
}

impl Round {
    /// Create a round in input registration, its frame running from `now`.
    pub fn new(
        params: RoundParameters,
        issuer_commitment: &Hash256,
        nonce: u64,
        kind: RoundKind,
        now: Instant,
    ) -> Self {
        let id = RoundId::compute(&params, issuer_commitment, nonce);
        let timeout = params.input_registration_timeout;
        let construction = ConstructionState::new(params.mining_fee_rate);
        Self {
            id,
            params,
            kind,
            alices: BTreeMap::new(),
            bobs: Vec::new(),
            tx: TxState::Constructing(construction),
            phase_frame: TimeFrame::started(now, timeout),
            phase_deadline_utc: utc_after(timeout),
            created_at: now,
            created_at_utc: Utc::now(),
            ended_at: None,
            fast_signing: false,
            flagged_end: None,
            phase: Phase::InputRegistration,
            end_state: EndRoundState::None,
            state_id: 1,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Terminal outcome, `None` until ended.
    pub fn end_state(&self) -> EndRoundState {
        self.end_state
    }

    /// Snapshot version; bumped by every observable mutation.
    pub fn state_id(&self) -> u64 {
        self.state_id
    }

    /// Record an observable mutation.
    pub(crate) fn touch(&mut self) {
        self.state_id += 1;
    }

    /// Advance to `phase`, restarting the phase timer.
    ///
    /// Phase is monotonic; moving backwards is a coordinator bug.
    pub fn set_phase(&mut self, phase: Phase, now: Instant) {
        debug_assert!(phase >= self.phase, "phase may never decrease");
        let timeout = match phase {
            Phase::InputRegistration => self.params.input_registration_timeout,
            Phase::ConnectionConfirmation => self.params.connection_confirmation_timeout,
            Phase::OutputRegistration => self.params.output_registration_timeout,
            Phase::TransactionSigning if self.fast_signing => self.params.fail_fast_signing_timeout,
            Phase::TransactionSigning => self.params.transaction_signing_timeout,
            Phase::Ended => std::time::Duration::ZERO,
        };
        self.phase = phase;
        self.phase_frame = TimeFrame::started(now, timeout);
        self.phase_deadline_utc = utc_after(timeout);
        self.touch();
    }

    /// End the round with a terminal outcome.
    pub fn end(&mut self, state: EndRoundState, now: Instant) {
        self.phase = Phase::Ended;
        self.end_state = state;
        self.ended_at = Some(now);
        self.touch();
    }

    /// Whether the round is terminal.
    pub fn is_ended(&self) -> bool {
        self.phase == Phase::Ended
    }

    /// Whether the round still accepts new inputs.
    pub fn is_registrable(&self, now: Instant) -> bool {
        self.phase == Phase::InputRegistration
            && self.flagged_end.is_none()
            && !self.phase_frame.has_expired(now)
            && self.alices.len() < self.params.max_input_count
    }

    /// Whether this is a blame continuation.
    pub fn is_blame(&self) -> bool {
        matches!(self.kind, RoundKind::Blame { .. })
    }

    /// Whether `outpoint` may register here (blame whitelist check).
    pub fn allows_outpoint(&self, outpoint: &OutPoint) -> bool {
        match &self.kind {
            RoundKind::Default => true,
            RoundKind::Blame { whitelist, .. } => whitelist.contains(outpoint),
        }
    }

    /// Whether `outpoint` is already registered in this round.
    pub fn contains_outpoint(&self, outpoint: &OutPoint) -> bool {
        self.alices.values().any(|a| a.coin.outpoint == *outpoint)
    }

    /// Whether `script` appears as an input or output of this round.
    pub fn uses_script(&self, script: &ScriptPubkey) -> bool {
        self.alices.values().any(|a| a.coin.script == *script)
            || self.bobs.iter().any(|b| b.script == *script)
    }

    /// Mutable construction state; `None` once frozen for signing.
    pub fn construction_mut(&mut self) -> Option<&mut ConstructionState> {
        match &mut self.tx {
            TxState::Constructing(state) => Some(state),
            TxState::Signing(_) => None,
        }
    }

    /// Mutable signing state; `None` before the freeze.
    pub fn signing_mut(&mut self) -> Option<&mut SigningState> {
        match &mut self.tx {
            TxState::Constructing(_) => None,
            TxState::Signing(state) => Some(state),
        }
    }

    /// Signing state; `None` before the freeze.
    pub fn signing(&self) -> Option<&SigningState> {
        match &self.tx {
            TxState::Constructing(_) => None,
            TxState::Signing(state) => Some(state),
        }
    }
}

fn utc_after(duration: std::time::Duration) -> DateTime<Utc> {
    DateTime::<Utc>::from(SystemTime::now() + duration)
}
