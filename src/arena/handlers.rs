//! Remote-Call Handlers
//!
//! The coordinator's remote-callable surface. Every handler validates
//! against current state under the coordinator lock and commits in a
//! single await-free section, so a cancelled call is always either fully
//! applied or not applied at all.
//!
//! Input registration pre-computes its credential responses outside the
//! lock (the node lookup and zero-credential issuance need no shared
//! state) and re-validates before committing. Handlers that move real
//! credential value keep the lock across issuance so the issuer's ledger
//! and the round state move together.

use tokio::time::Instant;
use tracing::{debug, info};

use crate::arena::events::RoundEvent;
use crate::arena::requests::{
    ConnectionConfirmationRequest, ConnectionConfirmationResponse, InputRegistrationRequest,
    InputRegistrationResponse, OutputRegistrationRequest, OutputRegistrationResponse,
    ReissuanceRequest, ReissuanceResponse, SignTransactionRequest, StatusRequest,
};
use crate::arena::status::StatusResponse;
use crate::arena::{Arena, ArenaState};
use crate::core::coin::Coin;
use crate::core::units::Amount;
use crate::error::ProtocolError;
use crate::infra::credentials::{
    CredentialError, CredentialKind, CredentialRequest, CredentialResponse,
};
use crate::round::alice::{Alice, AliceId};
use crate::round::bob::Bob;
use crate::round::phase::{EndRoundState, Phase};
use crate::round::round::{Round, RoundId};

impl ArenaState {
    fn round(&self, id: &RoundId) -> Result<&Round, ProtocolError> {
        self.rounds.get(id).ok_or(ProtocolError::RoundNotFound)
    }

    fn round_mut(&mut self, id: &RoundId) -> Result<&mut Round, ProtocolError> {
        self.rounds.get_mut(id).ok_or(ProtocolError::RoundNotFound)
    }
}

fn credential_error(err: CredentialError) -> ProtocolError {
    ProtocolError::Credential(err.to_string())
}

/// Zero-credential requests must not move value.
fn ensure_zero_delta(request: &CredentialRequest) -> Result<(), ProtocolError> {
    if request.delta != 0 {
        return Err(ProtocolError::CredentialDeltaMismatch {
            expected: 0,
            requested: request.delta,
        });
    }
    Ok(())
}

impl Arena {
    // =========================================================================
    // INPUT REGISTRATION
    // =========================================================================

    /// Register a coin into a round, issuing zero-value credentials.
    pub async fn register_input(
        &self,
        request: InputRegistrationRequest,
    ) -> Result<InputRegistrationResponse, ProtocolError> {
        let now = Instant::now();

        // Node lookup needs no round state
        let utxo = self.rpc.get_utxo(&request.outpoint).await
            .map_err(|e| ProtocolError::Backend(e.to_string()))?
            .ok_or(ProtocolError::InputNotFound)?;
        if utxo.is_coinbase && utxo.confirmations < 101 {
            return Err(ProtocolError::InputImmature);
        }
        let coin = utxo.into_coin(request.outpoint);

        ensure_zero_delta(&request.zero_amount)?;
        ensure_zero_delta(&request.zero_vsize)?;

        // First lock: full validation, including the ban-on-proof-failure path
        {
            let mut state = self.state.lock().await;
            let result = self.validate_input_registration(&mut state, &request, &coin, now);
            drop(state);
            if let Err(err) = result {
                self.publish_pending().await;
                return Err(err);
            }
        }

        // Credential pre-computation outside the lock
        let amount_credentials = self.issuer
            .issue(request.round_id, CredentialKind::Amount, &request.zero_amount)
            .await
            .map_err(credential_error)?;
        let vsize_credentials = self.issuer
            .issue(request.round_id, CredentialKind::Vsize, &request.zero_vsize)
            .await
            .map_err(credential_error)?;

        // Second, short lock: re-validate and commit
        let alice_id = {
            let mut state = self.state.lock().await;
            let commit_now = Instant::now();
            let result = self.validate_input_registration(&mut state, &request, &coin, commit_now);
            if let Err(err) = result {
                drop(state);
                self.publish_pending().await;
                return Err(err);
            }
            let round = state.round_mut(&request.round_id)?;
            let deadline = commit_now + round.params.connection_confirmation_deadline;
            let alice = Alice::new(coin, request.ownership_proof.clone(), deadline);
            let alice_id = alice.id;
            round.alices.insert(alice_id, alice);
            round.touch();
            alice_id
        };

        debug!(round_id = %request.round_id, %alice_id, outpoint = %request.outpoint, "input registered");
        Ok(InputRegistrationResponse { alice_id, amount_credentials, vsize_credentials })
    }

    /// Preconditions for input registration, checked in order. Proof
    /// failure punishes the outpoint before rejecting.
    fn validate_input_registration(
        &self,
        state: &mut ArenaState,
        request: &InputRegistrationRequest,
        coin: &Coin,
        now: Instant,
    ) -> Result<(), ProtocolError> {
        {
            let round = state.round(&request.round_id)?;
            if round.is_ended() {
                return Err(ProtocolError::WrongPhase { actual: Phase::Ended });
            }
            if round.phase() != Phase::InputRegistration || round.phase_frame.has_expired(now) {
                return Err(ProtocolError::InputRegistrationEnded);
            }
            if round.alices.len() >= round.params.max_input_count {
                return Err(ProtocolError::RoundFull);
            }
            if !round.allows_outpoint(&request.outpoint) {
                return Err(ProtocolError::InputNotWhitelisted);
            }
            if state.outpoint_registered(&request.outpoint) {
                return Err(ProtocolError::InputAlreadyRegistered);
            }
            if let Some(sentence) = self.prison.sentence(&request.outpoint, now) {
                return Err(ProtocolError::InputBanned { until: sentence.until_utc });
            }
            if request.ownership_proof.verify(&coin.script, &round.id.0) {
                let kind = coin.script.kind().ok_or(ProtocolError::ScriptNotAllowed)?;
                if !round.params.allows_input_kind(kind) {
                    return Err(ProtocolError::ScriptNotAllowed);
                }
                if !round.params.allowed_input_amounts.contains(coin.value) {
                    return Err(ProtocolError::AmountOutOfRange {
                        min: round.params.allowed_input_amounts.min,
                        max: round.params.allowed_input_amounts.max,
                    });
                }
                let fee = round.params.mining_fee_rate.fee(kind.input_vsize());
                if coin.value.checked_sub(fee).unwrap_or_default() == Amount::ZERO {
                    return Err(ProtocolError::UneconomicalInput);
                }
                if kind.input_vsize() > round.params.max_vsize_allocation_per_alice {
                    return Err(ProtocolError::VsizeAllocationExceeded);
                }
                return Ok(());
            }
        }

        // Proof failure is evidenced misbehavior, not a mere rejection
        let err = ProtocolError::WrongOwnershipProof;
        if let Some(offense) = err.offense() {
            self.prison.punish(request.outpoint, offense, request.round_id, now);
            state.push_event(RoundEvent::InputBanned {
                id: request.round_id,
                outpoint: request.outpoint,
                offense,
            });
        }
        Err(err)
    }

    // =========================================================================
    // CONNECTION CONFIRMATION
    // =========================================================================

    /// Re-issue zero credentials during input registration; during
    /// connection confirmation additionally issue the real credentials and
    /// mark the Alice confirmed.
    pub async fn confirm_connection(
        &self,
        request: ConnectionConfirmationRequest,
    ) -> Result<ConnectionConfirmationResponse, ProtocolError> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let state = &mut *state;

        ensure_zero_delta(&request.zero_amount)?;
        ensure_zero_delta(&request.zero_vsize)?;

        let (phase, expected_amount, expected_vsize, coin) = {
            let round = state.round(&request.round_id)?;
            let phase = round.phase();
            if !matches!(phase, Phase::InputRegistration | Phase::ConnectionConfirmation) {
                return Err(ProtocolError::WrongPhase { actual: phase });
            }
            let alice = round.alices.get(&request.alice_id).ok_or(ProtocolError::AliceNotFound)?;
            if alice.confirmed {
                return Err(ProtocolError::AlreadyConfirmed);
            }
            let expected_amount = alice
                .net_value(round.params.mining_fee_rate, round.params.coordination_fee_rate)
                .ok_or(ProtocolError::UneconomicalInput)?;
            let expected_vsize = alice
                .remaining_vsize(round.params.max_vsize_allocation_per_alice)
                .ok_or(ProtocolError::VsizeAllocationExceeded)?;
            (phase, expected_amount, expected_vsize, alice.coin.clone())
        };

        let zero_amount_credentials = self.issuer
            .issue(request.round_id, CredentialKind::Amount, &request.zero_amount)
            .await
            .map_err(credential_error)?;
        let zero_vsize_credentials = self.issuer
            .issue(request.round_id, CredentialKind::Vsize, &request.zero_vsize)
            .await
            .map_err(credential_error)?;

        if phase == Phase::InputRegistration {
            // Only a keep-alive: refresh the confirmation deadline
            let round = state.round_mut(&request.round_id)?;
            let deadline = now + round.params.connection_confirmation_deadline;
            if let Some(alice) = round.alices.get_mut(&request.alice_id) {
                alice.deadline = deadline;
            }
            round.touch();
            return Ok(ConnectionConfirmationResponse {
                zero_amount_credentials,
                zero_vsize_credentials,
                real_amount_credentials: None,
                real_vsize_credentials: None,
            });
        }

        // The client's requested deltas must match our own arithmetic exactly
        if request.real_amount.delta != expected_amount.to_sat() as i64 {
            return Err(ProtocolError::CredentialDeltaMismatch {
                expected: expected_amount.to_sat() as i64,
                requested: request.real_amount.delta,
            });
        }
        if request.real_vsize.delta != expected_vsize as i64 {
            return Err(ProtocolError::CredentialDeltaMismatch {
                expected: expected_vsize as i64,
                requested: request.real_vsize.delta,
            });
        }

        let real_amount_credentials = self.issuer
            .issue(request.round_id, CredentialKind::Amount, &request.real_amount)
            .await
            .map_err(credential_error)?;
        let real_vsize_credentials = match self.issuer
            .issue(request.round_id, CredentialKind::Vsize, &request.real_vsize)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                // Unwind the amount issuance so the ledger stays exact
                self.revert_issuance(
                    request.round_id,
                    CredentialKind::Amount,
                    real_amount_credentials,
                    request.real_amount.delta,
                ).await;
                return Err(credential_error(err));
            }
        };

        let round = state.round_mut(&request.round_id)?;
        if let Some(alice) = round.alices.get_mut(&request.alice_id) {
            alice.confirmed = true;
        }
        if let Some(construction) = round.construction_mut() {
            construction.add_input(&coin);
        }
        round.touch();
        info!(round_id = %request.round_id, alice_id = %request.alice_id, "connection confirmed");

        Ok(ConnectionConfirmationResponse {
            zero_amount_credentials,
            zero_vsize_credentials,
            real_amount_credentials: Some(real_amount_credentials),
            real_vsize_credentials: Some(real_vsize_credentials),
        })
    }

    // =========================================================================
    // OUTPUT REGISTRATION
    // =========================================================================

    /// Redeem credentials into a fresh output.
    pub async fn register_output(
        &self,
        request: OutputRegistrationRequest,
    ) -> Result<OutputRegistrationResponse, ProtocolError> {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let credential_amount = {
            let round = state.round(&request.round_id)?;
            if round.phase() != Phase::OutputRegistration {
                return Err(ProtocolError::WrongPhase { actual: round.phase() });
            }
            let kind = request.script.kind().ok_or(ProtocolError::ScriptNotAllowed)?;
            if !round.params.allows_output_kind(kind) {
                return Err(ProtocolError::ScriptNotAllowed);
            }
            if self.used_scripts.contains(&request.script) || state.script_in_use(&request.script) {
                return Err(ProtocolError::ScriptAlreadyUsed);
            }

            let credential_amount = request.amount.delta
                .checked_neg()
                .filter(|v| *v > 0)
                .ok_or(ProtocolError::NothingRedeemed)?;

            let expected_vsize_delta = -(kind.output_vsize() as i64);
            if request.vsize.delta != expected_vsize_delta {
                return Err(ProtocolError::CredentialDeltaMismatch {
                    expected: expected_vsize_delta,
                    requested: request.vsize.delta,
                });
            }
            credential_amount as u64
        };

        let bob = Bob::new(request.script.clone(), Amount::from_sat(credential_amount));
        let (range, rate) = {
            let round = state.round(&request.round_id)?;
            (round.params.allowed_output_amounts, round.params.mining_fee_rate)
        };
        let output_value = bob.output_value(rate)
            .filter(|v| range.contains(*v))
            .ok_or(ProtocolError::AmountOutOfRange { min: range.min, max: range.max })?;

        let amount_credentials = self.issuer
            .issue(request.round_id, CredentialKind::Amount, &request.amount)
            .await
            .map_err(credential_error)?;
        let vsize_credentials = match self.issuer
            .issue(request.round_id, CredentialKind::Vsize, &request.vsize)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                self.revert_issuance(
                    request.round_id,
                    CredentialKind::Amount,
                    amount_credentials,
                    request.amount.delta,
                ).await;
                return Err(credential_error(err));
            }
        };

        let round = state.round_mut(&request.round_id)?;
        if let Some(construction) = round.construction_mut() {
            construction.add_output(request.script.clone(), output_value);
        }
        round.bobs.push(bob);
        round.touch();
        self.used_scripts.insert(request.script.clone());
        debug!(round_id = %request.round_id, script = %request.script, value = %output_value, "output registered");

        Ok(OutputRegistrationResponse { amount_credentials, vsize_credentials })
    }

    // =========================================================================
    // SIGNING AND READINESS
    // =========================================================================

    /// Signal that an Alice will sign as soon as the transaction freezes.
    pub async fn ready_to_sign(
        &self,
        round_id: RoundId,
        alice_id: AliceId,
    ) -> Result<(), ProtocolError> {
        let mut state = self.state.lock().await;
        let round = state.round_mut(&round_id)?;
        if round.phase() != Phase::OutputRegistration {
            return Err(ProtocolError::WrongPhase { actual: round.phase() });
        }
        let alice = round.alices.get_mut(&alice_id).ok_or(ProtocolError::AliceNotFound)?;
        alice.ready_to_sign = true;
        round.touch();
        debug!(round_id = %round_id, %alice_id, "ready to sign");
        Ok(())
    }

    /// Apply a witness to one input of the frozen coinjoin.
    pub async fn sign_transaction(
        &self,
        request: SignTransactionRequest,
    ) -> Result<(), ProtocolError> {
        let mut state = self.state.lock().await;
        let round = state.round_mut(&request.round_id)?;
        if round.phase() != Phase::TransactionSigning {
            return Err(ProtocolError::WrongPhase { actual: round.phase() });
        }
        let signing = round.signing_mut()
            .ok_or_else(|| ProtocolError::Backend("signing state missing".into()))?;
        signing.add_witness(request.input_index, request.witness)?;
        round.touch();
        debug!(round_id = %request.round_id, index = request.input_index, "witness applied");
        Ok(())
    }

    /// Voluntary withdrawal, permitted only before confirmation.
    pub async fn remove_input(
        &self,
        round_id: RoundId,
        alice_id: AliceId,
    ) -> Result<(), ProtocolError> {
        {
            let mut state = self.state.lock().await;
            let state = &mut *state;
            let round = state.rounds.get_mut(&round_id).ok_or(ProtocolError::RoundNotFound)?;
            if round.phase() != Phase::InputRegistration {
                return Err(ProtocolError::WrongPhase { actual: round.phase() });
            }
            let alice = round.alices.get(&alice_id).ok_or(ProtocolError::AliceNotFound)?;
            if alice.confirmed {
                return Err(ProtocolError::AlreadyConfirmed);
            }
            let outpoint = alice.coin.outpoint;
            round.alices.remove(&alice_id);
            round.touch();
            state.pending_events.push(RoundEvent::InputRemoved { id: round_id, outpoint });
            debug!(round_id = %round_id, %alice_id, "input removed");
        }
        self.publish_pending().await;
        Ok(())
    }

    // =========================================================================
    // REISSUANCE
    // =========================================================================

    /// Split or merge credential denominations; the net delta must be zero.
    pub async fn reissuance(
        &self,
        request: ReissuanceRequest,
    ) -> Result<ReissuanceResponse, ProtocolError> {
        let state = self.state.lock().await;
        {
            let round = state.round(&request.round_id)?;
            if !matches!(
                round.phase(),
                Phase::ConnectionConfirmation | Phase::OutputRegistration
            ) {
                return Err(ProtocolError::WrongPhase { actual: round.phase() });
            }
        }
        if request.amount.delta != 0 || request.vsize.delta != 0 {
            return Err(ProtocolError::DeltaNotZero);
        }

        let amount_credentials = self.issuer
            .issue(request.round_id, CredentialKind::Amount, &request.amount)
            .await
            .map_err(credential_error)?;
        let vsize_credentials = self.issuer
            .issue(request.round_id, CredentialKind::Vsize, &request.vsize)
            .await
            .map_err(credential_error)?;

        Ok(ReissuanceResponse { amount_credentials, vsize_credentials })
    }

    // =========================================================================
    // STATUS AND DISRUPTION
    // =========================================================================

    /// Serve the published snapshot set; rounds unchanged since a caller
    /// checkpoint are elided. Never takes the coordinator lock.
    pub fn get_status(&self, request: &StatusRequest) -> StatusResponse {
        let snapshot = self.snapshot_tx.borrow().clone();
        let rounds = snapshot.iter()
            .filter(|round| {
                !request.checkpoints.iter().any(|checkpoint| {
                    checkpoint.round_id == round.id && checkpoint.state_id >= round.state_id
                })
            })
            .cloned()
            .collect();
        StatusResponse { rounds }
    }

    /// Mark a round for immediate abort on the next step (double-spend
    /// watchers and similar external detectors).
    pub async fn flag_disruption(
        &self,
        round_id: RoundId,
        end_state: EndRoundState,
    ) -> Result<(), ProtocolError> {
        let mut state = self.state.lock().await;
        let round = state.round_mut(&round_id)?;
        if round.is_ended() {
            return Err(ProtocolError::WrongPhase { actual: Phase::Ended });
        }
        round.flagged_end = Some(end_state);
        Ok(())
    }

    /// Compensate a committed issuance whose sibling failed.
    async fn revert_issuance(
        &self,
        round_id: RoundId,
        kind: CredentialKind,
        response: CredentialResponse,
        delta: i64,
    ) {
        let request = CredentialRequest {
            presented: response.issued,
            requested: vec![0],
            delta: -delta,
        };
        if let Err(err) = self.issuer.issue(round_id, kind, &request).await {
            tracing::error!(%round_id, ?kind, %err, "credential revert failed, ledger drift");
        }
    }
}
