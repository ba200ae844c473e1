//! Orchestrator scenario tests.
//!
//! Timer-driven scenarios run under paused tokio time: tests advance the
//! clock explicitly and drive maintenance passes with `Arena::step`, the
//! same entry point the background loop uses.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{advance, Instant};

use super::*;
use crate::arena::requests::{
    ConnectionConfirmationRequest, InputRegistrationRequest, OutputRegistrationRequest,
    RoundCheckpoint, SignTransactionRequest, StatusRequest,
};
use crate::arena::status::{RoundSnapshot, StatusResponse};
use crate::core::coin::{OwnershipProof, Txid, Witness};
use crate::error::ProtocolError;
use crate::infra::credentials::{CredentialKind, CredentialRequest, CredentialResponse, InProcessIssuer};
use crate::infra::prison::Prison;
use crate::infra::rpc::MemoryRpc;
use crate::infra::scripts::UsedScripts;
use crate::round::alice::AliceId;

const FEE_RATE: FeeRate = FeeRate::from_sat_per_vb(2);

fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        min_input_count: 2,
        max_input_count: 4,
        min_blame_input_count: 2,
        target_registrable_round_count: 1,
        standard_input_registration_timeout: Duration::from_secs(20),
        blame_input_registration_timeout: Duration::from_secs(8),
        connection_confirmation_timeout: Duration::from_secs(10),
        output_registration_timeout: Duration::from_secs(10),
        transaction_signing_timeout: Duration::from_secs(10),
        fail_fast_signing_timeout: Duration::from_secs(4),
        // Past the registration window, so idle Alices survive to the
        // registration close without keep-alive confirmations
        connection_confirmation_deadline: Duration::from_secs(30),
        round_expiry_timeout: Duration::from_secs(60),
        ..CoordinatorConfig::default()
    }
}

struct TestBed {
    arena: Arena,
    rpc: Arc<MemoryRpc>,
    prison: Arc<Prison>,
    issuer: Arc<InProcessIssuer>,
}

fn bed_with(config: CoordinatorConfig) -> TestBed {
    let rpc = Arc::new(MemoryRpc::new(FEE_RATE));
    let prison = Arc::new(Prison::from_config(&config));
    let used_scripts = Arc::new(UsedScripts::new());
    let issuer = Arc::new(InProcessIssuer::new(b"arena-tests"));
    let arena = Arena::new(config, rpc.clone(), prison.clone(), used_scripts, issuer.clone());
    TestBed { arena, rpc, prison, issuer }
}

fn bed() -> TestBed {
    bed_with(test_config())
}

/// One simulated participant.
struct Member {
    outpoint: OutPoint,
    value: Amount,
    input_script: ScriptPubkey,
    output_script: ScriptPubkey,
    alice_id: Option<AliceId>,
    amount_credentials: Option<CredentialResponse>,
    vsize_credentials: Option<CredentialResponse>,
}

fn member(tag: u8, value: u64) -> Member {
    Member {
        outpoint: OutPoint::new(Txid([tag; 32]), 0),
        value: Amount::from_sat(value),
        input_script: ScriptPubkey::p2wpkh([tag; 20]),
        output_script: ScriptPubkey::p2wpkh([tag + 100; 20]),
        alice_id: None,
        amount_credentials: None,
        vsize_credentials: None,
    }
}

impl TestBed {
    async fn registrable_round(&self) -> RoundSnapshot {
        self.arena.get_status(&StatusRequest::default()).rounds
            .into_iter()
            .find(|r| r.phase == Phase::InputRegistration && r.end_state == EndRoundState::None)
            .expect("a registrable round")
    }

    async fn open_round(&self) -> RoundSnapshot {
        self.arena.step().await;
        self.registrable_round().await
    }

    fn snapshot_of(&self, id: &RoundId) -> Option<RoundSnapshot> {
        self.arena.get_status(&StatusRequest::default()).rounds
            .into_iter()
            .find(|r| r.id == *id)
    }

    async fn round_phase(&self, id: &RoundId) -> Phase {
        let state = self.arena.state.lock().await;
        state.rounds.get(id).map(|r| r.phase()).expect("round live")
    }

    async fn round_end_state(&self, id: &RoundId) -> EndRoundState {
        let state = self.arena.state.lock().await;
        state.rounds.get(id).map(|r| r.end_state()).expect("round live")
    }

    async fn register(&self, round: &RoundSnapshot, m: &mut Member) -> Result<(), ProtocolError> {
        self.rpc.add_utxo(m.outpoint, m.value, m.input_script.clone());
        let response = self.arena.register_input(InputRegistrationRequest {
            round_id: round.id,
            outpoint: m.outpoint,
            ownership_proof: OwnershipProof::create(&m.input_script, &round.id.0),
            zero_amount: CredentialRequest::zero(),
            zero_vsize: CredentialRequest::zero(),
        }).await?;
        m.alice_id = Some(response.alice_id);
        Ok(())
    }

    fn expected_net(&self, round: &RoundSnapshot, m: &Member) -> u64 {
        let input_fee = round.params.mining_fee_rate.fee(68).to_sat();
        let coordination_fee = round.params.coordination_fee_rate.fee(m.value).to_sat();
        m.value.to_sat() - input_fee - coordination_fee
    }

    async fn confirm(&self, round: &RoundSnapshot, m: &mut Member) -> Result<(), ProtocolError> {
        let net = self.expected_net(round, m);
        let budget = round.params.max_vsize_allocation_per_alice - 68;
        let response = self.arena.confirm_connection(ConnectionConfirmationRequest {
            round_id: round.id,
            alice_id: m.alice_id.expect("registered"),
            zero_amount: CredentialRequest::zero(),
            zero_vsize: CredentialRequest::zero(),
            real_amount: CredentialRequest::minting(vec![net], net as i64),
            real_vsize: CredentialRequest::minting(vec![budget], budget as i64),
        }).await?;
        m.amount_credentials = response.real_amount_credentials;
        m.vsize_credentials = response.real_vsize_credentials;
        Ok(())
    }

    async fn register_output(&self, round: &RoundSnapshot, m: &Member) -> Result<(), ProtocolError> {
        let amount_creds = m.amount_credentials.clone().expect("confirmed");
        let vsize_creds = m.vsize_credentials.clone().expect("confirmed");
        let net: i64 = amount_creds.issued.iter().map(|c| c.value as i64).sum();
        let budget: i64 = vsize_creds.issued.iter().map(|c| c.value as i64).sum();
        self.arena.register_output(OutputRegistrationRequest {
            round_id: round.id,
            script: m.output_script.clone(),
            amount: CredentialRequest {
                presented: amount_creds.issued,
                requested: vec![0],
                delta: -net,
            },
            vsize: CredentialRequest {
                presented: vsize_creds.issued,
                requested: vec![(budget - 31) as u64],
                delta: -31,
            },
        }).await?;
        Ok(())
    }

    async fn sign(&self, round_id: RoundId, m: &Member) -> Result<(), ProtocolError> {
        let snapshot = self.snapshot_of(&round_id).expect("round live");
        let unsigned = snapshot.unsigned_tx.expect("frozen transaction");
        let index = unsigned.inputs.iter()
            .position(|i| i.outpoint == m.outpoint)
            .expect("own input present");
        self.arena.sign_transaction(SignTransactionRequest {
            round_id,
            input_index: index,
            witness: Witness(vec![0xaa; 72]),
        }).await
    }

    /// Walk members through registration and confirmation, leaving the
    /// round in OutputRegistration.
    async fn advance_to_outputs(&self, members: &mut [Member]) -> RoundSnapshot {
        let round = self.open_round().await;
        for m in members.iter_mut() {
            self.register(&round, m).await.expect("registration");
        }
        advance(Duration::from_secs(21)).await;
        self.arena.step().await;
        assert_eq!(self.round_phase(&round.id).await, Phase::ConnectionConfirmation);
        for m in members.iter_mut() {
            self.confirm(&round, m).await.expect("confirmation");
        }
        self.arena.step().await;
        assert_eq!(self.round_phase(&round.id).await, Phase::OutputRegistration);
        round
    }
}

fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<RoundEvent>) -> Vec<RoundEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// =============================================================================
// HAPPY PATH
// =============================================================================

#[tokio::test(start_paused = true)]
async fn two_alices_full_round_broadcasts_with_coordinator_fee() {
    let bed = bed();
    let mut members = [member(1, 5_000_000), member(2, 3_000_000)];
    let round = bed.advance_to_outputs(&mut members).await;

    for m in &members {
        bed.register_output(&round, m).await.expect("output registration");
        bed.arena.ready_to_sign(round.id, m.alice_id.expect("registered")).await.expect("ready");
    }
    bed.arena.step().await;
    assert_eq!(bed.round_phase(&round.id).await, Phase::TransactionSigning);

    for m in &members {
        bed.sign(round.id, m).await.expect("signing");
    }
    bed.arena.step().await;

    assert_eq!(bed.round_end_state(&round.id).await, EndRoundState::TransactionBroadcasted);
    let broadcasts = bed.rpc.broadcasts();
    assert_eq!(broadcasts.len(), 1);
    let tx = &broadcasts[0];

    // net_i = value - fee(68 vb) - 0.3% coordination; output_i = net_i - fee(31 vb)
    let out1 = 5_000_000 - 136 - 15_000 - 62;
    let out2 = 3_000_000 - 136 - 9_000 - 62;
    assert!(tx.outputs.iter().any(|o| o.value == Amount::from_sat(out1)));
    assert!(tx.outputs.iter().any(|o| o.value == Amount::from_sat(out2)));

    // Leftover balance lands in the coordinator output:
    // 24_396 balance - 418 mining fee (209 vb) - 62 own-output fee
    let coordinator_out = tx.outputs.iter()
        .find(|o| o.script == bed.arena.config.coordinator_script)
        .expect("coordinator fee output");
    assert_eq!(coordinator_out.value, Amount::from_sat(23_916));

    // The whole transaction pays exactly its own mining fee at the rate
    let in_sum: u64 = tx.inputs.iter().map(|i| i.value.to_sat()).sum();
    let out_sum: u64 = tx.outputs.iter().map(|o| o.value.to_sat()).sum();
    let vsize = 11 + 68 * tx.inputs.len() as u64 + 31 * tx.outputs.len() as u64;
    assert_eq!(in_sum - out_sum, FEE_RATE.fee(vsize).to_sat());
}

#[tokio::test(start_paused = true)]
async fn phase_never_decreases() {
    let bed = bed();
    let mut events_rx = bed.arena.subscribe_events();
    let mut members = [member(1, 5_000_000), member(2, 3_000_000)];
    let round = bed.advance_to_outputs(&mut members).await;
    for m in &members {
        bed.register_output(&round, m).await.expect("output registration");
        bed.arena.ready_to_sign(round.id, m.alice_id.expect("registered")).await.expect("ready");
    }
    bed.arena.step().await;
    for m in &members {
        bed.sign(round.id, m).await.expect("signing");
    }
    bed.arena.step().await;

    let mut last_phase = Phase::InputRegistration;
    for event in drain_events(&mut events_rx) {
        if let RoundEvent::PhaseChanged { id, phase } = event {
            if id == round.id {
                assert!(phase >= last_phase, "phase regressed: {last_phase:?} -> {phase:?}");
                last_phase = phase;
            }
        }
    }
    assert_eq!(last_phase, Phase::TransactionSigning);
}

// =============================================================================
// REGISTRATION PRECONDITIONS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn outpoint_is_unique_across_live_rounds() {
    let bed = bed_with(CoordinatorConfig {
        target_registrable_round_count: 2,
        ..test_config()
    });
    bed.arena.step().await;
    let rounds = bed.arena.get_status(&StatusRequest::default()).rounds;
    assert_eq!(rounds.len(), 2);

    let mut m = member(1, 500_000);
    bed.register(&rounds[0], &mut m).await.expect("first registration");

    let mut same_coin = member(1, 500_000);
    let err = bed.register(&rounds[1], &mut same_coin).await.unwrap_err();
    assert_eq!(err, ProtocolError::InputAlreadyRegistered);
}

#[tokio::test(start_paused = true)]
async fn banned_outpoint_is_rejected() {
    let bed = bed();
    let round = bed.open_round().await;
    let mut m = member(1, 500_000);
    bed.prison.punish(m.outpoint, Offense::DoubleSpend, round.id, Instant::now());

    let err = bed.register(&round, &mut m).await.unwrap_err();
    assert!(matches!(err, ProtocolError::InputBanned { .. }));
}

#[tokio::test(start_paused = true)]
async fn wrong_ownership_proof_is_banned() {
    let bed = bed();
    let round = bed.open_round().await;
    let m = member(1, 500_000);
    bed.rpc.add_utxo(m.outpoint, m.value, m.input_script.clone());

    let err = bed.arena.register_input(InputRegistrationRequest {
        round_id: round.id,
        outpoint: m.outpoint,
        // Proof bound to a different round id
        ownership_proof: OwnershipProof::create(&m.input_script, &[9; 32]),
        zero_amount: CredentialRequest::zero(),
        zero_vsize: CredentialRequest::zero(),
    }).await.unwrap_err();

    assert_eq!(err, ProtocolError::WrongOwnershipProof);
    assert!(bed.prison.is_banned(&m.outpoint, Instant::now()));
}

#[tokio::test(start_paused = true)]
async fn uneconomical_and_unknown_inputs_are_rejected_without_bans() {
    let bed = bed();
    let round = bed.open_round().await;

    // Unknown to the node
    let mut ghost = member(1, 500_000);
    let err = bed.arena.register_input(InputRegistrationRequest {
        round_id: round.id,
        outpoint: ghost.outpoint,
        ownership_proof: OwnershipProof::create(&ghost.input_script, &round.id.0),
        zero_amount: CredentialRequest::zero(),
        zero_vsize: CredentialRequest::zero(),
    }).await.unwrap_err();
    assert_eq!(err, ProtocolError::InputNotFound);

    // Present but too small to pay its own spend cost; amount range floor
    // is 5000 sat so this trips the range check first at default config
    ghost = member(2, 100);
    let err = bed.register(&round, &mut ghost).await.unwrap_err();
    assert!(matches!(err, ProtocolError::AmountOutOfRange { .. }));
    assert!(!bed.prison.is_banned(&ghost.outpoint, Instant::now()));
}

#[tokio::test(start_paused = true)]
async fn voluntary_removal_only_before_confirmation() {
    let bed = bed();
    let round = bed.open_round().await;
    let mut m1 = member(1, 500_000);
    let mut m2 = member(2, 500_000);
    bed.register(&round, &mut m1).await.expect("registration");
    bed.register(&round, &mut m2).await.expect("registration");

    bed.arena.remove_input(round.id, m1.alice_id.expect("registered")).await.expect("removal");
    bed.arena.step().await;
    assert_eq!(bed.snapshot_of(&round.id).unwrap().input_count, 1);

    // Removing the same Alice twice fails
    let err = bed.arena.remove_input(round.id, m1.alice_id.unwrap()).await.unwrap_err();
    assert_eq!(err, ProtocolError::AliceNotFound);

    // Re-register and move past input registration: removal is closed
    let mut m1 = member(1, 500_000);
    bed.register(&round, &mut m1).await.expect("re-registration");
    advance(Duration::from_secs(21)).await;
    bed.arena.step().await;
    assert_eq!(bed.round_phase(&round.id).await, Phase::ConnectionConfirmation);
    let err = bed.arena.remove_input(round.id, m2.alice_id.expect("registered")).await.unwrap_err();
    assert!(matches!(err, ProtocolError::WrongPhase { .. }));
}

// =============================================================================
// TIMEOUTS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn lone_unconfirmed_alice_is_removed_then_round_aborts() {
    // Deadline shorter than the registration window for this scenario
    let bed = bed_with(CoordinatorConfig {
        connection_confirmation_deadline: Duration::from_secs(15),
        ..test_config()
    });
    let round = bed.open_round().await;
    let mut m = member(1, 500_000);
    bed.register(&round, &mut m).await.expect("registration");

    // Connection-confirmation deadline (15 s) fires before the
    // registration window (20 s) closes
    advance(Duration::from_secs(16)).await;
    bed.arena.step().await;
    assert_eq!(bed.snapshot_of(&round.id).unwrap().input_count, 0);

    advance(Duration::from_secs(5)).await;
    bed.arena.step().await;
    assert_eq!(bed.round_end_state(&round.id).await, EndRoundState::AbortedNotEnoughInputs);
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_alice_is_banned_on_confirmation_timeout() {
    let bed = bed();
    let round = bed.open_round().await;
    let mut m1 = member(1, 5_000_000);
    let mut m2 = member(2, 3_000_000);
    bed.register(&round, &mut m1).await.expect("registration");
    bed.register(&round, &mut m2).await.expect("registration");

    advance(Duration::from_secs(21)).await;
    bed.arena.step().await;
    assert_eq!(bed.round_phase(&round.id).await, Phase::ConnectionConfirmation);

    // Only one confirms
    bed.confirm(&round, &mut m1).await.expect("confirmation");
    advance(Duration::from_secs(11)).await;
    bed.arena.step().await;

    assert!(bed.prison.is_banned(&m2.outpoint, Instant::now()));
    assert!(!bed.prison.is_banned(&m1.outpoint, Instant::now()));
    // One survivor is below min_input_count
    assert_eq!(bed.round_end_state(&round.id).await, EndRoundState::AbortedNotAllConfirmed);
}

#[tokio::test(start_paused = true)]
async fn all_ready_fast_paths_past_the_output_timer() {
    let bed = bed();
    let mut members = [member(1, 5_000_000), member(2, 3_000_000)];
    let round = bed.advance_to_outputs(&mut members).await;

    for m in &members {
        bed.register_output(&round, m).await.expect("output registration");
        bed.arena.ready_to_sign(round.id, m.alice_id.expect("registered")).await.expect("ready");
    }
    // No time has passed in the output phase: readiness alone advances it
    bed.arena.step().await;
    assert_eq!(bed.round_phase(&round.id).await, Phase::TransactionSigning);

    let state = bed.arena.state.lock().await;
    let live = state.rounds.get(&round.id).expect("round live");
    assert!(!live.fast_signing);
    assert_eq!(live.phase_frame.duration(), live.params.transaction_signing_timeout);
}

#[tokio::test(start_paused = true)]
async fn forced_output_timeout_shortens_signing() {
    let bed = bed();
    let mut members = [member(1, 5_000_000), member(2, 3_000_000)];
    let round = bed.advance_to_outputs(&mut members).await;

    for m in &members {
        bed.register_output(&round, m).await.expect("output registration");
    }
    // Nobody signals readiness; the timer forces the freeze
    advance(Duration::from_secs(11)).await;
    bed.arena.step().await;
    assert_eq!(bed.round_phase(&round.id).await, Phase::TransactionSigning);

    let state = bed.arena.state.lock().await;
    let live = state.rounds.get(&round.id).expect("round live");
    assert!(live.fast_signing);
    assert_eq!(live.phase_frame.duration(), live.params.fail_fast_signing_timeout);
}

// =============================================================================
// SIGNING FAILURES AND BLAME ROUNDS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn non_signer_is_banned_and_blame_round_spawns() {
    let bed = bed();
    let mut events_rx = bed.arena.subscribe_events();
    let mut members = [
        member(1, 5_000_000),
        member(2, 3_000_000),
        member(3, 2_000_000),
    ];
    let round = bed.advance_to_outputs(&mut members).await;
    for m in &members {
        bed.register_output(&round, m).await.expect("output registration");
        bed.arena.ready_to_sign(round.id, m.alice_id.expect("registered")).await.expect("ready");
    }
    bed.arena.step().await;

    // Member 3 never signs
    bed.sign(round.id, &members[0]).await.expect("signing");
    bed.sign(round.id, &members[1]).await.expect("signing");
    advance(Duration::from_secs(11)).await;
    bed.arena.step().await;

    assert_eq!(bed.round_end_state(&round.id).await, EndRoundState::NotAllSigned);
    assert!(bed.prison.is_banned(&members[2].outpoint, Instant::now()));

    // A blame round restricted to exactly the two signers exists
    let blame = drain_events(&mut events_rx).into_iter()
        .find_map(|event| match event {
            RoundEvent::RoundCreated { id, blame_of: Some(parent) } if parent == round.id => Some(id),
            _ => None,
        })
        .expect("blame round created");

    let state = bed.arena.state.lock().await;
    let blame_round = state.rounds.get(&blame).expect("blame round live");
    assert!(blame_round.is_blame());
    assert!(blame_round.allows_outpoint(&members[0].outpoint));
    assert!(blame_round.allows_outpoint(&members[1].outpoint));
    assert!(!blame_round.allows_outpoint(&members[2].outpoint));
    assert_eq!(
        blame_round.phase_frame.duration(),
        bed.arena.config.blame_input_registration_timeout
    );
    drop(state);

    // Whitelist is enforced at registration
    let mut outsider = member(9, 500_000);
    let blame_snapshot = bed.snapshot_of(&blame).expect("blame snapshot after next step");
    let err = bed.register(&blame_snapshot, &mut outsider).await.unwrap_err();
    assert_eq!(err, ProtocolError::InputNotWhitelisted);
}

#[tokio::test(start_paused = true)]
async fn too_few_signers_aborts_outright() {
    let bed = bed_with(CoordinatorConfig {
        min_blame_input_count: 2,
        ..test_config()
    });
    let mut members = [member(1, 5_000_000), member(2, 3_000_000)];
    let round = bed.advance_to_outputs(&mut members).await;
    for m in &members {
        bed.register_output(&round, m).await.expect("output registration");
        bed.arena.ready_to_sign(round.id, m.alice_id.expect("registered")).await.expect("ready");
    }
    bed.arena.step().await;

    // Only one of two signs: one survivor < min_blame_input_count
    bed.sign(round.id, &members[0]).await.expect("signing");
    advance(Duration::from_secs(11)).await;
    bed.arena.step().await;

    assert_eq!(bed.round_end_state(&round.id).await, EndRoundState::AbortedNotEnoughSigners);
}

#[tokio::test(start_paused = true)]
async fn broadcast_failure_is_a_distinct_outcome() {
    let bed = bed();
    let mut members = [member(1, 5_000_000), member(2, 3_000_000)];
    let round = bed.advance_to_outputs(&mut members).await;
    for m in &members {
        bed.register_output(&round, m).await.expect("output registration");
        bed.arena.ready_to_sign(round.id, m.alice_id.expect("registered")).await.expect("ready");
    }
    bed.arena.step().await;
    for m in &members {
        bed.sign(round.id, m).await.expect("signing");
    }

    bed.rpc.set_fail_broadcasts(true);
    bed.arena.step().await;
    assert_eq!(bed.round_end_state(&round.id).await, EndRoundState::TransactionBroadcastFailed);
}

// =============================================================================
// DOUBLE SPENDS AND DISRUPTION
// =============================================================================

#[tokio::test(start_paused = true)]
async fn spent_coin_is_banned_at_registration_close() {
    let bed = bed();
    let round = bed.open_round().await;
    let mut members = [
        member(1, 5_000_000),
        member(2, 3_000_000),
        member(3, 2_000_000),
    ];
    for m in &mut members {
        bed.register(&round, m).await.expect("registration");
    }

    // Member 3's coin is spent elsewhere before the window closes
    bed.rpc.mark_spent(&members[2].outpoint);
    advance(Duration::from_secs(21)).await;
    bed.arena.step().await;

    assert!(bed.prison.is_banned(&members[2].outpoint, Instant::now()));
    assert_eq!(bed.round_phase(&round.id).await, Phase::ConnectionConfirmation);
    assert_eq!(bed.snapshot_of(&round.id).unwrap().input_count, 2);
}

#[tokio::test(start_paused = true)]
async fn flagged_round_aborts_on_next_step() {
    let bed = bed();
    let round = bed.open_round().await;
    bed.arena
        .flag_disruption(round.id, EndRoundState::AbortedDoubleSpendDetected)
        .await
        .expect("flagging");
    bed.arena.step().await;
    assert_eq!(
        bed.round_end_state(&round.id).await,
        EndRoundState::AbortedDoubleSpendDetected
    );
}

#[tokio::test(start_paused = true)]
async fn ended_rounds_are_evicted_after_the_grace_period() {
    let bed = bed();
    let round = bed.open_round().await;
    bed.arena
        .flag_disruption(round.id, EndRoundState::AbortedDoubleSpendDetected)
        .await
        .expect("flagging");
    bed.arena.step().await;
    assert!(bed.snapshot_of(&round.id).is_some());

    advance(Duration::from_secs(61)).await;
    bed.arena.step().await;
    assert!(bed.snapshot_of(&round.id).is_none());
}

// =============================================================================
// CREDENTIALS AND CONSERVATION
// =============================================================================

#[tokio::test(start_paused = true)]
async fn credential_delta_mismatch_is_rejected() {
    let bed = bed();
    let round = bed.open_round().await;
    let mut m1 = member(1, 5_000_000);
    let mut m2 = member(2, 3_000_000);
    bed.register(&round, &mut m1).await.expect("registration");
    bed.register(&round, &mut m2).await.expect("registration");
    advance(Duration::from_secs(21)).await;
    bed.arena.step().await;

    // Claim one satoshi more than the ledger allows
    let net = bed.expected_net(&round, &m1) + 1;
    let budget = round.params.max_vsize_allocation_per_alice - 68;
    let err = bed.arena.confirm_connection(ConnectionConfirmationRequest {
        round_id: round.id,
        alice_id: m1.alice_id.expect("registered"),
        zero_amount: CredentialRequest::zero(),
        zero_vsize: CredentialRequest::zero(),
        real_amount: CredentialRequest::minting(vec![net], net as i64),
        real_vsize: CredentialRequest::minting(vec![budget], budget as i64),
    }).await.unwrap_err();
    assert!(matches!(err, ProtocolError::CredentialDeltaMismatch { .. }));

    // The honest delta still works, and double confirmation is refused
    bed.confirm(&round, &mut m1).await.expect("confirmation");
    let err = bed.confirm(&round, &mut m1).await.unwrap_err();
    assert_eq!(err, ProtocolError::AlreadyConfirmed);
}

#[tokio::test(start_paused = true)]
async fn outstanding_credit_equals_the_ledger() {
    let bed = bed();
    let mut members = [member(1, 5_000_000), member(2, 3_000_000)];
    let round = bed.advance_to_outputs(&mut members).await;

    // After confirmation: outstanding equals the sum of certified nets
    let expected: i128 = members.iter()
        .map(|m| bed.expected_net(&round, m) as i128)
        .sum();
    assert_eq!(bed.issuer.outstanding(round.id, CredentialKind::Amount), expected);

    // Redeeming both outputs returns the amount ledger to zero
    for m in &members {
        bed.register_output(&round, m).await.expect("output registration");
    }
    assert_eq!(bed.issuer.outstanding(round.id, CredentialKind::Amount), 0);
}

#[tokio::test(start_paused = true)]
async fn reissuance_requires_zero_net_delta() {
    let bed = bed();
    let mut members = [member(1, 5_000_000), member(2, 3_000_000)];
    let round = bed.advance_to_outputs(&mut members).await;

    let creds = members[0].amount_credentials.clone().expect("confirmed");
    let total: i64 = creds.issued.iter().map(|c| c.value as i64).sum();

    // Non-zero delta is rejected up front
    let err = bed.arena.reissuance(crate::arena::requests::ReissuanceRequest {
        round_id: round.id,
        amount: CredentialRequest {
            presented: creds.issued.clone(),
            requested: vec![total as u64 - 1],
            delta: -1,
        },
        vsize: CredentialRequest::zero(),
    }).await.unwrap_err();
    assert_eq!(err, ProtocolError::DeltaNotZero);

    // A value-preserving split succeeds
    let response = bed.arena.reissuance(crate::arena::requests::ReissuanceRequest {
        round_id: round.id,
        amount: CredentialRequest {
            presented: creds.issued,
            requested: vec![total as u64 / 2, total as u64 - total as u64 / 2],
            delta: 0,
        },
        vsize: CredentialRequest::zero(),
    }).await.expect("reissuance");
    assert_eq!(response.amount_credentials.issued.len(), 2);
}

// =============================================================================
// OUTPUT SCRIPT FRESHNESS
// =============================================================================

#[tokio::test(start_paused = true)]
async fn reused_scripts_are_rejected() {
    let bed = bed();
    let mut members = [member(1, 5_000_000), member(2, 3_000_000)];
    let round = bed.advance_to_outputs(&mut members).await;

    bed.register_output(&round, &members[0]).await.expect("output registration");

    // Same destination again
    let mut copycat = member(2, 3_000_000);
    copycat.output_script = members[0].output_script.clone();
    copycat.amount_credentials = members[1].amount_credentials.clone();
    copycat.vsize_credentials = members[1].vsize_credentials.clone();
    let err = bed.register_output(&round, &copycat).await.unwrap_err();
    assert_eq!(err, ProtocolError::ScriptAlreadyUsed);

    // A live round's *input* script is equally off limits
    let mut self_link = member(2, 3_000_000);
    self_link.output_script = members[0].input_script.clone();
    self_link.amount_credentials = members[1].amount_credentials.clone();
    self_link.vsize_credentials = members[1].vsize_credentials.clone();
    let err = bed.register_output(&round, &self_link).await.unwrap_err();
    assert_eq!(err, ProtocolError::ScriptAlreadyUsed);
}

// =============================================================================
// STATUS POLLING
// =============================================================================

#[tokio::test(start_paused = true)]
async fn checkpointed_polling_is_idempotent() {
    let bed = bed();
    let round = bed.open_round().await;

    // A checkpoint at the current state elides the round
    let current = bed.snapshot_of(&round.id).expect("snapshot");
    let response = bed.arena.get_status(&StatusRequest {
        checkpoints: vec![RoundCheckpoint { round_id: round.id, state_id: current.state_id }],
    });
    assert!(response.rounds.iter().all(|r| r.id != round.id));

    // A stale checkpoint returns the identical snapshot again
    let response = bed.arena.get_status(&StatusRequest {
        checkpoints: vec![RoundCheckpoint { round_id: round.id, state_id: current.state_id - 1 }],
    });
    let again = response.rounds.iter().find(|r| r.id == round.id).expect("round present");
    assert_eq!(*again, current);

    // Wire round trip preserves the snapshot exactly
    let encoded = StatusResponse { rounds: vec![current.clone()] }.to_bytes();
    let decoded = StatusResponse::from_bytes(&encoded).expect("decodable");
    assert_eq!(decoded.rounds[0], current);
}

// =============================================================================
// ROUND CREATION AND LOAD BALANCING
// =============================================================================

#[tokio::test(start_paused = true)]
async fn target_round_count_is_maintained() {
    let bed = bed_with(CoordinatorConfig {
        target_registrable_round_count: 2,
        ..test_config()
    });
    bed.arena.step().await;
    let rounds = bed.arena.get_status(&StatusRequest::default()).rounds;
    assert_eq!(rounds.len(), 2);

    // Kill one; the next step replaces it
    bed.arena
        .flag_disruption(rounds[0].id, EndRoundState::AbortedDoubleSpendDetected)
        .await
        .expect("flagging");
    bed.arena.step().await;
    bed.arena.step().await;
    let live = bed.arena.get_status(&StatusRequest::default()).rounds
        .into_iter()
        .filter(|r| r.phase == Phase::InputRegistration && r.end_state == EndRoundState::None)
        .count();
    assert_eq!(live, 2);
}

#[tokio::test(start_paused = true)]
async fn oversubscribed_round_splits_into_large_and_small() {
    let bed = bed_with(CoordinatorConfig {
        round_split_threshold: 3,
        max_input_count: 10,
        target_registrable_round_count: 1,
        ..test_config()
    });
    let round = bed.open_round().await;
    let mut members = [
        member(1, 5_000_000),
        member(2, 3_000_000),
        member(3, 2_000_000),
    ];
    for m in &mut members {
        bed.register(&round, m).await.expect("registration");
    }
    bed.arena.step().await;

    assert_eq!(bed.round_end_state(&round.id).await, EndRoundState::AbortedLoadBalancing);
    let fresh: Vec<RoundSnapshot> = bed.arena.get_status(&StatusRequest::default()).rounds
        .into_iter()
        .filter(|r| r.end_state == EndRoundState::None && r.phase == Phase::InputRegistration)
        .collect();
    assert_eq!(fresh.len(), 2);
    let config = &bed.arena.config;
    assert!(fresh.iter().any(|r| r.max_suggested_amount == config.max_suggested_base_amount));
    assert!(fresh.iter().any(|r| r.max_suggested_amount == config.max_registrable_amount));
}

#[tokio::test(start_paused = true)]
async fn round_id_mining_orders_before_a_high_pivot() {
    let bed = bed();
    let params = crate::round::params::RoundParameters::from_config(
        &bed.arena.config,
        FEE_RATE,
        Amount::from_sat(10_000_000),
    );
    let mut state = bed.arena.state.lock().await;
    let pivot = RoundId([0xff; 32]);
    let nonce = bed.arena.mine_nonce(&mut state, &params, Some(pivot));
    let id = RoundId::compute(&params, &bed.issuer.parameters_commitment(), nonce);
    assert!(id < pivot);
}
