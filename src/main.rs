//! Mixpool Coordinator
//!
//! Demo driver: runs the coordination engine against an in-memory node
//! and walks two simulated participants through one full round, from
//! input registration to broadcast.

use std::sync::Arc;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use mixpool::arena::requests::{
    ConnectionConfirmationRequest, InputRegistrationRequest, OutputRegistrationRequest,
    SignTransactionRequest, StatusRequest,
};
use mixpool::arena::status::RoundSnapshot;
use mixpool::core::coin::{OutPoint, OwnershipProof, ScriptPubkey, Txid, Witness};
use mixpool::infra::credentials::{CredentialRequest, CredentialResponse, InProcessIssuer};
use mixpool::infra::prison::Prison;
use mixpool::infra::rpc::MemoryRpc;
use mixpool::infra::scripts::UsedScripts;
use mixpool::{Amount, Arena, CoordinatorConfig, FeeRate, Phase, VERSION};

/// One simulated participant.
struct Participant {
    outpoint: OutPoint,
    value: Amount,
    input_script: ScriptPubkey,
    output_script: ScriptPubkey,
    alice_id: Option<mixpool::round::alice::AliceId>,
    amount_credentials: Option<CredentialResponse>,
    vsize_credentials: Option<CredentialResponse>,
}

impl Participant {
    fn new(tag: u8, value: u64) -> Self {
        Self {
            outpoint: OutPoint::new(Txid([tag; 32]), 0),
            value: Amount::from_sat(value),
            input_script: ScriptPubkey::p2wpkh([tag; 20]),
            output_script: ScriptPubkey::p2wpkh([tag + 100; 20]),
            alice_id: None,
            amount_credentials: None,
            vsize_credentials: None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("Mixpool Coordinator v{}", VERSION);

    // A small round so two participants fill it
    let config = CoordinatorConfig {
        min_input_count: 2,
        max_input_count: 2,
        target_registrable_round_count: 1,
        ..CoordinatorConfig::default()
    };

    let rpc = Arc::new(MemoryRpc::new(FeeRate::from_sat_per_vb(2)));
    let prison = Arc::new(Prison::from_config(&config));
    let used_scripts = Arc::new(UsedScripts::new());
    let issuer = Arc::new(InProcessIssuer::new(b"mixpool-demo"));
    let arena = Arena::new(config, rpc.clone(), prison, used_scripts, issuer);

    let mut participants = vec![
        Participant::new(1, 5_000_000),
        Participant::new(2, 3_000_000),
    ];
    for p in &participants {
        rpc.add_utxo(p.outpoint, p.value, p.input_script.clone());
    }

    // Open the round
    arena.step().await;
    let round = registrable_round(&arena).expect("a registrable round");
    info!(round_id = %round.id, max_suggested = %round.max_suggested_amount, "joining round");

    // === Input registration ===
    for p in &mut participants {
        let response = arena.register_input(InputRegistrationRequest {
            round_id: round.id,
            outpoint: p.outpoint,
            ownership_proof: OwnershipProof::create(&p.input_script, &round.id.0),
            zero_amount: CredentialRequest::zero(),
            zero_vsize: CredentialRequest::zero(),
        }).await?;
        info!(alice_id = %response.alice_id, "registered input");
        p.alice_id = Some(response.alice_id);
    }

    // Round is full: next step closes registration and starts confirmation
    arena.step().await;

    // === Connection confirmation ===
    let params = current_round(&arena, &round.id).params;
    for p in &mut participants {
        let input_fee = params.mining_fee_rate.fee(68);
        let coordination_fee = params.coordination_fee_rate.fee(p.value);
        let net = p.value.to_sat() - input_fee.to_sat() - coordination_fee.to_sat();
        let vsize_budget = params.max_vsize_allocation_per_alice - 68;

        let response = arena.confirm_connection(ConnectionConfirmationRequest {
            round_id: round.id,
            alice_id: p.alice_id.expect("registered"),
            zero_amount: CredentialRequest::zero(),
            zero_vsize: CredentialRequest::zero(),
            real_amount: CredentialRequest::minting(vec![net], net as i64),
            real_vsize: CredentialRequest::minting(vec![vsize_budget], vsize_budget as i64),
        }).await?;
        info!(net_sat = net, "connection confirmed");
        p.amount_credentials = response.real_amount_credentials;
        p.vsize_credentials = response.real_vsize_credentials;
    }

    // All confirmed: advance to output registration
    arena.step().await;

    // === Output registration ===
    for p in &participants {
        let amount_creds = p.amount_credentials.clone().expect("real credentials");
        let vsize_creds = p.vsize_credentials.clone().expect("real credentials");
        let net: i64 = amount_creds.issued.iter().map(|c| c.value as i64).sum();
        let budget: i64 = vsize_creds.issued.iter().map(|c| c.value as i64).sum();

        arena.register_output(OutputRegistrationRequest {
            round_id: round.id,
            script: p.output_script.clone(),
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
        info!(script = %p.output_script, "registered output");
        arena.ready_to_sign(round.id, p.alice_id.expect("registered")).await?;
    }

    // Everyone ready: freeze the transaction
    arena.step().await;

    // === Signing ===
    let signing_round = current_round(&arena, &round.id);
    assert_eq!(signing_round.phase, Phase::TransactionSigning);
    let unsigned = signing_round.unsigned_tx.expect("frozen transaction");
    info!(inputs = unsigned.inputs.len(), outputs = unsigned.outputs.len(), "signing");

    for p in &participants {
        let index = unsigned.inputs.iter()
            .position(|i| i.outpoint == p.outpoint)
            .expect("own input present");
        arena.sign_transaction(SignTransactionRequest {
            round_id: round.id,
            input_index: index,
            witness: Witness(vec![0xaa; 72]),
        }).await?;
    }

    // Fully signed: broadcast
    arena.step().await;

    // === Results ===
    let final_round = current_round(&arena, &round.id);
    info!(outcome = %final_round.end_state, "round finished");
    for tx in rpc.broadcasts() {
        info!(txid = %tx.txid(), "broadcast transaction");
        for output in &tx.outputs {
            info!(value = %output.value, script = %output.script, "  output");
        }
    }

    Ok(())
}

fn registrable_round(arena: &Arena) -> Option<RoundSnapshot> {
    arena.get_status(&StatusRequest::default()).rounds
        .into_iter()
        .find(|r| r.phase == Phase::InputRegistration)
}

fn current_round(arena: &Arena, id: &mixpool::RoundId) -> RoundSnapshot {
    arena.get_status(&StatusRequest::default()).rounds
        .into_iter()
        .find(|r| r.id == *id)
        .expect("round still live")
}
