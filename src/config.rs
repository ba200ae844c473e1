//! Coordinator Configuration
//!
//! All tunables for the orchestrator and the rounds it creates. A frozen
//! per-round subset is copied into `RoundParameters` at round creation.

use std::time::Duration;
use serde::{Serialize, Deserialize};

use crate::core::coin::{ScriptKind, ScriptPubkey};
use crate::core::units::{Amount, CoordinationFeeRate, MAX_MONEY};

/// Coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Period of the background maintenance loop.
    pub step_period: Duration,
    /// How many input-registration rounds to keep open.
    pub target_registrable_round_count: usize,
    /// Grace period before an ended round is evicted from the live set.
    pub round_expiry_timeout: Duration,

    /// Minimum inputs for a round to proceed.
    pub min_input_count: usize,
    /// Maximum inputs per round.
    pub max_input_count: usize,
    /// Minimum whitelisted inputs required to spawn a blame round.
    pub min_blame_input_count: usize,

    /// Input registration window for standard rounds.
    pub standard_input_registration_timeout: Duration,
    /// Shortened input registration window for blame rounds.
    pub blame_input_registration_timeout: Duration,
    /// Connection confirmation window.
    pub connection_confirmation_timeout: Duration,
    /// Output registration window.
    pub output_registration_timeout: Duration,
    /// Signing window.
    pub transaction_signing_timeout: Duration,
    /// Shortened signing window used when output registration was forced
    /// by timeout rather than universal readiness.
    pub fail_fast_signing_timeout: Duration,
    /// How long an Alice may sit unconfirmed before being dropped.
    pub connection_confirmation_deadline: Duration,

    /// Coordination fee schedule.
    pub coordination_fee_rate: CoordinationFeeRate,
    /// Smallest registrable input or output value.
    pub min_registrable_amount: Amount,
    /// Largest registrable input or output value.
    pub max_registrable_amount: Amount,
    /// Script templates accepted for inputs.
    pub allowed_input_kinds: Vec<ScriptKind>,
    /// Script templates accepted for outputs.
    pub allowed_output_kinds: Vec<ScriptKind>,
    /// Vsize budget each Alice may claim.
    pub max_vsize_allocation_per_alice: u64,

    /// Base amount of the max-suggested ladder.
    pub max_suggested_base_amount: Amount,

    /// Confirmation target for fee estimation.
    pub fee_estimate_target: u16,
    /// Outpoints per concurrent spend-status RPC batch.
    pub rpc_batch_size: usize,

    /// Input count at which an open round is split for load balancing.
    pub round_split_threshold: usize,
    /// Attempt bound for round-id mining during load balancing.
    pub round_id_mining_max_attempts: u32,

    /// Ban window for evidenced cheating.
    pub cheating_ban_duration: Duration,
    /// Ban window for mere disruption (failed to sign or confirm).
    pub disruption_ban_duration: Duration,

    /// Script the coordinator pays its own fee output to.
    pub coordinator_script: ScriptPubkey,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            step_period: Duration::from_secs(2),
            target_registrable_round_count: 2,
            round_expiry_timeout: Duration::from_secs(5 * 60),

            min_input_count: 5,
            max_input_count: 100,
            min_blame_input_count: 3,

            standard_input_registration_timeout: Duration::from_secs(3600),
            blame_input_registration_timeout: Duration::from_secs(180),
            connection_confirmation_timeout: Duration::from_secs(60),
            output_registration_timeout: Duration::from_secs(60),
            transaction_signing_timeout: Duration::from_secs(60),
            fail_fast_signing_timeout: Duration::from_secs(20),
            connection_confirmation_deadline: Duration::from_secs(90),

            // 0.3%, inputs up to 0.01 BTC exempt
            coordination_fee_rate: CoordinationFeeRate::new(3000, Amount::from_sat(1_000_000)),
            min_registrable_amount: Amount::from_sat(5_000),
            max_registrable_amount: Amount::from_sat(MAX_MONEY),
            allowed_input_kinds: vec![ScriptKind::P2wpkh, ScriptKind::Taproot],
            allowed_output_kinds: vec![ScriptKind::P2wpkh, ScriptKind::Taproot],
            max_vsize_allocation_per_alice: 255,

            // 0.1 BTC
            max_suggested_base_amount: Amount::from_sat(10_000_000),

            fee_estimate_target: 2,
            rpc_batch_size: 8,

            round_split_threshold: 50,
            round_id_mining_max_attempts: 64,

            cheating_ban_duration: Duration::from_secs(7 * 24 * 3600),
            disruption_ban_duration: Duration::from_secs(3600),

            coordinator_script: ScriptPubkey::p2wpkh([0; 20]),
        }
    }
}
