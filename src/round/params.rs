//! Round Parameters
//!
//! The configuration a round is created with. Frozen at creation and
//! hashed into the round identity; never mutated afterwards.

use std::time::Duration;
use serde::{Serialize, Deserialize};

use crate::config::CoordinatorConfig;
use crate::core::coin::ScriptKind;
use crate::core::units::{
    Amount, CoordinationFeeRate, FeeRate, MAX_STANDARD_TX_VSIZE, SHARED_OVERHEAD_VSIZE,
};

/// An inclusive satoshi range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountRange {
    /// Smallest allowed value.
    pub min: Amount,
    /// Largest allowed value.
    pub max: Amount,
}

impl AmountRange {
    /// Create a range.
    pub const fn new(min: Amount, max: Amount) -> Self {
        Self { min, max }
    }

    /// Whether `value` lies inside the range.
    pub fn contains(&self, value: Amount) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Frozen per-round configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundParameters {
    /// Mining fee rate the round budgets with.
    pub mining_fee_rate: FeeRate,
    /// Coordination fee schedule.
    pub coordination_fee_rate: CoordinationFeeRate,

    /// Allowed input values.
    pub allowed_input_amounts: AmountRange,
    /// Allowed output values.
    pub allowed_output_amounts: AmountRange,
    /// Script templates accepted for inputs.
    pub allowed_input_kinds: Vec<ScriptKind>,
    /// Script templates accepted for outputs.
    pub allowed_output_kinds: Vec<ScriptKind>,

    /// Minimum inputs for the round to proceed.
    pub min_input_count: usize,
    /// Maximum inputs the round accepts.
    pub max_input_count: usize,

    /// Advertised cap on suggested input value.
    pub max_suggested_amount: Amount,

    /// Input registration window.
    pub input_registration_timeout: Duration,
    /// Connection confirmation window.
    pub connection_confirmation_timeout: Duration,
    /// Output registration window.
    pub output_registration_timeout: Duration,
    /// Signing window.
    pub transaction_signing_timeout: Duration,
    /// Signing window when output registration was forced by timeout.
    pub fail_fast_signing_timeout: Duration,
    /// How long an unconfirmed Alice may linger before removal.
    pub connection_confirmation_deadline: Duration,

    /// Vsize budget each Alice may claim.
    pub max_vsize_allocation_per_alice: u64,
}

impl RoundParameters {
    /// Build parameters for a standard round.
    pub fn from_config(config: &CoordinatorConfig, mining_fee_rate: FeeRate, max_suggested_amount: Amount) -> Self {
        Self {
            mining_fee_rate,
            coordination_fee_rate: config.coordination_fee_rate,
            allowed_input_amounts: AmountRange::new(config.min_registrable_amount, config.max_registrable_amount),
            allowed_output_amounts: AmountRange::new(config.min_registrable_amount, config.max_registrable_amount),
            allowed_input_kinds: config.allowed_input_kinds.clone(),
            allowed_output_kinds: config.allowed_output_kinds.clone(),
            min_input_count: config.min_input_count,
            max_input_count: config.max_input_count,
            max_suggested_amount,
            input_registration_timeout: config.standard_input_registration_timeout,
            connection_confirmation_timeout: config.connection_confirmation_timeout,
            output_registration_timeout: config.output_registration_timeout,
            transaction_signing_timeout: config.transaction_signing_timeout,
            fail_fast_signing_timeout: config.fail_fast_signing_timeout,
            connection_confirmation_deadline: config.connection_confirmation_deadline,
            max_vsize_allocation_per_alice: config.max_vsize_allocation_per_alice,
        }
    }

    /// Same parameters with the shortened blame input-registration window.
    pub fn for_blame_round(&self, config: &CoordinatorConfig) -> Self {
        let mut params = self.clone();
        params.input_registration_timeout = config.blame_input_registration_timeout;
        params.min_input_count = config.min_blame_input_count;
        params
    }

    /// Total vsize the round may spend on inputs and outputs.
    pub fn initial_vsize_allocation(&self) -> u64 {
        MAX_STANDARD_TX_VSIZE - SHARED_OVERHEAD_VSIZE
    }

    /// Whether the script template may be registered as an input.
    pub fn allows_input_kind(&self, kind: ScriptKind) -> bool {
        self.allowed_input_kinds.contains(&kind)
    }

    /// Whether the script template may be registered as an output.
    pub fn allows_output_kind(&self, kind: ScriptKind) -> bool {
        self.allowed_output_kinds.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RoundParameters {
        RoundParameters::from_config(
            &CoordinatorConfig::default(),
            FeeRate::from_sat_per_vb(1),
            Amount::from_sat(10_000_000),
        )
    }

    #[test]
    fn amount_range_inclusive() {
        let range = AmountRange::new(Amount::from_sat(10), Amount::from_sat(20));
        assert!(range.contains(Amount::from_sat(10)));
        assert!(range.contains(Amount::from_sat(20)));
        assert!(!range.contains(Amount::from_sat(9)));
        assert!(!range.contains(Amount::from_sat(21)));
    }

    #[test]
    fn vsize_allocation_leaves_room_for_overhead() {
        assert_eq!(params().initial_vsize_allocation(), 100_000 - 11);
    }

    #[test]
    fn blame_params_shorten_registration() {
        let config = CoordinatorConfig::default();
        let blame = params().for_blame_round(&config);
        assert_eq!(blame.input_registration_timeout, config.blame_input_registration_timeout);
        assert_eq!(blame.min_input_count, config.min_blame_input_count);
        // Everything else carries over
        assert_eq!(blame.mining_fee_rate, params().mining_fee_rate);
        assert_eq!(blame.max_suggested_amount, params().max_suggested_amount);
    }
}
