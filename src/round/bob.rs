//! Bob — a Registered Output
//!
//! A destination script and the credential value being redeemed into it.
//! Deliberately carries nothing that could link it back to an Alice.

use serde::{Serialize, Deserialize};

use crate::core::coin::{ScriptKind, ScriptPubkey};
use crate::core::units::{Amount, FeeRate};

/// One registered output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bob {
    /// Destination script.
    pub script: ScriptPubkey,
    /// Credential value presented for this output.
    pub credential_amount: Amount,
}

impl Bob {
    /// Create a registered output.
    pub fn new(script: ScriptPubkey, credential_amount: Amount) -> Self {
        Self { script, credential_amount }
    }

    /// Vsize this output adds to the transaction.
    pub fn output_vsize(&self) -> u64 {
        self.script.kind().map(ScriptKind::output_vsize).unwrap_or(0)
    }

    /// On-chain value: the credential amount net of this output's own
    /// mining fee at the round's rate.
    pub fn output_value(&self, rate: FeeRate) -> Option<Amount> {
        self.credential_amount.checked_sub(rate.fee(self.output_vsize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_value_nets_out_mining_fee() {
        let bob = Bob::new(ScriptPubkey::p2wpkh([3; 20]), Amount::from_sat(100_000));
        let rate = FeeRate::from_sat_per_vb(10); // 31 vb -> 310 sat
        assert_eq!(bob.output_value(rate), Some(Amount::from_sat(99_690)));
    }

    #[test]
    fn output_value_none_when_unaffordable() {
        let bob = Bob::new(ScriptPubkey::p2wpkh([3; 20]), Amount::from_sat(100));
        let rate = FeeRate::from_sat_per_vb(10);
        assert_eq!(bob.output_value(rate), None);
    }

    #[test]
    fn taproot_output_costs_more() {
        let p2wpkh = Bob::new(ScriptPubkey::p2wpkh([3; 20]), Amount::from_sat(100_000));
        let taproot = Bob::new(ScriptPubkey::taproot([3; 32]), Amount::from_sat(100_000));
        assert!(taproot.output_vsize() > p2wpkh.output_vsize());
    }
}
