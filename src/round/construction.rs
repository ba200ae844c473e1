//! Shared Transaction Construction
//!
//! The in-progress coinjoin a round assembles: inputs accumulate during
//! connection confirmation, outputs during output registration, then the
//! transaction is frozen into a signing state that collects witnesses.
//!
//! Every input and output pays its own mining fee out of its credential
//! value, so whatever balance is left over once the transaction is frozen
//! belongs to the coordinator.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::core::coin::{Coin, OutPoint, ScriptKind, ScriptPubkey, Txid, Witness};
use crate::core::hash::Hasher;
use crate::core::units::{Amount, FeeRate, DUST_THRESHOLD, SHARED_OVERHEAD_VSIZE};
use crate::error::ProtocolError;

/// One transaction input with its prevout data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIn {
    /// Spent outpoint.
    pub outpoint: OutPoint,
    /// Prevout value.
    pub value: Amount,
    /// Prevout script.
    pub script: ScriptPubkey,
}

/// One transaction output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    /// Output value.
    pub value: Amount,
    /// Output script.
    pub script: ScriptPubkey,
}

/// A fully signed coinjoin ready for broadcast.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Inputs in canonical order.
    pub inputs: Vec<TxIn>,
    /// Witnesses, one per input, same order.
    pub witnesses: Vec<Witness>,
    /// Outputs in canonical order.
    pub outputs: Vec<TxOut>,
}

impl Transaction {
    /// Transaction identity over the canonical encoding (witnesses excluded).
    pub fn txid(&self) -> Txid {
        let mut hasher = Hasher::for_transaction();
        hasher.update_u64(self.inputs.len() as u64);
        for input in &self.inputs {
            hasher.update_hash(&input.outpoint.txid.0);
            hasher.update_u32(input.outpoint.vout);
        }
        hasher.update_u64(self.outputs.len() as u64);
        for output in &self.outputs {
            hasher.update_amount(output.value);
            hasher.update_bytes(output.script.as_bytes());
        }
        Txid(hasher.finalize())
    }
}

// =============================================================================
// CONSTRUCTION
// =============================================================================

/// Mutable accumulation of inputs and outputs before the freeze.
#[derive(Clone, Debug)]
pub struct ConstructionState {
    mining_fee_rate: FeeRate,
    inputs: Vec<TxIn>,
    outputs: Vec<TxOut>,
}

impl ConstructionState {
    /// Empty construction at the given fee rate.
    pub fn new(mining_fee_rate: FeeRate) -> Self {
        Self { mining_fee_rate, inputs: Vec::new(), outputs: Vec::new() }
    }

    /// Add a confirmed input.
    pub fn add_input(&mut self, coin: &Coin) {
        self.inputs.push(TxIn {
            outpoint: coin.outpoint,
            value: coin.value,
            script: coin.script.clone(),
        });
    }

    /// Remove an input again (its Alice was dropped before the freeze).
    pub fn remove_input(&mut self, outpoint: &OutPoint) {
        self.inputs.retain(|i| i.outpoint != *outpoint);
    }

    /// Add a registered output.
    pub fn add_output(&mut self, script: ScriptPubkey, value: Amount) {
        self.outputs.push(TxOut { value, script });
    }

    /// Number of inputs accumulated so far.
    pub fn input_count(&self) -> usize {
        self.inputs.len()
    }

    /// Sum of input values.
    pub fn input_sum(&self) -> Amount {
        Amount::from_sat(self.inputs.iter().map(|i| i.value.to_sat()).sum())
    }

    /// Sum of output values.
    pub fn output_sum(&self) -> Amount {
        Amount::from_sat(self.outputs.iter().map(|o| o.value.to_sat()).sum())
    }

    /// Inputs minus outputs.
    pub fn balance(&self) -> Amount {
        self.input_sum().saturating_sub(self.output_sum())
    }

    /// Estimated virtual size with the current input and output set.
    pub fn estimated_vsize(&self) -> u64 {
        let inputs: u64 = self.inputs.iter()
            .map(|i| i.script.kind().map(ScriptKind::input_vsize).unwrap_or(0))
            .sum();
        let outputs: u64 = self.outputs.iter()
            .map(|o| o.script.kind().map(ScriptKind::output_vsize).unwrap_or(0))
            .sum();
        SHARED_OVERHEAD_VSIZE + inputs + outputs
    }

    /// Freeze the transaction for signing.
    ///
    /// Appends a coordinator fee output only when the leftover balance
    /// exceeds the mining cost of carrying that output plus dust, then
    /// fixes the canonical ordering: inputs by outpoint, outputs by
    /// descending value then script bytes.
    pub fn finalize(mut self, coordinator_script: &ScriptPubkey) -> SigningState {
        let mining_fee = self.mining_fee_rate.fee(self.estimated_vsize());
        let leftover = self.balance().saturating_sub(mining_fee);
        let fee_output_cost = self.mining_fee_rate.fee(
            coordinator_script.kind().map(ScriptKind::output_vsize).unwrap_or(0),
        );
        if let Some(value) = leftover.checked_sub(fee_output_cost) {
            if value > DUST_THRESHOLD {
                self.outputs.push(TxOut { value, script: coordinator_script.clone() });
            }
        }

        self.inputs.sort_by(|a, b| a.outpoint.cmp(&b.outpoint));
        self.outputs.sort_by(|a, b| {
            b.value.cmp(&a.value).then_with(|| a.script.cmp(&b.script))
        });

        SigningState {
            inputs: self.inputs,
            outputs: self.outputs,
            witnesses: BTreeMap::new(),
        }
    }
}

// =============================================================================
// SIGNING
// =============================================================================

/// The frozen transaction collecting witnesses.
#[derive(Clone, Debug)]
pub struct SigningState {
    /// Inputs in canonical order.
    pub inputs: Vec<TxIn>,
    /// Outputs in canonical order, coordinator fee output included.
    pub outputs: Vec<TxOut>,
    witnesses: BTreeMap<usize, Witness>,
}

impl SigningState {
    /// Apply a witness to one input.
    pub fn add_witness(&mut self, index: usize, witness: Witness) -> Result<(), ProtocolError> {
        if index >= self.inputs.len() {
            return Err(ProtocolError::WitnessOutOfRange);
        }
        if witness.is_empty() {
            return Err(ProtocolError::InvalidWitness);
        }
        if self.witnesses.contains_key(&index) {
            return Err(ProtocolError::WitnessAlreadyProvided);
        }
        self.witnesses.insert(index, witness);
        Ok(())
    }

    /// Whether every input carries a witness.
    pub fn is_fully_signed(&self) -> bool {
        self.witnesses.len() == self.inputs.len()
    }

    /// Index of the input spending `outpoint`, if present.
    pub fn input_index(&self, outpoint: &OutPoint) -> Option<usize> {
        self.inputs.iter().position(|i| i.outpoint == *outpoint)
    }

    /// Outpoints whose inputs are still unsigned.
    pub fn unsigned_outpoints(&self) -> Vec<OutPoint> {
        self.inputs.iter().enumerate()
            .filter(|(i, _)| !self.witnesses.contains_key(i))
            .map(|(_, input)| input.outpoint)
            .collect()
    }

    /// Assemble the broadcastable transaction. `None` until fully signed.
    pub fn to_transaction(&self) -> Option<Transaction> {
        if !self.is_fully_signed() {
            return None;
        }
        let witnesses = (0..self.inputs.len())
            .map(|i| self.witnesses.get(&i).cloned())
            .collect::<Option<Vec<_>>>()?;
        Some(Transaction {
            inputs: self.inputs.clone(),
            witnesses,
            outputs: self.outputs.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coin(byte: u8, value: u64) -> Coin {
        Coin {
            outpoint: OutPoint::new(Txid([byte; 32]), 0),
            value: Amount::from_sat(value),
            script: ScriptPubkey::p2wpkh([byte; 20]),
        }
    }

    fn rate() -> FeeRate {
        FeeRate::from_sat_per_vb(10)
    }

    /// Two inputs, two outputs, everything priced so a visible surplus
    /// remains for the coordinator.
    fn build() -> ConstructionState {
        let mut state = ConstructionState::new(rate());
        state.add_input(&coin(2, 1_000_000));
        state.add_input(&coin(1, 2_000_000));
        state.add_output(ScriptPubkey::p2wpkh([10; 20]), Amount::from_sat(900_000));
        state.add_output(ScriptPubkey::p2wpkh([11; 20]), Amount::from_sat(1_900_000));
        state
    }

    #[test]
    fn vsize_counts_overhead_inputs_outputs() {
        let state = build();
        assert_eq!(state.estimated_vsize(), 11 + 2 * 68 + 2 * 31);
    }

    #[test]
    fn finalize_adds_coordinator_fee_output_when_worthwhile() {
        let signing = build().finalize(&ScriptPubkey::p2wpkh([99; 20]));
        // 200_000 sat surplus dwarfs the ~2_290 sat mining cost
        assert_eq!(signing.outputs.len(), 3);
        let coordinator_out = signing.outputs.iter()
            .find(|o| o.script == ScriptPubkey::p2wpkh([99; 20]))
            .expect("coordinator output");
        // surplus - fee(total vsize incl. 2 outputs) - fee(own output)
        let expected = 200_000 - rate().fee(11 + 2 * 68 + 2 * 31).to_sat() - rate().fee(31).to_sat();
        assert_eq!(coordinator_out.value, Amount::from_sat(expected));
    }

    #[test]
    fn finalize_skips_uneconomical_fee_output() {
        let mut state = ConstructionState::new(rate());
        state.add_input(&coin(1, 1_000_000));
        // Output redeems nearly everything; leftover under the output cost
        state.add_output(ScriptPubkey::p2wpkh([10; 20]), Amount::from_sat(998_500));
        let signing = state.finalize(&ScriptPubkey::p2wpkh([99; 20]));
        assert_eq!(signing.outputs.len(), 1);
    }

    #[test]
    fn finalize_orders_inputs_by_outpoint_and_outputs_by_value() {
        let signing = build().finalize(&ScriptPubkey::p2wpkh([99; 20]));
        assert!(signing.inputs[0].outpoint < signing.inputs[1].outpoint);
        for pair in signing.outputs.windows(2) {
            assert!(pair[0].value >= pair[1].value);
        }
    }

    #[test]
    fn signing_tracks_witnesses() {
        let mut signing = build().finalize(&ScriptPubkey::p2wpkh([99; 20]));
        assert!(!signing.is_fully_signed());
        assert_eq!(signing.unsigned_outpoints().len(), 2);

        signing.add_witness(0, Witness(vec![1])).unwrap();
        assert_eq!(signing.unsigned_outpoints().len(), 1);
        assert!(signing.to_transaction().is_none());

        signing.add_witness(1, Witness(vec![2])).unwrap();
        assert!(signing.is_fully_signed());
        let tx = signing.to_transaction().unwrap();
        assert_eq!(tx.inputs.len(), 2);
        assert_eq!(tx.witnesses.len(), 2);
    }

    #[test]
    fn signing_rejects_bad_witnesses() {
        let mut signing = build().finalize(&ScriptPubkey::p2wpkh([99; 20]));
        assert_eq!(signing.add_witness(9, Witness(vec![1])), Err(ProtocolError::WitnessOutOfRange));
        assert_eq!(signing.add_witness(0, Witness(vec![])), Err(ProtocolError::InvalidWitness));
        signing.add_witness(0, Witness(vec![1])).unwrap();
        assert_eq!(
            signing.add_witness(0, Witness(vec![2])),
            Err(ProtocolError::WitnessAlreadyProvided)
        );
    }

    #[test]
    fn txid_is_order_sensitive_and_deterministic() {
        let a = build().finalize(&ScriptPubkey::p2wpkh([99; 20]));
        let b = build().finalize(&ScriptPubkey::p2wpkh([99; 20]));
        let mut sa = a.clone();
        sa.add_witness(0, Witness(vec![1])).unwrap();
        sa.add_witness(1, Witness(vec![1])).unwrap();
        let mut sb = b;
        sb.add_witness(0, Witness(vec![9, 9])).unwrap();
        sb.add_witness(1, Witness(vec![9, 9])).unwrap();
        // Witness data does not affect the txid
        assert_eq!(sa.to_transaction().unwrap().txid(), sb.to_transaction().unwrap().txid());
    }
}
