//! Bitcoin Node Facade
//!
//! The narrow surface the engine needs from a node: mempool-aware UTXO
//! lookup, fee estimation and transaction broadcast. Spent-status checks
//! are expressed as UTXO lookups; the orchestrator does its own chunking.
//!
//! `MemoryRpc` is an in-memory implementation backing the demo binary and
//! the test suite.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::core::coin::{Coin, OutPoint, ScriptPubkey};
use crate::core::units::{Amount, FeeRate};
use crate::round::construction::Transaction;

/// What the node reports for an unspent output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UtxoInfo {
    /// Output value.
    pub value: Amount,
    /// Output script.
    pub script: ScriptPubkey,
    /// Confirmation count, zero for mempool.
    pub confirmations: u32,
    /// Whether the funding transaction is a coinbase.
    pub is_coinbase: bool,
}

impl UtxoInfo {
    /// Bind the info to its outpoint.
    pub fn into_coin(self, outpoint: OutPoint) -> Coin {
        Coin { outpoint, value: self.value, script: self.script }
    }
}

/// Node RPC facade.
#[async_trait]
pub trait BitcoinRpc: Send + Sync {
    /// Look up an unspent output, mempool included. `None` when unknown
    /// or already spent.
    async fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoInfo>>;

    /// Estimated fee rate to confirm within `target` blocks.
    async fn estimate_fee(&self, target: u16) -> Result<FeeRate>;

    /// Submit a transaction to the network.
    async fn broadcast(&self, tx: &Transaction) -> Result<()>;
}

// =============================================================================
// IN-MEMORY NODE
// =============================================================================

#[derive(Debug, Default)]
struct MemoryRpcInner {
    utxos: HashMap<OutPoint, UtxoInfo>,
    broadcasts: Vec<Transaction>,
    fail_broadcasts: bool,
}

/// In-memory node for demos and tests.
///
/// Broadcast consumes the transaction's inputs and credits its outputs,
/// so chained rounds behave like a real chain would.
#[derive(Debug)]
pub struct MemoryRpc {
    fee_rate: FeeRate,
    inner: Mutex<MemoryRpcInner>,
}

impl MemoryRpc {
    /// Empty UTXO set at a fixed fee rate.
    pub fn new(fee_rate: FeeRate) -> Self {
        Self { fee_rate, inner: Mutex::new(MemoryRpcInner::default()) }
    }

    /// Add a confirmed, non-coinbase UTXO.
    pub fn add_utxo(&self, outpoint: OutPoint, value: Amount, script: ScriptPubkey) {
        self.add_utxo_full(outpoint, UtxoInfo { value, script, confirmations: 6, is_coinbase: false });
    }

    /// Add a UTXO with explicit confirmation state.
    pub fn add_utxo_full(&self, outpoint: OutPoint, info: UtxoInfo) {
        self.inner.lock().unwrap().utxos.insert(outpoint, info);
    }

    /// Spend a UTXO out from under the coordinator.
    pub fn mark_spent(&self, outpoint: &OutPoint) {
        self.inner.lock().unwrap().utxos.remove(outpoint);
    }

    /// Make subsequent broadcasts fail.
    pub fn set_fail_broadcasts(&self, fail: bool) {
        self.inner.lock().unwrap().fail_broadcasts = fail;
    }

    /// Transactions accepted so far.
    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.inner.lock().unwrap().broadcasts.clone()
    }
}

#[async_trait]
impl BitcoinRpc for MemoryRpc {
    async fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<UtxoInfo>> {
        Ok(self.inner.lock().unwrap().utxos.get(outpoint).cloned())
    }

    async fn estimate_fee(&self, _target: u16) -> Result<FeeRate> {
        Ok(self.fee_rate)
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_broadcasts {
            bail!("transaction rejected by node");
        }
        for input in &tx.inputs {
            if inner.utxos.remove(&input.outpoint).is_none() {
                bail!("input {} missing or spent", input.outpoint);
            }
        }
        let txid = tx.txid();
        for (vout, output) in tx.outputs.iter().enumerate() {
            inner.utxos.insert(
                OutPoint::new(txid, vout as u32),
                UtxoInfo {
                    value: output.value,
                    script: output.script.clone(),
                    confirmations: 0,
                    is_coinbase: false,
                },
            );
        }
        inner.broadcasts.push(tx.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::coin::Txid;

    fn outpoint(byte: u8) -> OutPoint {
        OutPoint::new(Txid([byte; 32]), 0)
    }

    #[tokio::test]
    async fn lookup_and_spend() {
        let rpc = MemoryRpc::new(FeeRate::from_sat_per_vb(1));
        rpc.add_utxo(outpoint(1), Amount::from_sat(1000), ScriptPubkey::p2wpkh([1; 20]));

        let found = rpc.get_utxo(&outpoint(1)).await.unwrap();
        assert_eq!(found.unwrap().value, Amount::from_sat(1000));

        rpc.mark_spent(&outpoint(1));
        assert!(rpc.get_utxo(&outpoint(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn broadcast_moves_coins() {
        use crate::core::coin::Witness;
        use crate::round::construction::{TxIn, TxOut};

        let rpc = MemoryRpc::new(FeeRate::from_sat_per_vb(1));
        let script = ScriptPubkey::p2wpkh([1; 20]);
        rpc.add_utxo(outpoint(1), Amount::from_sat(1000), script.clone());

        let tx = Transaction {
            inputs: vec![TxIn { outpoint: outpoint(1), value: Amount::from_sat(1000), script: script.clone() }],
            witnesses: vec![Witness(vec![1])],
            outputs: vec![TxOut { value: Amount::from_sat(900), script }],
        };
        rpc.broadcast(&tx).await.unwrap();

        assert!(rpc.get_utxo(&outpoint(1)).await.unwrap().is_none());
        let new_outpoint = OutPoint::new(tx.txid(), 0);
        assert!(rpc.get_utxo(&new_outpoint).await.unwrap().is_some());
        assert_eq!(rpc.broadcasts().len(), 1);

        // Double spend is refused
        assert!(rpc.broadcast(&tx).await.is_err());
    }

    #[tokio::test]
    async fn forced_broadcast_failure() {
        let rpc = MemoryRpc::new(FeeRate::from_sat_per_vb(1));
        rpc.set_fail_broadcasts(true);
        let tx = Transaction { inputs: vec![], witnesses: vec![], outputs: vec![] };
        assert!(rpc.broadcast(&tx).await.is_err());
    }
}
