//! Coins, Scripts and Proofs
//!
//! Value types shared between the round state machine and the node facade:
//! transaction outpoints, output scripts, registered coins, ownership
//! proofs and signature witnesses.

use serde::{Serialize, Deserialize};

use crate::core::hash::{Hash256, Hasher};
use crate::core::units::{
    Amount, P2TR_INPUT_VSIZE, P2TR_OUTPUT_VSIZE, P2WPKH_INPUT_VSIZE, P2WPKH_OUTPUT_VSIZE,
};

/// A transaction identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Txid(pub Hash256);

impl std::fmt::Display for Txid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A reference to one output of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    /// Funding transaction.
    pub txid: Txid,
    /// Output index within it.
    pub vout: u32,
}

impl OutPoint {
    /// Create an outpoint.
    pub const fn new(txid: Txid, vout: u32) -> Self {
        Self { txid, vout }
    }
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

// =============================================================================
// SCRIPTS
// =============================================================================

/// The script templates the coordinator accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptKind {
    /// Native segwit v0 pay-to-witness-pubkey-hash.
    P2wpkh,
    /// Segwit v1 taproot.
    Taproot,
}

impl ScriptKind {
    /// Virtual size this script contributes as an input.
    pub const fn input_vsize(self) -> u64 {
        match self {
            ScriptKind::P2wpkh => P2WPKH_INPUT_VSIZE,
            ScriptKind::Taproot => P2TR_INPUT_VSIZE,
        }
    }

    /// Virtual size this script contributes as an output.
    pub const fn output_vsize(self) -> u64 {
        match self {
            ScriptKind::P2wpkh => P2WPKH_OUTPUT_VSIZE,
            ScriptKind::Taproot => P2TR_OUTPUT_VSIZE,
        }
    }
}

/// A raw output script.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScriptPubkey(pub Vec<u8>);

impl ScriptPubkey {
    /// Build a P2WPKH script from a 20-byte key hash.
    pub fn p2wpkh(key_hash: [u8; 20]) -> Self {
        let mut bytes = Vec::with_capacity(22);
        bytes.extend_from_slice(&[0x00, 0x14]);
        bytes.extend_from_slice(&key_hash);
        Self(bytes)
    }

    /// Build a taproot script from a 32-byte output key.
    pub fn taproot(output_key: [u8; 32]) -> Self {
        let mut bytes = Vec::with_capacity(34);
        bytes.extend_from_slice(&[0x51, 0x20]);
        bytes.extend_from_slice(&output_key);
        Self(bytes)
    }

    /// Detect the script template, `None` for anything non-standard here.
    pub fn kind(&self) -> Option<ScriptKind> {
        match self.0.as_slice() {
            [0x00, 0x14, rest @ ..] if rest.len() == 20 => Some(ScriptKind::P2wpkh),
            [0x51, 0x20, rest @ ..] if rest.len() == 32 => Some(ScriptKind::Taproot),
            _ => None,
        }
    }

    /// Raw script bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for ScriptPubkey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

// =============================================================================
// COINS
// =============================================================================

/// An unspent output as registered into a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    /// Location of the output.
    pub outpoint: OutPoint,
    /// Output value.
    pub value: Amount,
    /// Output script.
    pub script: ScriptPubkey,
}

impl Coin {
    /// Virtual size this coin contributes when spent, by script template.
    ///
    /// `None` for non-standard scripts.
    pub fn input_vsize(&self) -> Option<u64> {
        self.script.kind().map(ScriptKind::input_vsize)
    }
}

// =============================================================================
// OWNERSHIP PROOF
// =============================================================================

/// Proof that the registrant controls a coin's script, bound to one round.
///
/// The binding commitment ties the script to the round identity so a proof
/// captured for one round cannot be replayed into another. The signature
/// scheme underneath is supplied by the client stack; the coordinator only
/// checks the binding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipProof {
    commitment: Hash256,
}

impl OwnershipProof {
    /// Produce a proof for `script` bound to `round_id`.
    pub fn create(script: &ScriptPubkey, round_id: &Hash256) -> Self {
        Self { commitment: Self::binding(script, round_id) }
    }

    /// Check the proof against a script and round identity.
    pub fn verify(&self, script: &ScriptPubkey, round_id: &Hash256) -> bool {
        self.commitment == Self::binding(script, round_id)
    }

    fn binding(script: &ScriptPubkey, round_id: &Hash256) -> Hash256 {
        let mut hasher = Hasher::for_ownership_proof();
        hasher.update_bytes(script.as_bytes());
        hasher.update_hash(round_id);
        hasher.finalize()
    }
}

/// Opaque witness bytes for one signed input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Witness(pub Vec<u8>);

impl Witness {
    /// Whether the witness carries any signature material.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
