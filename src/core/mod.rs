//! Core value primitives.
//!
//! Leaf types with no knowledge of rounds or the orchestrator: amounts,
//! fee rates, time frames, coins, scripts and the domain-separated hasher.

pub mod coin;
pub mod hash;
pub mod time_frame;
pub mod units;

// Re-export core types
pub use coin::{Coin, OutPoint, OwnershipProof, ScriptKind, ScriptPubkey, Txid, Witness};
pub use hash::{Hash256, Hasher};
pub use time_frame::TimeFrame;
pub use units::{Amount, CoordinationFeeRate, FeeRate};
