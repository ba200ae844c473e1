//! Round data model.
//!
//! The per-round state machine and everything it owns: frozen parameters,
//! registered inputs and outputs, the in-progress transaction, and the
//! phase/outcome enumerations.

pub mod alice;
pub mod bob;
pub mod construction;
pub mod params;
pub mod phase;
#[allow(clippy::module_inception)]
pub mod round;

// Re-export round types
pub use alice::{Alice, AliceId};
pub use bob::Bob;
pub use construction::{ConstructionState, SigningState, Transaction, TxIn, TxOut};
pub use params::{AmountRange, RoundParameters};
pub use phase::{EndRoundState, Phase};
pub use round::{Round, RoundId, RoundKind, TxState};
