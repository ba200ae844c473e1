//! Round Phases and Terminal Outcomes
//!
//! The phase ladder is strictly monotonic while a round lives. Terminal
//! outcomes are an integer-tagged enumeration decoded positionally by
//! client snapshots: append new members at the end, never reorder or
//! remove existing ones.

use serde::{Serialize, Deserialize};

/// Phase of a round's life cycle.
///
/// Ordering is meaningful: a live round's phase never decreases.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Phase {
    /// Accepting inputs.
    InputRegistration = 0,
    /// Waiting for every Alice to confirm and collect real credentials.
    ConnectionConfirmation = 1,
    /// Accepting outputs.
    OutputRegistration = 2,
    /// Collecting witnesses for the assembled transaction.
    TransactionSigning = 3,
    /// Terminal.
    Ended = 4,
}

/// Terminal outcome of a round.
///
/// Append-only: members carry pinned discriminants because clients decode
/// snapshots positionally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum EndRoundState {
    /// Round has not ended.
    None = 0,
    /// Internal coordinator failure while stepping the round.
    AbortedWithError = 1,
    /// Input registration closed with too few inputs.
    AbortedNotEnoughInputs = 2,
    /// The node rejected the final transaction.
    TransactionBroadcastFailed = 3,
    /// The final transaction was accepted by the node.
    TransactionBroadcasted = 4,
    /// Signing closed with missing witnesses; a blame round may follow.
    NotAllSigned = 5,
    /// Too few signers remained to continue in a blame round.
    AbortedNotEnoughSigners = 6,
    /// A registered coin was spent elsewhere mid-flight.
    AbortedDoubleSpendDetected = 7,
    /// Ended to rebalance registrations across new rounds.
    AbortedLoadBalancing = 8,
    /// Connection confirmation closed with too few confirmed inputs.
    AbortedNotAllConfirmed = 9,
}

impl EndRoundState {
    /// Whether the round produced a broadcast coinjoin.
    pub fn is_success(self) -> bool {
        matches!(self, EndRoundState::TransactionBroadcasted)
    }
}

impl std::fmt::Display for EndRoundState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EndRoundState::None => "none",
            EndRoundState::AbortedWithError => "aborted (coordinator error)",
            EndRoundState::AbortedNotEnoughInputs => "aborted (not enough inputs)",
            EndRoundState::TransactionBroadcastFailed => "broadcast failed",
            EndRoundState::TransactionBroadcasted => "broadcast succeeded",
            EndRoundState::NotAllSigned => "not all signed",
            EndRoundState::AbortedNotEnoughSigners => "aborted (not enough signers)",
            EndRoundState::AbortedDoubleSpendDetected => "aborted (double spend detected)",
            EndRoundState::AbortedLoadBalancing => "aborted (load balancing)",
            EndRoundState::AbortedNotAllConfirmed => "aborted (not all confirmed)",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_order_is_the_ladder() {
        assert!(Phase::InputRegistration < Phase::ConnectionConfirmation);
        assert!(Phase::ConnectionConfirmation < Phase::OutputRegistration);
        assert!(Phase::OutputRegistration < Phase::TransactionSigning);
        assert!(Phase::TransactionSigning < Phase::Ended);
    }

    /// Pins the wire values. If this test fails, a member was inserted,
    /// reordered or removed — that breaks deployed clients. New outcomes go
    /// at the end with the next free discriminant.
    #[test]
    fn end_round_state_discriminants_are_pinned() {
        assert_eq!(EndRoundState::None as u8, 0);
        assert_eq!(EndRoundState::AbortedWithError as u8, 1);
        assert_eq!(EndRoundState::AbortedNotEnoughInputs as u8, 2);
        assert_eq!(EndRoundState::TransactionBroadcastFailed as u8, 3);
        assert_eq!(EndRoundState::TransactionBroadcasted as u8, 4);
        assert_eq!(EndRoundState::NotAllSigned as u8, 5);
        assert_eq!(EndRoundState::AbortedNotEnoughSigners as u8, 6);
        assert_eq!(EndRoundState::AbortedDoubleSpendDetected as u8, 7);
        assert_eq!(EndRoundState::AbortedLoadBalancing as u8, 8);
        assert_eq!(EndRoundState::AbortedNotAllConfirmed as u8, 9);
    }

    #[test]
    fn only_broadcast_counts_as_success() {
        assert!(EndRoundState::TransactionBroadcasted.is_success());
        assert!(!EndRoundState::NotAllSigned.is_success());
        assert!(!EndRoundState::TransactionBroadcastFailed.is_success());
    }
}
