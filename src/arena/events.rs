//! Round Transition Log
//!
//! Mutations inside the coordinator lock append to a transition log; the
//! orchestrator drains it into a broadcast channel only after the lock is
//! released, so observers never run inside the critical section.

use crate::core::coin::OutPoint;
use crate::error::Offense;
use crate::round::phase::{EndRoundState, Phase};
use crate::round::round::RoundId;

/// An observable round transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoundEvent {
    /// A round entered the live set.
    RoundCreated {
        /// The new round.
        id: RoundId,
        /// The failed round it continues, for blame rounds.
        blame_of: Option<RoundId>,
    },
    /// A round advanced a phase.
    PhaseChanged {
        /// The round.
        id: RoundId,
        /// Phase it entered.
        phase: Phase,
    },
    /// A round reached a terminal outcome.
    RoundEnded {
        /// The round.
        id: RoundId,
        /// Its outcome.
        state: EndRoundState,
    },
    /// An input was removed before completion.
    InputRemoved {
        /// The round.
        id: RoundId,
        /// The removed input.
        outpoint: OutPoint,
    },
    /// An outpoint was sent to the prison.
    InputBanned {
        /// The round the offense happened in.
        id: RoundId,
        /// The offender.
        outpoint: OutPoint,
        /// The offense.
        offense: Offense,
    },
}

impl RoundEvent {
    /// The round the event concerns.
    pub fn round_id(&self) -> RoundId {
        match self {
            RoundEvent::RoundCreated { id, .. }
            | RoundEvent::PhaseChanged { id, .. }
            | RoundEvent::RoundEnded { id, .. }
            | RoundEvent::InputRemoved { id, .. }
            | RoundEvent::InputBanned { id, .. } => *id,
        }
    }
}
