//! # Mixpool Coordinator Engine
//!
//! Coordination engine for privacy-preserving coinjoin rounds: batches
//! mutually-untrusting participants into joint Bitcoin transactions, using
//! blinded credentials so inputs and outputs cannot be linked to each
//! other — not even by the coordinator itself.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    MIXPOOL COORDINATOR                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Leaf value types                         │
//! │  ├── units.rs     - Amounts, fee rates, vsize constants      │
//! │  ├── time_frame.rs- Phase timer intervals                    │
//! │  ├── coin.rs      - Outpoints, scripts, proofs, witnesses    │
//! │  └── hash.rs      - Domain-separated SHA-256 hashing         │
//! │                                                              │
//! │  round/           - Per-round state machine                  │
//! │  ├── phase.rs     - Phase ladder, terminal outcomes          │
//! │  ├── params.rs    - Frozen round parameters                  │
//! │  ├── alice.rs     - Registered inputs                        │
//! │  ├── bob.rs       - Registered outputs                       │
//! │  ├── construction.rs - Shared transaction assembly           │
//! │  └── round.rs     - The round instance                       │
//! │                                                              │
//! │  arena/           - Orchestration                            │
//! │  ├── mod.rs       - Step loop, timeouts, bans, blame rounds  │
//! │  ├── handlers.rs  - Remote-callable operations               │
//! │  ├── requests.rs  - Wire-facing payload types                │
//! │  ├── status.rs    - Versioned snapshots for polling          │
//! │  ├── events.rs    - Transition log                           │
//! │  └── max_suggested.rs - Advertised-amount ladder             │
//! │                                                              │
//! │  infra/           - External collaborators                   │
//! │  ├── rpc.rs       - Bitcoin node facade                      │
//! │  ├── prison.rs    - Ban list                                 │
//! │  ├── scripts.rs   - Used-script store                        │
//! │  └── credentials.rs - Credential issuer                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Adversarial Model
//!
//! Participants may stall, double-spend or refuse to sign at any point.
//! Every phase has a bounded time frame; failure to progress always
//! resolves to an abort or to ban-and-continue, and a round's failure
//! never takes down its siblings. The engine is in-memory and rebuilt
//! from scratch on restart; round identities are parameter hashes, so
//! they stay unguessable and restart-safe without any counter.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod arena;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;
pub mod round;

// Re-export commonly used types
pub use arena::Arena;
pub use arena::events::RoundEvent;
pub use arena::status::{RoundSnapshot, StatusResponse};
pub use config::CoordinatorConfig;
pub use core::units::{Amount, FeeRate};
pub use error::{Offense, ProtocolError};
pub use round::phase::{EndRoundState, Phase};
pub use round::round::{Round, RoundId};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
