//! # Duel Arena Server
//!
//! Deterministic two-player fighter simulation with client-side prediction
//! and server reconciliation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    DUEL ARENA SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Deterministic primitives                 │
//! │  ├── vec2.rs      - 2D vector                                │
//! │  └── hash.rs      - State hashing for verification           │
//! │                                                              │
//! │  game/            - Simulation (deterministic)               │
//! │  ├── constants.rs - Kinematic constants table                │
//! │  ├── input.rs     - Input commands                           │
//! │  ├── stage.rs     - Platforms, walls, blast zone             │
//! │  ├── state.rs     - Fighter state and action machine         │
//! │  ├── collision.rs - Platform and wall resolution             │
//! │  ├── step.rs      - Pure step function                       │
//! │  ├── combat.rs    - Hits, knockback, KOs                     │
//! │  └── tick.rs      - Authoritative fixed-step loop            │
//! │                                                              │
//! │  prediction/      - Client side (deterministic)              │
//! │  ├── sequencer.rs - Sequence stamping and history            │
//! │  └── reconcile.rs - Divergence check, snap and replay        │
//! │                                                              │
//! │  network/         - Networking (non-deterministic)           │
//! │  ├── codec.rs     - Compact binary state frames              │
//! │  ├── protocol.rs  - Message types                            │
//! │  ├── session.rs   - Match session management                 │
//! │  └── server.rs    - WebSocket server                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/`, `game/` and `prediction/` modules are deterministic:
//! - One step function shared by server and client
//! - No HashMap (BTreeMap for sorted iteration)
//! - No system time; elapsed time is passed in
//! - No randomness
//!
//! Given the same start state, inputs and step size, server and client
//! produce bit-identical states, so replaying buffered inputs after a
//! correction reproduces what the server computed.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod prediction;
pub mod network;

// Re-export commonly used types
pub use core::vec2::Vec2;
pub use core::hash::StateHash;
pub use game::constants::KinematicConstants;
pub use game::input::InputCommand;
pub use game::stage::StageGeometry;
pub use game::state::{FighterId, FighterState, MacroState};
pub use game::step::{step, Simulation};
pub use game::tick::AuthoritativeLoop;
pub use prediction::{ClientPredictor, PredictionConfig, ReconcileOutcome};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;

/// Fixed simulation step (ms)
pub const FIXED_STEP_MS: f64 = 1000.0 / TICK_RATE as f64;
