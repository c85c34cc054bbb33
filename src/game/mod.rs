//! Game Logic Module
//!
//! All fighter simulation code. Deterministic: no wall clock, no hash maps,
//! no randomness.
//!
//! ## Module Structure
//!
//! - `constants`: Kinematic constants table
//! - `input`: Per-tick input commands
//! - `stage`: Platforms, walls and blast zone
//! - `state`: Fighter state and its action machine
//! - `collision`: Platform and wall resolution
//! - `step`: The pure per-fighter step function
//! - `combat`: Hits, knockback, KOs and the winner check
//! - `tick`: Authoritative fixed-step loop

pub mod constants;
pub mod input;
pub mod stage;
pub mod state;
pub mod collision;
pub mod step;
pub mod combat;
pub mod tick;

// Re-export key types
pub use constants::KinematicConstants;
pub use input::InputCommand;
pub use stage::{Platform, PlatformId, PlatformKind, Rect, StageGeometry};
pub use state::{Action, AttackDirection, AttackKind, FighterId, FighterState, MacroState};
pub use step::{step, Simulation};
pub use combat::{HitEvent, KoEvent};
pub use tick::{AuthoritativeLoop, RoomSnapshot, TickResult};
