//! Fighter State Definitions
//!
//! The complete per-fighter simulation state. Every field here is part of
//! the snapshot that reconciliation restores, so adding a field means it
//! must also be hashed in [`FighterState::hash_into`].

use serde::{Serialize, Deserialize};

use crate::core::vec2::Vec2;
use crate::core::hash::{StateHash, StateHasher};
use crate::game::constants::KinematicConstants;
use crate::game::input::InputCommand;
use crate::game::stage::{PlatformId, Rect};

// =============================================================================
// FIGHTER ID
// =============================================================================

/// Fighter identifier within a room (doubles as the wire id byte).
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FighterId(pub u8);

impl FighterId {
    /// Create from raw id.
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// Raw id byte.
    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for FighterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "F{}", self.0)
    }
}

// =============================================================================
// ACTION STATE MACHINE
// =============================================================================

/// Attack strength.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AttackKind {
    /// Fast, low knockback
    Light = 0,
    /// Chargeable, high knockback
    Heavy = 1,
    /// Aerial slam, no charge
    GroundPound = 2,
}

/// Aim of an attack, read from the aim buttons when it starts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AttackDirection {
    /// No aim
    #[default]
    Neutral = 0,
    /// Left or right
    Side = 1,
    /// Up
    Up = 2,
    /// Down
    Down = 3,
}

impl AttackDirection {
    /// Resolve the aim buttons. Up and down held together cancel to neutral.
    pub fn from_input(input: &InputCommand) -> Self {
        match (input.aim_up, input.aim_down) {
            (true, false) => AttackDirection::Up,
            (false, true) => AttackDirection::Down,
            (false, false) if input.aim_left || input.aim_right => AttackDirection::Side,
            _ => AttackDirection::Neutral,
        }
    }
}

/// Timer-bound states that exclude each other.
///
/// Only one of these can constrain movement at a time; the enum makes the
/// illegal combinations (dodging while attacking, attacking while stunned)
/// unrepresentable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// No timed action; movement is driven by input and contact flags.
    #[default]
    Free,
    /// Dodging. `direction` is 0 for a spot dodge.
    Dodge {
        /// Time left (ms)
        remaining_ms: f64,
        /// In-place dodge
        spot: bool,
        /// -1, 0 or +1
        direction: i8,
    },
    /// Holding a heavy attack.
    Charging {
        /// Time held so far (ms)
        held_ms: f64,
        /// Aim the release will use
        direction: AttackDirection,
    },
    /// Attack hitbox is live.
    Attack {
        /// Strength
        kind: AttackKind,
        /// Aim
        direction: AttackDirection,
        /// Time left (ms)
        remaining_ms: f64,
        /// Charge factor in `[0, 1]`
        charge: f64,
        /// Already connected (one hit per swing)
        has_hit: bool,
    },
    /// Post-attack lag; movement allowed, no new attacks.
    AttackRecovery {
        /// Time left (ms)
        remaining_ms: f64,
    },
    /// Upward recovery burst.
    Recovery {
        /// Time left (ms)
        remaining_ms: f64,
    },
    /// Knocked back; input ignored.
    HitStun {
        /// Time left (ms)
        remaining_ms: f64,
    },
    /// Just respawned; invulnerable, no actions.
    Respawning {
        /// Time left (ms)
        remaining_ms: f64,
    },
    /// Match won; input ignored.
    Victory,
    /// Aerial slam: suspended for the startup, then dives until landing.
    GroundPound {
        /// Suspended time left (ms); the dive starts at zero
        startup_ms: f64,
        /// Already connected (one hit per slam)
        has_hit: bool,
    },
}

impl Action {
    /// Discriminant index (stable; used in hashing and mismatch checks).
    pub fn index(&self) -> u8 {
        match self {
            Action::Free => 0,
            Action::Dodge { .. } => 1,
            Action::Charging { .. } => 2,
            Action::Attack { .. } => 3,
            Action::AttackRecovery { .. } => 4,
            Action::Recovery { .. } => 5,
            Action::HitStun { .. } => 6,
            Action::Respawning { .. } => 7,
            Action::Victory => 8,
            Action::GroundPound { .. } => 9,
        }
    }

    /// Same variant, ignoring timers.
    #[inline]
    pub fn same_kind(&self, other: &Action) -> bool {
        self.index() == other.index()
    }
}

/// Derived high-level state for animation and display.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MacroState {
    /// Standing
    Idle = 0,
    /// Moving on ground
    Run = 1,
    /// Airborne, rising
    Jump = 2,
    /// Airborne, falling
    Fall = 3,
    /// Sliding down a wall
    WallSlide = 4,
    /// Grounded dodge
    Dodge = 5,
    /// Airborne dodge
    AirDodge = 6,
    /// Attack active or in recovery
    Attack = 7,
    /// Charging a heavy attack
    Charging = 8,
    /// Recovery burst
    Recovery = 9,
    /// Stunned
    HitStun = 10,
    /// Respawn invulnerability
    Respawning = 11,
    /// Winner pose
    Win = 12,
    /// Out of lives
    Eliminated = 13,
    /// Ground pound startup or dive
    GroundPound = 14,
}

impl MacroState {
    /// Number of variants (wire animation indices are `0..COUNT`).
    pub const COUNT: u8 = 15;

    /// Parse a wire animation index.
    pub fn from_index(index: u8) -> Option<Self> {
        use MacroState::*;
        const ALL: [MacroState; 15] = [
            Idle, Run, Jump, Fall, WallSlide, Dodge, AirDodge,
            Attack, Charging, Recovery, HitStun, Respawning, Win, Eliminated,
            GroundPound,
        ];
        ALL.get(index as usize).copied()
    }
}

// =============================================================================
// FIGHTER STATE
// =============================================================================

/// Complete state of a single fighter.
///
/// Mutated only by the step function and the combat pass.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FighterState {
    /// Body center
    pub position: Vec2,
    /// Velocity (units/s)
    pub velocity: Vec2,
    /// +1 right, -1 left
    pub facing: i8,

    // --- Contact / modifier flags ---
    /// Resting on a platform after the last resolution
    pub grounded: bool,
    /// Touching a wall or platform side
    pub touching_wall: bool,
    /// -1 wall on the left, +1 on the right, 0 none
    pub wall_side: i8,
    /// Sliding down a wall
    pub wall_sliding: bool,
    /// Running (dodge held while moving on ground)
    pub running: bool,
    /// Fast-falling
    pub fast_falling: bool,

    /// Timed action
    pub action: Action,

    // --- Independent timers (ms, count down to zero) ---
    /// Dodge cooldown
    pub dodge_cooldown_ms: f64,
    /// Drop-through grace
    pub drop_grace_ms: f64,

    // --- Counters ---
    /// Jumps left before landing
    pub jumps_remaining: u8,
    /// Air actions used since landing
    pub air_actions: u8,
    /// Wall jump used; no more wall slides until landing
    pub wall_touches_exhausted: bool,
    /// Recovery can be used
    pub recovery_available: bool,
    /// Jump was held last tick (edge detection)
    pub was_jump_held: bool,

    // --- Platforms (id lookups only) ---
    /// Platform currently stood on
    pub current_platform: Option<PlatformId>,
    /// Soft platform being dropped through
    pub dropping_through: Option<PlatformId>,

    // --- Match ---
    /// Damage percent (0..max_damage)
    pub damage: f64,
    /// Remaining lives
    pub lives: u8,
}

impl FighterState {
    /// Create a fresh fighter at a position.
    pub fn new(position: Vec2, constants: &KinematicConstants) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
            facing: 1,
            grounded: false,
            touching_wall: false,
            wall_side: 0,
            wall_sliding: false,
            running: false,
            fast_falling: false,
            action: Action::Free,
            dodge_cooldown_ms: 0.0,
            drop_grace_ms: 0.0,
            jumps_remaining: constants.max_jumps,
            air_actions: 0,
            wall_touches_exhausted: false,
            recovery_available: true,
            was_jump_held: false,
            current_platform: None,
            dropping_through: None,
            damage: 0.0,
            lives: constants.starting_lives,
        }
    }

    /// Body bounds.
    #[inline]
    pub fn bounds(&self, constants: &KinematicConstants) -> Rect {
        Rect::new(
            self.position.x,
            self.position.y,
            constants.fighter_width,
            constants.fighter_height,
        )
    }

    /// Feet Y.
    #[inline]
    pub fn bottom(&self, constants: &KinematicConstants) -> f64 {
        self.position.y + constants.half_height()
    }

    /// Dodging (spot or directional).
    #[inline]
    pub fn is_dodging(&self) -> bool {
        matches!(self.action, Action::Dodge { .. })
    }

    /// Attack hitbox live, or a ground pound under way.
    #[inline]
    pub fn is_attacking(&self) -> bool {
        matches!(self.action, Action::Attack { .. } | Action::GroundPound { .. })
    }

    /// Ground pound in startup or dive.
    #[inline]
    pub fn is_ground_pounding(&self) -> bool {
        matches!(self.action, Action::GroundPound { .. })
    }

    /// Charging a heavy attack.
    #[inline]
    pub fn is_charging(&self) -> bool {
        matches!(self.action, Action::Charging { .. })
    }

    /// In attack lag.
    #[inline]
    pub fn is_in_attack_recovery(&self) -> bool {
        matches!(self.action, Action::AttackRecovery { .. })
    }

    /// Recovery burst active.
    #[inline]
    pub fn is_recovering(&self) -> bool {
        matches!(self.action, Action::Recovery { .. })
    }

    /// Stunned.
    #[inline]
    pub fn is_hit_stunned(&self) -> bool {
        matches!(self.action, Action::HitStun { .. })
    }

    /// Out of lives.
    #[inline]
    pub fn is_eliminated(&self) -> bool {
        self.lives == 0
    }

    /// Cannot be hit right now.
    ///
    /// Dodges are invincible for the first `dodge_invincibility_ms` of their
    /// duration; respawn invulnerability lasts the whole window.
    pub fn is_invincible(&self, constants: &KinematicConstants) -> bool {
        match self.action {
            Action::Dodge { remaining_ms, spot, .. } => {
                let duration = if spot {
                    constants.spot_dodge_duration_ms
                } else {
                    constants.dodge_duration_ms
                };
                remaining_ms >= duration - constants.dodge_invincibility_ms
            }
            Action::Respawning { .. } => true,
            _ => false,
        }
    }

    /// Derived macro state.
    pub fn macro_state(&self) -> MacroState {
        if self.is_eliminated() {
            return MacroState::Eliminated;
        }
        match self.action {
            Action::Victory => MacroState::Win,
            Action::Respawning { .. } => MacroState::Respawning,
            Action::HitStun { .. } => MacroState::HitStun,
            Action::Recovery { .. } => MacroState::Recovery,
            Action::Charging { .. } => MacroState::Charging,
            Action::GroundPound { .. } => MacroState::GroundPound,
            Action::Attack { .. } | Action::AttackRecovery { .. } => MacroState::Attack,
            Action::Dodge { .. } => {
                if self.grounded {
                    MacroState::Dodge
                } else {
                    MacroState::AirDodge
                }
            }
            Action::Free => {
                if self.wall_sliding {
                    MacroState::WallSlide
                } else if !self.grounded {
                    if self.velocity.y < 0.0 {
                        MacroState::Jump
                    } else {
                        MacroState::Fall
                    }
                } else if self.velocity.x.abs() > 1.0 {
                    MacroState::Run
                } else {
                    MacroState::Idle
                }
            }
        }
    }

    /// Reset for respawn at `position`.
    ///
    /// Damage returns to zero; lives are left to the caller.
    pub fn respawn(&mut self, position: Vec2, constants: &KinematicConstants) {
        let lives = self.lives;
        let facing = self.facing;
        *self = Self::new(position, constants);
        self.lives = lives;
        self.facing = facing;
        self.action = Action::Respawning {
            remaining_ms: constants.respawn_invulnerability_ms,
        };
    }

    /// Hash every field into the hasher.
    ///
    /// Any field omitted here would let two diverged states compare equal.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_vec2(self.position);
        hasher.update_vec2(self.velocity);
        hasher.update_i8(self.facing);
        hasher.update_bool(self.grounded);
        hasher.update_bool(self.touching_wall);
        hasher.update_i8(self.wall_side);
        hasher.update_bool(self.wall_sliding);
        hasher.update_bool(self.running);
        hasher.update_bool(self.fast_falling);

        hasher.update_u8(self.action.index());
        match self.action {
            Action::Free | Action::Victory => {}
            Action::Dodge { remaining_ms, spot, direction } => {
                hasher.update_f64(remaining_ms);
                hasher.update_bool(spot);
                hasher.update_i8(direction);
            }
            Action::Charging { held_ms, direction } => {
                hasher.update_f64(held_ms);
                hasher.update_u8(direction as u8);
            }
            Action::Attack { kind, direction, remaining_ms, charge, has_hit } => {
                hasher.update_u8(kind as u8);
                hasher.update_u8(direction as u8);
                hasher.update_f64(remaining_ms);
                hasher.update_f64(charge);
                hasher.update_bool(has_hit);
            }
            Action::AttackRecovery { remaining_ms }
            | Action::Recovery { remaining_ms }
            | Action::HitStun { remaining_ms }
            | Action::Respawning { remaining_ms } => hasher.update_f64(remaining_ms),
            Action::GroundPound { startup_ms, has_hit } => {
                hasher.update_f64(startup_ms);
                hasher.update_bool(has_hit);
            }
        }

        hasher.update_f64(self.dodge_cooldown_ms);
        hasher.update_f64(self.drop_grace_ms);
        hasher.update_u8(self.jumps_remaining);
        hasher.update_u8(self.air_actions);
        hasher.update_bool(self.wall_touches_exhausted);
        hasher.update_bool(self.recovery_available);
        hasher.update_bool(self.was_jump_held);
        hasher.update_u32(self.current_platform.map(|p| p.0 as u32 + 1).unwrap_or(0));
        hasher.update_u32(self.dropping_through.map(|p| p.0 as u32 + 1).unwrap_or(0));
        hasher.update_f64(self.damage);
        hasher.update_u8(self.lives);
    }

    /// Standalone hash of this fighter.
    pub fn compute_hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_fighter();
        self.hash_into(&mut hasher);
        hasher.finalize()
    }

    /// Velocity and position are finite.
    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.velocity.is_finite()
    }
}

// =============================================================================
// TESTS
// =============================================================================
