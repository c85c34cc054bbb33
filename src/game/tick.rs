//! Authoritative Loop
//!
//! Server-side room simulation. Every connected fighter has a FIFO of
//! received commands; each fixed tick consumes one (two when backlogged),
//! steps the fighter, then runs the ordered combat pass over the room.
//!
//! The loop never waits for input: an empty queue steps with no command.

use std::collections::{BTreeMap, VecDeque};

use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};

use crate::core::hash::{compute_state_hash, StateHash};
use crate::game::combat::{check_blast_zones, decide_winner, resolve_hits, HitEvent, KoEvent};
use crate::game::input::InputCommand;
use crate::game::state::{FighterId, FighterState};
use crate::game::step::Simulation;
use crate::FIXED_STEP_MS;

/// Per-fighter queue cap; overflow drops the oldest command.
pub const MAX_QUEUED_INPUTS: usize = 64;

/// Queue depth above which a tick drains extra commands.
pub const CATCH_UP_THRESHOLD: usize = 2;

/// Most commands consumed for one fighter in one tick.
pub const MAX_COMMANDS_PER_TICK: usize = 2;

/// Accumulator cap (ms). Time beyond this after a stall is dropped.
pub const MAX_ACCUMULATED_MS: f64 = 250.0;

// =============================================================================
// PER-FIGHTER STATE
// =============================================================================

/// A fighter as the server tracks it.
#[derive(Clone, Debug)]
pub struct AuthoritativeFighter {
    /// Simulation state
    pub state: FighterState,
    /// Spawn slot
    pub slot: usize,
    /// Pending commands, oldest first
    queue: VecDeque<InputCommand>,
    /// Sequence of the last command actually stepped
    pub last_processed_sequence: Option<u64>,
    /// Commands dropped on queue overflow
    pub dropped_inputs: u64,
    /// Commands discarded for a sequence regression
    pub rejected_inputs: u64,
}

impl AuthoritativeFighter {
    fn new(state: FighterState, slot: usize) -> Self {
        Self {
            state,
            slot,
            queue: VecDeque::with_capacity(MAX_QUEUED_INPUTS),
            last_processed_sequence: None,
            dropped_inputs: 0,
            rejected_inputs: 0,
        }
    }

    /// Commands waiting.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

// =============================================================================
// RESULTS
// =============================================================================

/// What one fixed tick produced.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Frame number after the tick
    pub frame: u64,
    /// Commands consumed per fighter
    pub consumed: BTreeMap<FighterId, usize>,
    /// Hits landed
    pub hits: Vec<HitEvent>,
    /// Blast zone KOs
    pub kos: Vec<KoEvent>,
    /// Set on the tick the match was decided
    pub winner: Option<FighterId>,
}

/// One fighter in a broadcast.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FighterSnapshot {
    /// Fighter id
    pub fighter_id: FighterId,
    /// Position X
    pub x: f64,
    /// Position Y
    pub y: f64,
    /// Velocity X
    pub vx: f64,
    /// Velocity Y
    pub vy: f64,
    /// +1 / -1
    pub facing_direction: i8,
    /// On a platform
    pub is_grounded: bool,
    /// Hitbox live
    pub is_attacking: bool,
    /// Stunned
    pub is_hit_stunned: bool,
    /// Damage percent
    pub damage_percent: f64,
    /// Lives left
    pub lives: u8,
    /// Last command the server stepped for this fighter
    pub last_processed_sequence: Option<u64>,
    /// Full state for reconciliation
    pub state: FighterState,
}

/// Room broadcast payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// Frame number
    pub frame: u64,
    /// Fighters in id order
    pub players: Vec<FighterSnapshot>,
}

impl RoomSnapshot {
    /// Look up one fighter.
    pub fn fighter(&self, id: FighterId) -> Option<&FighterSnapshot> {
        self.players.iter().find(|p| p.fighter_id == id)
    }
}

// =============================================================================
// LOOP
// =============================================================================

/// Authoritative simulation for one room.
#[derive(Debug)]
pub struct AuthoritativeLoop {
    sim: Simulation,
    fighters: BTreeMap<FighterId, AuthoritativeFighter>,
    frame: u64,
    accumulator_ms: f64,
    step_ms: f64,
    winner: Option<FighterId>,
}

impl AuthoritativeLoop {
    /// Create a loop with the default fixed step.
    pub fn new(sim: Simulation) -> Self {
        Self::with_step(sim, FIXED_STEP_MS)
    }

    /// Create a loop with an explicit fixed step (ms).
    ///
    /// Clients must predict with the same step or they will diverge.
    pub fn with_step(sim: Simulation, step_ms: f64) -> Self {
        Self {
            sim,
            fighters: BTreeMap::new(),
            frame: 0,
            accumulator_ms: 0.0,
            step_ms,
            winner: None,
        }
    }

    /// Current frame.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Fixed step (ms).
    pub fn step_ms(&self) -> f64 {
        self.step_ms
    }

    /// Bound simulation.
    pub fn simulation(&self) -> &Simulation {
        &self.sim
    }

    /// Decided winner, if any.
    pub fn winner(&self) -> Option<FighterId> {
        self.winner
    }

    /// Number of fighters.
    pub fn fighter_count(&self) -> usize {
        self.fighters.len()
    }

    /// Look up a fighter.
    pub fn fighter(&self, id: FighterId) -> Option<&AuthoritativeFighter> {
        self.fighters.get(&id)
    }

    /// Spawn a fighter at its slot's spawn point.
    ///
    /// Replaces any fighter already under `id`.
    pub fn add_fighter(&mut self, id: FighterId, slot: usize) {
        let state = self.sim.spawn(slot);
        self.fighters.insert(id, AuthoritativeFighter::new(state, slot));
        debug!(fighter = %id, slot, "Fighter added");
    }

    /// Remove a fighter with its queue and state.
    pub fn remove_fighter(&mut self, id: FighterId) -> Option<AuthoritativeFighter> {
        let removed = self.fighters.remove(&id);
        if removed.is_some() {
            debug!(fighter = %id, "Fighter removed");
        }
        removed
    }

    /// Queue a received command.
    ///
    /// Returns false if the fighter is unknown.
    pub fn enqueue(&mut self, id: FighterId, input: InputCommand) -> bool {
        let Some(fighter) = self.fighters.get_mut(&id) else {
            return false;
        };

        if fighter.queue.len() >= MAX_QUEUED_INPUTS {
            fighter.queue.pop_front();
            fighter.dropped_inputs += 1;
            warn!(
                fighter = %id,
                dropped = fighter.dropped_inputs,
                "Input queue full, dropping oldest command"
            );
        }
        fighter.queue.push_back(input);
        true
    }

    /// Feed wall-clock time; run as many fixed ticks as it covers.
    pub fn advance(&mut self, elapsed_ms: f64) -> Vec<TickResult> {
        if !elapsed_ms.is_finite() || elapsed_ms <= 0.0 {
            return Vec::new();
        }

        self.accumulator_ms = (self.accumulator_ms + elapsed_ms).min(MAX_ACCUMULATED_MS);

        let mut results = Vec::new();
        while self.accumulator_ms >= self.step_ms {
            self.accumulator_ms -= self.step_ms;
            results.push(self.fixed_update());
        }
        results
    }

    /// Run exactly one fixed tick.
    pub fn fixed_update(&mut self) -> TickResult {
        self.frame += 1;
        let mut result = TickResult { frame: self.frame, ..Default::default() };

        // 1. Step every fighter from its own queue
        for (id, fighter) in self.fighters.iter_mut() {
            let consumed = Self::consume_inputs(&self.sim, *id, fighter, self.step_ms);
            result.consumed.insert(*id, consumed);
        }

        // 2. Cross-fighter pass on the settled states
        let mut states: BTreeMap<FighterId, FighterState> =
            self.fighters.iter().map(|(id, f)| (*id, f.state)).collect();

        result.hits = resolve_hits(&mut states, self.sim.constants());
        result.kos = check_blast_zones(&mut states, self.sim.stage(), self.sim.constants());
        for ko in &result.kos {
            info!(frame = self.frame, fighter = %ko.fighter, lives = ko.lives_remaining, "KO");
        }

        if self.winner.is_none() {
            if let Some(winner) = decide_winner(&mut states) {
                info!(frame = self.frame, winner = %winner, "Match decided");
                self.winner = Some(winner);
                result.winner = Some(winner);
            }
        }

        for (id, state) in states {
            if let Some(f) = self.fighters.get_mut(&id) {
                f.state = state;
            }
        }

        result
    }

    fn consume_inputs(
        sim: &Simulation,
        id: FighterId,
        fighter: &mut AuthoritativeFighter,
        step_ms: f64,
    ) -> usize {
        let budget = if fighter.queue.len() > CATCH_UP_THRESHOLD {
            MAX_COMMANDS_PER_TICK
        } else {
            1
        };

        let mut consumed = 0;
        while consumed < budget {
            let Some(cmd) = fighter.queue.pop_front() else {
                break;
            };

            if let (Some(seq), Some(last)) = (cmd.sequence, fighter.last_processed_sequence) {
                if seq <= last {
                    fighter.rejected_inputs += 1;
                    debug!(fighter = %id, seq, last, "Discarding out-of-order command");
                    continue;
                }
            }

            fighter.state = sim.step(&fighter.state, Some(&cmd), step_ms);
            if cmd.sequence.is_some() {
                fighter.last_processed_sequence = cmd.sequence;
            }
            consumed += 1;
        }

        if consumed == 0 {
            fighter.state = sim.step(&fighter.state, None, step_ms);
        }
        consumed
    }

    /// Broadcast payload for the current frame.
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            frame: self.frame,
            players: self
                .fighters
                .iter()
                .map(|(id, f)| FighterSnapshot {
                    fighter_id: *id,
                    x: f.state.position.x,
                    y: f.state.position.y,
                    vx: f.state.velocity.x,
                    vy: f.state.velocity.y,
                    facing_direction: f.state.facing,
                    is_grounded: f.state.grounded,
                    is_attacking: f.state.is_attacking(),
                    is_hit_stunned: f.state.is_hit_stunned(),
                    damage_percent: f.state.damage,
                    lives: f.state.lives,
                    last_processed_sequence: f.last_processed_sequence,
                    state: f.state,
                })
                .collect(),
        }
    }

    /// Hash of the whole room at the current frame.
    pub fn state_hash(&self) -> StateHash {
        compute_state_hash(self.frame, |h| {
            h.update_u32(self.fighters.len() as u32);
            for (id, f) in &self.fighters {
                h.update_u8(id.as_u8());
                f.state.hash_into(h);
                h.update_u64(f.last_processed_sequence.unwrap_or(u64::MAX));
            }
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
