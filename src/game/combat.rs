//! Combat Pass
//!
//! Cross-fighter effects, run once per tick after every fighter has stepped.
//! Hit tests read a snapshot taken in `FighterId` order, so the outcome does
//! not depend on which fighter was mutated first.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};

use crate::core::vec2::Vec2;
use crate::game::collision::attack_hitbox;
use crate::game::constants::KinematicConstants;
use crate::game::stage::StageGeometry;
use crate::game::state::{Action, AttackDirection, AttackKind, FighterId, FighterState};

// =============================================================================
// EVENTS
// =============================================================================

/// An attack connected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HitEvent {
    /// Who swung
    pub attacker: FighterId,
    /// Who got hit
    pub victim: FighterId,
    /// Attack strength
    pub kind: AttackKind,
    /// Damage dealt (after charge)
    pub damage: f64,
    /// Velocity given to the victim
    pub knockback: Vec2,
}

/// A fighter left the blast zone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KoEvent {
    /// Who was knocked out
    pub fighter: FighterId,
    /// Lives left after the KO
    pub lives_remaining: u8,
}

impl KoEvent {
    /// No lives left; the fighter is out of the match.
    pub fn eliminated(&self) -> bool {
        self.lives_remaining == 0
    }
}

// =============================================================================
// ATTACK NUMBERS
// =============================================================================

/// Linear interpolation from 1 to `full` by `charge`.
#[inline]
fn charge_mult(full: f64, charge: f64) -> f64 {
    1.0 + (full - 1.0) * charge
}

/// Damage dealt by an attack.
pub fn attack_damage(kind: AttackKind, charge: f64, constants: &KinematicConstants) -> f64 {
    let base = match kind {
        AttackKind::Light => constants.light_attack_damage,
        AttackKind::Heavy => constants.heavy_attack_damage,
        AttackKind::GroundPound => constants.ground_pound_damage,
    };
    base * charge_mult(constants.charge_damage_mult, charge)
}

/// Knockback speed against a victim carrying `victim_damage`.
pub fn knockback_magnitude(
    kind: AttackKind,
    charge: f64,
    victim_damage: f64,
    constants: &KinematicConstants,
) -> f64 {
    let (base, growth) = match kind {
        AttackKind::Light => (constants.light_base_knockback, constants.light_knockback_growth),
        AttackKind::Heavy => (constants.heavy_base_knockback, constants.heavy_knockback_growth),
        AttackKind::GroundPound => (
            constants.ground_pound_base_knockback,
            constants.ground_pound_knockback_growth,
        ),
    };
    let dealt = attack_damage(kind, charge, constants);
    let force = base + growth * constants.knockback_scaling * (victim_damage + dealt);
    force * charge_mult(constants.charge_knockback_mult, charge)
}

/// Knockback direction (unit length).
///
/// Neutral and side attacks push from attacker toward victim, falling back
/// to the attacker's facing when the two overlap exactly. Up and down
/// attacks launch along fixed angles mirrored by facing; aerial down
/// attacks and ground pounds spike.
fn knockback_direction(
    attacker: &FighterState,
    victim: &FighterState,
    kind: AttackKind,
    direction: AttackDirection,
    constants: &KinematicConstants,
) -> Vec2 {
    let facing = attacker.facing as f64;
    let angled = |(forward, vertical): (f64, f64)| Vec2::new(forward * facing, vertical);

    match (kind, direction) {
        (AttackKind::GroundPound, _) => angled(constants.spike_knockback_dir),
        (_, AttackDirection::Up) => angled(constants.up_knockback_dir),
        (_, AttackDirection::Down) if attacker.grounded => angled(constants.down_knockback_dir),
        (_, AttackDirection::Down) => angled(constants.spike_knockback_dir),
        _ => (victim.position - attacker.position)
            .normalize()
            .unwrap_or(Vec2::new(facing, 0.0)),
    }
}

// =============================================================================
// HITS
// =============================================================================

/// Resolve every live hitbox against every other fighter.
///
/// Each swing lands at most once. A ground pound is only live once its
/// startup has run out.
pub fn resolve_hits(
    fighters: &mut BTreeMap<FighterId, FighterState>,
    constants: &KinematicConstants,
) -> Vec<HitEvent> {
    let snapshot: Vec<(FighterId, FighterState)> =
        fighters.iter().map(|(id, s)| (*id, *s)).collect();
    let mut events = Vec::new();

    for (attacker_id, attacker) in &snapshot {
        let (kind, direction, charge) = match attacker.action {
            Action::Attack { kind, direction, charge, has_hit: false, .. } => (kind, direction, charge),
            Action::GroundPound { startup_ms, has_hit: false } if startup_ms <= 0.0 => {
                (AttackKind::GroundPound, AttackDirection::Down, 0.0)
            }
            _ => continue,
        };
        if attacker.is_eliminated() {
            continue;
        }
        let hitbox = attack_hitbox(attacker, kind, direction, constants);

        for (victim_id, victim_snap) in &snapshot {
            if victim_id == attacker_id
                || victim_snap.is_eliminated()
                || victim_snap.is_invincible(constants)
                || !hitbox.overlaps(&victim_snap.bounds(constants))
            {
                continue;
            }

            let Some(victim) = fighters.get_mut(victim_id) else {
                continue;
            };
            let damage = attack_damage(kind, charge, constants);
            let magnitude = knockback_magnitude(kind, charge, victim.damage, constants);
            let knockback =
                knockback_direction(attacker, victim_snap, kind, direction, constants).scale(magnitude);

            victim.damage = (victim.damage + damage).min(constants.max_damage);
            victim.velocity = knockback;
            victim.action = Action::HitStun { remaining_ms: constants.hit_stun_duration_ms };
            victim.running = false;
            victim.fast_falling = false;
            victim.wall_sliding = false;
            victim.air_actions = 0;

            if let Some(a) = fighters.get_mut(attacker_id) {
                match a.action {
                    Action::Attack { ref mut has_hit, .. }
                    | Action::GroundPound { ref mut has_hit, .. } => *has_hit = true,
                    _ => {}
                }
            }

            events.push(HitEvent {
                attacker: *attacker_id,
                victim: *victim_id,
                kind,
                damage,
                knockback,
            });
            break;
        }
    }

    events
}

// =============================================================================
// BLAST ZONES
// =============================================================================

/// Take a life from every fighter outside the blast zone.
///
/// Survivors respawn at the spawn point for their id; a fighter at zero
/// lives stays where it is, frozen by the step function.
pub fn check_blast_zones(
    fighters: &mut BTreeMap<FighterId, FighterState>,
    stage: &StageGeometry,
    constants: &KinematicConstants,
) -> Vec<KoEvent> {
    let mut events = Vec::new();

    for (id, fighter) in fighters.iter_mut() {
        if fighter.is_eliminated() || !stage.blast_zone.is_outside(fighter.position) {
            continue;
        }

        fighter.lives = fighter.lives.saturating_sub(1);
        if fighter.lives > 0 {
            fighter.respawn(stage.spawn_point(id.as_u8() as usize), constants);
        } else {
            fighter.velocity = Vec2::ZERO;
            fighter.action = Action::Free;
        }

        events.push(KoEvent { fighter: *id, lives_remaining: fighter.lives });
    }

    events
}

// =============================================================================
// MATCH RESULT
// =============================================================================

/// Winner once at most one fighter has lives left.
///
/// Needs at least two fighters; the winner is put into `Victory`.
pub fn decide_winner(fighters: &mut BTreeMap<FighterId, FighterState>) -> Option<FighterId> {
    if fighters.len() < 2 {
        return None;
    }

    let mut alive = fighters.iter().filter(|(_, f)| !f.is_eliminated());
    let winner = match (alive.next(), alive.next()) {
        (Some((id, _)), None) => *id,
        _ => return None,
    };

    if let Some(f) = fighters.get_mut(&winner) {
        f.action = Action::Victory;
    }
    Some(winner)
}

// =============================================================================
// TESTS
// =============================================================================
