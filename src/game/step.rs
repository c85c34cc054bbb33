//! Fighter Simulation Step
//!
//! The single pure function both client and server run:
//! `step(state, input, dt_ms, stage, constants) -> state'`.
//!
//! ## Per-tick order
//!
//! 1. Timers (action timer, dodge cooldown, drop grace)
//! 2. Capture last tick's contact, reset contact flags
//! 3. Input handlers: wall, horizontal, jump, fast fall, dodge, attack
//! 4. Velocity integration (soft speed cap, mode friction, fall cap)
//! 5. Sub-stepped movement with collision after every slice
//!
//! No I/O, no globals, no allocation. Invalid `dt_ms` returns the state
//! unchanged; steps longer than [`MAX_STEP_MS`] are clamped to it.

use std::sync::Arc;

use crate::core::vec2::Vec2;
use crate::game::collision::resolve_stage;
use crate::game::constants::KinematicConstants;
use crate::game::input::InputCommand;
use crate::game::stage::{PlatformId, PlatformKind, StageGeometry};
use crate::game::state::{Action, AttackDirection, AttackKind, FighterState};

/// Longest step simulated in one call (ms). Matches the authoritative
/// loop's accumulator cap.
pub const MAX_STEP_MS: f64 = 250.0;

// =============================================================================
// CONTACT SNAPSHOT
// =============================================================================

/// Contact flags as left by the previous tick's collision resolution.
///
/// Handlers read this instead of the live flags, which are cleared before
/// movement and rebuilt by this tick's collision pass.
#[derive(Clone, Copy, Debug)]
struct Contact {
    grounded: bool,
    touching_wall: bool,
    wall_side: i8,
    platform: Option<PlatformId>,
}

impl Contact {
    fn capture(state: &FighterState) -> Self {
        Self {
            grounded: state.grounded,
            touching_wall: state.touching_wall,
            wall_side: state.wall_side,
            platform: state.current_platform,
        }
    }
}

// =============================================================================
// STEP
// =============================================================================

/// Advance one fighter by `dt_ms`.
///
/// `input` of `None` means no command arrived for this tick; gravity and
/// friction still apply. `dt_ms` above [`MAX_STEP_MS`] is clamped.
pub fn step(
    state: &FighterState,
    input: Option<&InputCommand>,
    dt_ms: f64,
    stage: &StageGeometry,
    constants: &KinematicConstants,
) -> FighterState {
    if !dt_ms.is_finite() || dt_ms <= 0.0 || state.is_eliminated() {
        return *state;
    }

    let dt_ms = dt_ms.min(MAX_STEP_MS);
    let mut s = *state;
    let idle = InputCommand::idle();
    let input = input.unwrap_or(&idle);

    // 1. Timers
    update_timers(&mut s, dt_ms, constants);

    // 2. Contact
    let contact = Contact::capture(&s);
    s.grounded = false;
    s.touching_wall = false;
    s.wall_side = 0;

    let mut accel = Vec2::new(0.0, constants.gravity);

    // 3. Input
    match s.action {
        Action::HitStun { .. } | Action::Victory | Action::GroundPound { .. } => {
            s.running = false;
        }
        _ => {
            handle_wall(&mut s, input, &contact, constants);
            handle_horizontal(&mut s, input, &contact, &mut accel, constants);
            handle_jump(&mut s, input, &contact, stage, constants);
            handle_fast_fall(&mut s, input, &contact, constants);
            handle_dodge(&mut s, input, &contact, constants);
            handle_attack(&mut s, input, &contact, constants);
        }
    }
    s.was_jump_held = input.jump_held;

    // 4. Velocity
    integrate_velocity(&mut s, accel, dt_ms / 1000.0, &contact, constants);

    // 5. Movement + collision
    integrate_position(&mut s, dt_ms, stage, constants);

    s
}

// =============================================================================
// TIMERS
// =============================================================================

fn update_timers(s: &mut FighterState, dt_ms: f64, constants: &KinematicConstants) {
    if s.dodge_cooldown_ms > 0.0 {
        s.dodge_cooldown_ms = (s.dodge_cooldown_ms - dt_ms).max(0.0);
    }

    s.action = match s.action {
        Action::Dodge { remaining_ms, spot, direction } => {
            let remaining_ms = remaining_ms - dt_ms;
            if remaining_ms <= 0.0 {
                s.dodge_cooldown_ms = constants.dodge_cooldown_ms;
                Action::Free
            } else {
                Action::Dodge { remaining_ms, spot, direction }
            }
        }
        Action::Charging { held_ms, direction } => {
            let held_ms = held_ms + dt_ms;
            if held_ms >= constants.charge_max_ms {
                heavy_release(1.0, direction, constants)
            } else {
                Action::Charging { held_ms, direction }
            }
        }
        Action::Attack { kind, direction, remaining_ms, charge, has_hit } => {
            let remaining_ms = remaining_ms - dt_ms;
            if remaining_ms <= 0.0 {
                Action::AttackRecovery { remaining_ms: constants.attack_recovery_ms }
            } else {
                Action::Attack { kind, direction, remaining_ms, charge, has_hit }
            }
        }
        // Ends on landing, not on a timer
        Action::GroundPound { startup_ms, has_hit } => Action::GroundPound {
            startup_ms: (startup_ms - dt_ms).max(0.0),
            has_hit,
        },
        Action::AttackRecovery { remaining_ms } => {
            countdown(remaining_ms, dt_ms, |remaining_ms| Action::AttackRecovery { remaining_ms })
        }
        Action::Recovery { remaining_ms } => {
            countdown(remaining_ms, dt_ms, |remaining_ms| Action::Recovery { remaining_ms })
        }
        Action::HitStun { remaining_ms } => {
            countdown(remaining_ms, dt_ms, |remaining_ms| Action::HitStun { remaining_ms })
        }
        Action::Respawning { remaining_ms } => {
            countdown(remaining_ms, dt_ms, |remaining_ms| Action::Respawning { remaining_ms })
        }
        other => other,
    };

    if s.drop_grace_ms > 0.0 {
        s.drop_grace_ms -= dt_ms;
        if s.drop_grace_ms <= 0.0 {
            s.drop_grace_ms = 0.0;
            s.dropping_through = None;
        }
    }
}

#[inline]
fn countdown(remaining_ms: f64, dt_ms: f64, keep: impl FnOnce(f64) -> Action) -> Action {
    let remaining_ms = remaining_ms - dt_ms;
    if remaining_ms <= 0.0 {
        Action::Free
    } else {
        keep(remaining_ms)
    }
}

/// Heavy attack released with `charge` in `[0, 1]`.
fn heavy_release(charge: f64, direction: AttackDirection, constants: &KinematicConstants) -> Action {
    Action::Attack {
        kind: AttackKind::Heavy,
        direction,
        remaining_ms: constants.heavy_attack_duration_ms,
        charge: charge.clamp(0.0, 1.0),
        has_hit: false,
    }
}

// =============================================================================
// INPUT HANDLERS
// =============================================================================

fn handle_wall(s: &mut FighterState, input: &InputCommand, contact: &Contact, constants: &KinematicConstants) {
    if contact.grounded || !contact.touching_wall {
        s.wall_sliding = false;
        return;
    }

    let pushing_wall = (contact.wall_side == -1 && input.move_left)
        || (contact.wall_side == 1 && input.move_right);

    if pushing_wall && s.velocity.y > 0.0 && !s.wall_touches_exhausted {
        s.wall_sliding = true;
        s.fast_falling = false;
        if s.velocity.y > constants.wall_slide_speed {
            s.velocity.y = constants.wall_slide_speed;
        }
    } else {
        s.wall_sliding = false;
    }
}

fn handle_horizontal(
    s: &mut FighterState,
    input: &InputCommand,
    contact: &Contact,
    accel: &mut Vec2,
    constants: &KinematicConstants,
) {
    let locked = s.wall_sliding
        || matches!(
            s.action,
            Action::Dodge { .. } | Action::Attack { .. } | Action::Charging { .. }
        );
    if locked {
        s.running = false;
        return;
    }

    let dir = input.horizontal();
    s.running = contact.grounded && input.has_horizontal() && input.dodge_held;

    let mut force = constants.move_accel;
    if s.running {
        force *= constants.run_accel_mult;
    }

    if dir != 0 {
        s.facing = dir;
        accel.x += dir as f64 * force;
    }
}

fn handle_jump(
    s: &mut FighterState,
    input: &InputCommand,
    contact: &Contact,
    stage: &StageGeometry,
    constants: &KinematicConstants,
) {
    if matches!(s.action, Action::Dodge { .. } | Action::Charging { .. }) {
        return;
    }

    // Platform drop
    if input.move_down && input.jump {
        if let Some(id) = contact.platform {
            match stage.platform(id).map(|p| p.kind) {
                Some(PlatformKind::Soft) => {
                    s.dropping_through = Some(id);
                    s.drop_grace_ms = constants.platform_drop_grace_ms;
                    s.current_platform = None;
                    s.position.y += 1.0;
                    s.velocity.y = constants.drop_through_speed;
                    return;
                }
                Some(PlatformKind::Solid) => {}
                // Platform gone from the stage
                None => return,
            }
        }
    }

    // Recovery
    let recovery_allowed = matches!(s.action, Action::Free | Action::AttackRecovery { .. });
    if input.recovery
        && recovery_allowed
        && s.recovery_available
        && !contact.grounded
        && !contact.touching_wall
        && !s.wall_sliding
    {
        s.action = Action::Recovery { remaining_ms: constants.recovery_duration_ms };
        s.recovery_available = false;
        s.velocity.y = constants.recovery_force_y;
        s.velocity.x = s.facing as f64 * constants.recovery_force_x;
        s.wall_sliding = false;
        s.fast_falling = false;
        return;
    }

    if input.jump && !s.was_jump_held {
        perform_jump(s, contact, constants);
    }

    // Short hop
    if !input.jump_held && s.velocity.y < 0.0 && s.velocity.y > constants.short_hop_force {
        s.velocity.y *= 0.5;
    }
}

fn perform_jump(s: &mut FighterState, contact: &Contact, constants: &KinematicConstants) {
    let on_wall = s.wall_sliding || (contact.touching_wall && !contact.grounded);

    if on_wall {
        if s.air_actions < constants.max_air_actions {
            s.velocity.y = constants.wall_jump_force_y;
            s.velocity.x = -(contact.wall_side as f64) * constants.wall_jump_force_x;
            if contact.wall_side != 0 {
                s.facing = -contact.wall_side;
            }
            s.wall_sliding = false;
            s.wall_touches_exhausted = true;
            s.fast_falling = false;
            s.air_actions += 1;
        }
        return;
    }

    if contact.grounded {
        s.velocity.y = constants.jump_force;
        s.current_platform = None;
        return;
    }

    if s.jumps_remaining > 0 && s.air_actions < constants.max_air_actions {
        s.velocity.y = constants.double_jump_force;
        s.jumps_remaining -= 1;
        s.air_actions += 1;
        s.fast_falling = false;
    }
}

fn handle_fast_fall(s: &mut FighterState, input: &InputCommand, contact: &Contact, constants: &KinematicConstants) {
    if contact.grounded || s.wall_sliding || s.fast_falling || s.is_dodging() {
        return;
    }
    if input.move_down && s.velocity.y >= constants.fast_fall_threshold {
        s.fast_falling = true;
        s.velocity.y *= constants.fast_fall_multiplier;
    }
}

fn handle_dodge(s: &mut FighterState, input: &InputCommand, contact: &Contact, constants: &KinematicConstants) {
    if !input.dodge || s.dodge_cooldown_ms > 0.0 {
        return;
    }
    let allowed = matches!(
        s.action,
        Action::Free | Action::Attack { .. } | Action::AttackRecovery { .. } | Action::Charging { .. }
    );
    if !allowed {
        return;
    }

    s.running = false;
    if !input.has_horizontal() {
        s.action = Action::Dodge {
            remaining_ms: constants.spot_dodge_duration_ms,
            spot: true,
            direction: 0,
        };
        s.velocity.x = 0.0;
        if !contact.grounded {
            s.velocity.y *= constants.air_spot_dodge_damping;
        }
    } else {
        let direction = match input.horizontal() {
            0 => s.facing,
            d => d,
        };
        s.action = Action::Dodge {
            remaining_ms: constants.dodge_duration_ms,
            spot: false,
            direction,
        };
        s.velocity.x = direction as f64 * constants.dodge_speed();
        if !contact.grounded {
            s.velocity.y *= constants.air_dodge_damping;
        }
    }
}

fn handle_attack(s: &mut FighterState, input: &InputCommand, contact: &Contact, constants: &KinematicConstants) {
    match s.action {
        Action::Charging { held_ms, direction } => {
            if !input.heavy_attack_held {
                s.action = heavy_release(held_ms / constants.charge_max_ms, direction, constants);
            }
        }
        Action::Free => {
            let direction = AttackDirection::from_input(input);
            if input.light_attack {
                s.action = Action::Attack {
                    kind: AttackKind::Light,
                    direction,
                    remaining_ms: constants.light_attack_duration_ms,
                    charge: 0.0,
                    has_hit: false,
                };
                s.running = false;
            } else if input.heavy_attack {
                let down = direction == AttackDirection::Down
                    || (input.move_down && direction == AttackDirection::Neutral);
                if down && !contact.grounded {
                    start_ground_pound(s, constants);
                    return;
                }

                // Grounded down heavies swing to the side
                let direction = match direction {
                    AttackDirection::Down => AttackDirection::Side,
                    other => other,
                };
                s.action = if input.heavy_attack_held {
                    Action::Charging { held_ms: 0.0, direction }
                } else {
                    heavy_release(0.0, direction, constants)
                };
                s.running = false;
            }
        }
        _ => {}
    }
}

/// Freeze in the air for the startup; the dive and landing follow from
/// `integrate_velocity` and collision.
fn start_ground_pound(s: &mut FighterState, constants: &KinematicConstants) {
    s.action = Action::GroundPound {
        startup_ms: constants.ground_pound_startup_ms,
        has_hit: false,
    };
    s.velocity = Vec2::ZERO;
    s.running = false;
    s.fast_falling = false;
    s.wall_sliding = false;
}

// =============================================================================
// INTEGRATION
// =============================================================================

/// -1, 0 or +1 (`f64::signum` maps 0.0 to 1.0, which the speed cap must not).
#[inline]
fn sign(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

fn integrate_velocity(
    s: &mut FighterState,
    accel: Vec2,
    dt: f64,
    contact: &Contact,
    constants: &KinematicConstants,
) {
    // Suspended during startup, then a fixed-speed dive that ignores the fall cap
    if let Action::GroundPound { startup_ms, .. } = s.action {
        s.velocity = if startup_ms > 0.0 {
            Vec2::ZERO
        } else {
            Vec2::new(0.0, constants.ground_pound_speed)
        };
        return;
    }

    let mut max_speed = constants.max_speed;
    if s.running {
        max_speed *= constants.run_speed_mult;
    }

    // Soft cap: no extra push past max speed, existing overspeed decays via friction
    let exempt = s.is_dodging() || s.is_hit_stunned();
    let same_dir = sign(accel.x) == sign(s.velocity.x);
    let overspeed = s.velocity.x.abs() > max_speed;
    if exempt || !(same_dir && overspeed) {
        s.velocity.x += accel.x * dt;
    }
    s.velocity.y += accel.y * dt;

    let high_speed = s.velocity.x.abs() > constants.max_speed * 1.2;
    let mut friction = if s.running || (high_speed && contact.grounded) {
        constants.run_friction
    } else {
        constants.friction
    };

    match s.action {
        Action::Charging { .. } => {
            friction = constants.charge_friction;
            if !contact.grounded {
                s.velocity.y *= constants.charge_air_damping;
            }
        }
        Action::Attack { .. } => friction = constants.attack_friction,
        Action::AttackRecovery { .. } => friction = constants.attack_recovery_friction,
        Action::HitStun { .. } => friction = constants.hit_stun_friction,
        Action::Recovery { .. } => friction = 1.0,
        _ => {}
    }
    s.velocity.x *= friction;

    let fall_cap = if s.wall_sliding {
        constants.wall_slide_speed
    } else if s.fast_falling {
        constants.max_fall_speed * constants.fast_fall_multiplier
    } else {
        constants.max_fall_speed
    };
    if s.velocity.y > fall_cap {
        s.velocity.y = fall_cap;
    }
}

/// Upper bound on collision slices per step.
const MAX_SUB_STEPS: u32 = 256;

fn integrate_position(
    s: &mut FighterState,
    dt_ms: f64,
    stage: &StageGeometry,
    constants: &KinematicConstants,
) {
    let prev_bottom = s.bottom(constants);
    let slice_ms = if constants.sub_step_ms > 0.0 { constants.sub_step_ms } else { dt_ms };

    // Slice count is fixed up front; the last slice takes whatever is left
    let wanted = (dt_ms / slice_ms).ceil();
    let (slices, slice_ms) = if wanted > MAX_SUB_STEPS as f64 {
        (MAX_SUB_STEPS, dt_ms / MAX_SUB_STEPS as f64)
    } else {
        ((wanted as u32).max(1), slice_ms)
    };

    let mut remaining = dt_ms;
    for i in 0..slices {
        let slice = if i + 1 == slices { remaining } else { remaining.min(slice_ms) };
        let secs = slice / 1000.0;
        s.position.x += s.velocity.x * secs;
        s.position.y += s.velocity.y * secs;

        resolve_stage(s, stage, prev_bottom, constants);
        remaining -= slice;
    }

    if !s.grounded {
        s.current_platform = None;
    }
}

// =============================================================================
// SIMULATION HANDLE
// =============================================================================

/// Stage and constants bound together so callers pass one value around.
///
/// Cloning is cheap: the stage is shared.
#[derive(Clone, Debug)]
pub struct Simulation {
    stage: Arc<StageGeometry>,
    constants: KinematicConstants,
}

impl Simulation {
    /// Bind a stage and a constants table.
    pub fn new(stage: Arc<StageGeometry>, constants: KinematicConstants) -> Self {
        Self { stage, constants }
    }

    /// Stage geometry.
    pub fn stage(&self) -> &StageGeometry {
        &self.stage
    }

    /// Constants table.
    pub fn constants(&self) -> &KinematicConstants {
        &self.constants
    }

    /// Fresh fighter at a slot's spawn point.
    pub fn spawn(&self, slot: usize) -> FighterState {
        FighterState::new(self.stage.spawn_point(slot), &self.constants)
    }

    /// See [`step`].
    #[inline]
    pub fn step(&self, state: &FighterState, input: Option<&InputCommand>, dt_ms: f64) -> FighterState {
        step(state, input, dt_ms, &self.stage, &self.constants)
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new(Arc::new(StageGeometry::default_stage()), KinematicConstants::default())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::stage::{Platform, Rect};
    use crate::game::state::MacroState;
    use crate::FIXED_STEP_MS;
    use proptest::prelude::*;

    const FLOOR_Y: f64 = 887.5;

    fn sim() -> Simulation {
        Simulation::default()
    }

    /// Fighter resting on the main floor.
    fn grounded_at(x: f64, sim: &Simulation) -> FighterState {
        let mut f = FighterState::new(Vec2::new(x, FLOOR_Y), sim.constants());
        f.grounded = true;
        f.current_platform = Some(PlatformId(0));
        f.jumps_remaining = sim.constants().max_jumps - 1;
        f
    }

    fn run(sim: &Simulation, mut f: FighterState, input: InputCommand, ticks: usize) -> FighterState {
        for _ in 0..ticks {
            f = sim.step(&f, Some(&input), FIXED_STEP_MS);
        }
        f
    }

    #[test]
    fn test_ground_jump() {
        let sim = sim();
        let c = *sim.constants();
        let mut f = FighterState::new(Vec2::new(960.0, 780.0), &c);
        f.grounded = true;

        let next = sim.step(&f, Some(&InputCommand::jump()), FIXED_STEP_MS);

        assert!(!next.grounded);
        assert!(next.velocity.y < 0.0);
        assert_eq!(next.velocity.y, c.jump_force + c.gravity * (FIXED_STEP_MS / 1000.0));
        // Ground jump does not spend an air jump
        assert_eq!(next.jumps_remaining, f.jumps_remaining);
    }

    #[test]
    fn test_soft_platform_landing() {
        let c = KinematicConstants::default();
        let mut stage = StageGeometry::default_stage();
        stage.platforms = vec![Platform {
            id: PlatformId(5),
            kind: PlatformKind::Soft,
            rect: Rect::new(960.0, 712.0, 400.0, 24.0),
        }];
        let sim = Simulation::new(Arc::new(stage), c);

        // Feet at 695, falling
        let mut f = FighterState::new(Vec2::new(960.0, 695.0 - c.half_height()), &c);
        f.velocity.y = 600.0;
        f.jumps_remaining = 0;
        f.air_actions = 3;

        let next = sim.step(&f, None, FIXED_STEP_MS);

        assert_eq!(next.position.y, 700.0 - c.half_height());
        assert_eq!(next.velocity.y, 0.0);
        assert!(next.grounded);
        assert_eq!(next.jumps_remaining, c.max_jumps - 1);
        assert_eq!(next.air_actions, 0);
        assert_eq!(next.current_platform, Some(PlatformId(5)));
    }

    #[test]
    fn test_resting_fighter_stays_put() {
        let sim = sim();
        let f = grounded_at(700.0, &sim);
        let after = run(&sim, f, InputCommand::idle(), 120);

        assert_eq!(after.position, Vec2::new(700.0, FLOOR_Y));
        assert!(after.grounded);
        assert_eq!(after.current_platform, Some(PlatformId(0)));
    }

    #[test]
    fn test_walk_right_three_ticks() {
        let sim = sim();
        let f = grounded_at(550.0, &sim);
        let after = run(&sim, f, InputCommand::right(), 3);

        // vx: 51, 94.35, 131.1975; dx = vx / 60 per tick
        assert!((after.position.x - 554.609125).abs() < 1e-9);
        assert!((after.velocity.x - 131.1975).abs() < 1e-9);
        assert_eq!(after.position.y, FLOOR_Y);
        assert_eq!(after.facing, 1);
    }

    #[test]
    fn test_soft_speed_cap() {
        let sim = sim();
        let mut f = grounded_at(400.0, &sim);
        f.velocity.x = 1000.0;

        let next = sim.step(&f, Some(&InputCommand::right()), FIXED_STEP_MS);
        // No push past the cap; high speed on ground uses run friction
        assert_eq!(next.velocity.x, 1000.0 * sim.constants().run_friction);
    }

    #[test]
    fn test_held_jump_does_not_retrigger() {
        let sim = sim();
        let c = *sim.constants();
        let f = grounded_at(900.0, &sim);
        let held = InputCommand { jump: true, jump_held: true, ..InputCommand::idle() };

        let a = sim.step(&f, Some(&held), FIXED_STEP_MS);
        let b = sim.step(&a, Some(&held), FIXED_STEP_MS);
        assert_eq!(b.jumps_remaining, c.max_jumps - 1);
        assert_eq!(b.air_actions, 0);

        // Released then pressed again: air jump
        let c2 = sim.step(&b, Some(&InputCommand::idle()), FIXED_STEP_MS);
        let d = sim.step(&c2, Some(&held), FIXED_STEP_MS);
        assert_eq!(d.jumps_remaining, c.max_jumps - 2);
        assert_eq!(d.air_actions, 1);
    }

    #[test]
    fn test_short_hop_damps_rise() {
        let sim = sim();
        let mut f = FighterState::new(Vec2::new(900.0, 500.0), sim.constants());
        f.velocity.y = -500.0;

        let released = sim.step(&f, Some(&InputCommand::idle()), FIXED_STEP_MS);
        let held = sim.step(
            &f,
            Some(&InputCommand { jump_held: true, ..InputCommand::idle() }),
            FIXED_STEP_MS,
        );
        assert!(released.velocity.y > held.velocity.y);
    }

    #[test]
    fn test_air_jump_limit() {
        let sim = sim();
        let c = *sim.constants();
        let mut f = FighterState::new(Vec2::new(900.0, 300.0), &c);
        f.jumps_remaining = 1;

        let jumped = sim.step(&f, Some(&InputCommand::jump()), FIXED_STEP_MS);
        assert_eq!(jumped.jumps_remaining, 0);
        assert_eq!(jumped.air_actions, 1);

        let released = sim.step(&jumped, None, FIXED_STEP_MS);
        let again = sim.step(&released, Some(&InputCommand::jump()), FIXED_STEP_MS);
        assert_eq!(again.jumps_remaining, 0);
        assert_eq!(again.air_actions, 1);
        assert!(again.velocity.y > jumped.velocity.y);
    }

    #[test]
    fn test_platform_drop() {
        let sim = sim();
        let c = *sim.constants();
        // Resting on soft platform 1 (top 688)
        let mut f = FighterState::new(Vec2::new(660.0, 688.0 - c.half_height()), &c);
        f.grounded = true;
        f.current_platform = Some(PlatformId(1));

        let drop = InputCommand { move_down: true, jump: true, ..InputCommand::idle() };
        let mut next = sim.step(&f, Some(&drop), FIXED_STEP_MS);
        assert!(!next.grounded);
        assert_eq!(next.dropping_through, Some(PlatformId(1)));
        assert!(next.velocity.y > 0.0);

        for _ in 0..10 {
            next = sim.step(&next, None, FIXED_STEP_MS);
            assert_ne!(next.current_platform, Some(PlatformId(1)));
        }
        assert!(next.bottom(&c) > 712.0);
    }

    #[test]
    fn test_drop_from_missing_platform_is_noop() {
        let sim = sim();
        let c = *sim.constants();
        let mut f = FighterState::new(Vec2::new(660.0, 300.0), &c);
        f.grounded = true;
        f.current_platform = Some(PlatformId(42));

        let drop = InputCommand { move_down: true, jump: true, ..InputCommand::idle() };
        let next = sim.step(&f, Some(&drop), FIXED_STEP_MS);
        assert_eq!(next.dropping_through, None);
        assert!(next.velocity.y > 0.0);
        assert!(next.velocity.y < c.drop_through_speed);
    }

    #[test]
    fn test_hit_stun_ignores_input() {
        let sim = sim();
        let mut f = grounded_at(800.0, &sim);
        f.action = Action::HitStun { remaining_ms: 200.0 };

        let next = sim.step(&f, Some(&InputCommand::jump()), FIXED_STEP_MS);
        assert!(next.grounded);
        assert_eq!(next.velocity.y, 0.0);
        assert!(next.is_hit_stunned());
    }

    #[test]
    fn test_hit_stun_expires() {
        let sim = sim();
        let mut f = grounded_at(800.0, &sim);
        f.action = Action::HitStun { remaining_ms: 300.0 };

        let after = run(&sim, f, InputCommand::idle(), 19);
        assert_eq!(after.action, Action::Free);
    }

    #[test]
    fn test_dodge_then_cooldown() {
        let sim = sim();
        let c = *sim.constants();
        let f = grounded_at(600.0, &sim);
        let dodge = InputCommand { dodge: true, ..InputCommand::right() };

        let d = sim.step(&f, Some(&dodge), FIXED_STEP_MS);
        assert!(d.is_dodging());
        assert!(d.is_invincible(&c));
        assert!(d.position.x > 610.0);

        // 180ms dodge ends inside 11 ticks
        let done = run(&sim, d, InputCommand::idle(), 11);
        assert_eq!(done.action, Action::Free);
        assert!(done.dodge_cooldown_ms > 0.0);

        // Cooldown blocks the next dodge
        let blocked = sim.step(&done, Some(&dodge), FIXED_STEP_MS);
        assert!(!blocked.is_dodging());
    }

    #[test]
    fn test_spot_dodge() {
        let sim = sim();
        let mut f = grounded_at(600.0, &sim);
        f.velocity.x = 300.0;
        let dodge = InputCommand { dodge: true, ..InputCommand::idle() };

        let d = sim.step(&f, Some(&dodge), FIXED_STEP_MS);
        assert!(matches!(d.action, Action::Dodge { spot: true, direction: 0, .. }));
        assert_eq!(d.velocity.x, 0.0);
    }

    #[test]
    fn test_light_attack_lifecycle() {
        let sim = sim();
        let f = grounded_at(600.0, &sim);
        let light = InputCommand { light_attack: true, ..InputCommand::idle() };

        let a = sim.step(&f, Some(&light), FIXED_STEP_MS);
        assert!(matches!(a.action, Action::Attack { kind: AttackKind::Light, .. }));

        // Attacks lock facing and horizontal input
        let b = sim.step(&a, Some(&InputCommand::left()), FIXED_STEP_MS);
        assert_eq!(b.facing, 1);

        let c = run(&sim, b, InputCommand::idle(), 18);
        assert!(c.is_in_attack_recovery());
        let d = run(&sim, c, InputCommand::idle(), 60);
        assert_eq!(d.action, Action::Free);
    }

    #[test]
    fn test_heavy_charge_release() {
        let sim = sim();
        let f = grounded_at(600.0, &sim);
        let press = InputCommand { heavy_attack: true, heavy_attack_held: true, ..InputCommand::idle() };
        let hold = InputCommand { heavy_attack_held: true, ..InputCommand::idle() };

        let mut s = sim.step(&f, Some(&press), FIXED_STEP_MS);
        assert!(s.is_charging());
        s = run(&sim, s, hold, 30);
        assert!(s.is_charging());

        let released = sim.step(&s, Some(&InputCommand::idle()), FIXED_STEP_MS);
        match released.action {
            Action::Attack { kind: AttackKind::Heavy, charge, .. } => {
                assert!(charge > 0.45 && charge < 0.55, "charge {charge}");
            }
            other => panic!("expected heavy attack, got {other:?}"),
        }
    }

    #[test]
    fn test_heavy_charge_auto_releases() {
        let sim = sim();
        let f = grounded_at(600.0, &sim);
        let press = InputCommand { heavy_attack: true, heavy_attack_held: true, ..InputCommand::idle() };
        let hold = InputCommand { heavy_attack_held: true, ..InputCommand::idle() };

        let s = sim.step(&f, Some(&press), FIXED_STEP_MS);
        let s = run(&sim, s, hold, 61);
        assert!(matches!(s.action, Action::Attack { charge, .. } if charge == 1.0));
    }

    #[test]
    fn test_wall_slide_and_wall_jump() {
        let sim = sim();
        let c = *sim.constants();
        let stage = sim.stage().clone();
        let mut f = FighterState::new(Vec2::new(stage.wall_left + c.half_width(), 400.0), &c);
        f.touching_wall = true;
        f.wall_side = -1;
        f.velocity.y = 600.0;

        let slid = sim.step(&f, Some(&InputCommand::left()), FIXED_STEP_MS);
        assert!(slid.wall_sliding);
        assert!(slid.velocity.y <= c.wall_slide_speed);
        assert!(slid.touching_wall);

        let wj = InputCommand { jump: true, ..InputCommand::left() };
        let jumped = sim.step(&slid, Some(&wj), FIXED_STEP_MS);
        assert!(jumped.velocity.x > 0.0);
        assert!(jumped.velocity.y < 0.0);
        assert_eq!(jumped.facing, 1);
        assert!(jumped.wall_touches_exhausted);
        assert_eq!(jumped.air_actions, 1);
    }

    #[test]
    fn test_recovery() {
        let sim = sim();
        let c = *sim.constants();
        let mut f = FighterState::new(Vec2::new(900.0, 400.0), &c);
        f.facing = -1;
        let rec = InputCommand { recovery: true, ..InputCommand::idle() };

        let r = sim.step(&f, Some(&rec), FIXED_STEP_MS);
        assert!(r.is_recovering());
        assert!(!r.recovery_available);
        assert!(r.velocity.x < 0.0);
        assert!(r.velocity.y < 0.0);

        // Spent until landing
        let later = run(&sim, r, InputCommand::idle(), 20);
        let again = sim.step(&later, Some(&rec), FIXED_STEP_MS);
        assert!(!again.is_recovering());
    }

    #[test]
    fn test_respawning_refuses_attacks_but_moves() {
        let sim = sim();
        let mut f = grounded_at(600.0, &sim);
        f.action = Action::Respawning { remaining_ms: 500.0 };

        let cmd = InputCommand { light_attack: true, dodge: true, ..InputCommand::right() };
        let next = sim.step(&f, Some(&cmd), FIXED_STEP_MS);
        assert!(matches!(next.action, Action::Respawning { .. }));
        assert!(next.velocity.x > 0.0);
    }

    #[test]
    fn test_fast_fall() {
        let sim = sim();
        let c = *sim.constants();
        let mut f = FighterState::new(Vec2::new(900.0, 300.0), &c);
        f.velocity.y = 400.0;
        let down = InputCommand { move_down: true, ..InputCommand::idle() };

        let next = sim.step(&f, Some(&down), FIXED_STEP_MS);
        assert!(next.fast_falling);
        assert!(next.velocity.y > 400.0 * c.fast_fall_multiplier);
    }

    #[test]
    fn test_invalid_dt_is_noop() {
        let sim = sim();
        let mut f = FighterState::new(Vec2::new(900.0, 300.0), sim.constants());
        f.velocity = Vec2::new(100.0, 100.0);
        assert_eq!(sim.step(&f, None, 0.0), f);
        assert_eq!(sim.step(&f, None, -5.0), f);
        assert_eq!(sim.step(&f, None, f64::NAN), f);
    }

    #[test]
    fn test_huge_dt_is_clamped() {
        let sim = sim();
        let mut f = FighterState::new(Vec2::new(900.0, 300.0), sim.constants());
        f.velocity = Vec2::new(100.0, 100.0);

        let huge = sim.step(&f, None, 1e20);
        assert_eq!(huge, sim.step(&f, None, MAX_STEP_MS));
        assert!(huge.is_finite());
        assert_eq!(sim.step(&f, None, f64::MAX), huge);
    }

    #[test]
    fn test_sub_steps_cover_the_whole_tick() {
        let sim = sim();
        let mut f = FighterState::new(Vec2::new(900.0, 300.0), sim.constants());
        f.velocity = Vec2::new(120.0, 0.0);

        // Friction applies once per tick, before movement
        let next = sim.step(&f, None, FIXED_STEP_MS);
        let vx = 120.0 * sim.constants().friction;
        assert!((next.position.x - (900.0 + vx * FIXED_STEP_MS / 1000.0)).abs() < 1e-9);
    }

    #[test]
    fn test_ground_pound_lifecycle() {
        let sim = sim();
        let c = *sim.constants();
        let mut f = FighterState::new(Vec2::new(960.0, 300.0), &c);
        f.velocity = Vec2::new(200.0, 300.0);
        let slam = InputCommand {
            heavy_attack: true,
            heavy_attack_held: true,
            aim_down: true,
            move_down: true,
            ..InputCommand::idle()
        };
        let hold = InputCommand { heavy_attack: false, ..slam };

        // Starts at once, no charge, frozen in place
        let started = sim.step(&f, Some(&slam), FIXED_STEP_MS);
        assert_eq!(
            started.action,
            Action::GroundPound { startup_ms: c.ground_pound_startup_ms, has_hit: false }
        );
        assert_eq!(started.macro_state(), MacroState::GroundPound);
        assert_eq!(started.velocity, Vec2::ZERO);
        assert_eq!(started.position, f.position);

        // 200ms startup: still hanging after 11 more ticks
        let hanging = run(&sim, started, hold, 11);
        assert_eq!(hanging.position, f.position);
        assert!(matches!(hanging.action, Action::GroundPound { startup_ms, .. } if startup_ms > 0.0));

        // Then dives past the normal fall cap (the countdown can leave a
        // rounding sliver, so allow one extra tick)
        let diving = run(&sim, hanging, hold, 2);
        assert_eq!(diving.velocity, Vec2::new(0.0, c.ground_pound_speed));
        assert!(diving.velocity.y > c.max_fall_speed);
        assert!(diving.position.y > f.position.y);

        // Ends on the floor in landing lag
        let landed = run(&sim, diving, hold, 30);
        assert!(landed.grounded);
        assert_eq!(landed.position.y, FLOOR_Y);
        assert!(landed.is_in_attack_recovery() || landed.action == Action::Free);
        assert!(!landed.is_ground_pounding());
    }

    #[test]
    fn test_ground_pound_needs_air() {
        let sim = sim();
        let f = grounded_at(960.0, &sim);
        let slam = InputCommand { heavy_attack: true, aim_down: true, ..InputCommand::idle() };

        // Grounded down heavy swings to the side instead
        let next = sim.step(&f, Some(&slam), FIXED_STEP_MS);
        assert!(matches!(
            next.action,
            Action::Attack { kind: AttackKind::Heavy, direction: AttackDirection::Side, .. }
        ));
    }

    #[test]
    fn test_aim_sets_attack_direction() {
        let sim = sim();
        let f = grounded_at(600.0, &sim);

        let up = InputCommand { light_attack: true, aim_up: true, ..InputCommand::idle() };
        let a = sim.step(&f, Some(&up), FIXED_STEP_MS);
        assert!(matches!(a.action, Action::Attack { direction: AttackDirection::Up, .. }));

        let side = InputCommand { light_attack: true, aim_left: true, ..InputCommand::idle() };
        let b = sim.step(&f, Some(&side), FIXED_STEP_MS);
        assert!(matches!(b.action, Action::Attack { direction: AttackDirection::Side, .. }));

        // Charged heavies keep their aim through the release
        let press = InputCommand { heavy_attack: true, heavy_attack_held: true, aim_up: true, ..InputCommand::idle() };
        let charging = sim.step(&f, Some(&press), FIXED_STEP_MS);
        assert!(matches!(charging.action, Action::Charging { direction: AttackDirection::Up, .. }));
        let released = sim.step(&charging, Some(&InputCommand::idle()), FIXED_STEP_MS);
        assert!(matches!(
            released.action,
            Action::Attack { kind: AttackKind::Heavy, direction: AttackDirection::Up, .. }
        ));
    }

    #[test]
    fn test_eliminated_fighter_frozen() {
        let sim = sim();
        let mut f = FighterState::new(Vec2::new(900.0, 300.0), sim.constants());
        f.lives = 0;
        assert_eq!(sim.step(&f, Some(&InputCommand::jump()), FIXED_STEP_MS), f);
    }

    proptest! {
        #[test]
        fn prop_step_is_deterministic(
            bits in prop::collection::vec(0u16..0x7FFF, 1..120),
            x in 400.0f64..1500.0,
        ) {
            let sim = sim();
            let start = FighterState::new(Vec2::new(x, 300.0), sim.constants());

            let c = *sim.constants();
            let mut a = start;
            let mut b = start;
            for (i, raw) in bits.iter().enumerate() {
                let cmd = InputCommand::from_bits(*raw).with_sequence(i as u64 + 1);
                let before = a;
                a = sim.step(&a, Some(&cmd), FIXED_STEP_MS);
                b = sim.step(&b, Some(&cmd), FIXED_STEP_MS);

                prop_assert!(!a.grounded || a.velocity.y == 0.0);
                prop_assert!(a.jumps_remaining <= c.max_jumps);
                prop_assert!(a.air_actions <= c.max_air_actions);
                prop_assert!(a.damage >= before.damage);
                prop_assert!(a.facing == 1 || a.facing == -1);
            }
            prop_assert_eq!(a.compute_hash(), b.compute_hash());
            prop_assert_eq!(a.position.x.to_bits(), b.position.x.to_bits());
            prop_assert!(a.is_finite());
        }

        #[test]
        fn prop_soft_platform_is_one_way(
            x in 520.0f64..800.0,
            feet_below in 1.0f64..80.0,
            vy in -1400.0f64..-700.0,
        ) {
            let sim = sim();
            let c = *sim.constants();
            // Below soft platform 1 (top 688), moving up
            let mut f = FighterState::new(Vec2::new(x, 688.0 + feet_below - c.half_height()), &c);
            f.velocity.y = vy;
            // Jump held so the short-hop damping leaves vy alone
            let held = InputCommand { jump_held: true, ..InputCommand::idle() };

            for _ in 0..60 {
                let rising = f.velocity.y + c.gravity * (FIXED_STEP_MS / 1000.0) < 0.0;
                let next = sim.step(&f, Some(&held), FIXED_STEP_MS);
                if rising {
                    prop_assert!(!next.grounded);
                    prop_assert_ne!(next.current_platform, Some(PlatformId(1)));
                }
                f = next;
            }
        }
    }
}
