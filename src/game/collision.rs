//! Collision Detection and Resolution
//!
//! Fighter-vs-stage resolution (solid platforms, soft platforms, walls)
//! and the attack hitbox helpers used by the combat pass.
//! All functions mutate a single fighter; nothing here reads other fighters.

use crate::game::constants::KinematicConstants;
use crate::game::stage::{Platform, PlatformId, Rect, StageGeometry};
use crate::game::state::{Action, AttackDirection, AttackKind, FighterState};

// =============================================================================
// LANDING
// =============================================================================

/// Apply every landing reset.
///
/// `platform` is recorded for drop-through; `None` for surfaces that
/// cannot be dropped through. A ground pound ends here and turns into
/// landing lag.
fn land(state: &mut FighterState, platform: Option<PlatformId>, constants: &KinematicConstants) {
    if state.is_ground_pounding() {
        state.action = Action::AttackRecovery {
            remaining_ms: constants.ground_pound_landing_lag_ms,
        };
        state.velocity.x *= 0.5;
    }
    state.velocity.y = 0.0;
    state.grounded = true;
    state.jumps_remaining = constants.max_jumps.saturating_sub(1);
    state.recovery_available = true;
    state.dropping_through = None;
    state.drop_grace_ms = 0.0;
    state.air_actions = 0;
    state.wall_touches_exhausted = false;
    state.wall_sliding = false;
    state.fast_falling = false;
    state.current_platform = platform;
}

// =============================================================================
// SOLID PLATFORMS
// =============================================================================

/// Resolve against a solid platform along the axis of least penetration.
///
/// Returns true if the fighter was pushed out.
pub fn resolve_solid(
    state: &mut FighterState,
    platform: &Platform,
    constants: &KinematicConstants,
) -> bool {
    let body = state.bounds(constants);
    let rect = &platform.rect;

    if !body.overlaps(rect) {
        return false;
    }

    let overlap_x = (body.width / 2.0 + rect.width / 2.0) - (state.position.x - rect.x).abs();
    let overlap_y = (body.height / 2.0 + rect.height / 2.0) - (state.position.y - rect.y).abs();

    if overlap_x < overlap_y {
        // Side hit: the platform acts as a wall
        if state.position.x < rect.x {
            state.position.x -= overlap_x;
            state.wall_side = 1;
        } else {
            state.position.x += overlap_x;
            state.wall_side = -1;
        }
        state.velocity.x = 0.0;
        state.touching_wall = true;
        true
    } else if state.velocity.y >= 0.0 && state.position.y < rect.y {
        // Snap to the surface rather than subtracting the overlap so a
        // resting fighter settles on the same bits every tick
        state.position.y = rect.top() - body.height / 2.0;
        land(state, Some(platform.id), constants);
        true
    } else if state.velocity.y < 0.0 && state.position.y > rect.y {
        // Ceiling
        state.position.y += overlap_y;
        state.velocity.y = 0.0;
        true
    } else {
        false
    }
}

// =============================================================================
// SOFT PLATFORMS
// =============================================================================

/// Resolve against a one-way platform.
///
/// Lands only while falling, and only if the feet crossed the top surface
/// this tick (`prev_bottom` is the feet position at the start of the tick)
/// or sit within a small band around it. Skipped entirely while dropping
/// through this platform.
///
/// Returns true if the fighter landed.
pub fn resolve_soft(
    state: &mut FighterState,
    platform: &Platform,
    prev_bottom: f64,
    constants: &KinematicConstants,
) -> bool {
    let body = state.bounds(constants);
    let rect = &platform.rect;
    let top = rect.top();
    let bottom = body.bottom();

    let x_overlap = body.overlaps_x(rect);
    let passed_through = x_overlap
        && prev_bottom <= top + constants.soft_landing_sweep_tolerance
        && bottom >= top;

    if !body.overlaps(rect) && !passed_through {
        return false;
    }

    if state.dropping_through == Some(platform.id) && state.drop_grace_ms > 0.0 {
        return false;
    }

    // One-way: never land while moving up
    if state.velocity.y < 0.0 {
        return false;
    }

    let feet_dist = bottom - top;
    let feet_near_top = feet_dist >= -constants.soft_landing_above
        && feet_dist <= constants.soft_landing_below;

    if !passed_through && !feet_near_top {
        return false;
    }

    state.position.y = top - constants.half_height();
    land(state, Some(platform.id), constants);
    true
}

// =============================================================================
// WALLS
// =============================================================================

/// Clamp the fighter inside the stage walls.
pub fn resolve_walls(state: &mut FighterState, stage: &StageGeometry, constants: &KinematicConstants) {
    let half_w = constants.half_width();
    let body = state.bounds(constants);

    if body.left() <= stage.wall_left {
        state.position.x = stage.wall_left + half_w;
        if state.velocity.x < 0.0 {
            state.velocity.x = 0.0;
        }
        state.touching_wall = true;
        state.wall_side = -1;
    } else if body.right() >= stage.wall_right {
        state.position.x = stage.wall_right - half_w;
        if state.velocity.x > 0.0 {
            state.velocity.x = 0.0;
        }
        state.touching_wall = true;
        state.wall_side = 1;
    }
}

/// Run every stage collision once, in stage order, then walls.
pub fn resolve_stage(
    state: &mut FighterState,
    stage: &StageGeometry,
    prev_bottom: f64,
    constants: &KinematicConstants,
) {
    use crate::game::stage::PlatformKind;

    for platform in &stage.platforms {
        match platform.kind {
            PlatformKind::Solid => {
                resolve_solid(state, platform, constants);
            }
            PlatformKind::Soft => {
                resolve_soft(state, platform, prev_bottom, constants);
            }
        }
    }
    resolve_walls(state, stage, constants);
}

// =============================================================================
// HITBOXES
// =============================================================================

/// Hitbox of an attack.
///
/// Neutral and side attacks sit in front of the fighter, up attacks above.
/// Down attacks sweep the feet on the ground and hang below in the air.
/// A ground pound covers the body and the space under it.
pub fn attack_hitbox(
    state: &FighterState,
    kind: AttackKind,
    direction: AttackDirection,
    constants: &KinematicConstants,
) -> Rect {
    let (w, h) = match kind {
        AttackKind::Light => constants.light_hitbox,
        AttackKind::Heavy => constants.heavy_hitbox,
        AttackKind::GroundPound => constants.ground_pound_hitbox,
    };
    let facing = state.facing as f64;

    let (dx, dy) = match (kind, direction) {
        (AttackKind::GroundPound, _) => (0.0, constants.ground_pound_offset_y),
        (_, AttackDirection::Neutral) => (facing * constants.neutral_attack_offset_x, 0.0),
        (_, AttackDirection::Side) => (facing * constants.attack_offset_x, 0.0),
        (_, AttackDirection::Up) => (0.0, constants.up_attack_offset_y),
        (_, AttackDirection::Down) if state.grounded => {
            (facing * constants.attack_offset_x, constants.half_height() - h / 2.0)
        }
        (_, AttackDirection::Down) => (0.0, constants.down_attack_offset_y),
    };

    Rect::new(state.position.x + dx, state.position.y + dy, w, h)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec2::Vec2;
    use crate::game::stage::PlatformKind;

    fn constants() -> KinematicConstants {
        KinematicConstants::default()
    }

    fn soft_at_top(top: f64) -> Platform {
        Platform {
            id: PlatformId(7),
            kind: PlatformKind::Soft,
            rect: Rect::new(500.0, top + 12.0, 400.0, 24.0),
        }
    }

    #[test]
    fn test_solid_landing() {
        let c = constants();
        let stage = StageGeometry::default_stage();
        let main = stage.platforms[0];
        // Feet 2 units into the floor (top = 930)
        let mut f = FighterState::new(Vec2::new(960.0, 930.0 - 42.5 + 2.0), &c);
        f.velocity = Vec2::new(0.0, 300.0);
        f.jumps_remaining = 0;
        f.air_actions = 4;

        assert!(resolve_solid(&mut f, &main, &c));
        assert_eq!(f.position.y, 887.5);
        assert_eq!(f.velocity.y, 0.0);
        assert!(f.grounded);
        assert_eq!(f.jumps_remaining, c.max_jumps - 1);
        assert_eq!(f.air_actions, 0);
        assert_eq!(f.current_platform, Some(main.id));
    }

    #[test]
    fn test_solid_side_hit_is_wall() {
        let c = constants();
        let stage = StageGeometry::default_stage();
        let main = stage.platforms[0];
        // Just past the left edge (x=360), level with the slab
        let mut f = FighterState::new(Vec2::new(360.0 - 30.0 + 3.0, 950.0), &c);
        f.velocity = Vec2::new(200.0, 0.0);

        assert!(resolve_solid(&mut f, &main, &c));
        assert_eq!(f.position.x, 330.0);
        assert_eq!(f.velocity.x, 0.0);
        assert!(f.touching_wall);
        assert_eq!(f.wall_side, 1);
        assert!(!f.grounded);
    }

    #[test]
    fn test_solid_ceiling() {
        let c = constants();
        let stage = StageGeometry::default_stage();
        let main = stage.platforms[0];
        // Head 3 units into the underside (bottom = 970)
        let mut f = FighterState::new(Vec2::new(960.0, 970.0 + 42.5 - 3.0), &c);
        f.velocity = Vec2::new(0.0, -500.0);

        assert!(resolve_solid(&mut f, &main, &c));
        assert_eq!(f.velocity.y, 0.0);
        assert!(!f.grounded);
        assert!((f.position.y - 1012.5).abs() < 1e-9);
    }

    #[test]
    fn test_soft_landing_swept() {
        let c = constants();
        let plat = soft_at_top(700.0);
        // Feet went from 690 to 720 in one tick
        let mut f = FighterState::new(Vec2::new(500.0, 720.0 - 42.5), &c);
        f.velocity = Vec2::new(0.0, 900.0);

        assert!(resolve_soft(&mut f, &plat, 690.0, &c));
        assert_eq!(f.position.y, 700.0 - 42.5);
        assert!(f.grounded);
        assert_eq!(f.current_platform, Some(PlatformId(7)));
    }

    #[test]
    fn test_soft_ignores_rising_fighter() {
        let c = constants();
        let plat = soft_at_top(700.0);
        let mut f = FighterState::new(Vec2::new(500.0, 705.0 - 42.5), &c);
        f.velocity = Vec2::new(0.0, -400.0);

        assert!(!resolve_soft(&mut f, &plat, 760.0, &c));
        assert!(!f.grounded);
    }

    #[test]
    fn test_soft_ignores_deep_overlap_from_below() {
        let c = constants();
        let plat = soft_at_top(700.0);
        // Feet 40 below the top, came from further below, now falling
        let mut f = FighterState::new(Vec2::new(500.0, 740.0 - 42.5), &c);
        f.velocity = Vec2::new(0.0, 50.0);

        assert!(!resolve_soft(&mut f, &plat, 745.0, &c));
        assert!(!f.grounded);
    }

    #[test]
    fn test_soft_skipped_while_dropping_through() {
        let c = constants();
        let plat = soft_at_top(700.0);
        let mut f = FighterState::new(Vec2::new(500.0, 702.0 - 42.5), &c);
        f.velocity = Vec2::new(0.0, 100.0);
        f.dropping_through = Some(PlatformId(7));
        f.drop_grace_ms = 150.0;

        assert!(!resolve_soft(&mut f, &plat, 699.0, &c));

        // Grace elapsed: lands again
        f.drop_grace_ms = 0.0;
        assert!(resolve_soft(&mut f, &plat, 699.0, &c));
    }

    #[test]
    fn test_walls_clamp() {
        let c = constants();
        let stage = StageGeometry::default_stage();
        let mut f = FighterState::new(Vec2::new(180.0, 500.0), &c);
        f.velocity.x = -600.0;

        resolve_walls(&mut f, &stage, &c);
        assert_eq!(f.position.x, stage.wall_left + 30.0);
        assert_eq!(f.velocity.x, 0.0);
        assert!(f.touching_wall);
        assert_eq!(f.wall_side, -1);

        let mut g = FighterState::new(Vec2::new(1740.0, 500.0), &c);
        g.velocity.x = 600.0;
        resolve_walls(&mut g, &stage, &c);
        assert_eq!(g.position.x, stage.wall_right - 30.0);
        assert_eq!(g.wall_side, 1);
    }

    #[test]
    fn test_hitbox_follows_facing() {
        let c = constants();
        let mut f = FighterState::new(Vec2::new(500.0, 800.0), &c);
        let right = attack_hitbox(&f, AttackKind::Light, AttackDirection::Side, &c);
        assert_eq!(right.x, 575.0);

        f.facing = -1;
        let left = attack_hitbox(&f, AttackKind::Heavy, AttackDirection::Side, &c);
        assert_eq!(left.x, 425.0);
        assert_eq!(left.width, 80.0);

        let neutral = attack_hitbox(&f, AttackKind::Light, AttackDirection::Neutral, &c);
        assert_eq!(neutral.x, 465.0);
    }

    #[test]
    fn test_hitbox_follows_aim() {
        let c = constants();
        let mut f = FighterState::new(Vec2::new(500.0, 800.0), &c);

        let up = attack_hitbox(&f, AttackKind::Light, AttackDirection::Up, &c);
        assert_eq!((up.x, up.y), (500.0, 725.0));

        let air_down = attack_hitbox(&f, AttackKind::Light, AttackDirection::Down, &c);
        assert_eq!((air_down.x, air_down.y), (500.0, 875.0));

        // On the ground the down attack sweeps along the floor line
        f.grounded = true;
        let ground_down = attack_hitbox(&f, AttackKind::Light, AttackDirection::Down, &c);
        assert_eq!(ground_down.x, 575.0);
        assert_eq!(ground_down.bottom(), f.bottom(&c));

        let pound = attack_hitbox(&f, AttackKind::GroundPound, AttackDirection::Down, &c);
        assert_eq!((pound.x, pound.y), (500.0, 840.0));
        assert_eq!((pound.width, pound.height), c.ground_pound_hitbox);
    }

    #[test]
    fn test_landing_ends_ground_pound() {
        let c = constants();
        let stage = StageGeometry::default_stage();
        let main = stage.platforms[0];
        let mut f = FighterState::new(Vec2::new(960.0, 930.0 - 42.5 + 20.0), &c);
        f.velocity = Vec2::new(100.0, c.ground_pound_speed);
        f.action = Action::GroundPound { startup_ms: 0.0, has_hit: false };

        assert!(resolve_solid(&mut f, &main, &c));
        assert!(f.grounded);
        assert_eq!(f.action, Action::AttackRecovery { remaining_ms: c.ground_pound_landing_lag_ms });
        assert_eq!(f.velocity, Vec2::new(50.0, 0.0));
    }
}
