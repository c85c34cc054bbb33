//! Kinematic Constants
//!
//! The tunable physics table shared by client and server.
//! Pure data: both sides must run with identical values or determinism breaks,
//! so the server sends `KinematicConstants::hash` in its welcome message.
//!
//! Units: world units (pixels), milliseconds, world units / second.
//! Y grows downward, so negative vertical forces push up.

use serde::{Serialize, Deserialize};

use crate::core::hash::{StateHash, StateHasher};

/// Immutable table of simulation parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct KinematicConstants {
    // --- Gravity & ground movement ---
    /// Downward acceleration (units/s²)
    pub gravity: f64,
    /// Horizontal acceleration from movement input (units/s²)
    pub move_accel: f64,
    /// Per-tick horizontal velocity multiplier (default mode)
    pub friction: f64,
    /// Per-tick multiplier while running or sliding at high speed on ground
    pub run_friction: f64,
    /// Per-tick multiplier while charging a heavy attack
    pub charge_friction: f64,
    /// Per-tick multiplier while an attack is active
    pub attack_friction: f64,
    /// Per-tick multiplier during attack recovery
    pub attack_recovery_friction: f64,
    /// Per-tick multiplier while hit-stunned
    pub hit_stun_friction: f64,
    /// Soft cap on horizontal speed (units/s)
    pub max_speed: f64,
    /// Cap on downward speed when not fast-falling (units/s)
    pub max_fall_speed: f64,

    // --- Jumping ---
    /// Ground jump vertical velocity
    pub jump_force: f64,
    /// Threshold for short-hop damping when jump is released early
    pub short_hop_force: f64,
    /// Air jump vertical velocity
    pub double_jump_force: f64,
    /// Total jumps including the ground jump
    pub max_jumps: u8,
    /// Air actions allowed before landing
    pub max_air_actions: u8,

    // --- Fast fall ---
    /// Multiplier applied to vy when fast-fall starts
    pub fast_fall_multiplier: f64,
    /// Minimum downward speed before fast-fall can start
    pub fast_fall_threshold: f64,

    // --- Recovery ---
    /// Horizontal recovery velocity (multiplied by facing)
    pub recovery_force_x: f64,
    /// Vertical recovery velocity
    pub recovery_force_y: f64,
    /// Recovery duration (ms)
    pub recovery_duration_ms: f64,

    // --- Platforms ---
    /// Drop-through grace window (ms)
    pub platform_drop_grace_ms: f64,
    /// Downward velocity given when dropping through a platform
    pub drop_through_speed: f64,
    /// Swept landing tolerance above a soft platform top
    pub soft_landing_sweep_tolerance: f64,
    /// Feet may sit this far above a soft platform top and still land
    pub soft_landing_above: f64,
    /// Feet may sink this far below a soft platform top and still land
    pub soft_landing_below: f64,

    // --- Dodge ---
    /// Directional dodge travel distance
    pub dodge_distance: f64,
    /// Directional dodge duration (ms)
    pub dodge_duration_ms: f64,
    /// Spot dodge duration (ms)
    pub spot_dodge_duration_ms: f64,
    /// Cooldown after any dodge ends (ms)
    pub dodge_cooldown_ms: f64,
    /// Invincible window at the start of a dodge (ms)
    pub dodge_invincibility_ms: f64,
    /// Air vy damping when starting a directional dodge
    pub air_dodge_damping: f64,
    /// Air vy damping when starting a spot dodge
    pub air_spot_dodge_damping: f64,

    // --- Running ---
    /// Max speed multiplier while running
    pub run_speed_mult: f64,
    /// Acceleration multiplier while running
    pub run_accel_mult: f64,

    // --- Damage ---
    /// Damage accumulator cap
    pub max_damage: f64,
    /// Hit stun duration (ms)
    pub hit_stun_duration_ms: f64,
    /// Global knockback growth scaling
    pub knockback_scaling: f64,
    /// Invulnerability after respawn (ms)
    pub respawn_invulnerability_ms: f64,
    /// Lives at match start
    pub starting_lives: u8,

    // --- Body ---
    /// Fighter body width
    pub fighter_width: f64,
    /// Fighter body height
    pub fighter_height: f64,

    // --- Attacks ---
    /// Light attack active duration (ms)
    pub light_attack_duration_ms: f64,
    /// Light attack damage
    pub light_attack_damage: f64,
    /// Light attack fixed knockback
    pub light_base_knockback: f64,
    /// Light attack knockback growth
    pub light_knockback_growth: f64,
    /// Light hitbox size (w, h)
    pub light_hitbox: (f64, f64),
    /// Heavy attack active duration (ms)
    pub heavy_attack_duration_ms: f64,
    /// Heavy attack damage
    pub heavy_attack_damage: f64,
    /// Heavy attack fixed knockback
    pub heavy_base_knockback: f64,
    /// Heavy attack knockback growth
    pub heavy_knockback_growth: f64,
    /// Heavy hitbox size (w, h)
    pub heavy_hitbox: (f64, f64),
    /// Side attack hitbox center distance in front of the fighter
    pub attack_offset_x: f64,
    /// Neutral attack hitbox center distance in front of the fighter
    pub neutral_attack_offset_x: f64,
    /// Up attack hitbox center offset (negative is above)
    pub up_attack_offset_y: f64,
    /// Aerial down attack hitbox center offset
    pub down_attack_offset_y: f64,
    /// Up attack launch direction (forward, vertical), unit length
    pub up_knockback_dir: (f64, f64),
    /// Grounded down attack launch direction (forward, vertical), unit length
    pub down_knockback_dir: (f64, f64),
    /// Aerial down attack and ground pound launch direction, unit length
    pub spike_knockback_dir: (f64, f64),
    /// Recovery window after any attack (ms)
    pub attack_recovery_ms: f64,

    // --- Ground pound ---
    /// Suspended time before the dive (ms)
    pub ground_pound_startup_ms: f64,
    /// Dive speed (units/s, downward)
    pub ground_pound_speed: f64,
    /// Ground pound damage
    pub ground_pound_damage: f64,
    /// Ground pound fixed knockback
    pub ground_pound_base_knockback: f64,
    /// Ground pound knockback growth
    pub ground_pound_knockback_growth: f64,
    /// Ground pound hitbox size (w, h)
    pub ground_pound_hitbox: (f64, f64),
    /// Ground pound hitbox center offset below the body center
    pub ground_pound_offset_y: f64,
    /// Attack lag after a ground pound lands (ms)
    pub ground_pound_landing_lag_ms: f64,

    // --- Charging ---
    /// Max heavy charge time (ms)
    pub charge_max_ms: f64,
    /// Damage multiplier at full charge
    pub charge_damage_mult: f64,
    /// Knockback multiplier at full charge
    pub charge_knockback_mult: f64,
    /// Per-tick vy damping while charging airborne
    pub charge_air_damping: f64,

    // --- Walls ---
    /// Max downward speed while wall sliding
    pub wall_slide_speed: f64,
    /// Horizontal wall jump velocity (away from wall)
    pub wall_jump_force_x: f64,
    /// Vertical wall jump velocity
    pub wall_jump_force_y: f64,

    // --- Integration ---
    /// Positional sub-step (ms)
    pub sub_step_ms: f64,
}

impl Default for KinematicConstants {
    fn default() -> Self {
        Self {
            gravity: 3750.0,
            move_accel: 3600.0,
            friction: 0.85,
            run_friction: 0.93,
            charge_friction: 0.2,
            attack_friction: 0.95,
            attack_recovery_friction: 0.75,
            hit_stun_friction: 0.95,
            max_speed: 750.0,
            max_fall_speed: 1500.0,

            jump_force: -1050.0,
            short_hop_force: -600.0,
            double_jump_force: -975.0,
            max_jumps: 3,
            max_air_actions: 9,

            fast_fall_multiplier: 1.5,
            fast_fall_threshold: 150.0,

            recovery_force_x: 300.0,
            recovery_force_y: -1200.0,
            recovery_duration_ms: 300.0,

            platform_drop_grace_ms: 200.0,
            drop_through_speed: 100.0,
            soft_landing_sweep_tolerance: 10.0,
            soft_landing_above: 5.0,
            soft_landing_below: 15.0,

            dodge_distance: 225.0,
            dodge_duration_ms: 180.0,
            spot_dodge_duration_ms: 300.0,
            dodge_cooldown_ms: 800.0,
            dodge_invincibility_ms: 150.0,
            air_dodge_damping: 0.3,
            air_spot_dodge_damping: 0.2,

            run_speed_mult: 2.25,
            run_accel_mult: 1.2,

            max_damage: 999.0,
            hit_stun_duration_ms: 300.0,
            knockback_scaling: 5.0,
            respawn_invulnerability_ms: 1000.0,
            starting_lives: 3,

            fighter_width: 60.0,
            fighter_height: 85.0,

            light_attack_duration_ms: 300.0,
            light_attack_damage: 4.0,
            light_base_knockback: 250.0,
            light_knockback_growth: 7.0,
            light_hitbox: (60.0, 40.0),
            heavy_attack_duration_ms: 600.0,
            heavy_attack_damage: 9.0,
            heavy_base_knockback: 450.0,
            heavy_knockback_growth: 9.0,
            heavy_hitbox: (80.0, 60.0),
            attack_offset_x: 75.0,
            neutral_attack_offset_x: 35.0,
            up_attack_offset_y: -75.0,
            down_attack_offset_y: 75.0,
            // 80, 30 and 270 degrees, precomputed so no trig runs in the step
            up_knockback_dir: (0.17364817766693041, -0.984807753012208),
            down_knockback_dir: (0.8660254037844387, -0.5),
            spike_knockback_dir: (0.0, 1.0),
            attack_recovery_ms: 50.0 * 1000.0 / 60.0,

            ground_pound_startup_ms: 200.0,
            ground_pound_speed: 1800.0,
            ground_pound_damage: 8.0,
            ground_pound_base_knockback: 160.0,
            ground_pound_knockback_growth: 4.0,
            ground_pound_hitbox: (80.0, 90.0),
            ground_pound_offset_y: 40.0,
            ground_pound_landing_lag_ms: 200.0,

            charge_max_ms: 1000.0,
            charge_damage_mult: 2.0,
            charge_knockback_mult: 1.8,
            charge_air_damping: 0.5,

            wall_slide_speed: 225.0,
            wall_jump_force_x: 900.0,
            wall_jump_force_y: -975.0,

            sub_step_ms: 5.0,
        }
    }
}

impl KinematicConstants {
    /// Half of the fighter body height.
    #[inline]
    pub fn half_height(&self) -> f64 {
        self.fighter_height / 2.0
    }

    /// Half of the fighter body width.
    #[inline]
    pub fn half_width(&self) -> f64 {
        self.fighter_width / 2.0
    }

    /// Directional dodge speed (distance over duration).
    #[inline]
    pub fn dodge_speed(&self) -> f64 {
        self.dodge_distance / (self.dodge_duration_ms / 1000.0)
    }

    /// Fingerprint of the table.
    ///
    /// Sent to clients on join; a mismatch means the two simulations
    /// would diverge.
    pub fn hash(&self) -> StateHash {
        let mut h = StateHasher::new(b"DUEL_ARENA_CONSTANTS_V1");
        for value in [
            self.gravity, self.move_accel, self.friction, self.run_friction,
            self.charge_friction, self.attack_friction, self.attack_recovery_friction,
            self.hit_stun_friction, self.max_speed, self.max_fall_speed,
            self.jump_force, self.short_hop_force, self.double_jump_force,
            self.fast_fall_multiplier, self.fast_fall_threshold,
            self.recovery_force_x, self.recovery_force_y, self.recovery_duration_ms,
            self.platform_drop_grace_ms, self.drop_through_speed,
            self.soft_landing_sweep_tolerance, self.soft_landing_above, self.soft_landing_below,
            self.dodge_distance, self.dodge_duration_ms, self.spot_dodge_duration_ms,
            self.dodge_cooldown_ms, self.dodge_invincibility_ms,
            self.air_dodge_damping, self.air_spot_dodge_damping,
            self.run_speed_mult, self.run_accel_mult,
            self.max_damage, self.hit_stun_duration_ms, self.knockback_scaling,
            self.respawn_invulnerability_ms,
            self.fighter_width, self.fighter_height,
            self.light_attack_duration_ms, self.light_attack_damage,
            self.light_base_knockback, self.light_knockback_growth,
            self.light_hitbox.0, self.light_hitbox.1,
            self.heavy_attack_duration_ms, self.heavy_attack_damage,
            self.heavy_base_knockback, self.heavy_knockback_growth,
            self.heavy_hitbox.0, self.heavy_hitbox.1,
            self.attack_offset_x, self.neutral_attack_offset_x,
            self.up_attack_offset_y, self.down_attack_offset_y,
            self.up_knockback_dir.0, self.up_knockback_dir.1,
            self.down_knockback_dir.0, self.down_knockback_dir.1,
            self.spike_knockback_dir.0, self.spike_knockback_dir.1,
            self.attack_recovery_ms,
            self.ground_pound_startup_ms, self.ground_pound_speed,
            self.ground_pound_damage, self.ground_pound_base_knockback,
            self.ground_pound_knockback_growth,
            self.ground_pound_hitbox.0, self.ground_pound_hitbox.1,
            self.ground_pound_offset_y, self.ground_pound_landing_lag_ms,
            self.charge_max_ms, self.charge_damage_mult, self.charge_knockback_mult,
            self.charge_air_damping,
            self.wall_slide_speed, self.wall_jump_force_x, self.wall_jump_force_y,
            self.sub_step_ms,
        ] {
            h.update_f64(value);
        }
        h.update_u8(self.max_jumps);
        h.update_u8(self.max_air_actions);
        h.update_u8(self.starting_lives);
        h.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_sane() {
        let c = KinematicConstants::default();
        assert!(c.gravity > 0.0);
        assert!(c.jump_force < 0.0);
        assert!(c.short_hop_force > c.jump_force);
        assert!(c.dodge_invincibility_ms < c.dodge_duration_ms);
        assert!(c.sub_step_ms > 0.0);
        assert_eq!(c.max_jumps, 3);
    }

    #[test]
    fn test_dodge_speed() {
        let c = KinematicConstants::default();
        assert_eq!(c.dodge_speed(), 1250.0);
    }

    #[test]
    fn test_hash_detects_tuning_change() {
        let a = KinematicConstants::default();
        let mut b = a;
        assert_eq!(a.hash(), b.hash());

        b.gravity += 1.0;
        assert_ne!(a.hash(), b.hash());

        let mut d = a;
        d.ground_pound_speed += 1.0;
        assert_ne!(a.hash(), d.hash());
    }

    #[test]
    fn test_knockback_dirs_are_unit() {
        let c = KinematicConstants::default();
        for (x, y) in [c.up_knockback_dir, c.down_knockback_dir, c.spike_knockback_dir] {
            assert!(((x * x + y * y) - 1.0).abs() < 1e-12);
        }
        // Up and grounded down launch upward; spikes go down
        assert!(c.up_knockback_dir.1 < 0.0);
        assert!(c.down_knockback_dir.1 < 0.0);
        assert!(c.spike_knockback_dir.1 > 0.0);
    }
}
