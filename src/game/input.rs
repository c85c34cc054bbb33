//! Input Commands
//!
//! One frame's requested actions for one fighter.
//! A command is produced once per fixed tick and never mutated afterwards;
//! the sequence number is stamped by the sequencer before it leaves the client.

use serde::{Serialize, Deserialize};

// =============================================================================
// INPUT COMMAND
// =============================================================================

/// Requested actions for a single tick.
///
/// Field names follow the wire contract (camelCase on the JSON side).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputCommand {
    /// Move left held
    #[serde(default)]
    pub move_left: bool,
    /// Move right held
    #[serde(default)]
    pub move_right: bool,
    /// Down held (fast fall, platform drop)
    #[serde(default)]
    pub move_down: bool,
    /// Jump pressed this frame
    #[serde(default)]
    pub jump: bool,
    /// Jump button held (short-hop detection)
    #[serde(default)]
    pub jump_held: bool,
    /// Light attack pressed this frame
    #[serde(default)]
    pub light_attack: bool,
    /// Heavy attack pressed this frame
    #[serde(default)]
    pub heavy_attack: bool,
    /// Heavy attack button held (charging)
    #[serde(default)]
    pub heavy_attack_held: bool,
    /// Dodge pressed this frame
    #[serde(default)]
    pub dodge: bool,
    /// Dodge button held (run modifier)
    #[serde(default)]
    pub dodge_held: bool,
    /// Recovery pressed this frame
    #[serde(default)]
    pub recovery: bool,
    /// Aim up
    #[serde(default)]
    pub aim_up: bool,
    /// Aim down
    #[serde(default)]
    pub aim_down: bool,
    /// Aim left
    #[serde(default)]
    pub aim_left: bool,
    /// Aim right
    #[serde(default)]
    pub aim_right: bool,
    /// Sequence number assigned by the client sequencer.
    #[serde(default)]
    pub sequence: Option<u64>,
}

impl InputCommand {
    /// Bit positions for the packed representation.
    pub const BIT_MOVE_LEFT: u16 = 1 << 0;
    /// Move right bit
    pub const BIT_MOVE_RIGHT: u16 = 1 << 1;
    /// Move down bit
    pub const BIT_MOVE_DOWN: u16 = 1 << 2;
    /// Jump bit
    pub const BIT_JUMP: u16 = 1 << 3;
    /// Jump held bit
    pub const BIT_JUMP_HELD: u16 = 1 << 4;
    /// Light attack bit
    pub const BIT_LIGHT: u16 = 1 << 5;
    /// Heavy attack bit
    pub const BIT_HEAVY: u16 = 1 << 6;
    /// Heavy held bit
    pub const BIT_HEAVY_HELD: u16 = 1 << 7;
    /// Dodge bit
    pub const BIT_DODGE: u16 = 1 << 8;
    /// Dodge held bit
    pub const BIT_DODGE_HELD: u16 = 1 << 9;
    /// Recovery bit
    pub const BIT_RECOVERY: u16 = 1 << 10;
    /// Aim up bit
    pub const BIT_AIM_UP: u16 = 1 << 11;
    /// Aim down bit
    pub const BIT_AIM_DOWN: u16 = 1 << 12;
    /// Aim left bit
    pub const BIT_AIM_LEFT: u16 = 1 << 13;
    /// Aim right bit
    pub const BIT_AIM_RIGHT: u16 = 1 << 14;

    /// The "no buttons" command.
    pub const fn idle() -> Self {
        Self {
            move_left: false,
            move_right: false,
            move_down: false,
            jump: false,
            jump_held: false,
            light_attack: false,
            heavy_attack: false,
            heavy_attack_held: false,
            dodge: false,
            dodge_held: false,
            recovery: false,
            aim_up: false,
            aim_down: false,
            aim_left: false,
            aim_right: false,
            sequence: None,
        }
    }

    /// Copy of this command stamped with a sequence number.
    #[inline]
    pub const fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Any horizontal direction held.
    #[inline]
    pub fn has_horizontal(&self) -> bool {
        self.move_left || self.move_right
    }

    /// Horizontal intent: -1, 0 or +1 (both held cancels).
    #[inline]
    pub fn horizontal(&self) -> i8 {
        match (self.move_left, self.move_right) {
            (true, false) => -1,
            (false, true) => 1,
            _ => 0,
        }
    }

    /// Pack all buttons into 15 bits.
    pub fn to_bits(&self) -> u16 {
        let mut bits = 0u16;
        let pairs = [
            (self.move_left, Self::BIT_MOVE_LEFT),
            (self.move_right, Self::BIT_MOVE_RIGHT),
            (self.move_down, Self::BIT_MOVE_DOWN),
            (self.jump, Self::BIT_JUMP),
            (self.jump_held, Self::BIT_JUMP_HELD),
            (self.light_attack, Self::BIT_LIGHT),
            (self.heavy_attack, Self::BIT_HEAVY),
            (self.heavy_attack_held, Self::BIT_HEAVY_HELD),
            (self.dodge, Self::BIT_DODGE),
            (self.dodge_held, Self::BIT_DODGE_HELD),
            (self.recovery, Self::BIT_RECOVERY),
            (self.aim_up, Self::BIT_AIM_UP),
            (self.aim_down, Self::BIT_AIM_DOWN),
            (self.aim_left, Self::BIT_AIM_LEFT),
            (self.aim_right, Self::BIT_AIM_RIGHT),
        ];
        for (set, bit) in pairs {
            if set {
                bits |= bit;
            }
        }
        bits
    }

    /// Unpack buttons (sequence is left unset).
    pub fn from_bits(bits: u16) -> Self {
        let has = |bit: u16| bits & bit != 0;
        Self {
            move_left: has(Self::BIT_MOVE_LEFT),
            move_right: has(Self::BIT_MOVE_RIGHT),
            move_down: has(Self::BIT_MOVE_DOWN),
            jump: has(Self::BIT_JUMP),
            jump_held: has(Self::BIT_JUMP_HELD),
            light_attack: has(Self::BIT_LIGHT),
            heavy_attack: has(Self::BIT_HEAVY),
            heavy_attack_held: has(Self::BIT_HEAVY_HELD),
            dodge: has(Self::BIT_DODGE),
            dodge_held: has(Self::BIT_DODGE_HELD),
            recovery: has(Self::BIT_RECOVERY),
            aim_up: has(Self::BIT_AIM_UP),
            aim_down: has(Self::BIT_AIM_DOWN),
            aim_left: has(Self::BIT_AIM_LEFT),
            aim_right: has(Self::BIT_AIM_RIGHT),
            sequence: None,
        }
    }
}

// =============================================================================
// BUILDERS (tests, demo, bots)
// =============================================================================

impl InputCommand {
    /// Holding right.
    pub fn right() -> Self {
        Self { move_right: true, ..Self::idle() }
    }

    /// Holding left.
    pub fn left() -> Self {
        Self { move_left: true, ..Self::idle() }
    }

    /// Jump pressed (not held).
    pub fn jump() -> Self {
        Self { jump: true, ..Self::idle() }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle() {
        let cmd = InputCommand::idle();
        assert_eq!(cmd.to_bits(), 0);
        assert_eq!(cmd.sequence, None);
        assert_eq!(cmd, InputCommand::default());
    }

    #[test]
    fn test_horizontal() {
        assert_eq!(InputCommand::left().horizontal(), -1);
        assert_eq!(InputCommand::right().horizontal(), 1);
        let both = InputCommand { move_left: true, move_right: true, ..InputCommand::idle() };
        assert_eq!(both.horizontal(), 0);
        assert!(both.has_horizontal());
    }

    #[test]
    fn test_bits_cover_every_button() {
        let all = InputCommand::from_bits(0x7FFF);
        assert!(all.move_left && all.move_right && all.move_down);
        assert!(all.jump && all.jump_held && all.recovery);
        assert!(all.light_attack && all.heavy_attack && all.heavy_attack_held);
        assert!(all.dodge && all.dodge_held);
        assert!(all.aim_up && all.aim_down && all.aim_left && all.aim_right);
        assert_eq!(all.to_bits(), 0x7FFF);
    }

    #[test]
    fn test_with_sequence_does_not_touch_buttons() {
        let cmd = InputCommand::right().with_sequence(42);
        assert_eq!(cmd.sequence, Some(42));
        assert!(cmd.move_right);
        assert_eq!(cmd.to_bits(), InputCommand::BIT_MOVE_RIGHT);
    }

    #[test]
    fn test_json_wire_names() {
        let cmd = InputCommand { jump_held: true, ..InputCommand::jump() }.with_sequence(7);
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"jumpHeld\":true"));
        assert!(json.contains("\"sequence\":7"));

        // Missing fields default to false
        let parsed: InputCommand = serde_json::from_str(r#"{"moveRight":true,"sequence":3}"#).unwrap();
        assert!(parsed.move_right);
        assert!(!parsed.jump);
        assert_eq!(parsed.sequence, Some(3));
    }
}
