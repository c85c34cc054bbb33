//! Compact State Codec
//!
//! Fixed-width binary encoding of broadcast state.
//!
//! ## Fighter layout (15 bytes, little endian)
//!
//! ```text
//! id:u8 | x:i16 | y:i16 | vx:i16 | vy:i16 | facing:i8 | flags:u8 | anim:u8 | damage:u16 | lives:u8
//! ```
//!
//! Positions and velocities are scaled by 10 and truncated (saturating).
//! Flags: bit0 grounded, bit1 attacking, bit2 hit-stunned, bit3 invincible.
//!
//! ## Frame layout
//!
//! ```text
//! frame:u64 | count:u8 | count * (fighter:15 | last_seq:u64) | own:u8 [| own_state:bincode]
//! ```
//!
//! `last_seq` 0 means nothing processed yet. The optional trailer carries the
//! recipient's own full state so reconciliation can snap every field.

use thiserror::Error;

use crate::game::constants::KinematicConstants;
use crate::game::state::{FighterId, FighterState, MacroState};
use crate::game::tick::RoomSnapshot;

/// Bytes per encoded fighter.
pub const FIGHTER_BYTES: usize = 15;

/// Bytes per fighter entry in a frame.
pub const FRAME_ENTRY_BYTES: usize = FIGHTER_BYTES + 8;

/// Frame header bytes.
pub const FRAME_HEADER_BYTES: usize = 9;

const SCALE: f64 = 10.0;

const FLAG_GROUNDED: u8 = 1 << 0;
const FLAG_ATTACKING: u8 = 1 << 1;
const FLAG_HIT_STUN: u8 = 1 << 2;
const FLAG_INVINCIBLE: u8 = 1 << 3;

// Delta gate thresholds
const POSITION_DELTA: f64 = 2.0;
const VELOCITY_DELTA: f64 = 1.0;
const DAMAGE_DELTA: f64 = 0.5;

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Buffer ended early.
    #[error("truncated buffer: needed {needed} bytes, had {available}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes present
        available: usize,
    },

    /// Animation byte outside the known range.
    #[error("unknown animation index {0}")]
    UnknownAnimation(u8),

    /// Own-state trailer failed to decode.
    #[error("invalid state trailer: {0}")]
    InvalidState(#[from] bincode::Error),
}

// =============================================================================
// FIGHTER
// =============================================================================

/// A fighter as it travels on the wire (values already quantized).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CompactFighter {
    /// Fighter id
    pub id: FighterId,
    /// Position X
    pub x: f64,
    /// Position Y
    pub y: f64,
    /// Velocity X
    pub vx: f64,
    /// Velocity Y
    pub vy: f64,
    /// +1 / -1
    pub facing: i8,
    /// On a platform
    pub grounded: bool,
    /// Hitbox live
    pub attacking: bool,
    /// Stunned
    pub hit_stunned: bool,
    /// Cannot be hit
    pub invincible: bool,
    /// Derived state for animation
    pub animation: MacroState,
    /// Damage percent (rounded)
    pub damage: f64,
    /// Lives left
    pub lives: u8,
}

/// Scale, truncate toward zero and saturate into i16.
#[inline]
fn quantize(v: f64) -> i16 {
    // `as` saturates and maps NaN to 0
    (v * SCALE) as i16
}

#[inline]
fn dequantize(q: i16) -> f64 {
    q as f64 / SCALE
}

impl CompactFighter {
    /// Quantize a full state.
    pub fn from_state(id: FighterId, state: &FighterState, constants: &KinematicConstants) -> Self {
        Self {
            id,
            x: dequantize(quantize(state.position.x)),
            y: dequantize(quantize(state.position.y)),
            vx: dequantize(quantize(state.velocity.x)),
            vy: dequantize(quantize(state.velocity.y)),
            facing: state.facing,
            grounded: state.grounded,
            attacking: state.is_attacking(),
            hit_stunned: state.is_hit_stunned(),
            invincible: state.is_invincible(constants),
            animation: state.macro_state(),
            damage: state.damage.round().clamp(0.0, u16::MAX as f64),
            lives: state.lives,
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.grounded {
            flags |= FLAG_GROUNDED;
        }
        if self.attacking {
            flags |= FLAG_ATTACKING;
        }
        if self.hit_stunned {
            flags |= FLAG_HIT_STUN;
        }
        if self.invincible {
            flags |= FLAG_INVINCIBLE;
        }
        flags
    }

    /// Append the 15-byte form.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.id.as_u8());
        out.extend_from_slice(&quantize(self.x).to_le_bytes());
        out.extend_from_slice(&quantize(self.y).to_le_bytes());
        out.extend_from_slice(&quantize(self.vx).to_le_bytes());
        out.extend_from_slice(&quantize(self.vy).to_le_bytes());
        out.push(self.facing as u8);
        out.push(self.flags());
        out.push(self.animation as u8);
        out.extend_from_slice(&(self.damage as u16).to_le_bytes());
        out.push(self.lives);
    }

    /// Parse the 15-byte form.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let b = take(bytes, 0, FIGHTER_BYTES)?;
        let i16_at = |i: usize| i16::from_le_bytes([b[i], b[i + 1]]);
        let flags = b[10];
        let animation = MacroState::from_index(b[11]).ok_or(CodecError::UnknownAnimation(b[11]))?;

        Ok(Self {
            id: FighterId(b[0]),
            x: dequantize(i16_at(1)),
            y: dequantize(i16_at(3)),
            vx: dequantize(i16_at(5)),
            vy: dequantize(i16_at(7)),
            facing: b[9] as i8,
            grounded: flags & FLAG_GROUNDED != 0,
            attacking: flags & FLAG_ATTACKING != 0,
            hit_stunned: flags & FLAG_HIT_STUN != 0,
            invincible: flags & FLAG_INVINCIBLE != 0,
            animation,
            damage: u16::from_le_bytes([b[12], b[13]]) as f64,
            lives: b[14],
        })
    }
}

/// Delta gate: is `next` different enough from `prev` to send?
pub fn should_send(prev: &CompactFighter, next: &CompactFighter) -> bool {
    (next.x - prev.x).abs() > POSITION_DELTA
        || (next.y - prev.y).abs() > POSITION_DELTA
        || (next.vx - prev.vx).abs() > VELOCITY_DELTA
        || (next.vy - prev.vy).abs() > VELOCITY_DELTA
        || (next.damage - prev.damage).abs() > DAMAGE_DELTA
        || next.facing != prev.facing
        || next.flags() != prev.flags()
        || next.animation != prev.animation
        || next.lives != prev.lives
}

fn take(bytes: &[u8], at: usize, len: usize) -> Result<&[u8], CodecError> {
    bytes.get(at..at + len).ok_or(CodecError::Truncated {
        needed: at + len,
        available: bytes.len(),
    })
}

// =============================================================================
// FRAME
// =============================================================================

/// One fighter entry of a decoded frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameEntry {
    /// Quantized fighter
    pub fighter: CompactFighter,
    /// Last command the server stepped for this fighter
    pub last_processed_sequence: Option<u64>,
}

/// A decoded frame.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedFrame {
    /// Server frame
    pub frame: u64,
    /// Fighters in id order
    pub fighters: Vec<FrameEntry>,
    /// Recipient's full state, when included
    pub own_state: Option<FighterState>,
}

impl DecodedFrame {
    /// Entry for one fighter.
    pub fn fighter(&self, id: FighterId) -> Option<&FrameEntry> {
        self.fighters.iter().find(|e| e.fighter.id == id)
    }
}

/// Encode a snapshot for one recipient.
///
/// `recipient` selects whose full state goes in the trailer.
pub fn encode_frame(
    snapshot: &RoomSnapshot,
    recipient: Option<FighterId>,
    constants: &KinematicConstants,
) -> Result<Vec<u8>, CodecError> {
    let count = snapshot.players.len().min(u8::MAX as usize);
    let mut out = Vec::with_capacity(FRAME_HEADER_BYTES + count * FRAME_ENTRY_BYTES + 1);

    out.extend_from_slice(&snapshot.frame.to_le_bytes());
    out.push(count as u8);

    for p in snapshot.players.iter().take(count) {
        CompactFighter::from_state(p.fighter_id, &p.state, constants).encode(&mut out);
        out.extend_from_slice(&p.last_processed_sequence.unwrap_or(0).to_le_bytes());
    }

    match recipient.and_then(|id| snapshot.fighter(id)) {
        Some(own) => {
            out.push(1);
            out.extend_from_slice(&bincode::serialize(&own.state)?);
        }
        None => out.push(0),
    }

    Ok(out)
}

/// Decode a frame produced by [`encode_frame`].
pub fn decode_frame(bytes: &[u8]) -> Result<DecodedFrame, CodecError> {
    let header = take(bytes, 0, FRAME_HEADER_BYTES)?;
    let mut frame_bytes = [0u8; 8];
    frame_bytes.copy_from_slice(&header[..8]);
    let frame = u64::from_le_bytes(frame_bytes);
    let count = header[8] as usize;

    let mut fighters = Vec::with_capacity(count);
    let mut at = FRAME_HEADER_BYTES;
    for _ in 0..count {
        let entry = take(bytes, at, FRAME_ENTRY_BYTES)?;
        let fighter = CompactFighter::decode(&entry[..FIGHTER_BYTES])?;
        let mut seq_bytes = [0u8; 8];
        seq_bytes.copy_from_slice(&entry[FIGHTER_BYTES..]);
        let seq = u64::from_le_bytes(seq_bytes);
        fighters.push(FrameEntry {
            fighter,
            last_processed_sequence: (seq != 0).then_some(seq),
        });
        at += FRAME_ENTRY_BYTES;
    }

    let has_own = take(bytes, at, 1)?[0] != 0;
    let own_state = if has_own {
        Some(bincode::deserialize(&bytes[at + 1..])?)
    } else {
        None
    };

    Ok(DecodedFrame { frame, fighters, own_state })
}

// =============================================================================
// TESTS
// =============================================================================
