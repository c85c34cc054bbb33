//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Control messages are JSON text frames. Input commands may also travel as
//! bincode binary frames, and state updates as compact binary frames
//! (see `codec`).

use serde::{Serialize, Deserialize};

use crate::game::input::InputCommand;
use crate::game::state::FighterId;
use crate::game::tick::RoomSnapshot;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a match (creates one if none is waiting).
    Join {
        /// Display name
        #[serde(default)]
        name: String,
    },

    /// One sequenced input command.
    Input(InputCommand),

    /// Ready to start match.
    Ready,

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp (ms)
        timestamp: u64,
    },

    /// Player is leaving the match.
    Leave,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Joined a match.
    Welcome(WelcomeInfo),

    /// Both players ready; simulation is running.
    MatchStart {
        /// Server frame at start
        frame: u64,
        /// Fighters in the match
        fighters: Vec<FighterId>,
    },

    /// Authoritative state (JSON form).
    State(RoomSnapshot),

    /// A fighter left; its state is gone.
    FighterLeft {
        /// Who left
        fighter_id: FighterId,
    },

    /// Match decided.
    MatchEnd {
        /// Final frame
        frame: u64,
        /// Winner, if any. `None` when a player left mid-match: the one
        /// still connected does not win by forfeit.
        winner: Option<FighterId>,
        /// Hex-encoded final state hash
        state_hash: String,
    },

    /// Pong response.
    Pong {
        /// Echoed client timestamp
        timestamp: u64,
        /// Server frame when answered
        server_frame: u64,
    },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown {
        /// Why
        reason: String,
    },
}

/// Join acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomeInfo {
    /// Match session id (hex)
    pub session_id: String,
    /// Fighter assigned to this connection
    pub fighter_id: FighterId,
    /// Server tick rate (Hz)
    pub tick_rate: u32,
    /// Fixed step (ms)
    pub step_ms: f64,
    /// Whether state arrives as binary frames
    pub binary_state: bool,
    /// Hex fingerprint of the kinematic constants table
    pub constants_hash: String,
    /// Hex fingerprint of the stage layout
    pub stage_hash: String,
    /// Server version
    pub server_version: String,
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

impl ServerError {
    /// Build an error payload.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Message could not be parsed.
    InvalidMessage,
    /// Input rejected.
    InvalidInput,
    /// Already in match.
    AlreadyInMatch,
    /// Not in match.
    NotInMatch,
    /// Match is full.
    MatchFull,
    /// Server overloaded.
    ServerOverloaded,
    /// Internal error.
    InternalError,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Encode an input command as a binary frame.
///
/// Tagged enums do not survive bincode, so only the flat command goes binary.
pub fn encode_input(input: &InputCommand) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(input)
}

/// Decode a binary input frame.
pub fn decode_input(data: &[u8]) -> Result<InputCommand, bincode::Error> {
    bincode::deserialize(data)
}
