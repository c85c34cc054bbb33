//! Network Layer
//!
//! WebSocket server for real-time duels.
//! This layer is **non-deterministic** - all game logic runs through `game/`.

pub mod codec;
pub mod protocol;
pub mod session;
pub mod server;

pub use codec::{decode_frame, encode_frame, should_send, CodecError, CompactFighter, DecodedFrame};
pub use protocol::{ClientMessage, ServerMessage, ErrorCode};
pub use session::{Broadcast, MatchSession, Outbound, SessionId, SessionState, SessionManager, SessionError};
pub use server::{ConfigError, GameServer, ServerConfig, GameServerError};
