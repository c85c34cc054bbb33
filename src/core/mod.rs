//! Core deterministic primitives.
//!
//! Everything the simulation builds on: the vector type and state hashing.

pub mod vec2;
pub mod hash;

// Re-export core types
pub use vec2::Vec2;
pub use hash::{compute_state_hash, StateHash, StateHasher};
