//! Client Prediction
//!
//! The client half of the netcode: stamp and predict local input, then
//! reconcile against authoritative updates.
//!
//! - `sequencer`: sequence numbers and the bounded prediction history
//! - `reconcile`: divergence detection, snap and replay

pub mod sequencer;
pub mod reconcile;

pub use sequencer::{InputSequencer, SnapshotEntry};
pub use reconcile::{ClientPredictor, PredictionConfig, PredictionMetrics, ReconcileOutcome};
