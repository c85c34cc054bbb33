//! Prediction & Reconciliation
//!
//! `ClientPredictor` applies local input immediately, remembers what it
//! predicted, and corrects itself when the server disagrees:
//!
//! 1. Updates not newer than the last reconciled sequence are dropped.
//! 2. No prediction buffered for the sequence: hard snap, clear history.
//! 3. Prediction within tolerance: discard history up to it, nothing else.
//! 4. Otherwise: take the server state whole, then replay every newer
//!    buffered input on top of it, rewriting the stored predictions.
//!
//! The replay base is the complete `FighterState`, timers and flags included.

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::game::input::InputCommand;
use crate::game::state::FighterState;
use crate::game::step::Simulation;
use crate::prediction::sequencer::{InputSequencer, SnapshotEntry, DEFAULT_CAPACITY};
use crate::FIXED_STEP_MS;

// =============================================================================
// CONFIG & OUTCOMES
// =============================================================================

/// Reconciliation tuning.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// Position divergence (world units) tolerated without correction
    pub position_tolerance: f64,
    /// Also correct on grounded or action-kind mismatch
    pub check_discrete: bool,
    /// Prediction history length
    pub buffer_capacity: usize,
    /// Fixed step (ms); must equal the server's
    pub step_ms: f64,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            position_tolerance: 2.0,
            check_discrete: true,
            buffer_capacity: DEFAULT_CAPACITY,
            step_ms: FIXED_STEP_MS,
        }
    }
}

/// What a reconcile call did.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ReconcileOutcome {
    /// Update was not newer than the last one; ignored.
    Stale,
    /// Prediction matched.
    Confirmed,
    /// Snapped to the server state and replayed newer inputs.
    Corrected {
        /// Position divergence that triggered the correction
        distance: f64,
        /// Inputs replayed on top of the server state
        replayed: usize,
    },
    /// No prediction for that sequence; took the server state and cleared history.
    HardSnap,
}

/// Counters for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionMetrics {
    /// Local ticks predicted
    pub predictions: u64,
    /// Non-stale updates handled
    pub reconciliations: u64,
    /// Updates that matched
    pub confirmations: u64,
    /// Snap-and-replay corrections
    pub corrections: u64,
    /// Corrections without history
    pub hard_snaps: u64,
    /// Dropped duplicate / out-of-order updates
    pub stale_updates: u64,
    /// Total inputs replayed
    pub replayed_ticks: u64,
    /// Divergence of the latest correction
    pub last_correction_distance: f64,
}

impl PredictionMetrics {
    /// Share of reconciliations that needed a correction.
    pub fn correction_rate(&self) -> f64 {
        if self.reconciliations == 0 {
            return 0.0;
        }
        (self.corrections + self.hard_snaps) as f64 / self.reconciliations as f64
    }
}

// =============================================================================
// PREDICTOR
// =============================================================================

/// Local fighter prediction for one client.
#[derive(Clone, Debug)]
pub struct ClientPredictor {
    sim: Simulation,
    config: PredictionConfig,
    state: FighterState,
    sequencer: InputSequencer,
    last_reconciled: Option<u64>,
    metrics: PredictionMetrics,
}

impl ClientPredictor {
    /// Start predicting from `initial`.
    pub fn new(sim: Simulation, initial: FighterState, config: PredictionConfig) -> Self {
        Self {
            sim,
            sequencer: InputSequencer::new(config.buffer_capacity),
            config,
            state: initial,
            last_reconciled: None,
            metrics: PredictionMetrics::default(),
        }
    }

    /// Current predicted state.
    pub fn state(&self) -> &FighterState {
        &self.state
    }

    /// Prediction history.
    pub fn sequencer(&self) -> &InputSequencer {
        &self.sequencer
    }

    /// Counters.
    pub fn metrics(&self) -> &PredictionMetrics {
        &self.metrics
    }

    /// Tuning.
    pub fn config(&self) -> &PredictionConfig {
        &self.config
    }

    /// Newest sequence reconciled so far.
    pub fn last_reconciled_sequence(&self) -> Option<u64> {
        self.last_reconciled
    }

    /// Stamp, apply and record one local command.
    ///
    /// Returns the stamped command; send it to the server as-is.
    pub fn predict(&mut self, input: InputCommand) -> InputCommand {
        let stamped = self.sequencer.stamp(input);
        self.state = self.sim.step(&self.state, Some(&stamped), self.config.step_ms);

        if let Some(sequence) = stamped.sequence {
            self.sequencer.push(SnapshotEntry { sequence, input: stamped, state: self.state });
        }
        self.metrics.predictions += 1;
        stamped
    }

    /// Apply an authoritative `(last_processed_sequence, state)` pair.
    pub fn reconcile(&mut self, sequence: u64, authoritative: &FighterState) -> ReconcileOutcome {
        let stale = self.last_reconciled.is_some_and(|last| sequence <= last)
            || sequence >= self.sequencer.next_sequence();
        if stale {
            self.metrics.stale_updates += 1;
            return ReconcileOutcome::Stale;
        }
        self.last_reconciled = Some(sequence);
        self.metrics.reconciliations += 1;

        let Some(predicted) = self.sequencer.get(sequence).map(|e| e.state) else {
            debug!(sequence, "No prediction buffered, hard snap");
            self.state = *authoritative;
            self.sequencer.clear();
            self.metrics.hard_snaps += 1;
            return ReconcileOutcome::HardSnap;
        };

        let distance = predicted.position.distance(authoritative.position);
        let discrete_mismatch = self.config.check_discrete
            && (predicted.grounded != authoritative.grounded
                || !predicted.action.same_kind(&authoritative.action));

        if distance <= self.config.position_tolerance && !discrete_mismatch {
            self.sequencer.consume(sequence);
            self.metrics.confirmations += 1;
            return ReconcileOutcome::Confirmed;
        }

        let replayed = self.replay_from(sequence, *authoritative);
        self.metrics.corrections += 1;
        self.metrics.last_correction_distance = distance;
        debug!(sequence, distance, replayed, "Prediction corrected");

        ReconcileOutcome::Corrected { distance, replayed }
    }

    /// Discard history up to `sequence`, then rebuild the rest on `base`.
    ///
    /// Every remaining entry's stored state is overwritten; the live state
    /// ends as the last replayed result (or `base` when nothing remains).
    pub fn replay_from(&mut self, sequence: u64, base: FighterState) -> usize {
        self.sequencer.consume(sequence);

        let sim = &self.sim;
        let step_ms = self.config.step_ms;
        let mut state = base;
        let mut replayed = 0;
        for entry in self.sequencer.iter_mut() {
            state = sim.step(&state, Some(&entry.input), step_ms);
            entry.state = state;
            replayed += 1;
        }

        self.state = state;
        self.metrics.replayed_ticks += replayed as u64;
        replayed
    }
}

// =============================================================================
// TESTS
// =============================================================================
