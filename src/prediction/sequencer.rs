//! Input Sequencer
//!
//! Stamps local commands with increasing sequence numbers and keeps the
//! `(sequence, input, predicted state)` history that reconciliation replays.
//! Capacity is bounded; the oldest entry falls off when full.

use std::collections::VecDeque;

use serde::{Serialize, Deserialize};

use crate::game::input::InputCommand;
use crate::game::state::FighterState;

/// Default history length (a bit over 3 seconds at 60 Hz).
pub const DEFAULT_CAPACITY: usize = 200;

/// One predicted tick.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Sequence stamped on `input`
    pub sequence: u64,
    /// Command that was applied
    pub input: InputCommand,
    /// State after applying it
    pub state: FighterState,
}

/// Sequence stamping plus a bounded prediction history.
#[derive(Clone, Debug)]
pub struct InputSequencer {
    next_sequence: u64,
    entries: VecDeque<SnapshotEntry>,
    capacity: usize,
    evicted: u64,
}

impl InputSequencer {
    /// Empty sequencer; the first stamped sequence is 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            next_sequence: 1,
            entries: VecDeque::with_capacity(capacity),
            capacity,
            evicted: 0,
        }
    }

    /// Stamp a command with the next sequence number.
    pub fn stamp(&mut self, input: InputCommand) -> InputCommand {
        let seq = self.next_sequence;
        self.next_sequence += 1;
        input.with_sequence(seq)
    }

    /// Sequence the next `stamp` will use.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Append a predicted tick, evicting the oldest entry when full.
    pub fn push(&mut self, entry: SnapshotEntry) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(entry);
    }

    /// Entry for an exact sequence.
    pub fn get(&self, sequence: u64) -> Option<&SnapshotEntry> {
        let idx = self.entries.partition_point(|e| e.sequence < sequence);
        self.entries.get(idx).filter(|e| e.sequence == sequence)
    }

    /// Drop every entry at or before `sequence`.
    ///
    /// Returns how many were dropped.
    pub fn consume(&mut self, sequence: u64) -> usize {
        let n = self.entries.partition_point(|e| e.sequence <= sequence);
        self.entries.drain(..n);
        n
    }

    /// Drop everything (sequence numbering continues).
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = &SnapshotEntry> {
        self.entries.iter()
    }

    /// Mutable entries in sequence order (used by replay).
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SnapshotEntry> {
        self.entries.iter_mut()
    }

    /// Most recent entry.
    pub fn latest(&self) -> Option<&SnapshotEntry> {
        self.entries.back()
    }

    /// Buffered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Nothing buffered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum entries kept.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries lost to overflow since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

impl Default for InputSequencer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
