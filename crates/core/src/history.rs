//! Bounded Conversation History
//!
//! The buffer keeps turns in insertion order and never grows past its hard
//! cap. When an append would exceed the cap, the oldest turns are dropped in a
//! single step so that only `retain` turns remain, and the new turn is pushed
//! after them.

use crate::models::ConversationTurn;
use std::collections::VecDeque;
use tracing::debug;

pub const DEFAULT_HISTORY_CAP: usize = 50;
pub const DEFAULT_HISTORY_RETAIN: usize = 40;

/// Ordered log of conversation turns with truncate-then-append eviction.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    turns: VecDeque<ConversationTurn>,
    cap: usize,
    retain: usize,
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP, DEFAULT_HISTORY_RETAIN)
    }
}

impl HistoryBuffer {
    /// Creates an empty buffer.
    ///
    /// `retain` is clamped below `cap` so that a truncation always leaves
    /// room for the appended turn.
    pub fn new(cap: usize, retain: usize) -> Self {
        let cap = cap.max(1);
        Self {
            turns: VecDeque::with_capacity(cap),
            cap,
            retain: retain.min(cap - 1),
        }
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        if self.turns.len() + 1 > self.cap {
            let excess = self.turns.len() - self.retain;
            self.turns.drain(..excess);
            debug!(dropped = excess, retained = self.retain, "History truncated");
        }
        self.turns.push_back(turn);
    }

    /// The `n` most recent turns, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ConversationTurn> {
        let skip = self.turns.len().saturating_sub(n);
        self.turns.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.back()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}
