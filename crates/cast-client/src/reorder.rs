//! Press-and-hold reordering of the favorites list.
//!
//! Holding a row for [`HOLD_TO_REORDER`] switches the list into reorder mode.
//! In reorder mode a press picks a row up; pointer motion over another row
//! moves it there, and release drops it.  Leaving reorder mode is explicit
//! ("Done").

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

pub const HOLD_TO_REORDER: Duration = Duration::from_millis(500);

/// Screen-space bounds of one row, in current list order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GestureState {
    Idle,
    Holding { since: Instant },
    Dragging { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Nothing was being dragged.
    Ignored,
    /// A drag ended; the current order should be persisted.
    Dropped,
}

#[derive(Debug)]
pub struct ReorderGesture {
    state: GestureState,
    reorder_mode: bool,
}

impl Default for ReorderGesture {
    fn default() -> Self {
        Self::new()
    }
}

impl ReorderGesture {
    pub fn new() -> Self {
        Self {
            state: GestureState::Idle,
            reorder_mode: false,
        }
    }

    pub fn in_reorder_mode(&self) -> bool {
        self.reorder_mode
    }

    pub fn dragging(&self) -> Option<usize> {
        match self.state {
            GestureState::Dragging { index } => Some(index),
            _ => None,
        }
    }

    pub fn is_holding(&self) -> bool {
        matches!(self.state, GestureState::Holding { .. })
    }

    pub fn press(&mut self, index: usize, now: Instant) {
        self.state = if self.reorder_mode {
            GestureState::Dragging { index }
        } else {
            GestureState::Holding { since: now }
        };
    }

    /// Hold timer check.  Returns true when this call entered reorder mode.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.state {
            GestureState::Holding { since } if now.duration_since(since) >= HOLD_TO_REORDER => {
                self.state = GestureState::Idle;
                self.reorder_mode = true;
                true
            }
            _ => false,
        }
    }

    /// Pointer moved to `(x, y)`.  `rows` are the bounds of every row in the
    /// current order.  Only the first row under the pointer is considered and
    /// the dragged row never targets itself.  Returns `(from, to)` when the
    /// dragged row should move.
    pub fn pointer_move(&mut self, x: f32, y: f32, rows: &[Rect]) -> Option<(usize, usize)> {
        let GestureState::Dragging { index } = self.state else {
            return None;
        };
        let (target, _) = rows
            .iter()
            .enumerate()
            .find(|(i, r)| *i != index && r.contains(x, y))?;
        // Dropping above the dragged row inserts before the target, below it
        // inserts after; either way the row ends up at the target's index.
        self.state = GestureState::Dragging { index: target };
        Some((index, target))
    }

    /// Pointer lifted.  A hold that already ran its full duration counts as
    /// having entered reorder mode even if no tick observed it.
    pub fn release(&mut self, now: Instant) -> Release {
        let outcome = match self.state {
            GestureState::Dragging { .. } => Release::Dropped,
            GestureState::Holding { .. } => {
                self.tick(now);
                Release::Ignored
            }
            GestureState::Idle => Release::Ignored,
        };
        self.state = GestureState::Idle;
        outcome
    }

    pub fn finish(&mut self) {
        self.state = GestureState::Idle;
        self.reorder_mode = false;
    }
}
