//! Interrupt input lines of one execution unit.
//!
//! Lines are written by any device at any time and sampled by the owning
//! unit only between instructions, so they live outside the unit itself in
//! plain [`Cell`]s.

use core::cell::{Cell, RefCell};
use core::fmt;
use std::rc::Rc;

use crate::MachineContext;

/// Level driven onto an input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum LineState {
    /// Not asserted.
    #[default]
    Clear,
    /// Asserted until explicitly cleared.
    Assert,
    /// Asserted until the unit acknowledges it.
    Hold,
}

impl LineState {
    /// Returns `true` for an asserted line.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Clear)
    }
}

/// Supplies the vector for an accepted interrupt, given the line number.
pub type VectorCallback = Rc<dyn Fn(&MachineContext, usize) -> u32>;

#[derive(Debug, Default)]
struct InputLine {
    state: Cell<LineState>,
    vector: Cell<Option<u32>>,
}

/// Input line bank owned by one execution unit.
#[derive(Default)]
pub struct InputLines {
    lines: Box<[InputLine]>,
    callback: RefCell<Option<VectorCallback>>,
}

impl InputLines {
    /// Creates `count` cleared lines without a vector callback.
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            lines: (0..count).map(|_| InputLine::default()).collect(),
            callback: RefCell::new(None),
        }
    }

    /// Number of lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns `true` for a unit without input lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Current level of `line`.
    #[must_use]
    pub fn state(&self, line: usize) -> Option<LineState> {
        self.lines.get(line).map(|entry| entry.state.get())
    }

    /// Returns `true` when `line` exists and is asserted.
    #[must_use]
    pub fn is_active(&self, line: usize) -> bool {
        self.state(line).is_some_and(LineState::is_active)
    }

    /// Returns `true` when any line is asserted.
    #[must_use]
    pub fn any_active(&self) -> bool {
        self.lines.iter().any(|entry| entry.state.get().is_active())
    }

    /// Vector supplied with the last assertion of `line`.
    #[must_use]
    pub fn vector(&self, line: usize) -> Option<u32> {
        self.lines.get(line).and_then(|entry| entry.vector.get())
    }

    /// Drives `line`. A `Some` vector replaces the stored one.
    ///
    /// Returns `false` for an unknown line.
    pub fn set(&self, line: usize, state: LineState, vector: Option<u32>) -> bool {
        let Some(entry) = self.lines.get(line) else {
            return false;
        };
        entry.state.set(state);
        if vector.is_some() {
            entry.vector.set(vector);
        }
        true
    }

    /// Installs the external vector-fetch callback.
    pub fn set_vector_callback(&self, callback: Option<VectorCallback>) {
        *self.callback.borrow_mut() = callback;
    }

    /// Acknowledges acceptance of `line`.
    ///
    /// Invokes the vector callback exactly once when one is installed,
    /// otherwise returns the stored vector. `Hold` lines clear on
    /// acknowledgement; `Assert` lines stay asserted.
    pub fn acknowledge(&self, ctx: &MachineContext, line: usize) -> Option<u32> {
        let entry = self.lines.get(line)?;
        if entry.state.get() == LineState::Hold {
            entry.state.set(LineState::Clear);
        }
        let callback = self.callback.borrow().clone();
        match callback {
            Some(callback) => Some(callback(ctx, line)),
            None => entry.vector.get(),
        }
    }

    /// Clears every line and stored vector.
    pub fn clear_all(&self) {
        for entry in &*self.lines {
            entry.state.set(LineState::Clear);
            entry.vector.set(None);
        }
    }
}

impl fmt::Debug for InputLines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputLines")
            .field("lines", &self.lines)
            .field("callback", &self.callback.borrow().is_some())
            .finish()
    }
}
