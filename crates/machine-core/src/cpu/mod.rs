//! Execution-unit contract shared by every processor interpreter.

/// Reference 8-bit accumulator interpreter.
pub mod acc8;
/// Interrupt input lines.
pub mod input;
/// Execution state machine.
pub mod run_state;
/// Symbolic register ids.
pub mod state;

pub use acc8::{Acc8, Acc8Config};
pub use input::{InputLines, LineState, VectorCallback};
pub use run_state::RunState;
pub use state::{StateEntry, StateId};

use crate::{MachineContext, StateError, Time};

/// Uniform wrapper around one processor interpreter.
///
/// Implementations decode and execute whole instructions only. A slice may
/// overrun its budget by the tail of the last instruction; the scheduler
/// carries the overrun into the unit's next slice.
pub trait ExecutionUnit {
    /// Executes instructions until at least `cycles` cycles are consumed or
    /// [`ExecContext::should_stop`] reports a stop request at an instruction
    /// boundary.
    ///
    /// Returns the cycles actually consumed, which may exceed `cycles`.
    fn run(&mut self, ctx: &ExecContext<'_>, cycles: u64) -> u64;

    /// Restores power-on register state. Idempotent.
    fn reset(&mut self);

    /// Reads a register by id.
    fn state(&self, id: StateId) -> Option<u64>;

    /// Writes a register by id.
    ///
    /// # Errors
    ///
    /// Returns [`StateError`] for unknown or read-only ids.
    fn set_state(&mut self, id: StateId, value: u64) -> Result<(), StateError>;

    /// Every register this processor type exposes.
    fn state_entries(&self) -> &[StateEntry];

    /// Current execution state.
    fn run_state(&self) -> RunState;

    /// Number of interrupt input lines.
    fn input_line_count(&self) -> usize;
}

/// Per-slice view handed to [`ExecutionUnit::run`].
///
/// The cycle budget is a signed running balance kept by the machine so that
/// handlers invoked mid-slice observe the unit's exact current time.
#[derive(Debug, Clone, Copy)]
pub struct ExecContext<'a> {
    machine: &'a MachineContext,
    unit: usize,
    lines: &'a InputLines,
    requested: u64,
}

impl<'a> ExecContext<'a> {
    pub(crate) const fn new(
        machine: &'a MachineContext,
        unit: usize,
        lines: &'a InputLines,
        requested: u64,
    ) -> Self {
        Self {
            machine,
            unit,
            lines,
            requested,
        }
    }

    /// Shared machine context, for bus accesses and device coupling.
    #[must_use]
    pub const fn machine(&self) -> &'a MachineContext {
        self.machine
    }

    /// Index of the executing unit in scheduling order.
    #[must_use]
    pub const fn unit_index(&self) -> usize {
        self.unit
    }

    /// Cycles granted for this slice.
    #[must_use]
    pub const fn requested(&self) -> u64 {
        self.requested
    }

    /// Remaining budget; negative after an overrun.
    #[must_use]
    pub fn remaining(&self) -> i64 {
        self.machine.slice_budget()
    }

    /// Charges `cycles` against the slice budget.
    pub fn consume(&self, cycles: u64) {
        self.machine.consume_cycles(cycles);
    }

    /// Cycles consumed so far in this slice.
    #[must_use]
    pub fn consumed(&self) -> u64 {
        let spent = i128::from(self.requested) - i128::from(self.remaining());
        u64::try_from(spent.max(0)).unwrap_or(u64::MAX)
    }

    /// Returns `true` when the unit must return at this instruction boundary:
    /// the budget is spent or a yield was requested.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.remaining() <= 0 || self.machine.yield_pending(self.unit)
    }

    /// Simulated time at the current instruction boundary.
    #[must_use]
    pub fn now(&self) -> Time {
        self.machine.now()
    }

    /// Input lines of the executing unit.
    #[must_use]
    pub const fn lines(&self) -> &'a InputLines {
        self.lines
    }

    /// Returns `true` when `line` is asserted.
    #[must_use]
    pub fn line_active(&self, line: usize) -> bool {
        self.lines.is_active(line)
    }

    /// Publishes the unit's registers for [`MachineContext::get_state`]
    /// callers reached from inside this slice. Called at instruction
    /// boundaries.
    pub fn publish_state(&self, cpu: &dyn ExecutionUnit) {
        self.machine.publish_state(self.unit, cpu);
    }

    /// Accepts the interrupt on `line` and returns its vector.
    ///
    /// The vector-fetch callback, when installed, runs exactly once here.
    pub fn acknowledge_interrupt(&self, line: usize) -> Option<u32> {
        let vector = self.lines.acknowledge(self.machine, line);
        self.machine.note_interrupt(self.unit, line, vector);
        vector
    }
}
