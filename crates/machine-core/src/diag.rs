//! Saturating scheduler and bus counters.

/// Machine-wide diagnostic counters. Every counter saturates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DiagCounters {
    /// Execution slices granted.
    pub slices: u64,
    /// Cycles executed across all units.
    pub cycles: u64,
    /// Cycles executed past a slice's budget.
    pub overrun_cycles: u64,
    /// Timer entries fired.
    pub timers_fired: u64,
    /// Interrupts accepted by execution units.
    pub interrupts_accepted: u64,
    /// Slices cut short by a yield request.
    pub yields: u64,
    /// Execution units that entered a trapped state.
    pub traps: u64,
    /// Reads that hit no handler.
    pub unmapped_reads: u64,
    /// Writes that hit no handler.
    pub unmapped_writes: u64,
}

impl DiagCounters {
    /// Fresh counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one finished slice.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_slice(&mut self, requested: u64, consumed: u64) {
        self.slices = self.slices.saturating_add(1);
        self.cycles = self.cycles.saturating_add(consumed);
        self.overrun_cycles = self
            .overrun_cycles
            .saturating_add(consumed.saturating_sub(requested));
    }

    /// Records one fired timer.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_timer(&mut self) {
        self.timers_fired = self.timers_fired.saturating_add(1);
    }

    /// Records one accepted interrupt.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_interrupt(&mut self) {
        self.interrupts_accepted = self.interrupts_accepted.saturating_add(1);
    }

    /// Records one yielded slice.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_yield(&mut self) {
        self.yields = self.yields.saturating_add(1);
    }

    /// Records one trap.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_trap(&mut self) {
        self.traps = self.traps.saturating_add(1);
    }

    /// Records one unmapped access.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_unmapped(&mut self, write: bool) {
        if write {
            self.unmapped_writes = self.unmapped_writes.saturating_add(1);
        } else {
            self.unmapped_reads = self.unmapped_reads.saturating_add(1);
        }
    }

    /// Resets every counter to zero.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
