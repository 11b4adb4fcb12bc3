//! The machine: device tree, shared context and the scheduler that drives it.

/// Configuration-phase builder.
pub mod builder;
/// Shared runtime context handed to every device hook.
pub mod context;
/// Slice selection and timer synchronization.
mod scheduler;

use bitflags::bitflags;
use log::{debug, info};

pub use builder::MachineBuilder;
pub use context::MachineContext;

use crate::{DeviceId, DiagCounters, MachineConfig, MachineSnapshot, Time, TraceSink};

bitflags! {
    /// Why an execution unit is excluded from scheduling. A unit is live
    /// only while no bit is set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SuspendReason: u8 {
        /// Held by an external halt line.
        const HALT = 1 << 0;
        /// Held in reset by an external reset line.
        const RESET = 1 << 1;
        /// Spinning until any input line is asserted.
        const SPIN = 1 << 2;
        /// Stopped by a debugger.
        const DEBUGGER = 1 << 3;
        /// Disabled by configuration.
        const DISABLED = 1 << 4;
        /// Trapped; cleared by reset.
        const TRAPPED = 1 << 5;
    }
}

/// A built, running machine.
///
/// Dropping the machine calls [`crate::Device::stop`] on every device.
#[derive(Debug)]
pub struct Machine {
    ctx: MachineContext,
}

impl Machine {
    /// Starts configuring a machine with the built-in device types.
    #[must_use]
    pub fn builder(config: MachineConfig) -> MachineBuilder {
        MachineBuilder::new(config)
    }

    pub(crate) const fn from_context(ctx: MachineContext) -> Self {
        Self { ctx }
    }

    /// Shared context, as seen by devices.
    #[must_use]
    pub const fn context(&self) -> &MachineContext {
        &self.ctx
    }

    /// Machine configuration.
    #[must_use]
    pub const fn config(&self) -> &MachineConfig {
        self.ctx.config()
    }

    /// Time up to which the timer queue has been advanced.
    #[must_use]
    pub fn time(&self) -> Time {
        self.ctx.now()
    }

    /// Runs one frame: up to [`MachineConfig::frame_period`] past [`Self::time`].
    pub fn run_frame(&mut self) {
        let target = self.time().saturating_add(self.ctx.config().frame_period);
        self.run_until(target);
    }

    /// Runs for `span` of simulated time.
    pub fn run_for(&mut self, span: Time) {
        let target = self.time().saturating_add(span);
        self.run_until(target);
    }

    /// Runs until every live execution unit and the timer queue reach `target`.
    ///
    /// Units finish at the first instruction boundary at or past `target`.
    pub fn run_until(&mut self, target: Time) {
        debug!("run until {target}");
        scheduler::run_until(&self.ctx, target);
    }

    /// Local time of an execution unit.
    #[must_use]
    pub fn unit_time(&self, unit: DeviceId) -> Option<Time> {
        self.ctx.unit_time(unit)
    }

    /// Resets every device and execution unit. Pending timers are kept.
    pub fn reset(&mut self) {
        info!("machine reset at {}", self.time());
        self.ctx.reset_all();
    }

    /// Introspection snapshot of units, timers, banks and memory.
    #[must_use]
    pub fn snapshot(&self) -> MachineSnapshot {
        self.ctx.snapshot()
    }

    /// Diagnostic counters.
    #[must_use]
    pub fn diag(&self) -> DiagCounters {
        self.ctx.diag()
    }

    /// Installs a trace sink, returning the previous one.
    pub fn set_trace_sink(&mut self, sink: Option<Box<dyn TraceSink>>) -> Option<Box<dyn TraceSink>> {
        self.ctx.replace_trace_sink(sink)
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        self.ctx.stop_all();
    }
}
