//! Deterministic trace hooks.

use crate::{DeviceId, LineState, SpaceKind, SuspendReason, Time, TrapCode};

/// Scheduler-level events emitted in execution order when tracing is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceEvent {
    /// An execution unit was granted a slice.
    SliceStart {
        /// Executing device.
        unit: DeviceId,
        /// Unit local time at slice start.
        at: Time,
        /// Cycles granted.
        cycles: u64,
    },
    /// An execution unit returned from its slice.
    SliceEnd {
        /// Executing device.
        unit: DeviceId,
        /// Unit local time after the slice.
        at: Time,
        /// Cycles consumed.
        consumed: u64,
    },
    /// A timer entry fired.
    TimerFired {
        /// Owning device.
        owner: DeviceId,
        /// Opaque timer parameter.
        param: u64,
        /// Nominal fire time.
        at: Time,
    },
    /// An input line was driven.
    InputLineChanged {
        /// Target execution unit.
        unit: DeviceId,
        /// Line index.
        line: usize,
        /// New level.
        state: LineState,
    },
    /// An execution unit accepted an interrupt.
    InterruptAccepted {
        /// Accepting device.
        unit: DeviceId,
        /// Line index.
        line: usize,
        /// Vector supplied for the acceptance, if any.
        vector: Option<u32>,
        /// Time of the accepting instruction boundary.
        at: Time,
    },
    /// An execution unit trapped and was taken out of scheduling.
    UnitTrapped {
        /// Trapped device.
        unit: DeviceId,
        /// Trap cause.
        cause: TrapCode,
        /// Unit local time.
        at: Time,
    },
    /// A suspend reason was added to a unit.
    Suspended {
        /// Target device.
        unit: DeviceId,
        /// Reason bits added.
        reason: SuspendReason,
    },
    /// A suspend reason was removed from a unit.
    Resumed {
        /// Target device.
        unit: DeviceId,
        /// Reason bits removed.
        reason: SuspendReason,
    },
    /// A bus access hit no handler.
    UnmappedAccess {
        /// Executing unit at the time of the access, if any.
        unit: Option<DeviceId>,
        /// Space role.
        space: SpaceKind,
        /// Masked address.
        addr: u64,
        /// True for writes, false for reads.
        write: bool,
    },
}

/// Sink trait for deterministic trace hooks.
pub trait TraceSink {
    /// Records an event in execution order.
    fn on_event(&mut self, event: TraceEvent);
}
