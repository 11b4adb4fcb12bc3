//! Execution engine for multi-processor machine emulation.
//!
//! A machine is a static tree of devices sharing one timeline. Execution
//! units run in bounded slices, address spaces route bus accesses to memory
//! and callback handlers, and a timer queue fires device callbacks at exact
//! simulated times.

/// Attosecond time and clock-rate conversions.
pub mod time;
pub use time::{ClockRate, Time, ATTOS_PER_SECOND};

/// Ordered timer queue.
pub mod timer;
pub use timer::{TimerFired, TimerId, TimerInfo, TimerQueue};

/// Configuration, bank, state and device-access failures.
pub mod error;
pub use error::{BankError, ConfigError, DeviceAccessError, StateError, TrapCode};

/// Machine-wide scheduling configuration.
pub mod config;
pub use config::{MachineConfig, DEFAULT_FRAME_PERIOD, DEFAULT_QUANTUM};

/// Address spaces, handler entries, memory blocks and banks.
pub mod memory;
pub use memory::{
    AccessWidth, AddressSpace, AddressSpaceConfig, BusHandler, Endianness, FnHandler, Handler,
    HandlerKind, MemoryBank, MemoryBlock, OpenBus, RangeInfo, SpaceKind, ACCESS_WIDTHS,
    SPACE_KINDS,
};

/// Execution-unit contract and the reference interpreter.
pub mod cpu;
pub use cpu::{
    Acc8, Acc8Config, ExecContext, ExecutionUnit, InputLines, LineState, RunState, StateEntry,
    StateId, VectorCallback,
};

/// Devices, the type registry and the device tree.
pub mod device;
pub use device::{
    Device, DeviceAny, DeviceConstructor, DeviceId, DeviceNode, DeviceParams, DeviceRegistry,
    DeviceTree, TAG_SEPARATOR,
};

/// Machine builder, shared context and scheduler.
pub mod machine;
pub use machine::{Machine, MachineBuilder, MachineContext, SuspendReason};

/// Saturating diagnostic counters.
pub mod diag;
pub use diag::DiagCounters;

/// Deterministic trace hooks.
pub mod trace;
pub use trace::{TraceEvent, TraceSink};

/// Machine introspection snapshots.
pub mod snapshot;
pub use snapshot::{BankSelection, MachineSnapshot, MemoryImage, UnitSnapshot};

#[cfg(test)]
use env_logger as _;
#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
