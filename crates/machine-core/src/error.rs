use thiserror::Error;

use crate::{SpaceKind, StateId};

/// Configuration-time failures. Any of these aborts machine construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A device tag is already taken within the machine.
    #[error("duplicate device tag `{0}`")]
    DuplicateTag(String),
    /// A device tag is empty or contains an empty path segment.
    #[error("invalid device tag `{0}`")]
    InvalidTag(String),
    /// No constructor is registered for the requested device type.
    #[error("unknown device type `{0}`")]
    UnknownDeviceType(String),
    /// The parent device handle does not belong to this machine.
    #[error("unknown parent device #{0}")]
    UnknownParent(u32),
    /// A device needs another device that is not present.
    #[error("device `{requested_by}` references missing device `{tag}`")]
    MissingDevice {
        /// Tag of the device performing the lookup.
        requested_by: String,
        /// Tag that could not be resolved.
        tag: String,
    },
    /// The device does not own an address space of the requested kind.
    #[error("device `{tag}` has no {kind:?} address space")]
    MissingAddressSpace {
        /// Owning device tag.
        tag: String,
        /// Requested space kind.
        kind: SpaceKind,
    },
    /// A handler range has its start above its end.
    #[error("inverted range {start:#x}..={end:#x} in space `{space}`")]
    InvertedRange {
        /// Space name.
        space: String,
        /// Requested start address.
        start: u64,
        /// Requested end address.
        end: u64,
    },
    /// A handler range exceeds the address width of the space.
    #[error("range {start:#x}..={end:#x} exceeds space `{space}` (max address {max:#x})")]
    RangeOutOfBounds {
        /// Space name.
        space: String,
        /// Requested start address.
        start: u64,
        /// Requested end address.
        end: u64,
        /// Highest address the space can decode.
        max: u64,
    },
    /// A handler range collides with an installed entry and no override was requested.
    #[error(
        "range {start:#x}..={end:#x} overlaps {existing_start:#x}..={existing_end:#x} in space `{space}`"
    )]
    Overlap {
        /// Space name.
        space: String,
        /// Requested start address.
        start: u64,
        /// Requested end address.
        end: u64,
        /// Start of the colliding entry.
        existing_start: u64,
        /// End of the colliding entry.
        existing_end: u64,
    },
    /// Handlers can no longer be installed once the machine is running.
    #[error("address space `{0}` is sealed")]
    SpaceSealed(String),
    /// A memory block is too short to back the mapped range.
    #[error("memory `{tag}` holds {len:#x} bytes but the mapping needs {needed:#x}")]
    MemoryTooSmall {
        /// Memory block tag.
        tag: String,
        /// Block length in bytes.
        len: usize,
        /// Bytes required by the mapping (offset included).
        needed: usize,
    },
    /// A bank was declared without any selectable entry.
    #[error("bank `{0}` has no entries")]
    EmptyBank(String),
    /// Memory block or bank tag is already taken.
    #[error("duplicate memory tag `{0}`")]
    DuplicateMemoryTag(String),
    /// Execution units need a non-zero clock to convert cycles into time.
    #[error("execution unit `{0}` needs a non-zero clock")]
    ZeroClock(String),
    /// Every device handle is already in use.
    #[error("no device handle left for `{0}`")]
    TooManyDevices(String),
    /// Device-specific start failure.
    #[error("device `{tag}` failed to start: {message}")]
    Device {
        /// Device tag.
        tag: String,
        /// Human readable reason.
        message: String,
    },
}

/// Failure selecting a bank entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BankError {
    /// The requested entry does not exist.
    #[error("bank `{tag}` has no entry {index} ({count} entries)")]
    EntryOutOfRange {
        /// Bank tag.
        tag: String,
        /// Requested entry.
        index: usize,
        /// Number of entries in the bank.
        count: usize,
    },
    /// No bank carries this tag.
    #[error("no bank tagged `{0}`")]
    UnknownBank(String),
}

/// Failure reading or writing a register through the uniform state interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StateError {
    /// The processor type does not define this id.
    #[error("unknown state id {0}")]
    UnknownId(StateId),
    /// The id exists but cannot be written.
    #[error("state id {0} is read-only")]
    ReadOnly(StateId),
}

/// Failure reaching a device at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceAccessError {
    /// No device carries this tag.
    #[error("no device tagged `{0}`")]
    NotFound(String),
    /// The device is currently borrowed further up the call stack.
    #[error("device `{0}` is busy")]
    Busy(String),
    /// The device exists but is not of the requested concrete type.
    #[error("device `{0}` has a different type")]
    WrongType(String),
    /// The device is not an execution unit.
    #[error("device `{0}` is not an execution unit")]
    NotExecutionUnit(String),
    /// The execution unit has no such input line.
    #[error("device `{tag}` has no input line {line}")]
    UnknownInputLine {
        /// Device tag.
        tag: String,
        /// Requested line index.
        line: usize,
    },
    /// Register access through the uniform state interface failed.
    #[error(transparent)]
    State(#[from] StateError),
}

/// Unrecoverable execution-unit conditions, reported to the scheduler as a halt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum TrapCode {
    /// The interpreter fetched an opcode it cannot decode.
    #[error("illegal instruction")]
    IllegalInstruction = 0x01,
    /// An accepted interrupt supplied a vector outside the vector table.
    #[error("interrupt vector out of range")]
    InvalidVector = 0x02,
    /// A processor-defined double fault or lockup condition.
    #[error("processor lockup")]
    Lockup = 0x03,
}

impl TrapCode {
    /// Stable numeric code, suitable for state introspection.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable numeric code back into a trap code.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::IllegalInstruction),
            0x02 => Some(Self::InvalidVector),
            0x03 => Some(Self::Lockup),
            _ => None,
        }
    }
}
