//! Handler targets installed into address spaces.

use core::fmt;
use std::rc::Rc;

use crate::{AccessWidth, MachineContext, MemoryBank, MemoryBlock};

/// Device logic reached through a memory-mapped range.
///
/// `offset` is relative to the start of the range the handler was installed
/// for, even when a later override split that range. Handlers take `&self`:
/// they may re-enter the machine (read other spaces, schedule timers, assert
/// input lines) through `ctx`, so any state they mutate lives behind interior
/// mutability.
pub trait BusHandler {
    /// Services a read. `None` leaves the bus undriven and yields the space's
    /// open-bus value.
    fn read(&self, ctx: &MachineContext, offset: u64, width: AccessWidth) -> Option<u64>;

    /// Services a write.
    fn write(&self, ctx: &MachineContext, offset: u64, width: AccessWidth, value: u64);

    /// Short label used by range introspection.
    fn label(&self) -> &str {
        "callback"
    }
}

type ReadFn = dyn Fn(&MachineContext, u64, AccessWidth) -> u64;
type WriteFn = dyn Fn(&MachineContext, u64, AccessWidth, u64);

/// [`BusHandler`] built from closures.
pub struct FnHandler {
    label: String,
    read: Option<Box<ReadFn>>,
    write: Option<Box<WriteFn>>,
}

impl FnHandler {
    /// Handler with both a read and a write callback.
    pub fn new<R, W>(label: impl Into<String>, read: R, write: W) -> Self
    where
        R: Fn(&MachineContext, u64, AccessWidth) -> u64 + 'static,
        W: Fn(&MachineContext, u64, AccessWidth, u64) + 'static,
    {
        Self {
            label: label.into(),
            read: Some(Box::new(read)),
            write: Some(Box::new(write)),
        }
    }

    /// Read callback only; writes are discarded.
    pub fn read_only<R>(label: impl Into<String>, read: R) -> Self
    where
        R: Fn(&MachineContext, u64, AccessWidth) -> u64 + 'static,
    {
        Self {
            label: label.into(),
            read: Some(Box::new(read)),
            write: None,
        }
    }

    /// Write callback only; reads float to the open-bus value.
    pub fn write_only<W>(label: impl Into<String>, write: W) -> Self
    where
        W: Fn(&MachineContext, u64, AccessWidth, u64) + 'static,
    {
        Self {
            label: label.into(),
            read: None,
            write: Some(Box::new(write)),
        }
    }
}

impl BusHandler for FnHandler {
    fn read(&self, ctx: &MachineContext, offset: u64, width: AccessWidth) -> Option<u64> {
        self.read.as_ref().map(|read| read(ctx, offset, width))
    }

    fn write(&self, ctx: &MachineContext, offset: u64, width: AccessWidth, value: u64) {
        if let Some(write) = &self.write {
            write(ctx, offset, width, value);
        }
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler")
            .field("label", &self.label)
            .field("read", &self.read.is_some())
            .field("write", &self.write.is_some())
            .finish()
    }
}

/// What a handler entry dispatches to.
#[derive(Clone)]
pub enum Handler {
    /// Read/write memory starting at `offset` within `block`.
    Ram {
        /// Backing store.
        block: Rc<MemoryBlock>,
        /// Byte offset of the range start within the block.
        offset: usize,
    },
    /// Read-only memory; writes are discarded.
    Rom {
        /// Backing store.
        block: Rc<MemoryBlock>,
        /// Byte offset of the range start within the block.
        offset: usize,
    },
    /// Runtime-selectable memory.
    Bank(Rc<MemoryBank>),
    /// Device callback pair.
    Callback(Rc<dyn BusHandler>),
    /// Explicitly unmapped; behaves like a hole in the map.
    Unmapped,
}

impl Handler {
    /// RAM mapped from the start of `block`.
    #[must_use]
    pub fn ram(block: &Rc<MemoryBlock>) -> Self {
        Self::Ram {
            block: Rc::clone(block),
            offset: 0,
        }
    }

    /// ROM mapped from the start of `block`.
    #[must_use]
    pub fn rom(block: &Rc<MemoryBlock>) -> Self {
        Self::Rom {
            block: Rc::clone(block),
            offset: 0,
        }
    }

    /// Banked window.
    #[must_use]
    pub fn bank(bank: &Rc<MemoryBank>) -> Self {
        Self::Bank(Rc::clone(bank))
    }

    /// Wraps a device callback.
    pub fn callback(handler: impl BusHandler + 'static) -> Self {
        Self::Callback(Rc::new(handler))
    }

    /// Coarse classification for introspection.
    #[must_use]
    pub const fn kind(&self) -> HandlerKind {
        match self {
            Self::Ram { .. } => HandlerKind::Ram,
            Self::Rom { .. } => HandlerKind::Rom,
            Self::Bank(_) => HandlerKind::Bank,
            Self::Callback(_) => HandlerKind::Callback,
            Self::Unmapped => HandlerKind::Unmapped,
        }
    }

    /// Tag of the memory, bank or callback behind the entry.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Ram { block, .. } | Self::Rom { block, .. } => block.tag(),
            Self::Bank(bank) => bank.tag(),
            Self::Callback(handler) => handler.label(),
            Self::Unmapped => "unmapped",
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ram { offset, .. } | Self::Rom { offset, .. } => {
                write!(f, "{:?}({}+{offset:#x})", self.kind(), self.label())
            }
            _ => write!(f, "{:?}({})", self.kind(), self.label()),
        }
    }
}

/// Handler classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum HandlerKind {
    /// Direct read/write memory.
    Ram,
    /// Direct read-only memory.
    Rom,
    /// Banked memory.
    Bank,
    /// Device callbacks.
    Callback,
    /// Explicit hole.
    Unmapped,
}

/// One installed range, as reported by [`crate::AddressSpace::entries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeInfo {
    /// Inclusive start address.
    pub start: u64,
    /// Inclusive end address.
    pub end: u64,
    /// Start of the range as originally installed; callback offsets are
    /// relative to it.
    pub origin: u64,
    /// Handler classification.
    pub kind: HandlerKind,
    /// Memory, bank or callback label.
    pub label: String,
}

impl RangeInfo {
    /// Returns `true` when `addr` falls inside this range.
    #[must_use]
    pub const fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr <= self.end
    }
}
