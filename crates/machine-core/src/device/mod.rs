//! Device contract, device type registry and the device tree.

/// Device type registry.
pub mod registry;
/// Static device hierarchy.
pub mod tree;

use core::any::Any;
use core::fmt;
use std::rc::Rc;

pub use registry::{DeviceConstructor, DeviceRegistry};
pub use tree::{DeviceNode, DeviceTree, TAG_SEPARATOR};

use crate::{AddressSpace, ClockRate, ConfigError, ExecutionUnit, MachineContext, SpaceKind, TimerFired};

/// Stable handle of a device within one machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DeviceId(u32);

impl DeviceId {
    /// Builds a handle from its insertion index.
    #[must_use]
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Insertion index of the device.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Raw handle value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Construction parameters handed to registry constructors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceParams {
    /// Full path tag of the new device.
    pub tag: String,
    /// Configured clock.
    pub clock: ClockRate,
    /// Parent device, if any.
    pub parent: Option<DeviceId>,
}

/// Downcasting support for [`Device`] trait objects.
pub trait DeviceAny: Any {
    /// Shared downcast view.
    fn as_any(&self) -> &dyn Any;
    /// Exclusive downcast view.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> DeviceAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// One node of emulated hardware.
///
/// Every hook receives the machine explicitly; there is no ambient "current
/// device". Devices that own an execution unit expose it through
/// [`Device::execution_unit`] and get scheduled.
pub trait Device: DeviceAny {
    /// Called once after the whole tree is configured, in insertion order.
    ///
    /// Siblings are guaranteed to exist and be addressable by tag, not to be
    /// started.
    ///
    /// # Errors
    ///
    /// A [`ConfigError`] aborts machine construction.
    fn start(&mut self, ctx: &MachineContext, id: DeviceId) -> Result<(), ConfigError> {
        let _ = (ctx, id);
        Ok(())
    }

    /// Restores power-on device state. Execution units are reset separately
    /// through [`ExecutionUnit::reset`].
    fn reset(&mut self, ctx: &MachineContext) {
        let _ = ctx;
    }

    /// Called once when the machine is torn down.
    fn stop(&mut self) {}

    /// Receives a fired timer owned by this device.
    fn on_timer(&mut self, ctx: &MachineContext, timer: &TimerFired) {
        let _ = (ctx, timer);
    }

    /// Address space of the given kind, if the device owns one.
    fn address_space(&self, kind: SpaceKind) -> Option<Rc<AddressSpace>> {
        let _ = kind;
        None
    }

    /// Execution unit view for scheduling.
    fn execution_unit(&mut self) -> Option<&mut dyn ExecutionUnit> {
        None
    }

    /// Shared execution unit view for introspection.
    fn execution_unit_ref(&self) -> Option<&dyn ExecutionUnit> {
        None
    }
}

impl fmt::Debug for dyn Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn Device")
    }
}
