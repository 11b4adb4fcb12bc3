//! Configuration phase.
//!
//! Devices, memory blocks, banks and bus handlers are all registered here.
//! [`MachineBuilder::build`] starts every device in insertion order, seals
//! every address space and resets the machine.

use core::ops::RangeInclusive;
use std::rc::Rc;

use log::{debug, info};

use super::context::{MachineContext, UnitSlot};
use super::Machine;
use crate::memory::SPACE_KINDS;
use crate::{
    AddressSpace, ClockRate, ConfigError, Device, DeviceId, DeviceParams, DeviceRegistry,
    Handler, MachineConfig, MemoryBank, MemoryBlock, SpaceKind, VectorCallback,
};

/// Builds a [`Machine`].
#[derive(Debug)]
pub struct MachineBuilder {
    ctx: MachineContext,
    registry: DeviceRegistry,
}

impl MachineBuilder {
    /// Starts a configuration with the built-in device types registered.
    #[must_use]
    pub fn new(config: MachineConfig) -> Self {
        Self {
            ctx: MachineContext::new(config),
            registry: DeviceRegistry::with_builtin(),
        }
    }

    /// Replaces the device registry.
    #[must_use]
    pub fn with_registry(mut self, registry: DeviceRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Device registry, for registering additional types.
    pub fn registry_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.registry
    }

    /// Context under construction. Bus accesses made through it during
    /// configuration behave as at runtime.
    #[must_use]
    pub const fn context(&self) -> &MachineContext {
        &self.ctx
    }

    /// Instantiates a registered device type.
    ///
    /// # Errors
    ///
    /// Fails for unknown types, invalid or duplicate tags, unknown parents,
    /// unclocked execution units, and constructor errors.
    pub fn add_device(
        &mut self,
        tag: &str,
        type_name: &str,
        clock: ClockRate,
        parent: Option<DeviceId>,
    ) -> Result<DeviceId, ConfigError> {
        let params = DeviceParams {
            tag: self.ctx.devices.full_tag(tag, parent)?,
            clock,
            parent,
        };
        let device = self.registry.create(type_name, &params)?;
        self.insert(tag, type_name, clock, parent, device)
    }

    /// Adds an already constructed device.
    ///
    /// # Errors
    ///
    /// Same as [`Self::add_device`], minus the registry lookup.
    pub fn add_device_instance<D: Device>(
        &mut self,
        tag: &str,
        clock: ClockRate,
        parent: Option<DeviceId>,
        device: D,
    ) -> Result<DeviceId, ConfigError> {
        self.insert(tag, core::any::type_name::<D>(), clock, parent, Box::new(device))
    }

    fn insert(
        &mut self,
        tag: &str,
        type_name: &str,
        clock: ClockRate,
        parent: Option<DeviceId>,
        device: Box<dyn Device>,
    ) -> Result<DeviceId, ConfigError> {
        let unit = device.execution_unit_ref().map(|cpu| {
            let ids: Vec<_> = cpu.state_entries().iter().map(|entry| entry.id).collect();
            (cpu.input_line_count(), ids)
        });
        if unit.is_some() && clock.is_zero() {
            return Err(ConfigError::ZeroClock(self.ctx.devices.full_tag(tag, parent)?));
        }
        let spaces: Vec<_> = SPACE_KINDS
            .iter()
            .filter_map(|&kind| device.address_space(kind).map(|space| (kind, space)))
            .collect();

        let id = self.ctx.devices.add(tag, type_name, clock, parent, device)?;
        for (kind, space) in spaces {
            self.ctx.spaces.insert((id, kind), space);
        }
        self.ctx.unit_by_device.resize(id.index() + 1, None);
        if let Some((lines, state_ids)) = unit {
            self.ctx.unit_by_device[id.index()] = Some(self.ctx.units.len());
            self.ctx.units.push(UnitSlot::new(id, clock, lines, state_ids));
        }
        debug!(
            "added `{}` ({type_name}) at {clock}",
            self.ctx.devices.tag(id)
        );
        Ok(id)
    }

    /// Looks up a device by full tag.
    #[must_use]
    pub fn find_device(&self, tag: &str) -> Option<DeviceId> {
        self.ctx.find_device(tag)
    }

    /// Allocates a zero-filled memory block.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateMemoryTag`] when `tag` is taken.
    pub fn add_ram(&mut self, tag: &str, len: usize) -> Result<Rc<MemoryBlock>, ConfigError> {
        self.insert_memory(MemoryBlock::new(tag, len))
    }

    /// Allocates a memory block holding `image`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateMemoryTag`] when `tag` is taken.
    pub fn add_rom(&mut self, tag: &str, image: &[u8]) -> Result<Rc<MemoryBlock>, ConfigError> {
        self.insert_memory(MemoryBlock::from_bytes(tag, image))
    }

    fn insert_memory(&mut self, block: MemoryBlock) -> Result<Rc<MemoryBlock>, ConfigError> {
        if self.ctx.memory.contains_key(block.tag()) {
            return Err(ConfigError::DuplicateMemoryTag(block.tag().to_owned()));
        }
        let block = Rc::new(block);
        self.ctx
            .memory
            .insert(block.tag().to_owned(), Rc::clone(&block));
        Ok(block)
    }

    /// Registers a bank over explicit `(block, offset)` entries.
    ///
    /// # Errors
    ///
    /// Fails for duplicate tags, empty entry lists, and offsets past the end
    /// of their block.
    pub fn add_bank(
        &mut self,
        tag: &str,
        entries: Vec<(Rc<MemoryBlock>, usize)>,
        read_only: bool,
    ) -> Result<Rc<MemoryBank>, ConfigError> {
        let bank = MemoryBank::new(tag, entries, read_only)?;
        self.insert_bank(bank)
    }

    /// Registers a bank over `count` consecutive `stride`-sized windows of
    /// one block.
    ///
    /// # Errors
    ///
    /// Same as [`Self::add_bank`].
    pub fn add_bank_from_block(
        &mut self,
        tag: &str,
        block: &Rc<MemoryBlock>,
        stride: usize,
        count: usize,
        read_only: bool,
    ) -> Result<Rc<MemoryBank>, ConfigError> {
        let bank = MemoryBank::from_block(tag, block, stride, count, read_only)?;
        self.insert_bank(bank)
    }

    fn insert_bank(&mut self, bank: MemoryBank) -> Result<Rc<MemoryBank>, ConfigError> {
        if self.ctx.banks.contains_key(bank.tag()) {
            return Err(ConfigError::DuplicateMemoryTag(bank.tag().to_owned()));
        }
        let bank = Rc::new(bank);
        self.ctx.banks.insert(bank.tag().to_owned(), Rc::clone(&bank));
        Ok(bank)
    }

    /// Address space `kind` of the device tagged `tag`.
    ///
    /// # Errors
    ///
    /// Fails when the device is unknown or has no such space.
    pub fn address_space(&self, tag: &str, kind: SpaceKind) -> Result<Rc<AddressSpace>, ConfigError> {
        let id = self
            .ctx
            .find_device(tag)
            .ok_or_else(|| ConfigError::MissingDevice {
                requested_by: "machine".into(),
                tag: tag.to_owned(),
            })?;
        self.ctx.address_space(id, kind)
    }

    /// Installs `handler` over `range` of a device's address space.
    ///
    /// # Errors
    ///
    /// Fails as [`Self::address_space`] and [`AddressSpace::install`] do.
    pub fn install(
        &mut self,
        tag: &str,
        kind: SpaceKind,
        range: RangeInclusive<u64>,
        handler: Handler,
    ) -> Result<(), ConfigError> {
        self.address_space(tag, kind)?.install(range, handler)
    }

    /// Installs `handler` over `range`, replacing whatever part of existing
    /// mappings it covers.
    ///
    /// # Errors
    ///
    /// Fails as [`Self::address_space`] and
    /// [`AddressSpace::install_override`] do.
    pub fn install_override(
        &mut self,
        tag: &str,
        kind: SpaceKind,
        range: RangeInclusive<u64>,
        handler: Handler,
    ) -> Result<(), ConfigError> {
        self.address_space(tag, kind)?.install_override(range, handler)
    }

    /// Installs the interrupt-acknowledge callback of an execution unit.
    ///
    /// # Errors
    ///
    /// Fails when `tag` names no execution unit.
    pub fn set_vector_callback(&mut self, tag: &str, callback: VectorCallback) -> Result<(), ConfigError> {
        let slot = self
            .ctx
            .find_device(tag)
            .and_then(|id| self.ctx.unit_by_device.get(id.index()).copied().flatten())
            .and_then(|index| self.ctx.units.get(index))
            .ok_or_else(|| ConfigError::MissingDevice {
                requested_by: "machine".into(),
                tag: tag.to_owned(),
            })?;
        slot.lines.set_vector_callback(Some(callback));
        Ok(())
    }

    /// Starts every device, seals every address space and resets the machine.
    ///
    /// # Errors
    ///
    /// Propagates the first start hook failure. The machine is discarded.
    pub fn build(self) -> Result<Machine, ConfigError> {
        self.ctx.start_all()?;
        self.ctx.reset_all();
        info!(
            "machine built: quantum {}, {} memory blocks, {} banks",
            self.ctx.config.quantum,
            self.ctx.memory.len(),
            self.ctx.banks.len()
        );
        Ok(Machine::from_context(self.ctx))
    }
}
