//! Shared runtime context.
//!
//! Every device hook, bus handler and timer callback receives `&MachineContext`.
//! All runtime mutation goes through interior mutability with short borrows,
//! so the context stays usable from arbitrarily nested callbacks: a handler
//! invoked from a CPU read may schedule a timer, assert another unit's input
//! line, or read another device's bus.

use core::cell::{Cell, RefCell};
use core::fmt;
use std::collections::BTreeMap;
use std::rc::Rc;

use log::{debug, info, warn};

use crate::{
    AddressSpace, BankError, ClockRate, ConfigError, Device, DeviceAccessError, DeviceId,
    DeviceTree, DiagCounters, ExecutionUnit, InputLines, LineState, MachineConfig,
    MachineSnapshot, MemoryBank, MemoryBlock, RunState, SpaceKind, StateId, SuspendReason, Time,
    TimerFired, TimerId, TimerQueue, TraceEvent, TraceSink,
};
use crate::snapshot::{BankSelection, MemoryImage, UnitSnapshot};

/// Scheduling state of one execution unit.
#[derive(Debug)]
pub(crate) struct UnitSlot {
    pub(crate) device: DeviceId,
    pub(crate) clock: ClockRate,
    pub(crate) period: Time,
    pub(crate) lines: InputLines,
    pub(crate) local_time: Cell<Time>,
    pub(crate) total_cycles: Cell<u64>,
    pub(crate) suspend: Cell<SuspendReason>,
    pub(crate) yield_requested: Cell<bool>,
    /// Register ids in `state_entries` order, paired with `published`.
    state_ids: Box<[StateId]>,
    /// Register values as of the executing unit's last instruction boundary.
    published: Box<[Cell<u64>]>,
}

impl UnitSlot {
    pub(crate) fn new(device: DeviceId, clock: ClockRate, lines: usize, state_ids: Vec<StateId>) -> Self {
        let period = clock
            .period()
            .unwrap_or(Time::MAX)
            .max(Time::from_attos(1));
        Self {
            device,
            clock,
            period,
            lines: InputLines::new(lines),
            local_time: Cell::new(Time::ZERO),
            total_cycles: Cell::new(0),
            suspend: Cell::new(SuspendReason::empty()),
            yield_requested: Cell::new(false),
            published: state_ids.iter().map(|_| Cell::new(0)).collect(),
            state_ids: state_ids.into_boxed_slice(),
        }
    }

    pub(crate) fn is_live(&self) -> bool {
        self.suspend.get().is_empty()
    }

    fn publish(&self, cpu: &dyn ExecutionUnit) {
        for (id, value) in self.state_ids.iter().zip(self.published.iter()) {
            value.set(cpu.state(*id).unwrap_or(0));
        }
    }

    fn published(&self, id: StateId) -> Option<u64> {
        self.state_ids
            .iter()
            .position(|entry| *entry == id)
            .and_then(|index| self.published.get(index))
            .map(Cell::get)
    }
}

/// The slice currently executing, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExecFrame {
    pub(crate) unit: usize,
    pub(crate) slice_start: Time,
    pub(crate) requested: u64,
    pub(crate) end: Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InterleaveBoost {
    quantum: Time,
    until: Time,
}

/// Machine state shared with every device callback.
pub struct MachineContext {
    pub(crate) config: MachineConfig,
    pub(crate) devices: DeviceTree,
    pub(crate) units: Vec<UnitSlot>,
    pub(crate) unit_by_device: Vec<Option<usize>>,
    pub(crate) spaces: BTreeMap<(DeviceId, SpaceKind), Rc<AddressSpace>>,
    pub(crate) memory: BTreeMap<String, Rc<MemoryBlock>>,
    pub(crate) banks: BTreeMap<String, Rc<MemoryBank>>,
    pub(crate) timers: RefCell<TimerQueue>,
    pub(crate) frame: Cell<Option<ExecFrame>>,
    pub(crate) budget: Cell<i64>,
    diag: Cell<DiagCounters>,
    trace_sink: RefCell<Option<Box<dyn TraceSink>>>,
    boost: Cell<Option<InterleaveBoost>>,
}

impl MachineContext {
    pub(crate) fn new(config: MachineConfig) -> Self {
        Self {
            config,
            devices: DeviceTree::new(),
            units: Vec::new(),
            unit_by_device: Vec::new(),
            spaces: BTreeMap::new(),
            memory: BTreeMap::new(),
            banks: BTreeMap::new(),
            timers: RefCell::new(TimerQueue::new()),
            frame: Cell::new(None),
            budget: Cell::new(0),
            diag: Cell::new(DiagCounters::new()),
            trace_sink: RefCell::new(None),
            boost: Cell::new(None),
        }
    }

    /// Machine configuration.
    #[must_use]
    pub const fn config(&self) -> &MachineConfig {
        &self.config
    }

    /// Device tree.
    #[must_use]
    pub const fn devices(&self) -> &DeviceTree {
        &self.devices
    }

    /// Current simulated time.
    ///
    /// While a unit executes this is that unit's time at its current
    /// instruction boundary; otherwise it is the timer queue's time.
    #[must_use]
    pub fn now(&self) -> Time {
        match self.frame.get() {
            Some(frame) => {
                let period = self.units[frame.unit].period;
                frame
                    .slice_start
                    .saturating_add(period.saturating_mul(self.frame_consumed(&frame)))
            }
            None => self.timers.borrow().now(),
        }
    }

    /// Device whose execution unit is running right now.
    #[must_use]
    pub fn executing_device(&self) -> Option<DeviceId> {
        self.frame.get().map(|frame| self.units[frame.unit].device)
    }

    // ---- timers -------------------------------------------------------

    /// Schedules a timer for `owner` firing `delay` after [`Self::now`] and
    /// every `period` thereafter (zero `period` makes a one-shot).
    pub fn schedule(&self, owner: DeviceId, delay: Time, period: Time, param: u64) -> TimerId {
        let fire_time = self.now().saturating_add(delay);
        let id = self
            .timers
            .borrow_mut()
            .schedule_at(owner, fire_time, period, param);
        self.cut_slice_before(fire_time);
        id
    }

    /// Schedules a one-shot timer `cycles` of `owner`'s clock from now.
    ///
    /// Unclocked owners never fire.
    pub fn schedule_cycles(&self, owner: DeviceId, cycles: u64, param: u64) -> TimerId {
        let clock = self
            .devices
            .get(owner)
            .map_or(ClockRate::default(), |node| node.clock());
        self.schedule(owner, clock.cycles_to_time(cycles), Time::ZERO, param)
    }

    /// Allocates a persistent, disarmed timer for `owner`.
    pub fn allocate_timer(&self, owner: DeviceId, param: u64) -> TimerId {
        self.timers.borrow_mut().allocate(owner, param)
    }

    /// Re-arms a timer `delay` after [`Self::now`] without changing its
    /// identity. Returns `false` for stale handles.
    pub fn adjust_timer(&self, id: TimerId, delay: Time, period: Time) -> bool {
        let fire_time = self.now().saturating_add(delay);
        let adjusted = self.timers.borrow_mut().adjust_at(id, fire_time, period);
        if adjusted {
            self.cut_slice_before(fire_time);
        }
        adjusted
    }

    /// Disarms a timer. Idempotent.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        self.timers.borrow_mut().cancel(id)
    }

    /// Frees a timer handle.
    pub fn remove_timer(&self, id: TimerId) {
        self.timers.borrow_mut().remove(id);
    }

    /// Whether a timer is armed.
    #[must_use]
    pub fn timer_enabled(&self, id: TimerId) -> bool {
        self.timers.borrow().is_enabled(id)
    }

    /// Absolute fire time of an armed timer.
    #[must_use]
    pub fn timer_fire_time(&self, id: TimerId) -> Option<Time> {
        self.timers.borrow().fire_time(id)
    }

    /// Span from the queue's time to the next armed timer.
    #[must_use]
    pub fn time_until_next_timer(&self) -> Option<Time> {
        self.timers.borrow().time_until_next()
    }

    /// Ends the executing slice early when a timer now lands inside it.
    fn cut_slice_before(&self, fire_time: Time) {
        if let Some(frame) = self.frame.get() {
            if fire_time < frame.end {
                self.units[frame.unit].yield_requested.set(true);
            }
        }
    }

    // ---- execution units ----------------------------------------------

    fn unit_slot(&self, device: DeviceId) -> Result<(usize, &UnitSlot), DeviceAccessError> {
        self.unit_by_device
            .get(device.index())
            .copied()
            .flatten()
            .and_then(|index| self.units.get(index).map(|slot| (index, slot)))
            .ok_or_else(|| DeviceAccessError::NotExecutionUnit(self.devices.tag(device).to_owned()))
    }

    /// Drives an input line of an execution unit.
    ///
    /// Asserting a line wakes a unit spinning until interrupt. The unit
    /// samples the line at its next instruction boundary.
    ///
    /// # Errors
    ///
    /// Fails when `unit` is not an execution unit or lacks `line`.
    pub fn set_input_line(
        &self,
        unit: DeviceId,
        line: usize,
        state: LineState,
    ) -> Result<(), DeviceAccessError> {
        self.drive_line(unit, line, state, None)
    }

    /// Drives an input line and latches the vector supplied with it.
    ///
    /// # Errors
    ///
    /// Same as [`Self::set_input_line`].
    pub fn set_input_line_and_vector(
        &self,
        unit: DeviceId,
        line: usize,
        state: LineState,
        vector: u32,
    ) -> Result<(), DeviceAccessError> {
        self.drive_line(unit, line, state, Some(vector))
    }

    fn drive_line(
        &self,
        unit: DeviceId,
        line: usize,
        state: LineState,
        vector: Option<u32>,
    ) -> Result<(), DeviceAccessError> {
        let (_, slot) = self.unit_slot(unit)?;
        if !slot.lines.set(line, state, vector) {
            return Err(DeviceAccessError::UnknownInputLine {
                tag: self.devices.tag(unit).to_owned(),
                line,
            });
        }
        self.trace(TraceEvent::InputLineChanged { unit, line, state });
        if state.is_active() && slot.suspend.get().contains(SuspendReason::SPIN) {
            self.resume(unit, SuspendReason::SPIN)?;
        }
        Ok(())
    }

    /// Input line level of an execution unit.
    #[must_use]
    pub fn input_line(&self, unit: DeviceId, line: usize) -> Option<LineState> {
        self.unit_slot(unit).ok().and_then(|(_, slot)| slot.lines.state(line))
    }

    /// Ends the executing unit's slice at its next instruction boundary.
    pub fn request_yield(&self) {
        if let Some(frame) = self.frame.get() {
            self.units[frame.unit].yield_requested.set(true);
        }
    }

    /// Adds `reason` to a unit's suspend set. Suspending the executing unit
    /// also ends its slice at the next instruction boundary.
    ///
    /// # Errors
    ///
    /// Fails when `unit` is not an execution unit.
    pub fn suspend(&self, unit: DeviceId, reason: SuspendReason) -> Result<(), DeviceAccessError> {
        let (index, slot) = self.unit_slot(unit)?;
        let before = slot.suspend.get();
        slot.suspend.set(before | reason);
        if !before.contains(reason) {
            debug!("{}: suspended {reason:?}", self.devices.tag(unit));
            self.trace(TraceEvent::Suspended { unit, reason });
        }
        if self.frame.get().is_some_and(|frame| frame.unit == index) {
            slot.yield_requested.set(true);
        }
        Ok(())
    }

    /// Removes `reason` from a unit's suspend set. A unit that becomes live
    /// is brought forward to the current time.
    ///
    /// # Errors
    ///
    /// Fails when `unit` is not an execution unit.
    pub fn resume(&self, unit: DeviceId, reason: SuspendReason) -> Result<(), DeviceAccessError> {
        let (_, slot) = self.unit_slot(unit)?;
        let before = slot.suspend.get();
        if !before.intersects(reason) {
            return Ok(());
        }
        let after = before.difference(reason);
        slot.suspend.set(after);
        if after.is_empty() {
            let now = self.now();
            if slot.local_time.get() < now {
                slot.local_time.set(now);
            }
        }
        debug!("{}: resumed {reason:?}", self.devices.tag(unit));
        self.trace(TraceEvent::Resumed { unit, reason });
        Ok(())
    }

    /// Suspends a unit until any of its input lines is asserted.
    ///
    /// # Errors
    ///
    /// Fails when `unit` is not an execution unit.
    pub fn spin_until_interrupt(&self, unit: DeviceId) -> Result<(), DeviceAccessError> {
        let (_, slot) = self.unit_slot(unit)?;
        if slot.lines.any_active() {
            return Ok(());
        }
        self.suspend(unit, SuspendReason::SPIN)
    }

    /// Drives a unit's reset line. Releasing it resets the unit.
    ///
    /// # Errors
    ///
    /// Fails when `unit` is not an execution unit, or when releasing reset
    /// on the unit that is currently executing.
    pub fn set_reset_line(&self, unit: DeviceId, asserted: bool) -> Result<(), DeviceAccessError> {
        if asserted {
            return self.suspend(unit, SuspendReason::RESET);
        }
        let (index, slot) = self.unit_slot(unit)?;
        if !slot.suspend.get().contains(SuspendReason::RESET) {
            return Ok(());
        }
        self.reset_unit(index)?;
        self.resume(unit, SuspendReason::RESET)
    }

    /// Temporarily tightens the quantum to `quantum` for `duration` from now.
    pub fn boost_interleave(&self, quantum: Time, duration: Time) {
        let until = self.now().saturating_add(duration);
        debug!("interleave boosted to {quantum} until {until}");
        self.boost.set(Some(InterleaveBoost { quantum, until }));
        self.request_yield();
    }

    /// Quantum in effect at `at`.
    #[must_use]
    pub fn quantum_at(&self, at: Time) -> Time {
        match self.boost.get() {
            Some(boost) if at < boost.until => boost.quantum.min(self.config.quantum),
            _ => self.config.quantum,
        }
    }

    /// Local time of an execution unit.
    #[must_use]
    pub fn unit_time(&self, unit: DeviceId) -> Option<Time> {
        self.unit_slot(unit).ok().map(|(_, slot)| slot.local_time.get())
    }

    /// Total cycles an execution unit has consumed.
    #[must_use]
    pub fn unit_cycles(&self, unit: DeviceId) -> Option<u64> {
        self.unit_slot(unit).ok().map(|(_, slot)| slot.total_cycles.get())
    }

    /// Suspend reasons of an execution unit.
    #[must_use]
    pub fn suspend_reasons(&self, unit: DeviceId) -> Option<SuspendReason> {
        self.unit_slot(unit).ok().map(|(_, slot)| slot.suspend.get())
    }

    /// Execution units in scheduling order.
    pub fn execution_units(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.units.iter().map(|slot| slot.device)
    }

    pub(crate) fn slice_budget(&self) -> i64 {
        self.budget.get()
    }

    pub(crate) fn consume_cycles(&self, cycles: u64) {
        let cycles = i64::try_from(cycles).unwrap_or(i64::MAX);
        self.budget.set(self.budget.get().saturating_sub(cycles));
    }

    pub(crate) fn yield_pending(&self, unit: usize) -> bool {
        self.units
            .get(unit)
            .is_some_and(|slot| slot.yield_requested.get())
    }

    pub(crate) fn frame_consumed(&self, frame: &ExecFrame) -> u64 {
        let spent = i128::from(frame.requested) - i128::from(self.budget.get());
        u64::try_from(spent.max(0)).unwrap_or(u64::MAX)
    }

    pub(crate) fn publish_state(&self, unit: usize, cpu: &dyn ExecutionUnit) {
        if let Some(slot) = self.units.get(unit) {
            slot.publish(cpu);
        }
    }

    pub(crate) fn note_interrupt(&self, unit: usize, line: usize, vector: Option<u32>) {
        self.update_diag(DiagCounters::record_interrupt);
        if let Some(slot) = self.units.get(unit) {
            self.trace(TraceEvent::InterruptAccepted {
                unit: slot.device,
                line,
                vector,
                at: self.now(),
            });
        }
    }

    pub(crate) fn record_unmapped(&self, space: SpaceKind, addr: u64, write: bool) {
        self.update_diag(|diag| diag.record_unmapped(write));
        self.trace(TraceEvent::UnmappedAccess {
            unit: self.executing_device(),
            space,
            addr,
            write,
        });
    }

    // ---- devices --------------------------------------------------------

    /// Looks a device up by full tag. Absence is not an error.
    #[must_use]
    pub fn find_device(&self, tag: &str) -> Option<DeviceId> {
        self.devices.find(tag)
    }

    /// Resolves a device another device depends on.
    ///
    /// `tag` is tried as a child of `requested_by`, then as a sibling, then
    /// as a full tag.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingDevice`] when nothing matches.
    pub fn require_device(&self, requested_by: DeviceId, tag: &str) -> Result<DeviceId, ConfigError> {
        self.devices
            .find_from(requested_by, tag)
            .ok_or_else(|| ConfigError::MissingDevice {
                requested_by: self.devices.tag(requested_by).to_owned(),
                tag: tag.to_owned(),
            })
    }

    /// Runs `f` with exclusive access to a device of concrete type `T`.
    ///
    /// # Errors
    ///
    /// Fails when the device does not exist, is busy further up the call
    /// stack, or has another type.
    pub fn with_device<T, R>(&self, id: DeviceId, f: impl FnOnce(&mut T) -> R) -> Result<R, DeviceAccessError>
    where
        T: Device,
    {
        self.with_device_dyn(id, |device| {
            device
                .as_any_mut()
                .downcast_mut::<T>()
                .map(f)
                .ok_or(())
        })?
        .map_err(|()| DeviceAccessError::WrongType(self.devices.tag(id).to_owned()))
    }

    /// Runs `f` with exclusive access to a device trait object.
    ///
    /// # Errors
    ///
    /// Fails when the device does not exist or is busy.
    pub fn with_device_dyn<R>(
        &self,
        id: DeviceId,
        f: impl FnOnce(&mut dyn Device) -> R,
    ) -> Result<R, DeviceAccessError> {
        let node = self
            .devices
            .get(id)
            .ok_or_else(|| DeviceAccessError::NotFound(id.to_string()))?;
        let mut device = node.cell().try_borrow_mut().map_err(|_| {
            warn!("device `{}` is busy", node.tag());
            DeviceAccessError::Busy(node.tag().to_owned())
        })?;
        Ok(f(device.as_mut()))
    }

    /// Reads a register of an execution unit.
    ///
    /// While the unit itself is executing (for example from a handler its
    /// own bus access invoked), the value is the one published at its
    /// current instruction boundary.
    ///
    /// # Errors
    ///
    /// Fails when the device is missing, busy, not an execution unit, or
    /// lacks the register.
    pub fn get_state(&self, unit: DeviceId, id: StateId) -> Result<u64, DeviceAccessError> {
        if self.executing_device() == Some(unit) {
            let (_, slot) = self.unit_slot(unit)?;
            return slot
                .published(id)
                .ok_or(DeviceAccessError::State(crate::StateError::UnknownId(id)));
        }
        let node = self
            .devices
            .get(unit)
            .ok_or_else(|| DeviceAccessError::NotFound(unit.to_string()))?;
        let device = node
            .cell()
            .try_borrow()
            .map_err(|_| DeviceAccessError::Busy(node.tag().to_owned()))?;
        let cpu = device
            .execution_unit_ref()
            .ok_or_else(|| DeviceAccessError::NotExecutionUnit(node.tag().to_owned()))?;
        cpu.state(id)
            .ok_or(DeviceAccessError::State(crate::StateError::UnknownId(id)))
    }

    /// Writes a register of an execution unit.
    ///
    /// # Errors
    ///
    /// Same as [`Self::get_state`], plus read-only registers.
    pub fn set_state(&self, unit: DeviceId, id: StateId, value: u64) -> Result<(), DeviceAccessError> {
        let tag = self.devices.tag(unit).to_owned();
        self.with_device_dyn(unit, |device| {
            device
                .execution_unit()
                .ok_or(DeviceAccessError::NotExecutionUnit(tag))?
                .set_state(id, value)
                .map_err(DeviceAccessError::from)
        })?
    }

    /// Run state of an execution unit, if it can be observed right now.
    #[must_use]
    pub fn run_state(&self, unit: DeviceId) -> Option<RunState> {
        let node = self.devices.get(unit)?;
        let device = node.cell().try_borrow().ok()?;
        device.execution_unit_ref().map(|cpu| cpu.run_state())
    }

    // ---- memory -------------------------------------------------------

    /// Address space of a device. Opcode spaces fall back to program space.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingAddressSpace`] when the device has none.
    pub fn address_space(&self, device: DeviceId, kind: SpaceKind) -> Result<Rc<AddressSpace>, ConfigError> {
        self.spaces
            .get(&(device, kind))
            .or_else(|| {
                kind.fallback()
                    .and_then(|fallback| self.spaces.get(&(device, fallback)))
            })
            .cloned()
            .ok_or_else(|| ConfigError::MissingAddressSpace {
                tag: self.devices.tag(device).to_owned(),
                kind,
            })
    }

    /// Memory block by tag.
    #[must_use]
    pub fn memory(&self, tag: &str) -> Option<Rc<MemoryBlock>> {
        self.memory.get(tag).cloned()
    }

    /// Bank by tag.
    #[must_use]
    pub fn bank(&self, tag: &str) -> Option<Rc<MemoryBank>> {
        self.banks.get(tag).cloned()
    }

    /// Selects a bank entry by bank tag.
    ///
    /// # Errors
    ///
    /// Fails for unknown banks and entries.
    pub fn set_bank(&self, tag: &str, index: usize) -> Result<(), BankError> {
        self.banks
            .get(tag)
            .ok_or_else(|| BankError::UnknownBank(tag.to_owned()))?
            .select(index)
    }

    // ---- diagnostics ----------------------------------------------------

    /// Diagnostic counters.
    #[must_use]
    pub fn diag(&self) -> DiagCounters {
        self.diag.get()
    }

    pub(crate) fn update_diag(&self, update: impl FnOnce(&mut DiagCounters)) {
        let mut diag = self.diag.get();
        update(&mut diag);
        self.diag.set(diag);
    }

    /// Emits a trace event when tracing is enabled and a sink is installed.
    ///
    /// Events raised by the sink itself are dropped.
    pub fn trace(&self, event: TraceEvent) {
        if !self.config.tracing_enabled {
            return;
        }
        if let Ok(mut sink) = self.trace_sink.try_borrow_mut() {
            if let Some(sink) = sink.as_mut() {
                sink.on_event(event);
            }
        }
    }

    pub(crate) fn replace_trace_sink(
        &self,
        sink: Option<Box<dyn TraceSink>>,
    ) -> Option<Box<dyn TraceSink>> {
        self.trace_sink.replace(sink)
    }

    // ---- lifecycle ------------------------------------------------------

    pub(crate) fn start_all(&self) -> Result<(), ConfigError> {
        for (id, node) in self.devices.iter() {
            debug!("starting `{}` ({})", node.tag(), node.type_name());
            let mut device = node
                .cell()
                .try_borrow_mut()
                .map_err(|_| ConfigError::Device {
                    tag: node.tag().to_owned(),
                    message: "device busy during start".into(),
                })?;
            device.start(self, id)?;
        }
        for space in self.spaces.values() {
            space.seal();
        }
        info!(
            "machine started: {} devices, {} execution units",
            self.devices.len(),
            self.units.len()
        );
        Ok(())
    }

    pub(crate) fn reset_all(&self) {
        for (_, node) in self.devices.iter() {
            match node.cell().try_borrow_mut() {
                Ok(mut device) => device.reset(self),
                Err(_) => warn!("device `{}` busy during reset", node.tag()),
            }
        }
        let now = self.now();
        for index in 0..self.units.len() {
            if self.reset_unit(index).is_err() {
                continue;
            }
            let slot = &self.units[index];
            slot.suspend
                .set(slot.suspend.get().difference(SuspendReason::TRAPPED | SuspendReason::SPIN));
            if slot.local_time.get() < now {
                slot.local_time.set(now);
            }
        }
    }

    fn reset_unit(&self, index: usize) -> Result<(), DeviceAccessError> {
        let slot = &self.units[index];
        self.with_device_dyn(slot.device, |device| {
            if let Some(cpu) = device.execution_unit() {
                cpu.reset();
            }
        })?;
        slot.lines.clear_all();
        slot.suspend.set(slot.suspend.get().difference(SuspendReason::TRAPPED));
        Ok(())
    }

    pub(crate) fn stop_all(&self) {
        for (_, node) in self.devices.iter() {
            if let Ok(mut device) = node.cell().try_borrow_mut() {
                device.stop();
            }
        }
    }

    pub(crate) fn dispatch_timer(&self, fired: &TimerFired) {
        self.update_diag(DiagCounters::record_timer);
        self.trace(TraceEvent::TimerFired {
            owner: fired.owner,
            param: fired.param,
            at: fired.time,
        });
        match self.with_device_dyn(fired.owner, |device| device.on_timer(self, fired)) {
            Ok(()) => {}
            Err(err) => warn!("timer {} dropped: {err}", fired.id.index()),
        }
    }

    pub(crate) fn snapshot(&self) -> MachineSnapshot {
        let units = self
            .units
            .iter()
            .map(|slot| {
                let node = self.devices.get(slot.device);
                let device = node.and_then(|node| node.cell().try_borrow().ok());
                let cpu = device.as_ref().and_then(|device| device.execution_unit_ref());
                let registers = cpu.map_or_else(Vec::new, |cpu| {
                    cpu.state_entries()
                        .iter()
                        .filter_map(|entry| cpu.state(entry.id).map(|value| (entry.id, value)))
                        .collect()
                });
                UnitSnapshot {
                    tag: self.devices.tag(slot.device).to_owned(),
                    local_time: slot.local_time.get(),
                    total_cycles: slot.total_cycles.get(),
                    run_state: cpu.map_or(RunState::Stopped, |cpu| cpu.run_state()),
                    suspend: slot.suspend.get().bits(),
                    registers,
                }
            })
            .collect();
        MachineSnapshot {
            time: self.timers.borrow().now(),
            units,
            timers: self.timers.borrow().entries(),
            banks: self
                .banks
                .values()
                .map(|bank| BankSelection {
                    tag: bank.tag().to_owned(),
                    selected: bank.selected(),
                })
                .collect(),
            memory: self
                .memory
                .values()
                .map(|block| MemoryImage {
                    tag: block.tag().to_owned(),
                    bytes: block.to_vec(),
                })
                .collect(),
        }
    }
}

impl fmt::Debug for MachineContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineContext")
            .field("config", &self.config)
            .field("devices", &self.devices.len())
            .field("units", &self.units.len())
            .field("now", &self.now())
            .finish_non_exhaustive()
    }
}
