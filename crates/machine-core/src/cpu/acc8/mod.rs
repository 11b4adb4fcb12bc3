//! `acc8`: a small 8-bit accumulator processor.
//!
//! It exists to exercise the engine end to end: a 16-bit little-endian
//! program space, an 8-bit I/O space, one maskable interrupt line and one
//! non-maskable line.
//!
//! | id | register | bits |
//! |----|----------|------|
//! | 0  | `PC`     | 16   |
//! | 1  | `A`      | 8    |
//! | 2  | `X`      | 8    |
//! | 3  | `SP`     | 8    |
//! | 4  | `FLAGS`  | 8 (`Z`=bit 0, `C`=bit 1, `I`=bit 2) |
//!
//! Interrupt vectors index a table of little-endian handler addresses at
//! [`VECTOR_TABLE_BASE`]; the reset entry point is read from
//! [`RESET_VECTOR`] unless [`Acc8Config::reset_pc`] fixes it.

/// Opcode assignments.
pub mod encoding;
/// Cycle costs.
pub mod timing;

use std::rc::Rc;

use log::{debug, warn};

use self::encoding::{decode, Opcode};
use self::timing::{
    cycle_cost, BRANCH_TAKEN_PENALTY, ILLEGAL_OPCODE_CYCLES, INTERRUPT_ENTRY_CYCLES,
};
use crate::{
    AccessWidth, AddressSpace, AddressSpaceConfig, Device, DeviceParams, Endianness,
    ExecContext, ExecutionUnit, MachineContext, RunState, SpaceKind, StateEntry, StateError,
    StateId, TrapCode,
};

/// Registry type name.
pub const TYPE_NAME: &str = "acc8";

/// Maskable interrupt line.
pub const IRQ_LINE: usize = 0;
/// Non-maskable interrupt line.
pub const NMI_LINE: usize = 1;

/// `PC` state id.
pub const STATE_PC: StateId = StateId(0);
/// `A` state id.
pub const STATE_A: StateId = StateId(1);
/// `X` state id.
pub const STATE_X: StateId = StateId(2);
/// `SP` state id.
pub const STATE_SP: StateId = StateId(3);
/// `FLAGS` state id.
pub const STATE_FLAGS: StateId = StateId(4);

/// Zero flag.
pub const FLAG_Z: u8 = 1 << 0;
/// Carry flag; set when an add carries out or a subtract does not borrow.
pub const FLAG_C: u8 = 1 << 1;
/// Interrupt-enable flag.
pub const FLAG_I: u8 = 1 << 2;
/// Mask of defined flag bits.
pub const FLAGS_MASK: u8 = FLAG_Z | FLAG_C | FLAG_I;

/// Address holding the reset entry point.
pub const RESET_VECTOR: u16 = 0xFFFE;
/// First entry of the interrupt vector table.
pub const VECTOR_TABLE_BASE: u16 = 0xFFF0;
/// Number of vector-table entries.
pub const VECTOR_COUNT: u32 = 8;
/// Base of the hardware stack page.
pub const STACK_PAGE: u16 = 0x0100;

const STATE_ENTRIES: [StateEntry; 5] = [
    StateEntry::new(0, "PC", 16),
    StateEntry::new(1, "A", 8),
    StateEntry::new(2, "X", 8),
    StateEntry::new(3, "SP", 8),
    StateEntry::new(4, "FLAGS", 8),
];

/// Processor options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct Acc8Config {
    /// Fixed entry point. `None` fetches it from [`RESET_VECTOR`] on the first
    /// slice after reset.
    pub reset_pc: Option<u16>,
    /// Trap on an illegal opcode instead of executing it as a one-cycle no-op.
    pub illegal_opcode_fatal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct Registers {
    pc: u16,
    a: u8,
    x: u8,
    sp: u8,
    flags: u8,
}

/// The acc8 processor device.
#[derive(Debug)]
pub struct Acc8 {
    tag: String,
    config: Acc8Config,
    program: Rc<AddressSpace>,
    io: Rc<AddressSpace>,
    regs: Registers,
    run_state: RunState,
    fetch_reset_vector: bool,
    nmi_latched: bool,
}

impl Acc8 {
    /// Creates a processor with empty program and I/O spaces.
    #[must_use]
    pub fn new(tag: &str, config: Acc8Config) -> Self {
        let program = AddressSpace::new(
            format!("{tag}:{}", SpaceKind::Program),
            AddressSpaceConfig::new(SpaceKind::Program, 16, AccessWidth::Byte, Endianness::Little),
        );
        let io = AddressSpace::new(
            format!("{tag}:{}", SpaceKind::Io),
            AddressSpaceConfig::new(SpaceKind::Io, 8, AccessWidth::Byte, Endianness::Little),
        );
        let mut cpu = Self {
            tag: tag.to_owned(),
            config,
            program: Rc::new(program),
            io: Rc::new(io),
            regs: Registers::default(),
            run_state: RunState::Stopped,
            fetch_reset_vector: false,
            nmi_latched: false,
        };
        ExecutionUnit::reset(&mut cpu);
        cpu.run_state = RunState::Stopped;
        cpu
    }

    /// Registry constructor with default options.
    ///
    /// # Errors
    ///
    /// Never fails; the signature matches the registry contract.
    pub fn construct(params: &DeviceParams) -> Result<Box<dyn Device>, crate::ConfigError> {
        Ok(Box::new(Self::new(&params.tag, Acc8Config::default())))
    }

    /// Processor options.
    #[must_use]
    pub const fn config(&self) -> &Acc8Config {
        &self.config
    }

    /// Program counter.
    #[must_use]
    pub const fn pc(&self) -> u16 {
        self.regs.pc
    }

    /// Accumulator.
    #[must_use]
    pub const fn a(&self) -> u8 {
        self.regs.a
    }

    /// Index register.
    #[must_use]
    pub const fn x(&self) -> u8 {
        self.regs.x
    }

    fn read8(&self, ctx: &MachineContext, addr: u16) -> u8 {
        self.program.read_u8(ctx, u64::from(addr))
    }

    fn read16(&self, ctx: &MachineContext, addr: u16) -> u16 {
        let low = self.read8(ctx, addr);
        let high = self.read8(ctx, addr.wrapping_add(1));
        u16::from_le_bytes([low, high])
    }

    fn write8(&self, ctx: &MachineContext, addr: u16, value: u8) {
        self.program.write_u8(ctx, u64::from(addr), value);
    }

    fn fetch8(&mut self, ctx: &MachineContext) -> u8 {
        let value = self.read8(ctx, self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        value
    }

    fn fetch16(&mut self, ctx: &MachineContext) -> u16 {
        let low = self.fetch8(ctx);
        let high = self.fetch8(ctx);
        u16::from_le_bytes([low, high])
    }

    fn push(&mut self, ctx: &MachineContext, value: u8) {
        self.write8(ctx, STACK_PAGE | u16::from(self.regs.sp), value);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
    }

    fn pull(&mut self, ctx: &MachineContext) -> u8 {
        self.regs.sp = self.regs.sp.wrapping_add(1);
        self.read8(ctx, STACK_PAGE | u16::from(self.regs.sp))
    }

    fn set_zero(&mut self, value: u8) {
        self.set_flag(FLAG_Z, value == 0);
    }

    fn set_flag(&mut self, flag: u8, on: bool) {
        if on {
            self.regs.flags |= flag;
        } else {
            self.regs.flags &= !flag;
        }
    }

    fn trap(&mut self, cause: TrapCode) {
        warn!("{}: trapped ({cause}) at pc {:#06x}", self.tag, self.regs.pc);
        self.run_state = RunState::Trapped(cause);
    }

    /// Picks the interrupt to accept at this boundary, if any.
    fn pending_interrupt(&mut self, ctx: &ExecContext<'_>) -> Option<usize> {
        let nmi = ctx.line_active(NMI_LINE);
        if !nmi {
            self.nmi_latched = false;
        } else if !self.nmi_latched {
            self.nmi_latched = true;
            return Some(NMI_LINE);
        }
        (ctx.line_active(IRQ_LINE) && self.regs.flags & FLAG_I != 0).then_some(IRQ_LINE)
    }

    /// Enters the handler for `line`. Returns cycles consumed.
    fn enter_interrupt(&mut self, ctx: &ExecContext<'_>, line: usize) -> u8 {
        let m = ctx.machine();
        let default_vector = u32::try_from(line).unwrap_or(u32::MAX);
        let vector = ctx.acknowledge_interrupt(line).unwrap_or(default_vector);
        if vector >= VECTOR_COUNT {
            self.trap(TrapCode::InvalidVector);
            return INTERRUPT_ENTRY_CYCLES;
        }

        let [pc_low, pc_high] = self.regs.pc.to_le_bytes();
        self.push(m, pc_high);
        self.push(m, pc_low);
        self.push(m, self.regs.flags);
        self.set_flag(FLAG_I, false);
        let slot = VECTOR_TABLE_BASE + 2 * u16::try_from(vector).unwrap_or(0);
        self.regs.pc = self.read16(m, slot);
        self.run_state = RunState::Running;
        debug!("{}: interrupt line {line} vector {vector} -> {:#06x}", self.tag, self.regs.pc);
        INTERRUPT_ENTRY_CYCLES
    }

    /// Executes one instruction. Returns cycles consumed.
    fn step(&mut self, ctx: &ExecContext<'_>) -> u8 {
        let m = ctx.machine();
        let at = self.regs.pc;
        let byte = self.fetch8(m);
        let Some(opcode) = decode(byte) else {
            if self.config.illegal_opcode_fatal {
                self.regs.pc = at;
                self.trap(TrapCode::IllegalInstruction);
            } else {
                warn!("{}: illegal opcode {byte:#04x} at {at:#06x} skipped", self.tag);
            }
            return ILLEGAL_OPCODE_CYCLES;
        };

        let mut cycles = cycle_cost(opcode);
        match opcode {
            Opcode::Nop => {}
            Opcode::LdaImm => {
                self.regs.a = self.fetch8(m);
                self.set_zero(self.regs.a);
            }
            Opcode::LdaAbs => {
                let addr = self.fetch16(m);
                self.regs.a = self.read8(m, addr);
                self.set_zero(self.regs.a);
            }
            Opcode::LdaAbsX => {
                let addr = self.fetch16(m).wrapping_add(u16::from(self.regs.x));
                self.regs.a = self.read8(m, addr);
                self.set_zero(self.regs.a);
            }
            Opcode::StaAbs => {
                let addr = self.fetch16(m);
                self.write8(m, addr, self.regs.a);
            }
            Opcode::StaAbsX => {
                let addr = self.fetch16(m).wrapping_add(u16::from(self.regs.x));
                self.write8(m, addr, self.regs.a);
            }
            Opcode::LdxImm => {
                self.regs.x = self.fetch8(m);
                self.set_zero(self.regs.x);
            }
            Opcode::Inx => {
                self.regs.x = self.regs.x.wrapping_add(1);
                self.set_zero(self.regs.x);
            }
            Opcode::AddImm => {
                let operand = self.fetch8(m);
                self.add(operand);
            }
            Opcode::AddAbs => {
                let addr = self.fetch16(m);
                let operand = self.read8(m, addr);
                self.add(operand);
            }
            Opcode::SubImm => {
                let operand = self.fetch8(m);
                self.regs.a = self.compare(operand);
            }
            Opcode::CmpImm => {
                let operand = self.fetch8(m);
                self.compare(operand);
            }
            Opcode::Jmp => {
                self.regs.pc = self.fetch16(m);
            }
            Opcode::Bne | Opcode::Beq => {
                let offset = i8::from_le_bytes([self.fetch8(m)]);
                let zero = self.regs.flags & FLAG_Z != 0;
                if zero == (opcode == Opcode::Beq) {
                    self.regs.pc = self.regs.pc.wrapping_add_signed(i16::from(offset));
                    cycles += BRANCH_TAKEN_PENALTY;
                }
            }
            Opcode::Jsr => {
                let target = self.fetch16(m);
                let [low, high] = self.regs.pc.to_le_bytes();
                self.push(m, high);
                self.push(m, low);
                self.regs.pc = target;
            }
            Opcode::Rts => {
                let low = self.pull(m);
                let high = self.pull(m);
                self.regs.pc = u16::from_le_bytes([low, high]);
            }
            Opcode::In => {
                let port = self.fetch8(m);
                self.regs.a = self.io.read_u8(m, u64::from(port));
                self.set_zero(self.regs.a);
            }
            Opcode::Out => {
                let port = self.fetch8(m);
                self.io.write_u8(m, u64::from(port), self.regs.a);
            }
            Opcode::Ei => self.set_flag(FLAG_I, true),
            Opcode::Di => self.set_flag(FLAG_I, false),
            Opcode::Reti => {
                self.regs.flags = self.pull(m) & FLAGS_MASK;
                let low = self.pull(m);
                let high = self.pull(m);
                self.regs.pc = u16::from_le_bytes([low, high]);
            }
            Opcode::Halt => {
                self.run_state = RunState::WaitingForInterrupt;
            }
        }
        cycles
    }

    fn add(&mut self, operand: u8) {
        let (sum, carry) = self.regs.a.overflowing_add(operand);
        self.regs.a = sum;
        self.set_flag(FLAG_C, carry);
        self.set_zero(sum);
    }

    fn compare(&mut self, operand: u8) -> u8 {
        let (difference, borrow) = self.regs.a.overflowing_sub(operand);
        self.set_flag(FLAG_C, !borrow);
        self.set_zero(difference);
        difference
    }
}

impl ExecutionUnit for Acc8 {
    fn run(&mut self, ctx: &ExecContext<'_>, cycles: u64) -> u64 {
        if cycles == 0 || self.run_state.is_trapped() {
            return 0;
        }
        ctx.publish_state(&*self);
        if self.fetch_reset_vector {
            self.fetch_reset_vector = false;
            self.regs.pc = self.read16(ctx.machine(), RESET_VECTOR);
            debug!("{}: reset vector -> {:#06x}", self.tag, self.regs.pc);
        }
        if self.run_state == RunState::Stopped {
            self.run_state = RunState::Running;
        }

        while !ctx.should_stop() {
            ctx.publish_state(&*self);
            if let Some(line) = self.pending_interrupt(ctx) {
                ctx.consume(u64::from(self.enter_interrupt(ctx, line)));
                if self.run_state.is_trapped() {
                    break;
                }
                continue;
            }

            if self.run_state == RunState::WaitingForInterrupt {
                ctx.consume(u64::try_from(ctx.remaining()).unwrap_or(0));
                break;
            }

            ctx.consume(u64::from(self.step(ctx)));
            if self.run_state.is_trapped() {
                break;
            }
        }
        ctx.consumed()
    }

    fn reset(&mut self) {
        self.regs = Registers {
            pc: self.config.reset_pc.unwrap_or(0),
            sp: 0xFF,
            ..Registers::default()
        };
        self.fetch_reset_vector = self.config.reset_pc.is_none();
        self.nmi_latched = false;
        self.run_state = RunState::Running;
    }

    fn state(&self, id: StateId) -> Option<u64> {
        match id {
            STATE_PC => Some(u64::from(self.regs.pc)),
            STATE_A => Some(u64::from(self.regs.a)),
            STATE_X => Some(u64::from(self.regs.x)),
            STATE_SP => Some(u64::from(self.regs.sp)),
            STATE_FLAGS => Some(u64::from(self.regs.flags)),
            _ => None,
        }
    }

    fn set_state(&mut self, id: StateId, value: u64) -> Result<(), StateError> {
        let low = value.to_le_bytes();
        match id {
            STATE_PC => {
                self.regs.pc = u16::from_le_bytes([low[0], low[1]]);
                self.fetch_reset_vector = false;
            }
            STATE_A => self.regs.a = low[0],
            STATE_X => self.regs.x = low[0],
            STATE_SP => self.regs.sp = low[0],
            STATE_FLAGS => self.regs.flags = low[0] & FLAGS_MASK,
            _ => return Err(StateError::UnknownId(id)),
        }
        Ok(())
    }

    fn state_entries(&self) -> &[StateEntry] {
        &STATE_ENTRIES
    }

    fn run_state(&self) -> RunState {
        self.run_state
    }

    fn input_line_count(&self) -> usize {
        2
    }
}

impl Device for Acc8 {
    fn address_space(&self, kind: SpaceKind) -> Option<Rc<AddressSpace>> {
        match kind {
            SpaceKind::Program => Some(Rc::clone(&self.program)),
            SpaceKind::Io => Some(Rc::clone(&self.io)),
            SpaceKind::Data | SpaceKind::Opcodes => None,
        }
    }

    fn execution_unit(&mut self) -> Option<&mut dyn ExecutionUnit> {
        Some(self)
    }

    fn execution_unit_ref(&self) -> Option<&dyn ExecutionUnit> {
        Some(self)
    }
}
