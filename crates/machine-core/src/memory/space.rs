//! Address-space decoding and access dispatch.
//!
//! Entries are kept sorted by start address and never overlap, so resolving
//! an address is a `partition_point` binary search. Gaps between entries are
//! unmapped and resolve to the space's open-bus policy.

use core::cell::{Cell, RefCell};
use core::ops::RangeInclusive;

use log::{debug, trace};

use crate::{
    AccessWidth, AddressSpaceConfig, ConfigError, Endianness, Handler, MachineContext,
    MemoryBlock, OpenBus, RangeInfo, SpaceKind,
};

#[derive(Debug, Clone)]
struct HandlerEntry {
    start: u64,
    end: u64,
    origin: u64,
    handler: Handler,
}

impl HandlerEntry {
    fn info(&self) -> RangeInfo {
        RangeInfo {
            start: self.start,
            end: self.end,
            origin: self.origin,
            kind: self.handler.kind(),
            label: self.handler.label().to_owned(),
        }
    }
}

/// The entry (or gap) covering one address, detached from the entry list.
struct Resolved {
    end: u64,
    origin: u64,
    handler: Handler,
}

/// One address space of one device.
#[derive(Debug)]
pub struct AddressSpace {
    name: String,
    config: AddressSpaceConfig,
    entries: RefCell<Vec<HandlerEntry>>,
    sealed: Cell<bool>,
    last_driven: Cell<u64>,
    unmapped_reads: Cell<u64>,
    unmapped_writes: Cell<u64>,
}

impl AddressSpace {
    /// Creates an empty space. Every address reads as open bus until handlers
    /// are installed.
    #[must_use]
    pub fn new(name: impl Into<String>, config: AddressSpaceConfig) -> Self {
        Self {
            name: name.into(),
            config,
            entries: RefCell::new(Vec::new()),
            sealed: Cell::new(false),
            last_driven: Cell::new(0),
            unmapped_reads: Cell::new(0),
            unmapped_writes: Cell::new(0),
        }
    }

    /// Space name, conventionally `"<device tag>:<kind>"`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Space shape.
    #[must_use]
    pub const fn config(&self) -> &AddressSpaceConfig {
        &self.config
    }

    /// Space role.
    #[must_use]
    pub const fn kind(&self) -> SpaceKind {
        self.config.kind
    }

    /// Highest decodable address.
    #[must_use]
    pub const fn max_address(&self) -> u64 {
        self.config.max_address()
    }

    /// Whether configuration has ended for this space.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed.get()
    }

    /// Ends the configuration phase; further installs fail.
    pub fn seal(&self) {
        self.sealed.set(true);
    }

    /// Reads that hit no handler so far.
    #[must_use]
    pub fn unmapped_reads(&self) -> u64 {
        self.unmapped_reads.get()
    }

    /// Writes that hit no handler so far.
    #[must_use]
    pub fn unmapped_writes(&self) -> u64 {
        self.unmapped_writes.get()
    }

    /// Installs a handler for `range`.
    ///
    /// # Errors
    ///
    /// Fails when the space is sealed, the range is inverted or exceeds the
    /// address width, backing memory is too short, or the range overlaps an
    /// installed entry.
    pub fn install(&self, range: RangeInclusive<u64>, handler: Handler) -> Result<(), ConfigError> {
        let (start, end) = self.validate(&range, &handler)?;
        let mut entries = self.entries.borrow_mut();
        let index = entries.partition_point(|entry| entry.end < start);
        if let Some(existing) = entries.get(index).filter(|entry| entry.start <= end) {
            return Err(ConfigError::Overlap {
                space: self.name.clone(),
                start,
                end,
                existing_start: existing.start,
                existing_end: existing.end,
            });
        }
        debug!("{}: {start:#x}..={end:#x} -> {handler:?}", self.name);
        entries.insert(
            index,
            HandlerEntry {
                start,
                end,
                origin: start,
                handler,
            },
        );
        Ok(())
    }

    /// Installs a handler for `range`, carving it out of any entries it
    /// overlaps. The most recent install wins.
    ///
    /// # Errors
    ///
    /// Same as [`Self::install`], minus the overlap check.
    pub fn install_override(
        &self,
        range: RangeInclusive<u64>,
        handler: Handler,
    ) -> Result<(), ConfigError> {
        let (start, end) = self.validate(&range, &handler)?;
        let mut entries = self.entries.borrow_mut();
        let first = entries.partition_point(|entry| entry.end < start);
        let last = entries.partition_point(|entry| entry.start <= end);

        let mut replacement = Vec::with_capacity(3);
        for entry in entries.get(first..last).unwrap_or_default() {
            if entry.start < start {
                replacement.push(HandlerEntry {
                    end: start - 1,
                    ..entry.clone()
                });
            }
        }
        replacement.push(HandlerEntry {
            start,
            end,
            origin: start,
            handler,
        });
        for entry in entries.get(first..last).unwrap_or_default() {
            if entry.end > end {
                replacement.push(HandlerEntry {
                    start: end + 1,
                    ..entry.clone()
                });
            }
        }
        debug!(
            "{}: override {start:#x}..={end:#x} replaces {} entries",
            self.name,
            last - first
        );
        entries.splice(first..last, replacement);
        Ok(())
    }

    /// Introspection over installed ranges in address order.
    #[must_use]
    pub fn entries(&self) -> Vec<RangeInfo> {
        self.entries.borrow().iter().map(HandlerEntry::info).collect()
    }

    /// The installed range covering `addr`, if any.
    #[must_use]
    pub fn lookup(&self, addr: u64) -> Option<RangeInfo> {
        let addr = addr & self.max_address();
        let entries = self.entries.borrow();
        let index = entries.partition_point(|entry| entry.end < addr);
        entries
            .get(index)
            .filter(|entry| entry.start <= addr)
            .map(HandlerEntry::info)
    }

    /// Reads `width` bytes at `addr`.
    ///
    /// Never fails: unmapped addresses yield the open-bus value.
    pub fn read(&self, ctx: &MachineContext, addr: u64, width: AccessWidth) -> u64 {
        let addr = addr & self.max_address();
        let resolved = self.resolve(addr);
        if self.must_split(&resolved, addr, width) {
            if let Some(half) = width.half() {
                let first = self.read(ctx, addr, half);
                let second = self.read(ctx, self.next_address(addr, half), half);
                return self.combine(first, second, half);
            }
        }

        let value = match &resolved.handler {
            Handler::Ram { block, offset } | Handler::Rom { block, offset } => {
                self.read_block(block, offset.saturating_add(span_offset(addr, resolved.origin)), width)
            }
            Handler::Bank(bank) => {
                let (block, base) = bank.target();
                self.read_block(block, base.saturating_add(span_offset(addr, resolved.origin)), width)
            }
            Handler::Callback(handler) => handler
                .read(ctx, addr - resolved.origin, width)
                .map(|value| value & width.mask()),
            Handler::Unmapped => None,
        };

        match value {
            Some(value) => {
                self.last_driven.set(value);
                value
            }
            None => self.open_bus_read(ctx, addr, width),
        }
    }

    /// Writes `width` bytes of `value` at `addr`.
    ///
    /// Never fails: unmapped and read-only targets discard the write.
    pub fn write(&self, ctx: &MachineContext, addr: u64, width: AccessWidth, value: u64) {
        let addr = addr & self.max_address();
        let value = value & width.mask();
        let resolved = self.resolve(addr);
        if self.must_split(&resolved, addr, width) {
            if let Some(half) = width.half() {
                let (first, second) = self.split(value, half);
                self.write(ctx, addr, half, first);
                self.write(ctx, self.next_address(addr, half), half, second);
                return;
            }
        }

        self.last_driven.set(value);
        match &resolved.handler {
            Handler::Ram { block, offset } => {
                self.write_block(block, offset.saturating_add(span_offset(addr, resolved.origin)), width, value);
            }
            Handler::Rom { block, .. } => {
                trace!("{}: write {value:#x} to rom `{}` at {addr:#x} discarded", self.name, block.tag());
            }
            Handler::Bank(bank) => {
                if bank.is_read_only() {
                    trace!("{}: write {value:#x} to read-only bank `{}` discarded", self.name, bank.tag());
                } else {
                    let (block, base) = bank.target();
                    self.write_block(block, base.saturating_add(span_offset(addr, resolved.origin)), width, value);
                }
            }
            Handler::Callback(handler) => handler.write(ctx, addr - resolved.origin, width, value),
            Handler::Unmapped => {
                self.unmapped_writes
                    .set(self.unmapped_writes.get().saturating_add(1));
                trace!("{}: unmapped write {value:#x} at {addr:#x}", self.name);
                ctx.record_unmapped(self.config.kind, addr, true);
            }
        }
    }

    /// Byte read.
    pub fn read_u8(&self, ctx: &MachineContext, addr: u64) -> u8 {
        narrow(self.read(ctx, addr, AccessWidth::Byte))
    }

    /// 16-bit read in the space's byte order.
    pub fn read_u16(&self, ctx: &MachineContext, addr: u64) -> u16 {
        narrow(self.read(ctx, addr, AccessWidth::Word))
    }

    /// 32-bit read in the space's byte order.
    pub fn read_u32(&self, ctx: &MachineContext, addr: u64) -> u32 {
        narrow(self.read(ctx, addr, AccessWidth::DWord))
    }

    /// Byte write.
    pub fn write_u8(&self, ctx: &MachineContext, addr: u64, value: u8) {
        self.write(ctx, addr, AccessWidth::Byte, u64::from(value));
    }

    /// 16-bit write in the space's byte order.
    pub fn write_u16(&self, ctx: &MachineContext, addr: u64, value: u16) {
        self.write(ctx, addr, AccessWidth::Word, u64::from(value));
    }

    /// 32-bit write in the space's byte order.
    pub fn write_u32(&self, ctx: &MachineContext, addr: u64, value: u32) {
        self.write(ctx, addr, AccessWidth::DWord, u64::from(value));
    }

    fn validate(
        &self,
        range: &RangeInclusive<u64>,
        handler: &Handler,
    ) -> Result<(u64, u64), ConfigError> {
        let (start, end) = (*range.start(), *range.end());
        if self.sealed.get() {
            return Err(ConfigError::SpaceSealed(self.name.clone()));
        }
        if start > end {
            return Err(ConfigError::InvertedRange {
                space: self.name.clone(),
                start,
                end,
            });
        }
        if end > self.max_address() {
            return Err(ConfigError::RangeOutOfBounds {
                space: self.name.clone(),
                start,
                end,
                max: self.max_address(),
            });
        }

        let span = usize::try_from(end - start).unwrap_or(usize::MAX).saturating_add(1);
        let (tag, available, needed) = match handler {
            Handler::Ram { block, offset } | Handler::Rom { block, offset } => {
                (block.tag(), block.len(), offset.saturating_add(span))
            }
            Handler::Bank(bank) => (bank.tag(), bank.window_len(), span),
            Handler::Callback(_) | Handler::Unmapped => return Ok((start, end)),
        };
        if available < needed {
            return Err(ConfigError::MemoryTooSmall {
                tag: tag.to_owned(),
                len: available,
                needed,
            });
        }
        Ok((start, end))
    }

    /// Finds the entry covering `addr` and releases the entry list before
    /// returning, so handlers may re-enter this space.
    fn resolve(&self, addr: u64) -> Resolved {
        let entries = self.entries.borrow();
        let index = entries.partition_point(|entry| entry.end < addr);
        match entries.get(index) {
            Some(entry) if entry.start <= addr => Resolved {
                end: entry.end,
                origin: entry.origin,
                handler: entry.handler.clone(),
            },
            next => {
                let start = index
                    .checked_sub(1)
                    .and_then(|prev| entries.get(prev))
                    .map_or(0, |prev| prev.end + 1);
                let end = next.map_or(self.max_address(), |entry| entry.start - 1);
                Resolved {
                    end,
                    origin: start,
                    handler: Handler::Unmapped,
                }
            }
        }
    }

    fn must_split(&self, resolved: &Resolved, addr: u64, width: AccessWidth) -> bool {
        if width == AccessWidth::Byte {
            return false;
        }
        if width > self.config.data_width {
            return true;
        }
        !matches!(addr.checked_add(width.bytes() - 1), Some(last) if last <= resolved.end)
    }

    fn next_address(&self, addr: u64, half: AccessWidth) -> u64 {
        addr.wrapping_add(half.bytes()) & self.max_address()
    }

    /// Joins two half-width values read in ascending address order.
    fn combine(&self, first: u64, second: u64, half: AccessWidth) -> u64 {
        match self.config.endianness {
            Endianness::Little => first | (second << half.bits()),
            Endianness::Big => (first << half.bits()) | second,
        }
    }

    /// Splits a value into the halves written at the lower and higher address.
    fn split(&self, value: u64, half: AccessWidth) -> (u64, u64) {
        let low = value & half.mask();
        let high = (value >> half.bits()) & half.mask();
        match self.config.endianness {
            Endianness::Little => (low, high),
            Endianness::Big => (high, low),
        }
    }

    fn read_block(&self, block: &MemoryBlock, offset: usize, width: AccessWidth) -> Option<u64> {
        let mut value = 0_u64;
        for index in 0..width.bytes() {
            let byte = block.get(offset + index as usize)?;
            value = match self.config.endianness {
                Endianness::Little => value | (u64::from(byte) << (8 * index)),
                Endianness::Big => (value << 8) | u64::from(byte),
            };
        }
        Some(value)
    }

    fn write_block(&self, block: &MemoryBlock, offset: usize, width: AccessWidth, value: u64) {
        let count = width.bytes();
        for index in 0..count {
            let shift = match self.config.endianness {
                Endianness::Little => 8 * index,
                Endianness::Big => 8 * (count - 1 - index),
            };
            block.set(offset + index as usize, narrow::<u8>((value >> shift) & 0xFF));
        }
    }

    fn open_bus_read(&self, ctx: &MachineContext, addr: u64, width: AccessWidth) -> u64 {
        self.unmapped_reads
            .set(self.unmapped_reads.get().saturating_add(1));
        trace!("{}: unmapped read at {addr:#x}", self.name);
        ctx.record_unmapped(self.config.kind, addr, false);
        self.open_bus_value(addr, width)
    }

    /// Value an undriven access of `width` at `addr` observes.
    #[must_use]
    pub fn open_bus_value(&self, addr: u64, width: AccessWidth) -> u64 {
        const REPEAT: u64 = 0x0101_0101_0101_0101;
        let value = match self.config.open_bus {
            OpenBus::Fixed(pattern) => u64::from(pattern).wrapping_mul(REPEAT),
            OpenBus::LastDriven => self.last_driven.get(),
            OpenBus::AddressLowByte => (addr & 0xFF).wrapping_mul(REPEAT),
        };
        value & width.mask()
    }
}

fn span_offset(addr: u64, start: u64) -> usize {
    usize::try_from(addr - start).unwrap_or(usize::MAX)
}

fn narrow<T: TryFrom<u64> + Default>(value: u64) -> T {
    T::try_from(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;
    use std::rc::Rc;

    use proptest::prelude::*;
    use rstest::rstest;

    use super::AddressSpace;
    use crate::{
        AccessWidth, AddressSpaceConfig, ConfigError, Endianness, FnHandler, Handler, HandlerKind,
        Machine, MachineConfig, MemoryBank, MemoryBlock, OpenBus, SpaceKind,
    };

    fn space(endianness: Endianness, data_width: AccessWidth) -> AddressSpace {
        AddressSpace::new(
            "cpu:program",
            AddressSpaceConfig::new(SpaceKind::Program, 16, data_width, endianness),
        )
    }

    fn machine() -> Machine {
        Machine::builder(MachineConfig::default())
            .build()
            .expect("empty machine builds")
    }

    fn ram(tag: &str, len: usize) -> Rc<MemoryBlock> {
        Rc::new(MemoryBlock::new(tag, len))
    }

    #[test]
    fn reads_reach_the_installed_handler_and_gaps_float() {
        let machine = machine();
        let ctx = machine.context();
        let space = space(Endianness::Little, AccessWidth::Byte);
        let block = ram("work", 0x100);
        block.set(0x10, 0x5A);
        space.install(0x1000..=0x10FF, Handler::ram(&block)).expect("install");

        assert_eq!(space.read_u8(ctx, 0x1010), 0x5A);
        assert_eq!(space.read_u8(ctx, 0x0FFF), 0xFF);
        assert_eq!(space.read_u8(ctx, 0x1100), 0xFF);
        assert_eq!(space.unmapped_reads(), 2);

        space.write_u8(ctx, 0x2000, 0x12);
        assert_eq!(space.unmapped_writes(), 1);
        assert_eq!(ctx.diag().unmapped_writes, 1);
    }

    #[test]
    fn addresses_are_masked_to_the_space_width() {
        let machine = machine();
        let ctx = machine.context();
        let space = space(Endianness::Little, AccessWidth::Byte);
        let block = ram("work", 0x10);
        space.install(0x0000..=0x000F, Handler::ram(&block)).expect("install");

        space.write_u8(ctx, 0x1_0003, 0x77);
        assert_eq!(block.get(3), Some(0x77));
    }

    #[test]
    fn overlapping_installs_are_configuration_errors() {
        let space = space(Endianness::Little, AccessWidth::Byte);
        let block = ram("work", 0x4000);
        space.install(0x0000..=0x3FFF, Handler::ram(&block)).expect("install");

        let err = space
            .install(0x2000..=0x2FFF, Handler::Unmapped)
            .expect_err("overlap rejected");
        assert_eq!(
            err,
            ConfigError::Overlap {
                space: "cpu:program".into(),
                start: 0x2000,
                end: 0x2FFF,
                existing_start: 0x0000,
                existing_end: 0x3FFF,
            }
        );
    }

    #[rstest]
    #[case(0x20..=0x10, "inverted")]
    #[case(0xFF00..=0x1_0000, "bounds")]
    #[case(0x0000..=0x01FF, "small")]
    fn invalid_installs_are_rejected(#[case] range: core::ops::RangeInclusive<u64>, #[case] why: &str) {
        let space = space(Endianness::Little, AccessWidth::Byte);
        let block = ram("work", 0x100);
        let err = space
            .install(range, Handler::ram(&block))
            .expect_err("install must fail");
        let matches = match why {
            "inverted" => matches!(err, ConfigError::InvertedRange { .. }),
            "bounds" => matches!(err, ConfigError::RangeOutOfBounds { .. }),
            _ => matches!(err, ConfigError::MemoryTooSmall { needed: 0x200, .. }),
        };
        assert!(matches, "{why}: {err}");
    }

    #[test]
    fn sealed_spaces_refuse_installs() {
        let space = space(Endianness::Little, AccessWidth::Byte);
        space.seal();
        assert_eq!(
            space.install(0..=1, Handler::Unmapped),
            Err(ConfigError::SpaceSealed("cpu:program".into()))
        );
    }

    #[test]
    fn override_splits_existing_entries_and_keeps_callback_offsets() {
        let machine = machine();
        let ctx = machine.context();
        let space = space(Endianness::Little, AccessWidth::Byte);
        space
            .install(
                0x0000..=0x00FF,
                Handler::callback(FnHandler::read_only("regs", |_, offset, _| offset)),
            )
            .expect("install");
        let block = ram("patch", 0x10);
        block.set(0, 0xEE);
        space
            .install_override(0x0040..=0x004F, Handler::ram(&block))
            .expect("override");

        let ranges: Vec<_> = space
            .entries()
            .iter()
            .map(|info| (info.start, info.end, info.kind))
            .collect();
        assert_eq!(
            ranges,
            vec![
                (0x00, 0x3F, HandlerKind::Callback),
                (0x40, 0x4F, HandlerKind::Ram),
                (0x50, 0xFF, HandlerKind::Callback),
            ]
        );
        assert_eq!(space.read_u8(ctx, 0x0040), 0xEE);
        assert_eq!(space.read_u8(ctx, 0x0060), 0x60);
        assert_eq!(space.lookup(0x60).map(|info| info.origin), Some(0));
    }

    #[test]
    fn lookup_finds_the_covering_range_and_skips_gaps() {
        let space = space(Endianness::Little, AccessWidth::Byte);
        let low = ram("low", 0x10);
        let high = ram("high", 0x100);
        space.install(0x0000..=0x000F, Handler::ram(&low)).expect("install");
        space.install(0x8000..=0x80FF, Handler::ram(&high)).expect("install");

        let span = |addr| space.lookup(addr).map(|info| (info.start, info.end, info.label));
        assert_eq!(span(0x0000), Some((0x0000, 0x000F, "low".to_owned())));
        assert_eq!(span(0x000F), Some((0x0000, 0x000F, "low".to_owned())));
        assert_eq!(span(0x0010), None);
        assert_eq!(span(0x7FFF), None);
        assert_eq!(span(0x80FF), Some((0x8000, 0x80FF, "high".to_owned())));
        assert_eq!(span(0x8100), None);
        assert_eq!(span(0x1_8005), Some((0x8000, 0x80FF, "high".to_owned())));
    }

    #[rstest]
    #[case(Endianness::Little, 0x3412)]
    #[case(Endianness::Big, 0x1234)]
    fn wide_reads_straddling_entries_follow_endianness(
        #[case] endianness: Endianness,
        #[case] expected: u16,
    ) {
        let machine = machine();
        let ctx = machine.context();
        let space = space(endianness, AccessWidth::Word);
        let low = ram("low", 0x10);
        let high = ram("high", 0x10);
        low.set(0x0F, 0x12);
        high.set(0x00, 0x34);
        space.install(0x00..=0x0F, Handler::ram(&low)).expect("install");
        space.install(0x10..=0x1F, Handler::ram(&high)).expect("install");

        assert_eq!(space.read_u16(ctx, 0x0F), expected);
    }

    #[test]
    fn accesses_wider_than_the_bus_hit_callbacks_in_address_order() {
        let machine = machine();
        let ctx = machine.context();
        let space = space(Endianness::Little, AccessWidth::Byte);
        let log = Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        space
            .install(
                0x00..=0xFF,
                Handler::callback(FnHandler::write_only("latch", move |_, offset, width, value| {
                    sink.borrow_mut().push((offset, width, value));
                })),
            )
            .expect("install");

        space.write_u32(ctx, 0x10, 0xAABB_CCDD);
        assert_eq!(
            *log.borrow(),
            vec![
                (0x10, AccessWidth::Byte, 0xDD),
                (0x11, AccessWidth::Byte, 0xCC),
                (0x12, AccessWidth::Byte, 0xBB),
                (0x13, AccessWidth::Byte, 0xAA),
            ]
        );
        assert_eq!(space.read_u8(ctx, 0x10), 0xFF, "write-only handlers float on read");
    }

    #[test]
    fn rom_writes_are_discarded() {
        let machine = machine();
        let ctx = machine.context();
        let space = space(Endianness::Little, AccessWidth::Byte);
        let rom = Rc::new(MemoryBlock::from_bytes("boot", &[0xC3, 0x00]));
        space.install(0x00..=0x01, Handler::rom(&rom)).expect("install");

        space.write_u8(ctx, 0x00, 0x00);
        assert_eq!(space.read_u8(ctx, 0x00), 0xC3);
    }

    #[test]
    fn bank_selection_redirects_reads_and_writes() {
        let machine = machine();
        let ctx = machine.context();
        let space = space(Endianness::Little, AccessWidth::Byte);
        let block = ram("banked", 0x200);
        let bank = Rc::new(
            MemoryBank::from_block("window", &block, 0x100, 2, false).expect("valid bank"),
        );
        space
            .install(0x8000..=0x80FF, Handler::bank(&bank))
            .expect("install");

        space.write_u8(ctx, 0x8000, 0x11);
        bank.select(1).expect("entry exists");
        space.write_u8(ctx, 0x8000, 0x22);
        assert_eq!(block.get(0x000), Some(0x11));
        assert_eq!(block.get(0x100), Some(0x22));

        bank.select(0).expect("entry exists");
        bank.select(0).expect("entry exists");
        assert_eq!(space.read_u8(ctx, 0x8000), 0x11);
    }

    #[rstest]
    #[case(OpenBus::Fixed(0x00), 0x0000)]
    #[case(OpenBus::Fixed(0xFF), 0xFFFF)]
    #[case(OpenBus::AddressLowByte, 0x3434)]
    fn open_bus_policies(#[case] policy: OpenBus, #[case] expected: u64) {
        let machine = machine();
        let space = AddressSpace::new(
            "cpu:io",
            AddressSpaceConfig::new(SpaceKind::Io, 16, AccessWidth::Word, Endianness::Little)
                .with_open_bus(policy),
        );
        assert_eq!(space.read(machine.context(), 0x1234, AccessWidth::Word), expected);
    }

    #[test]
    fn last_driven_open_bus_repeats_previous_bus_value() {
        let machine = machine();
        let ctx = machine.context();
        let space = AddressSpace::new(
            "cpu:program",
            AddressSpaceConfig::new(SpaceKind::Program, 16, AccessWidth::Byte, Endianness::Little)
                .with_open_bus(OpenBus::LastDriven),
        );
        let block = ram("work", 1);
        block.set(0, 0x42);
        space.install(0..=0, Handler::ram(&block)).expect("install");

        assert_eq!(space.read_u8(ctx, 0), 0x42);
        assert_eq!(space.read_u8(ctx, 0x100), 0x42);
    }

    #[test]
    fn handlers_may_reenter_their_own_space() {
        let machine = machine();
        let ctx = machine.context();
        let space = Rc::new(space(Endianness::Little, AccessWidth::Byte));
        let block = ram("work", 0x10);
        space.install(0x00..=0x0F, Handler::ram(&block)).expect("install");

        let mirror = Rc::downgrade(&space);
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        space
            .install(
                0x10..=0x1F,
                Handler::callback(FnHandler::read_only("mirror", move |ctx, offset, _| {
                    counter.set(counter.get() + 1);
                    mirror
                        .upgrade()
                        .map_or(0, |space| u64::from(space.read_u8(ctx, offset)))
                })),
            )
            .expect("install");

        block.set(5, 0x99);
        assert_eq!(space.read_u8(ctx, 0x15), 0x99);
        assert_eq!(hits.get(), 1);
    }

    proptest! {
        #[test]
        fn property_dispatch_reaches_exactly_the_covering_entry(
            cuts in prop::collection::btree_set(1_u64..0xFFFF, 1..12),
            addrs in prop::collection::vec(0_u64..=0xFFFF, 1..64),
        ) {
            let machine = machine();
            let ctx = machine.context();
            let space = space(Endianness::Little, AccessWidth::Byte);

            let mut bounds: Vec<u64> = cuts.into_iter().collect();
            bounds.insert(0, 0);
            let mut mapped = Vec::new();
            for (index, pair) in bounds.windows(2).enumerate() {
                if index % 2 == 0 {
                    let (start, end) = (pair[0], pair[1] - 1);
                    let tag = index as u64;
                    space.install(
                        start..=end,
                        Handler::callback(FnHandler::read_only("marker", move |_, _, _| tag)),
                    ).expect("disjoint install");
                    mapped.push((start, end, tag));
                }
            }

            for addr in addrs {
                let expected = mapped
                    .iter()
                    .find(|(start, end, _)| (*start..=*end).contains(&addr))
                    .map_or(0xFF, |(_, _, tag)| *tag & 0xFF);
                prop_assert_eq!(u64::from(space.read_u8(ctx, addr)), expected);
            }
        }
    }
}
