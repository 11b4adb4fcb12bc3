//! Address spaces, their handler entries, and the memory that backs them.

/// Runtime-selectable memory banks.
pub mod bank;
/// Tagged contiguous memory buffers.
pub mod block;
/// Handler targets and callback handler contracts.
pub mod map;
/// Address-space decoding and access dispatch.
pub mod space;

use core::fmt;

pub use bank::MemoryBank;
pub use block::MemoryBlock;
pub use map::{BusHandler, FnHandler, Handler, HandlerKind, RangeInfo};
pub use space::AddressSpace;

/// Width of one bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum AccessWidth {
    /// 8-bit access.
    Byte,
    /// 16-bit access.
    Word,
    /// 32-bit access.
    DWord,
    /// 64-bit access.
    QWord,
}

/// Access widths ordered from narrowest to widest.
pub const ACCESS_WIDTHS: [AccessWidth; 4] = [
    AccessWidth::Byte,
    AccessWidth::Word,
    AccessWidth::DWord,
    AccessWidth::QWord,
];

const _: () = assert_width_ladder();

const fn assert_width_ladder() {
    let mut index = 1;
    while index < ACCESS_WIDTHS.len() {
        let narrow = ACCESS_WIDTHS[index - 1];
        let wide = ACCESS_WIDTHS[index];
        assert!(
            narrow.bytes() * 2 == wide.bytes(),
            "each access width must double the previous one"
        );
        match wide.half() {
            Some(half) => assert!(
                half.bytes() == narrow.bytes(),
                "half of a width must be the previous width"
            ),
            None => panic!("only byte accesses are indivisible"),
        }
        index += 1;
    }
}

impl AccessWidth {
    /// Number of bytes moved by the access.
    #[must_use]
    pub const fn bytes(self) -> u64 {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
            Self::DWord => 4,
            Self::QWord => 8,
        }
    }

    /// Number of bits moved by the access.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::Byte => 8,
            Self::Word => 16,
            Self::DWord => 32,
            Self::QWord => 64,
        }
    }

    /// All-ones value of this width.
    #[must_use]
    pub const fn mask(self) -> u64 {
        match self {
            Self::QWord => u64::MAX,
            _ => (1_u64 << self.bits()) - 1,
        }
    }

    /// The width an access of this width decomposes into, if any.
    #[must_use]
    pub const fn half(self) -> Option<Self> {
        match self {
            Self::Byte => None,
            Self::Word => Some(Self::Byte),
            Self::DWord => Some(Self::Word),
            Self::QWord => Some(Self::DWord),
        }
    }

    /// Maps a byte count back to a width.
    #[must_use]
    pub const fn from_bytes(bytes: u64) -> Option<Self> {
        match bytes {
            1 => Some(Self::Byte),
            2 => Some(Self::Word),
            4 => Some(Self::DWord),
            8 => Some(Self::QWord),
            _ => None,
        }
    }
}

/// Byte order used to assemble multi-byte values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Endianness {
    /// Lowest address holds the least significant byte.
    #[default]
    Little,
    /// Lowest address holds the most significant byte.
    Big,
}

/// Which of a device's address spaces an access goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum SpaceKind {
    /// Instruction and general data space.
    Program,
    /// Separate data space on Harvard-style processors.
    Data,
    /// Port-mapped I/O space.
    Io,
    /// Opcode-fetch space, used by processors with decrypted opcode buses.
    Opcodes,
}

/// Every space kind, in the order devices are queried for them.
pub const SPACE_KINDS: [SpaceKind; 4] = [
    SpaceKind::Program,
    SpaceKind::Data,
    SpaceKind::Io,
    SpaceKind::Opcodes,
];

impl SpaceKind {
    /// Stable lower-case name used when building space names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Program => "program",
            Self::Data => "data",
            Self::Io => "io",
            Self::Opcodes => "opcodes",
        }
    }

    /// Space consulted when a device has no space of this kind.
    #[must_use]
    pub const fn fallback(self) -> Option<Self> {
        match self {
            Self::Opcodes => Some(Self::Program),
            Self::Program | Self::Data | Self::Io => None,
        }
    }
}

impl fmt::Display for SpaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value observed when reading an address no handler drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum OpenBus {
    /// A fixed byte pattern, repeated across the access width.
    Fixed(u8),
    /// Whatever value was last driven on this space's data bus.
    LastDriven,
    /// The low byte of the address, repeated across the access width.
    AddressLowByte,
}

impl Default for OpenBus {
    fn default() -> Self {
        Self::Fixed(0xFF)
    }
}

/// Shape of one address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct AddressSpaceConfig {
    /// Space role.
    pub kind: SpaceKind,
    /// Number of decoded address bits (1..=64).
    pub address_bits: u8,
    /// Native data bus width. Wider accesses are decomposed.
    pub data_width: AccessWidth,
    /// Byte order for multi-byte values.
    pub endianness: Endianness,
    /// Unmapped read policy.
    pub open_bus: OpenBus,
}

impl AddressSpaceConfig {
    /// Creates a space shape with the default open-bus policy.
    #[must_use]
    pub const fn new(
        kind: SpaceKind,
        address_bits: u8,
        data_width: AccessWidth,
        endianness: Endianness,
    ) -> Self {
        Self {
            kind,
            address_bits,
            data_width,
            endianness,
            open_bus: OpenBus::Fixed(0xFF),
        }
    }

    /// Replaces the open-bus policy.
    #[must_use]
    pub const fn with_open_bus(mut self, open_bus: OpenBus) -> Self {
        self.open_bus = open_bus;
        self
    }

    /// Highest decodable address.
    #[must_use]
    pub const fn max_address(&self) -> u64 {
        if self.address_bits >= 64 {
            u64::MAX
        } else {
            (1_u64 << self.address_bits) - 1
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{AccessWidth, AddressSpaceConfig, Endianness, OpenBus, SpaceKind};

    #[rstest]
    #[case(AccessWidth::Byte, 1, 0xFF)]
    #[case(AccessWidth::Word, 2, 0xFFFF)]
    #[case(AccessWidth::DWord, 4, 0xFFFF_FFFF)]
    #[case(AccessWidth::QWord, 8, u64::MAX)]
    fn width_geometry(#[case] width: AccessWidth, #[case] bytes: u64, #[case] mask: u64) {
        assert_eq!(width.bytes(), bytes);
        assert_eq!(width.mask(), mask);
        assert_eq!(AccessWidth::from_bytes(bytes), Some(width));
    }

    #[test]
    fn opcode_space_falls_back_to_program() {
        assert_eq!(SpaceKind::Opcodes.fallback(), Some(SpaceKind::Program));
        assert_eq!(SpaceKind::Io.fallback(), None);
        assert_eq!(SpaceKind::Io.to_string(), "io");
    }

    #[test]
    fn space_config_masks_and_defaults() {
        let config =
            AddressSpaceConfig::new(SpaceKind::Program, 16, AccessWidth::Byte, Endianness::Little);
        assert_eq!(config.max_address(), 0xFFFF);
        assert_eq!(config.open_bus, OpenBus::Fixed(0xFF));

        let wide = config.with_open_bus(OpenBus::LastDriven);
        assert_eq!(wide.open_bus, OpenBus::LastDriven);
        let full =
            AddressSpaceConfig::new(SpaceKind::Data, 64, AccessWidth::QWord, Endianness::Big);
        assert_eq!(full.max_address(), u64::MAX);
    }
}
