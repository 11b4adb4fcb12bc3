use core::fmt;

/// Symbolic register id. Stable within one processor type, documented per
/// type, with no meaning shared across types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct StateId(pub u16);

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Describes one register exposed through the state interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateEntry {
    /// Register id.
    pub id: StateId,
    /// Display name.
    pub name: &'static str,
    /// Significant bits; values are masked to this width on write.
    pub bits: u8,
    /// Whether `set_state` accepts this id.
    pub writable: bool,
}

impl StateEntry {
    /// Writable register entry.
    #[must_use]
    pub const fn new(id: u16, name: &'static str, bits: u8) -> Self {
        Self {
            id: StateId(id),
            name,
            bits,
            writable: true,
        }
    }

    /// Read-only register entry.
    #[must_use]
    pub const fn read_only(id: u16, name: &'static str, bits: u8) -> Self {
        Self {
            id: StateId(id),
            name,
            bits,
            writable: false,
        }
    }

    /// All-ones value of this register's width.
    #[must_use]
    pub const fn mask(&self) -> u64 {
        if self.bits >= 64 {
            u64::MAX
        } else {
            (1_u64 << self.bits) - 1
        }
    }
}
