//! Banked memory: a fixed window whose backing store is chosen at runtime.

use core::cell::Cell;
use std::rc::Rc;

use log::trace;

use crate::{BankError, ConfigError, MemoryBlock};

/// A selector over candidate `(block, offset)` targets.
///
/// Selecting an entry only updates the selector; handler entries that map the
/// bank keep their identity and every other entry is untouched.
#[derive(Debug)]
pub struct MemoryBank {
    tag: String,
    entries: Vec<(Rc<MemoryBlock>, usize)>,
    selected: Cell<usize>,
    read_only: bool,
}

impl MemoryBank {
    /// Creates a bank with entry 0 selected.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EmptyBank`] when `entries` is empty and
    /// [`ConfigError::MemoryTooSmall`] when an offset lies past its block.
    pub fn new(
        tag: impl Into<String>,
        entries: Vec<(Rc<MemoryBlock>, usize)>,
        read_only: bool,
    ) -> Result<Self, ConfigError> {
        let tag = tag.into();
        if entries.is_empty() {
            return Err(ConfigError::EmptyBank(tag));
        }
        if let Some((block, offset)) = entries.iter().find(|(block, offset)| *offset > block.len()) {
            return Err(ConfigError::MemoryTooSmall {
                tag: block.tag().to_owned(),
                len: block.len(),
                needed: *offset,
            });
        }
        Ok(Self {
            tag,
            entries,
            selected: Cell::new(0),
            read_only,
        })
    }

    /// Splits one block into `count` consecutive windows of `stride` bytes.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Self::new`].
    pub fn from_block(
        tag: impl Into<String>,
        block: &Rc<MemoryBlock>,
        stride: usize,
        count: usize,
        read_only: bool,
    ) -> Result<Self, ConfigError> {
        let entries = (0..count)
            .map(|index| (Rc::clone(block), index.saturating_mul(stride)))
            .collect();
        Self::new(tag, entries, read_only)
    }

    /// Bank tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Number of selectable entries.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether writes through the bank are discarded.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Currently selected entry index.
    #[must_use]
    pub fn selected(&self) -> usize {
        self.selected.get()
    }

    /// Points the bank at another entry. Selecting the current entry again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`BankError::EntryOutOfRange`] for an unknown entry; the
    /// previous selection stays in effect.
    pub fn select(&self, index: usize) -> Result<(), BankError> {
        if index >= self.entries.len() {
            return Err(BankError::EntryOutOfRange {
                tag: self.tag.clone(),
                index,
                count: self.entries.len(),
            });
        }
        if self.selected.replace(index) != index {
            trace!("bank `{}` -> entry {index}", self.tag);
        }
        Ok(())
    }

    /// Block and base offset of the selected entry.
    #[must_use]
    pub fn target(&self) -> (&MemoryBlock, usize) {
        let (block, offset) = &self.entries[self.selected.get()];
        (block, *offset)
    }

    /// Smallest window, in bytes, every entry can back.
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.entries
            .iter()
            .map(|(block, offset)| block.len() - offset)
            .min()
            .unwrap_or(0)
    }
}
