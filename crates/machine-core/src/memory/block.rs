//! Tagged byte buffers backing RAM, ROM and banked entries.

use core::cell::Cell;

/// A named, fixed-size byte buffer shared between handler entries.
///
/// Bytes live in [`Cell`]s so the same block can be mapped into several
/// spaces and written through any of them without a runtime borrow.
#[derive(Debug)]
pub struct MemoryBlock {
    tag: String,
    bytes: Box<[Cell<u8>]>,
}

impl MemoryBlock {
    /// Allocates a zeroed block.
    #[must_use]
    pub fn new(tag: impl Into<String>, len: usize) -> Self {
        Self::filled(tag, len, 0)
    }

    /// Allocates a block with every byte set to `fill`.
    #[must_use]
    pub fn filled(tag: impl Into<String>, len: usize, fill: u8) -> Self {
        Self {
            tag: tag.into(),
            bytes: (0..len).map(|_| Cell::new(fill)).collect(),
        }
    }

    /// Wraps an existing image, typically ROM contents.
    #[must_use]
    pub fn from_bytes(tag: impl Into<String>, image: &[u8]) -> Self {
        Self {
            tag: tag.into(),
            bytes: image.iter().copied().map(Cell::new).collect(),
        }
    }

    /// Block tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` for a zero-length block.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reads one byte, `None` past the end.
    #[must_use]
    pub fn get(&self, offset: usize) -> Option<u8> {
        self.bytes.get(offset).map(Cell::get)
    }

    /// Writes one byte. Out-of-range writes are dropped and reported as `false`.
    pub fn set(&self, offset: usize, value: u8) -> bool {
        self.bytes.get(offset).map(|cell| cell.set(value)).is_some()
    }

    /// Copies `data` into the block at `offset`, truncating at the end.
    ///
    /// Returns the number of bytes copied.
    pub fn load(&self, offset: usize, data: &[u8]) -> usize {
        let Some(window) = self.bytes.get(offset..) else {
            return 0;
        };
        let mut copied = 0;
        for (cell, byte) in window.iter().zip(data) {
            cell.set(*byte);
            copied += 1;
        }
        copied
    }

    /// Copies the current contents out.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.iter().map(Cell::get).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryBlock;

    #[test]
    fn block_reads_back_writes_and_bounds_checks() {
        let block = MemoryBlock::new("ram", 4);
        assert!(block.set(3, 0xAA));
        assert!(!block.set(4, 0xBB));
        assert_eq!(block.get(3), Some(0xAA));
        assert_eq!(block.get(4), None);
        assert_eq!(block.to_vec(), vec![0, 0, 0, 0xAA]);
    }

    #[test]
    fn load_truncates_at_block_end() {
        let block = MemoryBlock::filled("rom", 4, 0xFF);
        assert_eq!(block.load(2, &[1, 2, 3]), 2);
        assert_eq!(block.to_vec(), vec![0xFF, 0xFF, 1, 2]);
        assert_eq!(block.load(9, &[1]), 0);
    }
}
