//! Engine memory
//!
//! Document bytes live in engine-owned memory addressed by `(offset, len)`.
//! The dispatcher allocates a block when a document is loaded and frees it
//! when the owning instance is deleted or loads another document.

use std::collections::BTreeMap;

use log::debug;

const ALIGN: usize = 8;

/// An allocated block of engine memory
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Region {
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeapError {
    #[error("no block allocated at offset {0}")]
    UnknownBlock(usize),
    #[error("range {offset}+{len} is outside the block at {offset}")]
    OutOfBounds { offset: usize, len: usize },
}

#[derive(Debug)]
pub struct EngineHeap {
    blocks: BTreeMap<usize, Vec<u8>>,
    next_offset: usize,
}

impl Default for EngineHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineHeap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: BTreeMap::new(),
            // offset 0 reads as a null pointer to engines
            next_offset: ALIGN,
        }
    }

    /// Take ownership of `bytes` and return where they live
    pub fn alloc(&mut self, bytes: Vec<u8>) -> Region {
        let offset = self.next_offset;
        let len = bytes.len();
        self.next_offset += len.max(1).div_ceil(ALIGN) * ALIGN;
        self.blocks.insert(offset, bytes);
        debug!("Heap: allocated {len} bytes at {offset}");
        Region { offset, len }
    }

    pub fn read(&self, region: Region) -> Result<&[u8], HeapError> {
        let block = self
            .blocks
            .get(&region.offset)
            .ok_or(HeapError::UnknownBlock(region.offset))?;
        block.get(..region.len).ok_or(HeapError::OutOfBounds {
            offset: region.offset,
            len: region.len,
        })
    }

    /// Copy a region out of engine memory
    pub fn slice(&self, region: Region) -> Result<Vec<u8>, HeapError> {
        self.read(region).map(<[u8]>::to_vec)
    }

    /// Release the block at `offset`, returning its size
    pub fn free(&mut self, offset: usize) -> Result<usize, HeapError> {
        let block = self
            .blocks
            .remove(&offset)
            .ok_or(HeapError::UnknownBlock(offset))?;
        debug!("Heap: freed {} bytes at {offset}", block.len());
        Ok(block.len())
    }

    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.blocks.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_do_not_overlap() {
        let mut heap = EngineHeap::new();
        let a = heap.alloc(vec![1; 5]);
        let b = heap.alloc(vec![2; 3]);
        assert_ne!(a.offset, 0);
        assert!(b.offset >= a.offset + a.len);
        assert_eq!(heap.read(a).unwrap(), &[1; 5]);
        assert_eq!(heap.read(b).unwrap(), &[2; 3]);
        assert_eq!(heap.allocated_bytes(), 8);
    }

    #[test]
    fn free_is_single_shot() {
        let mut heap = EngineHeap::new();
        let a = heap.alloc(vec![0; 16]);
        assert_eq!(heap.free(a.offset), Ok(16));
        assert_eq!(heap.free(a.offset), Err(HeapError::UnknownBlock(a.offset)));
        assert!(heap.read(a).is_err());
        assert_eq!(heap.block_count(), 0);
    }

    #[test]
    fn reads_past_the_block_fail() {
        let mut heap = EngineHeap::new();
        let a = heap.alloc(vec![0; 4]);
        let err = heap
            .read(Region {
                offset: a.offset,
                len: 10,
            })
            .unwrap_err();
        assert!(matches!(err, HeapError::OutOfBounds { .. }));
    }
}
