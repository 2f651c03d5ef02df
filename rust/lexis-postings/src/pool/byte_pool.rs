use lexis_common::{Result, error::Error};

use super::{
    BYTE_BLOCK_MASK, BYTE_BLOCK_SHIFT, BYTE_BLOCK_SIZE, BlockAllocator, DirectAllocator,
    MAX_BYTE_BLOCKS, SliceLevels,
};

/// An append-only byte arena split into fixed-size blocks.
///
/// Besides plain contiguous allocations (used for interned term text) the pool
/// implements the chained slice scheme behind the posting streams:
///
/// - [`new_slice`](Self::new_slice) carves out a first-level slice whose last
///   byte is a non-zero level marker; every other byte is zero.
/// - A writer appends bytes at its cursor until it hits the marker, then calls
///   [`alloc_slice`](Self::alloc_slice), which allocates the next, larger
///   slice and overwrites the tail of the full slice with a 4-byte big-endian
///   forwarding address.
///
/// All blocks must start out zeroed for the marker test to be reliable.
pub struct ByteBlockPool {
    buffers: Vec<Box<[u8]>>,
    /// Next free byte in the last buffer. Equals `BYTE_BLOCK_SIZE` while no
    /// buffer is allocated.
    byte_upto: usize,
    levels: SliceLevels,
    allocator: Box<dyn BlockAllocator<u8>>,
}

impl ByteBlockPool {
    pub fn new(levels: SliceLevels, allocator: Box<dyn BlockAllocator<u8>>) -> ByteBlockPool {
        ByteBlockPool {
            buffers: Vec::new(),
            byte_upto: BYTE_BLOCK_SIZE,
            levels,
            allocator,
        }
    }

    pub fn levels(&self) -> &SliceLevels {
        &self.levels
    }

    /// Appends a fresh block and makes it the active write target.
    pub fn next_buffer(&mut self) {
        assert!(
            self.buffers.len() < MAX_BYTE_BLOCKS,
            "byte pool exceeded its addressable range"
        );
        let block = self.allocator.allocate_block(BYTE_BLOCK_SIZE);
        self.buffers.push(block);
        self.byte_upto = 0;
    }

    /// Global offset of the first byte of the active block.
    pub fn byte_offset(&self) -> usize {
        self.buffers.len().saturating_sub(1) << BYTE_BLOCK_SHIFT
    }

    /// Next writable global offset.
    pub fn current_offset(&self) -> usize {
        if self.buffers.is_empty() {
            0
        } else {
            self.byte_offset() + self.byte_upto
        }
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.buffers.len() * BYTE_BLOCK_SIZE
    }

    /// Makes sure the active block has room for `len` more bytes, moving on to
    /// a new block otherwise.
    pub fn ensure_room(&mut self, len: usize) {
        assert!(len <= BYTE_BLOCK_SIZE, "{len} bytes never fit in one block");
        if self.byte_upto + len > BYTE_BLOCK_SIZE {
            self.next_buffer();
        }
    }

    /// Allocates `len` contiguous bytes within one block and returns their
    /// global offset.
    ///
    /// Fails with `AllocationExhausted` when `len` exceeds the block size; the
    /// pool is left untouched in that case.
    pub fn allocate(&mut self, len: usize) -> Result<usize> {
        if len > BYTE_BLOCK_SIZE {
            return Err(Error::allocation_exhausted(len, BYTE_BLOCK_SIZE));
        }
        self.ensure_room(len);
        let offset = self.byte_offset() + self.byte_upto;
        self.byte_upto += len;
        Ok(offset)
    }

    /// Copies `data` to `offset`. The destination must lie within one block.
    pub fn write(&mut self, offset: usize, data: &[u8]) {
        let (block, pos) = self.locate(offset, data.len());
        self.buffers[block][pos..pos + data.len()].copy_from_slice(data);
    }

    /// Returns `len` bytes at `offset`. The range must lie within one block.
    pub fn read(&self, offset: usize, len: usize) -> &[u8] {
        let (block, pos) = self.locate(offset, len);
        &self.buffers[block][pos..pos + len]
    }

    #[inline]
    pub fn byte(&self, offset: usize) -> u8 {
        let (block, pos) = self.locate(offset, 1);
        self.buffers[block][pos]
    }

    #[inline]
    pub fn set_byte(&mut self, offset: usize, value: u8) {
        let (block, pos) = self.locate(offset, 1);
        self.buffers[block][pos] = value;
    }

    /// Returns the remainder of the block that contains `offset`, starting at
    /// `offset`.
    pub(crate) fn block_tail(&self, offset: usize) -> &[u8] {
        let (block, pos) = self.locate(offset, 0);
        &self.buffers[block][pos..]
    }

    /// Allocates a first-level slice and returns its global offset.
    pub fn new_slice(&mut self) -> usize {
        let size = self.levels.first_size();
        self.ensure_room(size);
        let upto = self.byte_upto;
        self.byte_upto += size;
        let last = self.buffers.len() - 1;
        self.buffers[last][upto + size - 1] = SliceLevels::marker(0);
        self.byte_offset() + upto
    }

    /// Called when a writer reaches the end marker at `marker_offset`: allocates
    /// the next-level slice, links the full slice to it and returns the global
    /// offset at which writing continues.
    ///
    /// The last three data bytes of the full slice are moved to the start of
    /// the new slice, since their place is taken by the forwarding address.
    pub fn alloc_slice(&mut self, marker_offset: usize) -> usize {
        let level = SliceLevels::level_of(self.byte(marker_offset));
        debug_assert!(level < self.levels.len(), "corrupted slice marker");
        let new_level = self.levels.next_level(level);
        let new_size = self.levels.size(new_level);

        self.ensure_room(new_size);
        let new_upto = self.byte_upto;
        let new_offset = self.byte_offset() + new_upto;
        self.byte_upto += new_size;

        let tail_start = marker_offset - 3;
        let mut tail = [0u8; 3];
        tail.copy_from_slice(self.read(tail_start, 3));

        let last = self.buffers.len() - 1;
        let buffer = &mut self.buffers[last];
        buffer[new_upto..new_upto + 3].copy_from_slice(&tail);
        buffer[new_upto + new_size - 1] = SliceLevels::marker(new_level);

        self.write(tail_start, &(new_offset as u32).to_be_bytes());
        new_offset + 3
    }

    /// Resets the pool. With `reuse_first` the first block is kept (and zeroed
    /// when `zero_fill` is set), every other block goes back to the allocator.
    ///
    /// Pools that carry slices must be zero-filled when the first block is
    /// reused.
    pub fn reset(&mut self, zero_fill: bool, reuse_first: bool) {
        if self.buffers.is_empty() {
            return;
        }
        let single = self.buffers.len() == 1;
        let used_in_first = if single {
            self.byte_upto
        } else {
            BYTE_BLOCK_SIZE
        };
        let keep = usize::from(reuse_first);
        for block in self.buffers.drain(keep..) {
            self.allocator.release_block(block);
        }
        if reuse_first {
            if zero_fill {
                self.buffers[0][..used_in_first].fill(0);
            }
            self.byte_upto = 0;
        } else {
            self.byte_upto = BYTE_BLOCK_SIZE;
        }
    }

    #[inline]
    fn locate(&self, offset: usize, len: usize) -> (usize, usize) {
        let block = offset >> BYTE_BLOCK_SHIFT;
        let pos = offset & BYTE_BLOCK_MASK;
        assert!(
            block < self.buffers.len() && pos + len <= BYTE_BLOCK_SIZE,
            "byte pool range {offset}+{len} is out of bounds"
        );
        (block, pos)
    }
}

impl Default for ByteBlockPool {
    fn default() -> Self {
        Self::new(SliceLevels::default(), Box::new(DirectAllocator))
    }
}

impl std::fmt::Debug for ByteBlockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteBlockPool")
            .field("buffers", &self.buffers.len())
            .field("byte_upto", &self.byte_upto)
            .field("levels", &self.levels)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use lexis_common::error::ErrorKind;

    use super::*;

    #[test]
    fn test_allocate_and_read() {
        let mut pool = ByteBlockPool::default();
        let a = pool.allocate(5).unwrap();
        pool.write(a, b"hello");
        let b = pool.allocate(3).unwrap();
        pool.write(b, b"abc");
        assert_eq!(a, 0);
        assert_eq!(b, 5);
        assert_eq!(pool.read(a, 5), b"hello");
        assert_eq!(pool.byte(b + 2), b'c');
        assert_eq!(pool.current_offset(), 8);
    }

    #[test]
    fn test_allocate_moves_to_next_block() {
        let mut pool = ByteBlockPool::default();
        pool.allocate(BYTE_BLOCK_SIZE - 2).unwrap();
        let offset = pool.allocate(4).unwrap();
        assert_eq!(offset, BYTE_BLOCK_SIZE);
        assert_eq!(pool.buffer_count(), 2);
    }

    #[test]
    fn test_allocate_too_large() {
        let mut pool = ByteBlockPool::default();
        let err = pool.allocate(BYTE_BLOCK_SIZE + 1).unwrap_err();
        assert!(matches!(
            err.kind(),
            ErrorKind::AllocationExhausted { .. }
        ));
        assert_eq!(pool.buffer_count(), 0);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_read_out_of_bounds() {
        let mut pool = ByteBlockPool::default();
        pool.allocate(4).unwrap();
        pool.byte(BYTE_BLOCK_SIZE + 1);
    }

    #[test]
    fn test_new_slice_layout() {
        let mut pool = ByteBlockPool::default();
        let start = pool.new_slice();
        assert_eq!(pool.read(start, 5), &[0, 0, 0, 0, 16]);
        let next = pool.new_slice();
        assert_eq!(next, start + 5);
    }

    #[test]
    fn test_alloc_slice_links_chain() {
        let mut pool = ByteBlockPool::default();
        let start = pool.new_slice();
        pool.write(start, &[1, 2, 3, 4]);
        let marker = start + 4;
        let next = pool.alloc_slice(marker);

        let new_slice_start = next - 3;
        // Tail bytes moved forward.
        assert_eq!(pool.read(new_slice_start, 3), &[2, 3, 4]);
        // Forwarding address replaces the tail and the marker.
        let address = u32::from_be_bytes(pool.read(start + 1, 4).try_into().unwrap());
        assert_eq!(address as usize, new_slice_start);
        // The new slice ends with a level-1 marker.
        let size = pool.levels().size(1);
        assert_eq!(pool.byte(new_slice_start + size - 1), 16 | 1);
    }

    #[test]
    fn test_reset_zero_fills_first_block() {
        let mut pool = ByteBlockPool::default();
        let start = pool.new_slice();
        pool.write(start, &[9, 9]);
        pool.reset(true, true);
        assert_eq!(pool.buffer_count(), 1);
        assert_eq!(pool.current_offset(), 0);
        assert_eq!(pool.read(0, 5), &[0, 0, 0, 0, 0]);

        pool.reset(false, false);
        assert_eq!(pool.buffer_count(), 0);
        assert_eq!(pool.bytes_allocated(), 0);
    }
}
