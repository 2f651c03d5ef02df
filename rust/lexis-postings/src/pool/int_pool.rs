use super::{
    BlockAllocator, DirectAllocator, INT_BLOCK_MASK, INT_BLOCK_SHIFT, INT_BLOCK_SIZE,
    MAX_INT_BLOCKS,
};

/// An append-only arena of `u32` values split into fixed-size blocks.
///
/// The indexing stages use it to keep one write cursor per (term, stream):
/// each cursor holds the absolute byte pool offset of the next byte to write.
pub struct IntBlockPool {
    buffers: Vec<Box<[u32]>>,
    /// Next free slot in the last buffer. Equals `INT_BLOCK_SIZE` while no
    /// buffer is allocated, so the first reservation allocates one.
    int_upto: usize,
    allocator: Box<dyn BlockAllocator<u32>>,
}

impl IntBlockPool {
    pub fn new(allocator: Box<dyn BlockAllocator<u32>>) -> IntBlockPool {
        IntBlockPool {
            buffers: Vec::new(),
            int_upto: INT_BLOCK_SIZE,
            allocator,
        }
    }

    /// Appends a fresh block and makes it the active write target.
    pub fn next_buffer(&mut self) {
        assert!(
            self.buffers.len() < MAX_INT_BLOCKS,
            "int pool exceeded its addressable range"
        );
        let block = self.allocator.allocate_block(INT_BLOCK_SIZE);
        self.buffers.push(block);
        self.int_upto = 0;
    }

    /// Reserves `count` consecutive slots inside one block and returns the
    /// global offset of the first one.
    pub fn reserve(&mut self, count: usize) -> usize {
        assert!(count <= INT_BLOCK_SIZE, "cannot reserve {count} ints");
        if self.int_upto + count > INT_BLOCK_SIZE {
            self.next_buffer();
        }
        let start = self.int_offset() + self.int_upto;
        self.int_upto += count;
        start
    }

    /// Global offset of the first slot in the active block.
    pub fn int_offset(&self) -> usize {
        self.buffers.len().saturating_sub(1) << INT_BLOCK_SHIFT
    }

    /// Next writable global offset.
    pub fn current_offset(&self) -> usize {
        if self.buffers.is_empty() {
            0
        } else {
            self.int_offset() + self.int_upto
        }
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.buffers.len() * INT_BLOCK_SIZE * std::mem::size_of::<u32>()
    }

    #[inline]
    pub fn get(&self, offset: usize) -> u32 {
        let (block, pos) = self.locate(offset);
        self.buffers[block][pos]
    }

    #[inline]
    pub fn set(&mut self, offset: usize, value: u32) {
        let (block, pos) = self.locate(offset);
        self.buffers[block][pos] = value;
    }

    /// Resets the pool. With `reuse_first` the first block is kept (and zeroed
    /// when `zero_fill` is set), every other block goes back to the allocator.
    pub fn reset(&mut self, zero_fill: bool, reuse_first: bool) {
        if self.buffers.is_empty() {
            return;
        }
        let keep = usize::from(reuse_first);
        for block in self.buffers.drain(keep..) {
            self.allocator.release_block(block);
        }
        if reuse_first {
            if zero_fill {
                self.buffers[0].fill(0);
            }
            self.int_upto = 0;
        } else {
            self.int_upto = INT_BLOCK_SIZE;
        }
    }

    #[inline]
    fn locate(&self, offset: usize) -> (usize, usize) {
        let block = offset >> INT_BLOCK_SHIFT;
        assert!(
            block < self.buffers.len(),
            "int pool offset {offset} is out of bounds"
        );
        (block, offset & INT_BLOCK_MASK)
    }
}

impl Default for IntBlockPool {
    fn default() -> Self {
        Self::new(Box::new(DirectAllocator))
    }
}

impl std::fmt::Debug for IntBlockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntBlockPool")
            .field("buffers", &self.buffers.len())
            .field("int_upto", &self.int_upto)
            .finish_non_exhaustive()
    }
}
